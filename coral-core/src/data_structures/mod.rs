//! Lock-free containers.
//!
//! # Organization
//!
//! - [`pipe`] - Wait-free SPSC ring channel
//! - [`stack`] - Treiber stack
//! - [`queue`] - Michael-Scott queue
//! - [`sorted`] - Lock-free sorted collections (SkipList)
//! - [`channel`], [`ordered_set`] - Capability traits shared by the above

pub mod channel;
pub mod ordered_set;
pub mod pipe;
pub mod queue;
pub mod sorted;
pub mod stack;

pub use channel::{Consumer, Producer};
pub use ordered_set::OrderedSet;
pub use pipe::{MIN_PIPE_CAPACITY, Pipe, PipeConsumer, PipeProducer};
pub use queue::Queue;
pub use sorted::SkipList;
pub use stack::Stack;
