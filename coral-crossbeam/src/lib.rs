//! Crossbeam-based reclamation for coral containers.
//!
//! This crate provides `EpochGuard`, an implementation of the `Guard` trait
//! using crossbeam-epoch for memory reclamation, and `SkipMapSet`, a
//! crossbeam-skiplist `OrderedSet` to measure the skip list against.
//!
//! # Usage
//!
//! ```ignore
//! use coral_core::Queue;
//! use coral_crossbeam::EpochGuard;
//!
//! let queue: Queue<i32, EpochGuard> = Queue::new();
//! queue.push_back(42);
//! ```

pub mod epoch_guard;
pub mod skip_map_set;

pub use epoch_guard::EpochGuard;
pub use skip_map_set::SkipMapSet;
