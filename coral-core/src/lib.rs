pub mod common_tests;
pub mod data_structures;
pub mod error;
pub mod guard;

pub use data_structures::{
    Consumer, OrderedSet, Pipe, PipeConsumer, PipeProducer, Producer, Queue, SkipList, Stack,
};
pub use error::ConfigError;
pub use guard::{DeferredGuard, Guard};
