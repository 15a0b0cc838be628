//! Construction-time configuration errors.
//!
//! Runtime outcomes (full, empty, absent, duplicate) are reported through
//! `bool`, `Option` and `Result<(), T>` returns on the containers themselves.

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("pipe capacity {requested} does not fit 32-bit ring counters")]
    CapacityOverflow { requested: usize },

    #[error("skip list max level {requested} is outside 1..={max}")]
    InvalidMaxLevel { requested: usize, max: usize },
}
