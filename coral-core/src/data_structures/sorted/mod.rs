//! Lock-free sorted collections.
//!
//! Collections are parameterized by a guard type `G: Guard` that determines
//! the memory reclamation strategy:
//!
//! - `DeferredGuard`: Testing - defers destruction until guard drops
//! - `EpochGuard`: Production - epoch-based reclamation (crossbeam-epoch)

pub mod skip_list;

pub use skip_list::{Elements, LEVEL_PROMOTION, MAX_LEVEL, SkipList, TowerState};
