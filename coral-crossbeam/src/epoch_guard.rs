//! Epoch-based guard implementation using crossbeam-epoch.
//!
//! # Design
//!
//! `EpochGuard` is a zero-sized type that schedules destruction using the global
//! epoch collector. Containers parameterized with `EpochGuard` get epoch-based
//! memory reclamation:
//!
//! ```text
//! SkipList<i64, EpochGuard> / Queue<T, EpochGuard> / Stack<T, EpochGuard>
//!     │
//!     └── Uses crossbeam-epoch for memory safety
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use coral_core::SkipList;
//! use coral_crossbeam::EpochGuard;
//!
//! let set: SkipList<i32, EpochGuard> = SkipList::new();
//! set.insert(42);
//! set.insert(17);
//! assert!(set.lookup(&42));
//! set.delete(&42);
//! ```

use coral_core::guard::Guard;
use crossbeam_epoch::{self as epoch, Guard as CrossbeamGuard};

/// Epoch-based memory reclamation guard.
///
/// Nodes handed to `defer_destroy` are not freed until every thread that was
/// pinned at the time has unpinned. Unlike `DeferredGuard`, memory is
/// reclaimed while the container is still in use, so this is the guard for
/// long-running containers.
///
/// # Performance
///
/// - **Pin overhead**: Very low (thread-local check)
/// - **Reclamation**: Batched, amortized O(1) per node
/// - **Memory**: May accumulate while some thread stays pinned
///
#[derive(Clone, Copy, Default)]
pub struct EpochGuard {
    // Zero-sized - all state is in the global epoch collector
}

impl EpochGuard {
    pub fn new() -> Self {
        EpochGuard {}
    }

    /// Nudge the global collector to run pending destructions.
    ///
    /// Mostly useful in tests that want retired nodes freed before checking
    /// drop counts.
    pub fn flush() {
        epoch::pin().flush();
    }
}

impl Guard for EpochGuard {
    /// A pinned crossbeam guard; keeps the thread's epoch from advancing.
    type ReadGuard = CrossbeamGuard;

    fn pin() -> Self::ReadGuard {
        epoch::pin()
    }

    unsafe fn defer_destroy<N>(&self, node: *mut N, dealloc: unsafe fn(*mut N)) {
        // The destruction runs once all threads have advanced past the
        // current epoch.
        let guard = epoch::pin();
        unsafe {
            guard.defer_unchecked(move || {
                dealloc(node);
            });
        }
    }
}
