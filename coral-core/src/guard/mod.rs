//! Guard trait for memory reclamation strategies.
//!
//! Linked containers never free a node at the moment it is unlinked: another
//! thread may have loaded a pointer to it a moment earlier. Instead the node
//! is handed to the container's guard, which frees it once no reader can still
//! be holding it.
//!
//! # Design
//!
//! ```text
//! Stack<T, G: Guard> / Queue<T, G: Guard> / SkipList<T, G: Guard>
//!     │
//!     ├── ...<T, EpochGuard>      (production, coral-crossbeam)
//!     └── ...<T, DeferredGuard>   (testing, frees on container drop)
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use coral_core::{DeferredGuard, Stack};
//! use coral_crossbeam::EpochGuard;
//!
//! let stack: Stack<i32, EpochGuard> = Stack::new();
//! stack.push(42);
//!
//! let test_stack: Stack<i32, DeferredGuard> = Stack::new();
//! ```

mod deferred_guard;

pub use deferred_guard::DeferredGuard;

/// A memory reclamation guard that protects concurrent access to nodes.
///
/// - **EpochGuard**: Low overhead, batched reclamation (crossbeam-epoch)
/// - **DeferredGuard**: Defers all destruction until the container drops (testing)
///
/// # Safety Contract
///
/// Implementations must ensure that a node passed to `defer_destroy` is not
/// freed while any `ReadGuard` pinned before the call is still alive.
///
/// Guards are stored in containers and must be `Send + Sync`. The stored guard
/// only schedules destruction; pinning happens per operation.
///
pub trait Guard: Sized + Default + Send + Sync {
    /// An active guard that protects reads for its lifetime.
    ///
    /// For epoch-based guards this is a pinned `crossbeam_epoch::Guard`.
    /// For deferred guards this is `()`, since nothing is freed before the
    /// container itself drops.
    ///
    type ReadGuard: Sized;

    /// Pin an active read guard.
    ///
    /// Every pointer loaded from a container while the returned guard is alive
    /// stays dereferenceable until the guard drops.
    ///
    fn pin() -> Self::ReadGuard;

    /// Schedule a node for deferred destruction.
    ///
    /// # Safety
    ///
    /// - `node` must be a valid pointer previously allocated by the container
    /// - `node` must be unreachable for traversals that start after this call
    /// - `node` must be retired at most once
    /// - `dealloc` must be the correct deallocation function for `node`
    ///
    unsafe fn defer_destroy<N>(&self, node: *mut N, dealloc: unsafe fn(*mut N));
}
