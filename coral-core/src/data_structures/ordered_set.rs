//! Ordered set API shared by the skip list and the crossbeam baseline.
//!
//! ```text
//! Shared suites / benches
//!    ↓ use
//! OrderedSet (this trait)
//!    ↓ implemented by
//! SkipList<T, G>               ← lock-free towers, any Guard
//! SkipMapSet<T>                ← coral-crossbeam baseline over SkipMap
//! ```

/// A concurrent set of distinct, totally ordered elements.
///
/// All methods take `&self`; implementations are expected to be shareable
/// between threads.
pub trait OrderedSet<T: Ord> {
    /// Returns true if `x` is present.
    fn lookup(&self, x: &T) -> bool;

    /// Adds `x`. Returns false if an equal element is already present.
    fn insert(&self, x: T) -> bool;

    /// Removes `x`. Returns false if it was absent (or another thread removed
    /// it first).
    fn delete(&self, x: &T) -> bool;

    /// Snapshot of the present elements in ascending order.
    fn to_vec(&self) -> Vec<T>
    where
        T: Clone;

    fn is_empty(&self) -> bool;
}
