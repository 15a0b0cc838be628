//! Uniform produce/consume capability shared by `Pipe`, `Stack` and `Queue`.
//!
//! Benchmarks and the shared stress suites are written against these two
//! traits so any of the containers (or a foreign queue wrapped in them) can be
//! dropped in.

use std::sync::Arc;

/// Non-blocking insertion side of a buffer.
pub trait Producer<T> {
    /// Try to hand `value` to the buffer without blocking.
    ///
    /// Returns the value back when the attempt did not take effect (buffer
    /// full, or a lost CAS race for single-shot containers).
    fn try_produce(&self, value: T) -> Result<(), T>;
}

/// Non-blocking removal side of a buffer.
pub trait Consumer<T> {
    /// Try to take one element without blocking.
    fn try_consume(&self) -> Option<T>;
}

impl<T, P: Producer<T> + ?Sized> Producer<T> for &P {
    #[inline]
    fn try_produce(&self, value: T) -> Result<(), T> {
        (**self).try_produce(value)
    }
}

impl<T, C: Consumer<T> + ?Sized> Consumer<T> for &C {
    #[inline]
    fn try_consume(&self) -> Option<T> {
        (**self).try_consume()
    }
}

impl<T, P: Producer<T> + ?Sized> Producer<T> for Arc<P> {
    #[inline]
    fn try_produce(&self, value: T) -> Result<(), T> {
        (**self).try_produce(value)
    }
}

impl<T, C: Consumer<T> + ?Sized> Consumer<T> for Arc<C> {
    #[inline]
    fn try_consume(&self) -> Option<T> {
        (**self).try_consume()
    }
}
