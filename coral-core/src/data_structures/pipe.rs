//! Wait-free single-producer / single-consumer ring channel.
//!
//! ```text
//!            head (consumer)           tail (producer)
//!               │                         │
//!   [ . . . . | x | x | x | x | x | . . . | . ]     capacity = 2^k
//!               └──── valid elements ─────┘
//! ```
//!
//! `head` and `tail` are free-running `u32` counters, each on its own cache
//! line. A slot index is `counter & mask`. The ring is empty when
//! `tail == head` and full when `tail - head == capacity` (wrapping), so every
//! slot is usable.
//!
//! Each side keeps a private copy of the last value it observed for the
//! opposite counter and only reloads the shared atomic when the copy says
//! full (producer) or empty (consumer). Every call does at most one extra
//! atomic load and never loops.
//!
//! The SPSC discipline is enforced by ownership: a `Pipe` is `Send` but not
//! `Sync`, and `split` hands out exactly one `PipeProducer` and one
//! `PipeConsumer`.

use std::cell::{Cell, UnsafeCell};
use std::mem::MaybeUninit;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use crossbeam_utils::CachePadded;

use crate::data_structures::{Consumer, Producer};
use crate::error::ConfigError;

/// Smallest ring a pipe is ever built with.
pub const MIN_PIPE_CAPACITY: usize = 2;

/// Largest capacity representable with 32-bit wrapping counters.
const MAX_PIPE_CAPACITY: usize = 1 << 31;

struct Ring<T> {
    head: CachePadded<AtomicU32>,
    tail: CachePadded<AtomicU32>,
    mask: u32,
    buffer: Box<[UnsafeCell<MaybeUninit<T>>]>,
}

// Safety: the producer only writes slots in [tail, head + capacity) and the
// consumer only reads slots in [head, tail); publication goes through the
// Release stores on `tail` / `head`.
unsafe impl<T: Send> Send for Ring<T> {}
unsafe impl<T: Send> Sync for Ring<T> {}

impl<T> Ring<T> {
    fn with_counters(capacity: usize, start: u32) -> Self {
        let buffer = (0..capacity)
            .map(|_| UnsafeCell::new(MaybeUninit::uninit()))
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Ring {
            head: CachePadded::new(AtomicU32::new(start)),
            tail: CachePadded::new(AtomicU32::new(start)),
            mask: (capacity - 1) as u32,
            buffer,
        }
    }

    #[inline]
    fn capacity(&self) -> u32 {
        self.mask.wrapping_add(1)
    }

    #[inline]
    fn is_full(&self, head: u32, tail: u32) -> bool {
        tail.wrapping_sub(head) == self.capacity()
    }

    #[inline]
    fn slot(&self, counter: u32) -> &UnsafeCell<MaybeUninit<T>> {
        &self.buffer[(counter & self.mask) as usize]
    }

    /// # Safety
    /// The caller must be the only producer of this ring.
    #[inline]
    unsafe fn produce(&self, head_cache: &Cell<u32>, value: T) -> Result<(), T> {
        let tail = self.tail.load(Ordering::Relaxed);
        let mut head = head_cache.get();

        if self.is_full(head, tail) {
            head = self.head.load(Ordering::Acquire);
            head_cache.set(head);
            if self.is_full(head, tail) {
                return Err(value);
            }
        }

        unsafe { (*self.slot(tail).get()).write(value) };
        self.tail.store(tail.wrapping_add(1), Ordering::Release);
        Ok(())
    }

    /// # Safety
    /// The caller must be the only consumer of this ring.
    #[inline]
    unsafe fn consume(&self, tail_cache: &Cell<u32>) -> Option<T> {
        let head = self.head.load(Ordering::Relaxed);
        let mut tail = tail_cache.get();

        if head == tail {
            tail = self.tail.load(Ordering::Acquire);
            tail_cache.set(tail);
            if head == tail {
                return None;
            }
        }

        let value = unsafe { (*self.slot(head).get()).assume_init_read() };
        self.head.store(head.wrapping_add(1), Ordering::Release);
        Some(value)
    }
}

impl<T> Drop for Ring<T> {
    fn drop(&mut self) {
        let tail = *self.tail.get_mut();
        let mut head = *self.head.get_mut();
        while head != tail {
            let slot = &mut self.buffer[(head & self.mask) as usize];
            unsafe { slot.get_mut().assume_init_drop() };
            head = head.wrapping_add(1);
        }
    }
}

/// Bounded SPSC channel over a power-of-two ring.
///
/// A `Pipe` owns both ends and can be used from one thread, or `split` into
/// halves for a producer thread and a consumer thread.
pub struct Pipe<T> {
    ring: Arc<Ring<T>>,
    head_cache: Cell<u32>,
    tail_cache: Cell<u32>,
}

impl<T> Pipe<T> {
    /// Create a pipe holding at least `capacity` elements.
    ///
    /// The real capacity is the next power of two not below
    /// `max(capacity, MIN_PIPE_CAPACITY)`.
    ///
    /// # Panics
    /// If that power of two exceeds `2^31`. Use [`Pipe::try_new`] to handle
    /// this case.
    pub fn new(capacity: usize) -> Self {
        Self::try_new(capacity).unwrap_or_else(|err| panic!("{err}"))
    }

    /// Fallible variant of [`Pipe::new`].
    pub fn try_new(capacity: usize) -> Result<Self, ConfigError> {
        let rounded = capacity
            .max(MIN_PIPE_CAPACITY)
            .checked_next_power_of_two()
            .filter(|&rounded| rounded <= MAX_PIPE_CAPACITY)
            .ok_or(ConfigError::CapacityOverflow {
                requested: capacity,
            })?;

        tracing::debug!(requested = capacity, capacity = rounded, "creating pipe");
        Ok(Self::from_ring(Ring::with_counters(rounded, 0)))
    }

    fn from_ring(ring: Ring<T>) -> Self {
        let start = ring.head.load(Ordering::Relaxed);
        Pipe {
            ring: Arc::new(ring),
            head_cache: Cell::new(start),
            tail_cache: Cell::new(start),
        }
    }

    /// Number of slots in the ring.
    pub fn capacity(&self) -> usize {
        self.ring.capacity() as usize
    }

    /// Append `value`, or hand it back if the pipe is full.
    #[inline]
    pub fn try_produce(&self, value: T) -> Result<(), T> {
        // Safety: `Pipe` is !Sync and not Clone, so this is the only producer.
        unsafe { self.ring.produce(&self.head_cache, value) }
    }

    /// Take the oldest element, if any.
    #[inline]
    pub fn try_consume(&self) -> Option<T> {
        // Safety: `Pipe` is !Sync and not Clone, so this is the only consumer.
        unsafe { self.ring.consume(&self.tail_cache) }
    }

    /// Separate the two ends so they can live on different threads.
    pub fn split(self) -> (PipeProducer<T>, PipeConsumer<T>) {
        let producer = PipeProducer {
            ring: Arc::clone(&self.ring),
            head_cache: self.head_cache,
        };
        let consumer = PipeConsumer {
            ring: self.ring,
            tail_cache: self.tail_cache,
        };
        (producer, consumer)
    }
}

/// Producing end of a split [`Pipe`].
pub struct PipeProducer<T> {
    ring: Arc<Ring<T>>,
    head_cache: Cell<u32>,
}

impl<T> PipeProducer<T> {
    #[inline]
    pub fn try_produce(&self, value: T) -> Result<(), T> {
        // Safety: exactly one producer half exists per ring and it is !Sync.
        unsafe { self.ring.produce(&self.head_cache, value) }
    }

    pub fn capacity(&self) -> usize {
        self.ring.capacity() as usize
    }
}

/// Consuming end of a split [`Pipe`].
pub struct PipeConsumer<T> {
    ring: Arc<Ring<T>>,
    tail_cache: Cell<u32>,
}

impl<T> PipeConsumer<T> {
    #[inline]
    pub fn try_consume(&self) -> Option<T> {
        // Safety: exactly one consumer half exists per ring and it is !Sync.
        unsafe { self.ring.consume(&self.tail_cache) }
    }

    pub fn capacity(&self) -> usize {
        self.ring.capacity() as usize
    }
}

impl<T> Producer<T> for Pipe<T> {
    #[inline]
    fn try_produce(&self, value: T) -> Result<(), T> {
        Pipe::try_produce(self, value)
    }
}

impl<T> Consumer<T> for Pipe<T> {
    #[inline]
    fn try_consume(&self) -> Option<T> {
        Pipe::try_consume(self)
    }
}

impl<T> Producer<T> for PipeProducer<T> {
    #[inline]
    fn try_produce(&self, value: T) -> Result<(), T> {
        PipeProducer::try_produce(self, value)
    }
}

impl<T> Consumer<T> for PipeConsumer<T> {
    #[inline]
    fn try_consume(&self) -> Option<T> {
        PipeConsumer::try_consume(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    struct DropCounter(Arc<AtomicUsize>);

    impl Drop for DropCounter {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[rstest]
    #[case(0, 2)]
    #[case(1, 2)]
    #[case(2, 2)]
    #[case(3, 4)]
    #[case(5, 8)]
    #[case(64, 64)]
    #[case(1025, 2048)]
    fn test_capacity_rounding(#[case] requested: usize, #[case] expected: usize) {
        let pipe = Pipe::<u8>::new(requested);
        assert_eq!(pipe.capacity(), expected);
    }

    #[test]
    fn test_capacity_overflow() {
        assert_eq!(
            Pipe::<u8>::try_new(usize::MAX).err(),
            Some(ConfigError::CapacityOverflow {
                requested: usize::MAX
            })
        );
        assert!(Pipe::<u8>::try_new(MAX_PIPE_CAPACITY + 1).is_err());
    }

    #[test]
    fn test_fill_to_capacity() {
        let pipe = Pipe::new(5);

        for i in 0..8 {
            assert!(pipe.try_produce(i).is_ok(), "slot {} should be free", i);
        }
        assert_eq!(pipe.try_produce(8), Err(8));

        assert_eq!(pipe.try_consume(), Some(0));
        assert!(pipe.try_produce(8).is_ok());
        assert_eq!(pipe.try_produce(9), Err(9));
    }

    #[test]
    fn test_fifo_order() {
        let pipe = Pipe::new(4);
        assert_eq!(pipe.try_consume(), None);

        for round in 0..10 {
            for i in 0..3 {
                pipe.try_produce(round * 10 + i).unwrap();
            }
            for i in 0..3 {
                assert_eq!(pipe.try_consume(), Some(round * 10 + i));
            }
            assert_eq!(pipe.try_consume(), None);
        }
    }

    #[test]
    fn test_counter_wraparound() {
        let pipe = Pipe::from_ring(Ring::with_counters(4, u32::MAX - 5));

        for i in 0..40 {
            pipe.try_produce(i).unwrap();
            pipe.try_produce(i + 1000).unwrap();
            assert_eq!(pipe.try_consume(), Some(i));
            assert_eq!(pipe.try_consume(), Some(i + 1000));
        }

        for i in 0..4 {
            pipe.try_produce(i).unwrap();
        }
        assert_eq!(pipe.try_produce(4), Err(4));
    }

    #[test]
    fn test_drop_releases_pending_elements() {
        let drops = Arc::new(AtomicUsize::new(0));
        {
            let pipe = Pipe::new(8);
            for _ in 0..5 {
                assert!(pipe.try_produce(DropCounter(Arc::clone(&drops))).is_ok());
            }
            drop(pipe.try_consume());
            assert_eq!(drops.load(Ordering::Relaxed), 1);
        }
        assert_eq!(drops.load(Ordering::Relaxed), 5);
    }

    #[test]
    fn test_split_spsc_transfer() {
        const ITEMS: u64 = 200_000;
        let (tx, rx) = Pipe::new(64).split();
        assert_eq!(tx.capacity(), 64);
        assert_eq!(rx.capacity(), 64);

        let producer = thread::spawn(move || {
            for i in 0..ITEMS {
                let mut value = i;
                while let Err(rejected) = tx.try_produce(value) {
                    value = rejected;
                    std::hint::spin_loop();
                }
            }
        });

        let mut expected = 0;
        while expected < ITEMS {
            match rx.try_consume() {
                Some(value) => {
                    assert_eq!(value, expected);
                    expected += 1;
                }
                None => thread::yield_now(),
            }
        }

        producer.join().unwrap();
        assert_eq!(rx.try_consume(), None);
    }
}
