//! Common tests for `Producer` / `Consumer` containers.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

use crate::common_tests::fault::FaultInjector;
use crate::data_structures::{Consumer, Pipe, Producer};

/// Produce until the container accepts the value.
fn produce_blocking<P: Producer<T> + ?Sized, T>(producer: &P, mut value: T) {
    loop {
        match producer.try_produce(value) {
            Ok(()) => return,
            Err(rejected) => {
                value = rejected;
                thread::yield_now();
            }
        }
    }
}

/// Push 1, 2, 3 then expect them back in insertion order.
pub fn test_fifo_order<C>(channel: &C)
where
    C: Producer<i32> + Consumer<i32>,
{
    assert_eq!(channel.try_consume(), None);

    for i in 1..=3 {
        produce_blocking(channel, i);
    }

    assert_eq!(channel.try_consume(), Some(1));
    assert_eq!(channel.try_consume(), Some(2));
    assert_eq!(channel.try_consume(), Some(3));
    assert_eq!(channel.try_consume(), None);
}

/// Push 1, 2, 3 then expect them back in reverse order.
pub fn test_lifo_order<C>(channel: &C)
where
    C: Producer<i32> + Consumer<i32>,
{
    assert_eq!(channel.try_consume(), None);

    for i in 1..=3 {
        produce_blocking(channel, i);
    }

    assert_eq!(channel.try_consume(), Some(3));
    assert_eq!(channel.try_consume(), Some(2));
    assert_eq!(channel.try_consume(), Some(1));
    assert_eq!(channel.try_consume(), None);
}

/// Interleave produce/consume on one thread and check nothing is lost.
pub fn test_interleaved_sequential<C>(channel: &C)
where
    C: Producer<i32> + Consumer<i32>,
{
    let mut produced = 0;
    let mut consumed = Vec::new();

    for round in 0..100 {
        for _ in 0..(round % 5 + 1) {
            produce_blocking(channel, produced);
            produced += 1;
        }
        for _ in 0..(round % 3 + 1) {
            if let Some(v) = channel.try_consume() {
                consumed.push(v);
            }
        }
    }
    while let Some(v) = channel.try_consume() {
        consumed.push(v);
    }

    consumed.sort_unstable();
    assert_eq!(consumed, (0..produced).collect::<Vec<_>>());
}

/// Multi-producer / multi-consumer run: every produced value is consumed
/// exactly once.
pub fn test_no_lost_no_duplicates<C>(
    producers: usize,
    consumers: usize,
    per_producer: usize,
    faults: Arc<FaultInjector>,
) where
    C: Producer<usize> + Consumer<usize> + Default + Send + Sync + 'static,
{
    let channel = Arc::new(C::default());
    let total = producers * per_producer;
    let consumed = Arc::new(AtomicUsize::new(0));

    let producer_handles: Vec<_> = (0..producers)
        .map(|p| {
            let channel = Arc::clone(&channel);
            let faults = Arc::clone(&faults);
            thread::spawn(move || {
                for i in 0..per_producer {
                    faults.maybe_yield();
                    produce_blocking(&channel, p * per_producer + i);
                }
            })
        })
        .collect();

    let consumer_handles: Vec<_> = (0..consumers)
        .map(|_| {
            let channel = Arc::clone(&channel);
            let consumed = Arc::clone(&consumed);
            let faults = Arc::clone(&faults);
            thread::spawn(move || {
                let mut seen = Vec::new();
                while consumed.load(Ordering::Acquire) < total {
                    faults.maybe_yield();
                    match channel.try_consume() {
                        Some(v) => {
                            seen.push(v);
                            consumed.fetch_add(1, Ordering::AcqRel);
                        }
                        None => thread::yield_now(),
                    }
                }
                seen
            })
        })
        .collect();

    for handle in producer_handles {
        handle.join().unwrap();
    }

    let mut unique = HashSet::with_capacity(total);
    for handle in consumer_handles {
        for v in handle.join().unwrap() {
            assert!(unique.insert(v), "value {} consumed twice", v);
        }
    }

    assert_eq!(unique.len(), total, "lost values");
    assert_eq!(channel.try_consume(), None);
}

/// A bounded channel accepts exactly `capacity` values before rejecting,
/// and hands the rejected value back.
pub fn test_bounded_capacity<C>(channel: &C, capacity: usize)
where
    C: Producer<usize> + Consumer<usize>,
{
    for i in 0..capacity {
        assert_eq!(channel.try_produce(i), Ok(()), "rejected value {} below capacity", i);
    }
    assert_eq!(channel.try_produce(capacity), Err(capacity));

    assert_eq!(channel.try_consume(), Some(0));
    assert_eq!(channel.try_produce(capacity), Ok(()));
    assert_eq!(channel.try_produce(capacity + 1), Err(capacity + 1));
}

/// SPSC transfer through a pipe: the consumer drains everything the producer
/// sends, in order, even when the ring is much smaller than the stream.
pub fn test_pipe_drain_convergence(capacity: usize, items: u64, faults: Arc<FaultInjector>) {
    let (tx, rx) = Pipe::<u64>::new(capacity).split();

    let producer_faults = Arc::clone(&faults);
    let producer = thread::spawn(move || {
        for i in 0..items {
            producer_faults.maybe_yield();
            produce_blocking(&tx, i);
        }
    });

    let consumer = thread::spawn(move || {
        let mut expected = 0;
        while expected < items {
            faults.maybe_yield();
            match rx.try_consume() {
                Some(v) => {
                    assert_eq!(v, expected, "pipe reordered values");
                    expected += 1;
                }
                None => thread::yield_now(),
            }
        }
        assert_eq!(rx.try_consume(), None);
    });

    producer.join().unwrap();
    consumer.join().unwrap();
}
