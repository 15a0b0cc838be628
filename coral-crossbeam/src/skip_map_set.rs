//! `OrderedSet` over crossbeam-skiplist, used as a baseline next to
//! `SkipList<_, EpochGuard>`.

use std::sync::atomic::{AtomicU64, Ordering};

use coral_core::OrderedSet;
use crossbeam_skiplist::SkipMap;

/// Ordered set backed by a `SkipMap` keyed by the element.
///
/// `SkipSet::insert` replaces an equal entry, so it cannot report whether the
/// element was already present. Each insert here stores a fresh ticket with
/// `get_or_insert` instead: the call won iff the entry it gets back carries
/// its own ticket.
pub struct SkipMapSet<T> {
    map: SkipMap<T, u64>,
    tickets: AtomicU64,
}

impl<T> SkipMapSet<T>
where
    T: Ord + Send + 'static,
{
    pub fn new() -> Self {
        SkipMapSet {
            map: SkipMap::new(),
            tickets: AtomicU64::new(0),
        }
    }
}

impl<T> Default for SkipMapSet<T>
where
    T: Ord + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> OrderedSet<T> for SkipMapSet<T>
where
    T: Ord + Send + 'static,
{
    fn lookup(&self, x: &T) -> bool {
        self.map.contains_key(x)
    }

    fn insert(&self, x: T) -> bool {
        let ticket = self.tickets.fetch_add(1, Ordering::Relaxed);
        *self.map.get_or_insert(x, ticket).value() == ticket
    }

    fn delete(&self, x: &T) -> bool {
        self.map.remove(x).is_some()
    }

    fn to_vec(&self) -> Vec<T>
    where
        T: Clone,
    {
        self.map.iter().map(|entry| entry.key().clone()).collect()
    }

    fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}
