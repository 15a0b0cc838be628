use std::alloc::{Layout, alloc, dealloc, handle_alloc_error};
use std::fmt;
use std::marker::PhantomData;
use std::ptr;
use std::sync::atomic::{AtomicPtr, AtomicU8, Ordering};

use crossbeam_utils::Backoff;

use crate::data_structures::OrderedSet;
use crate::error::ConfigError;
use crate::guard::Guard;

/// Hard cap on tower height.
pub const MAX_LEVEL: usize = 16;

/// A tower grows one more level with probability `1 / LEVEL_PROMOTION`.
/// Must be a power of two.
pub const LEVEL_PROMOTION: u32 = 4;

type TowerPtr<T> = *mut Tower<T>;

// =============================================================================
// SKIP LIST STRUCTURE
// =============================================================================
//
// Level 2:  HEAD ──────────────────────────► 30 ─────────────────► null
// Level 1:  HEAD ──────────► 10 ───────────► 30 ─────────────────► null
// Level 0:  HEAD ──────────► 10 ──► 20 ────► 30 ──────────► 40 ──► null
//
// HEAD is a tower of height `max_level` with no element; it orders before
// every element and is never deleted (its state is permanently DELETING so
// no traversal ever counts it).
//
// INVARIANTS:
// 1. Every level is sorted ascending.
// 2. A tower is linked bottom-up and becomes CREATED only after it is linked
//    at every one of its levels.
// 3. A tower is unlinked top-down, so two towers holding equal elements never
//    coexist at any level: an insert that meets an equal DELETING tower at
//    level 0 waits for it to leave level 0, which is its last level.
// 4. Only the thread whose CAS moved the state CREATED → DELETING unlinks the
//    tower and retires it, after it has left every level.
//
// =============================================================================
// TOWER LIFECYCLE
// =============================================================================
//
//   INIT ──(linked at all levels)──► CREATED ──(delete wins CAS)──► DELETING
//
// lookup and iteration count only CREATED towers. delete on an INIT tower
// reports absent. insert that meets an equal INIT tower waits until it is
// CREATED (duplicate, returns false) or DELETING (retries once it is gone).
//
// =============================================================================
// UNLINK (per level, for victim V with predecessor P and successor S)
// =============================================================================
//
// Before:   P ──► V ──► S
//
// Step 1 - self loop (CAS V.next from S to V, retried while inserts land
//          after V). S is now frozen and nothing can be linked after V:
//
//           P ──► V ─┐
//                 ▲──┘          (captured right = S)
//
// Step 2 - splice (walk from the hint to the tower whose next is V, CAS it
//          from V to S, retried when an insert lands between P and V):
//
//           P ────────► S
//                 V ─┐
//                 ▲──┘
//
// Step 3 - backlink (CAS V.next from V to P; cannot fail):
//
//           P ────────► S
//           ▲
//           V
//
// A traversal standing on V while it self-loops spins until step 3, then
// continues from P. Backlinks always point at a smaller element, so every
// spin waits on a tower ordered before the spinner's own position and no
// cycle of waiters can form.
//
// =============================================================================

/// Lifecycle of a tower.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TowerState {
    /// Allocated, being linked; not yet a member of the set.
    Init = 0,
    /// Linked at every level; a member of the set.
    Created = 1,
    /// Logically removed; being unlinked by its deleter.
    Deleting = 2,
}

impl TowerState {
    fn from_raw(raw: u8) -> Self {
        match raw {
            0 => TowerState::Init,
            1 => TowerState::Created,
            2 => TowerState::Deleting,
            other => panic!("INVARIANT VIOLATION: unknown tower state {}", other),
        }
    }
}

// ============================================================================
// Tower - element plus one forward link per level
// ============================================================================

/// A skip list tower.
///
/// Uses the flexible array member pattern: a single allocation holds the
/// header followed by `height` forward links.
///
#[repr(C)]
struct Tower<T> {
    value: Option<T>,
    height: usize,
    state: AtomicU8,
    // Flexible array: next[0..height] follows the header in the same allocation.
    next: [AtomicPtr<Tower<T>>; 0],
}

impl<T> Tower<T> {
    fn layout(height: usize) -> Layout {
        Layout::new::<Self>()
            .extend(Layout::array::<AtomicPtr<Self>>(height).expect("tower links overflow"))
            .expect("tower layout overflow")
            .0
            .pad_to_align()
    }

    fn alloc(value: Option<T>, height: usize, state: TowerState) -> TowerPtr<T> {
        unsafe {
            let layout = Self::layout(height);
            let ptr = alloc(layout) as TowerPtr<T>;
            if ptr.is_null() {
                handle_alloc_error(layout);
            }

            ptr::write(&raw mut (*ptr).value, value);
            ptr::write(&raw mut (*ptr).height, height);
            ptr::write(&raw mut (*ptr).state, AtomicU8::new(state as u8));

            let links = (&raw mut (*ptr).next) as *mut AtomicPtr<Self>;
            for level in 0..height {
                ptr::write(links.add(level), AtomicPtr::new(ptr::null_mut()));
            }

            ptr
        }
    }

    /// # Safety
    /// `ptr` must come from `alloc` and must not be used afterwards.
    unsafe fn dealloc_tower(ptr: TowerPtr<T>) {
        unsafe {
            let layout = Self::layout((*ptr).height);
            ptr::drop_in_place(&raw mut (*ptr).value);
            dealloc(ptr as *mut u8, layout);
        }
    }

    #[inline]
    unsafe fn next<'a>(tower: TowerPtr<T>, level: usize) -> &'a AtomicPtr<Self> {
        unsafe {
            debug_assert!(level < (*tower).height);
            let links = (&raw mut (*tower).next) as *mut AtomicPtr<Self>;
            &*links.add(level)
        }
    }

    #[inline]
    unsafe fn state(tower: TowerPtr<T>) -> TowerState {
        unsafe { TowerState::from_raw((*tower).state.load(Ordering::Acquire)) }
    }

    #[inline]
    unsafe fn key<'a>(tower: TowerPtr<T>) -> &'a T {
        match unsafe { &(*tower).value } {
            Some(value) => value,
            None => panic!("INVARIANT VIOLATION: head tower has no element"),
        }
    }
}

impl<T: Ord> Tower<T> {
    /// Head orders before everything.
    #[inline]
    unsafe fn is_before(tower: TowerPtr<T>, x: &T) -> bool {
        match unsafe { &(*tower).value } {
            None => true,
            Some(value) => value < x,
        }
    }

    #[inline]
    unsafe fn holds(tower: TowerPtr<T>, x: &T) -> bool {
        !tower.is_null() && unsafe { (*tower).value.as_ref() } == Some(x)
    }
}

// ============================================================================
// SkipList
// ============================================================================

/// Lock-free ordered set of distinct elements.
///
/// Deleted towers are handed to the guard `G` once they have been unlinked
/// from every level.
pub struct SkipList<T, G: Guard> {
    head: TowerPtr<T>,
    max_level: usize,
    guard: G,
}

impl<T: Ord, G: Guard> SkipList<T, G> {
    pub fn new() -> Self {
        Self::build(MAX_LEVEL)
    }

    /// Create a list whose towers never exceed `max_level` levels.
    pub fn with_max_level(max_level: usize) -> Result<Self, ConfigError> {
        if !(1..=MAX_LEVEL).contains(&max_level) {
            return Err(ConfigError::InvalidMaxLevel {
                requested: max_level,
                max: MAX_LEVEL,
            });
        }
        Ok(Self::build(max_level))
    }

    fn build(max_level: usize) -> Self {
        let head = Tower::alloc(None, max_level, TowerState::Deleting);
        tracing::debug!(max_level, "created skip list");
        SkipList {
            head,
            max_level,
            guard: G::default(),
        }
    }

    pub fn max_level(&self) -> usize {
        self.max_level
    }

    /// Get the guard that retired towers are handed to.
    pub fn guard(&self) -> &G {
        &self.guard
    }

    /// Geometric height: each extra level has probability 1 / LEVEL_PROMOTION.
    fn random_level(&self) -> usize {
        let promotions = fastrand::u32(..).trailing_zeros() / LEVEL_PROMOTION.trailing_zeros();
        (1 + promotions as usize).min(self.max_level)
    }

    /// Advance from `left` along `level` past every tower ordered before `x`.
    ///
    /// Returns the last tower before `x` and its successor (the first tower
    /// not before `x`, or null).
    ///
    /// # Safety
    /// Caller must be pinned and `left` must be before `x` with a link at `level`.
    unsafe fn walk(&self, mut left: TowerPtr<T>, level: usize, x: &T) -> (TowerPtr<T>, TowerPtr<T>) {
        let backoff = Backoff::new();
        loop {
            let right = unsafe { Tower::next(left, level).load(Ordering::Acquire) };
            if right == left {
                // `left` is between steps 1 and 3 of its unlink.
                backoff.snooze();
                continue;
            }
            if !right.is_null() && unsafe { Tower::is_before(right, x) } {
                left = right;
                continue;
            }
            return (left, right);
        }
    }

    /// Top-down search recording the predecessor of `x` at every level.
    ///
    /// Returns the predecessors and the first tower not before `x` at level 0.
    ///
    /// # Safety
    /// Caller must be pinned.
    unsafe fn find_links(&self, x: &T) -> ([TowerPtr<T>; MAX_LEVEL], TowerPtr<T>) {
        let mut links = [self.head; MAX_LEVEL];
        let mut left = self.head;
        let mut right = ptr::null_mut();

        for level in (0..self.max_level).rev() {
            (left, right) = unsafe { self.walk(left, level, x) };
            links[level] = left;
        }

        (links, right)
    }

    /// Returns true if `x` is a member of the set.
    pub fn lookup(&self, x: &T) -> bool {
        let _guard = G::pin();
        unsafe {
            let (_, candidate) = self.find_links(x);
            Tower::holds(candidate, x) && Tower::state(candidate) == TowerState::Created
        }
    }

    /// Add `x`. Returns false if an equal element is already present.
    pub fn insert(&self, x: T) -> bool {
        let _guard = G::pin();

        unsafe {
            let (_, candidate) = self.find_links(&x);
            if Tower::holds(candidate, &x) && Tower::state(candidate) == TowerState::Created {
                return false;
            }

            let height = self.random_level();
            let tower = Tower::alloc(Some(x), height, TowerState::Init);
            let key = Tower::key(tower);

            let Some(mut links) = self.link_bottom(tower, key) else {
                Tower::dealloc_tower(tower);
                return false;
            };

            let backoff = Backoff::new();
            for level in 1..height {
                loop {
                    let (left, right) = self.walk(links[level], level, key);
                    Tower::next(tower, level).store(right, Ordering::Release);
                    if Tower::next(left, level)
                        .compare_exchange(right, tower, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                    {
                        break;
                    }
                    links[level] = left;
                    tracing::trace!(level, "lost skip list link race, rescanning");
                    backoff.spin();
                }
            }

            (*tower).state.store(TowerState::Created as u8, Ordering::Release);
        }

        true
    }

    /// Link a fresh INIT tower at level 0.
    ///
    /// Returns the predecessors found by the successful scan, or `None` if an
    /// equal element became a member first.
    unsafe fn link_bottom(&self, tower: TowerPtr<T>, key: &T) -> Option<[TowerPtr<T>; MAX_LEVEL]> {
        let backoff = Backoff::new();
        loop {
            let (links, right) = unsafe { self.find_links(key) };

            if unsafe { Tower::holds(right, key) } {
                match unsafe { Tower::state(right) } {
                    TowerState::Created => return None,
                    state => {
                        tracing::trace!(?state, "waiting on equal tower");
                        backoff.snooze();
                        continue;
                    }
                }
            }

            unsafe {
                Tower::next(tower, 0).store(right, Ordering::Relaxed);
                if Tower::next(links[0], 0)
                    .compare_exchange(right, tower, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    return Some(links);
                }
            }
            tracing::trace!("lost skip list link race at level 0, rescanning");
            backoff.spin();
        }
    }

    /// Remove `x`. Returns false if it was not a member or another thread
    /// removed it first.
    pub fn delete(&self, x: &T) -> bool {
        let _guard = G::pin();

        unsafe {
            let (links, victim) = self.find_links(x);
            if !Tower::holds(victim, x) {
                return false;
            }

            if (*victim)
                .state
                .compare_exchange(
                    TowerState::Created as u8,
                    TowerState::Deleting as u8,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_err()
            {
                return false;
            }

            for level in (0..(*victim).height).rev() {
                self.unlink(victim, level, links[level]);
            }

            self.guard.defer_destroy(victim, Tower::dealloc_tower);
        }

        true
    }

    /// Unlink `victim` from `level`, starting the predecessor search at `hint`.
    ///
    /// # Safety
    /// Caller must be pinned and own `victim` (won its DELETING transition).
    unsafe fn unlink(&self, victim: TowerPtr<T>, level: usize, hint: TowerPtr<T>) {
        unsafe {
            let link = Tower::next(victim, level);
            let key = Tower::key(victim);

            // Step 1: self loop.
            let mut right = link.load(Ordering::Acquire);
            loop {
                debug_assert!(right != victim);
                match link.compare_exchange_weak(right, victim, Ordering::AcqRel, Ordering::Acquire) {
                    Ok(_) => break,
                    Err(actual) => right = actual,
                }
            }

            // Step 2: splice.
            let mut left = hint;
            loop {
                let (pred, next) = self.walk(left, level, key);
                if next != victim {
                    panic!(
                        "INVARIANT VIOLATION: tower left level {} before its deleter unlinked it",
                        level
                    );
                }
                left = pred;
                if Tower::next(pred, level)
                    .compare_exchange(victim, right, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    break;
                }
                tracing::trace!(level, "lost skip list splice race, rescanning");
            }

            // Step 3: backlink.
            if link
                .compare_exchange(victim, left, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                panic!("INVARIANT VIOLATION: self loop at level {} changed during unlink", level);
            }
        }
    }
}

impl<T: Ord, G: Guard> SkipList<T, G> {
    pub fn is_empty(&self) -> bool {
        let _guard = G::pin();
        let mut cursor = Cursor::new(self.head);
        unsafe {
            while let Some(tower) = cursor.advance() {
                if Tower::state(tower) == TowerState::Created {
                    return false;
                }
            }
        }
        true
    }

    /// Number of members. Walks the whole list.
    pub fn len(&self) -> usize {
        let _guard = G::pin();
        let mut cursor = Cursor::new(self.head);
        let mut count = 0;
        unsafe {
            while let Some(tower) = cursor.advance() {
                if Tower::state(tower) == TowerState::Created {
                    count += 1;
                }
            }
        }
        count
    }
}

impl<T: Ord + Clone, G: Guard> SkipList<T, G> {
    /// Iterate the members in ascending order.
    ///
    /// The iterator stays pinned for its whole lifetime. It is weakly
    /// consistent: elements inserted or deleted concurrently may or may not be
    /// observed, but no element is yielded twice and the output is ascending.
    pub fn elements(&self) -> Elements<'_, T, G> {
        let pin = G::pin();
        Elements {
            cursor: Cursor::new(self.head),
            _pin: pin,
            _list: PhantomData,
        }
    }

    pub fn to_vec(&self) -> Vec<T> {
        self.elements().collect()
    }
}

impl<T: Ord + fmt::Display, G: Guard> SkipList<T, G> {
    /// Render every level, top first:
    ///
    /// ```text
    /// [head] ----------> [2] -> [end]
    /// [head] -> [1] -> [2] -> [end]
    /// ```
    ///
    /// An empty list renders as the single line `[head] -> [end]`, whatever
    /// its level cap.
    pub fn dump(&self) -> String {
        let _guard = G::pin();
        let mut cursor = Cursor::new(self.head);
        let mut towers = Vec::new();

        unsafe {
            while let Some(tower) = cursor.advance() {
                if Tower::state(tower) == TowerState::Created {
                    towers.push((format!("[{}]", Tower::key(tower)), (*tower).height));
                }
            }
        }

        let top = towers.iter().map(|(_, height)| *height).max().unwrap_or(1);
        let mut out = String::new();

        for level in (0..top).rev() {
            out.push_str("[head]");
            let mut gap = String::new();
            for (label, height) in &towers {
                if *height > level {
                    out.push_str(" -");
                    out.push_str(&gap);
                    out.push_str("> ");
                    out.push_str(label);
                    gap.clear();
                } else {
                    gap.extend(std::iter::repeat_n('-', label.len() + 4));
                }
            }
            out.push_str(" -");
            out.push_str(&gap);
            out.push_str("> [end]\n");
        }

        out
    }
}

impl<T: Ord, G: Guard> Default for SkipList<T, G> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Ord, G: Guard> FromIterator<T> for SkipList<T, G> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let list = Self::new();
        for x in iter {
            list.insert(x);
        }
        list
    }
}

impl<T: Ord + Clone + fmt::Display, G: Guard> fmt::Display for SkipList<T, G> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, x) in self.elements().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", x)?;
        }
        write!(f, "]")
    }
}

impl<T, G: Guard> Drop for SkipList<T, G> {
    fn drop(&mut self) {
        let mut released = 0usize;

        unsafe {
            let mut curr = Tower::next(self.head, 0).load(Ordering::Relaxed);
            while !curr.is_null() {
                let next = Tower::next(curr, 0).load(Ordering::Relaxed);
                debug_assert!(
                    Tower::state(curr) == TowerState::Created,
                    "INVARIANT VIOLATION: tower in transition at drop"
                );
                Tower::dealloc_tower(curr);
                curr = next;
                released += 1;
            }
            Tower::dealloc_tower(self.head);
        }

        if released > 0 {
            tracing::debug!(released, "dropping skip list with live elements");
        }
    }
}

// Safety: towers are shared only through atomics and guarded reclamation;
// readers clone elements through `&T`, so `T: Sync` is required as well.
unsafe impl<T: Send + Sync, G: Guard> Send for SkipList<T, G> {}
unsafe impl<T: Send + Sync, G: Guard> Sync for SkipList<T, G> {}

impl<T: Ord + Clone, G: Guard> OrderedSet<T> for SkipList<T, G> {
    #[inline]
    fn lookup(&self, x: &T) -> bool {
        SkipList::lookup(self, x)
    }

    #[inline]
    fn insert(&self, x: T) -> bool {
        SkipList::insert(self, x)
    }

    #[inline]
    fn delete(&self, x: &T) -> bool {
        SkipList::delete(self, x)
    }

    fn to_vec(&self) -> Vec<T> {
        SkipList::to_vec(self)
    }

    fn is_empty(&self) -> bool {
        SkipList::is_empty(self)
    }
}

// ============================================================================
// Iteration
// ============================================================================

/// Level-0 walk that yields every tower once, in ascending order.
///
/// Following a backlink can lead to towers already passed; those (and the
/// head) are skipped by comparing with the last tower yielded.
struct Cursor<T> {
    current: TowerPtr<T>,
    last: TowerPtr<T>,
}

impl<T: Ord> Cursor<T> {
    fn new(head: TowerPtr<T>) -> Self {
        Cursor {
            current: head,
            last: ptr::null_mut(),
        }
    }

    /// # Safety
    /// Caller must stay pinned for as long as this cursor is used.
    unsafe fn advance(&mut self) -> Option<TowerPtr<T>> {
        let backoff = Backoff::new();
        loop {
            let next = unsafe { Tower::next(self.current, 0).load(Ordering::Acquire) };
            if next == self.current {
                backoff.snooze();
                continue;
            }
            if next.is_null() {
                return None;
            }

            self.current = next;
            let value = match unsafe { &(*next).value } {
                Some(value) => value,
                None => continue,
            };
            if !self.last.is_null() && value <= unsafe { Tower::key(self.last) } {
                continue;
            }

            self.last = next;
            return Some(next);
        }
    }
}

/// Ascending iterator over the members of a [`SkipList`].
pub struct Elements<'a, T, G: Guard> {
    cursor: Cursor<T>,
    _pin: G::ReadGuard,
    _list: PhantomData<&'a SkipList<T, G>>,
}

impl<T: Ord + Clone, G: Guard> Iterator for Elements<'_, T, G> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        unsafe {
            loop {
                let tower = self.cursor.advance()?;
                if Tower::state(tower) == TowerState::Created {
                    return Some(Tower::key(tower).clone());
                }
            }
        }
    }
}
