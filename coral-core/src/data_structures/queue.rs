//! Unbounded lock-free FIFO queue (Michael-Scott with helping).
//!
//! The queue keeps a dummy node at `head`; the first real element is always
//! `head.next`. A permanent sentinel node that points to itself marks the end
//! of the list: a node whose `next` is the sentinel is the current last node.
//! The sentinel is also the first dummy, so a fresh queue looks like:
//!
//! ```text
//! head ─┐
//! tail ─┴─► [S] ─┐
//!            ▲   │
//!            └───┘
//! ```
//!
//! and after pushing `a` and `b` (and popping nothing):
//!
//! ```text
//! head ──► [S] ──► [a] ──► [b] ──► S
//!                           ▲
//!                     tail ─┘
//! ```
//!
//! Producers link at `tail.next` and then try once to swing `tail`. A producer
//! (or consumer) that sees `tail.next` is not the sentinel finishes the stalled
//! swing before doing its own work, so one slow producer never blocks others.
//! Consumers advance `head`; the node that becomes the new dummy still holds
//! the popped element, which the winning consumer moves out.

use std::mem::MaybeUninit;
use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};

use crossbeam_utils::{Backoff, CachePadded};

use crate::data_structures::{Consumer, Producer};
use crate::guard::Guard;

struct QueueNode<T> {
    elem: MaybeUninit<T>,
    next: AtomicPtr<QueueNode<T>>,
}

impl<T> QueueNode<T> {
    fn alloc(elem: MaybeUninit<T>, next: *mut QueueNode<T>) -> *mut Self {
        Box::into_raw(Box::new(QueueNode {
            elem,
            next: AtomicPtr::new(next),
        }))
    }

    /// Free a node without touching its element.
    ///
    /// # Safety
    /// `ptr` must come from `alloc` and must not be used afterwards.
    unsafe fn dealloc_node(ptr: *mut Self) {
        unsafe { drop(Box::from_raw(ptr)) };
    }
}

/// Lock-free multi-producer / multi-consumer FIFO queue.
pub struct Queue<T, G: Guard> {
    head: CachePadded<AtomicPtr<QueueNode<T>>>,
    tail: CachePadded<AtomicPtr<QueueNode<T>>>,
    sentinel: *mut QueueNode<T>,
    guard: G,
}

impl<T, G: Guard> Queue<T, G> {
    pub fn new() -> Self {
        let sentinel = QueueNode::alloc(MaybeUninit::uninit(), ptr::null_mut());
        // Safety: freshly allocated and private.
        unsafe { (*sentinel).next.store(sentinel, Ordering::Relaxed) };

        Queue {
            head: CachePadded::new(AtomicPtr::new(sentinel)),
            tail: CachePadded::new(AtomicPtr::new(sentinel)),
            sentinel,
            guard: G::default(),
        }
    }

    /// Get the guard that retired nodes are handed to.
    pub fn guard(&self) -> &G {
        &self.guard
    }

    pub fn is_empty(&self) -> bool {
        let _guard = G::pin();
        let head = self.head.load(Ordering::Acquire);
        unsafe { (*head).next.load(Ordering::Acquire) == self.sentinel }
    }

    /// Append `value` at the tail.
    pub fn push_back(&self, value: T) {
        let _guard = G::pin();
        let backoff = Backoff::new();
        let node = QueueNode::alloc(MaybeUninit::new(value), self.sentinel);

        loop {
            let tail = self.tail.load(Ordering::Acquire);
            // Safety: `tail` was reachable after we pinned, so it is not freed yet.
            let next = unsafe { (*tail).next.load(Ordering::Acquire) };

            if next != self.sentinel {
                self.help_tail(tail, next);
                continue;
            }

            if unsafe {
                (*tail)
                    .next
                    .compare_exchange(self.sentinel, node, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
            } {
                // Best effort; whoever sees the lag next finishes the swing.
                let _ = self.tail.compare_exchange(
                    tail,
                    node,
                    Ordering::AcqRel,
                    Ordering::Relaxed,
                );
                return;
            }
            backoff.spin();
        }
    }

    /// Remove the element at the head, or `None` if the queue is empty.
    pub fn pop_front(&self) -> Option<T> {
        let _guard = G::pin();
        let backoff = Backoff::new();

        loop {
            let head = self.head.load(Ordering::Acquire);
            let tail = self.tail.load(Ordering::Acquire);
            let next = unsafe { (*head).next.load(Ordering::Acquire) };

            if head == tail {
                if next == self.sentinel {
                    return None;
                }
                // Head must not overtake a lagging tail.
                self.help_tail(tail, next);
                continue;
            }

            if self
                .head
                .compare_exchange(head, next, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                // Safety: winning the head CAS makes this thread the only
                // reader of `next.elem`; `next` is now the dummy.
                let elem = unsafe { ptr::read((*next).elem.as_ptr()) };
                if head != self.sentinel {
                    unsafe { self.guard.defer_destroy(head, QueueNode::dealloc_node) };
                }
                return Some(elem);
            }
            backoff.spin();
        }
    }

    fn help_tail(&self, tail: *mut QueueNode<T>, next: *mut QueueNode<T>) {
        if self
            .tail
            .compare_exchange(tail, next, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
        {
            tracing::trace!("advanced lagging queue tail");
        }
    }
}

impl<T, G: Guard> Default for Queue<T, G> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, G: Guard> Drop for Queue<T, G> {
    fn drop(&mut self) {
        let sentinel = self.sentinel;
        let mut released = 0usize;
        let mut curr = *self.head.get_mut();
        let mut is_dummy = true;

        // The dummy at head holds no live element; every node after it does.
        unsafe {
            loop {
                let next = *(*curr).next.get_mut();
                if !is_dummy {
                    (*curr).elem.assume_init_drop();
                    released += 1;
                }
                if curr != sentinel {
                    QueueNode::dealloc_node(curr);
                }
                if next == sentinel {
                    break;
                }
                curr = next;
                is_dummy = false;
            }
            QueueNode::dealloc_node(sentinel);
        }

        if released > 0 {
            tracing::debug!(released, "dropping queue with live elements");
        }
    }
}

// Safety: elements move between threads through push/pop; the sentinel pointer
// is owned by the queue and freed only on drop.
unsafe impl<T: Send, G: Guard> Send for Queue<T, G> {}
unsafe impl<T: Send, G: Guard> Sync for Queue<T, G> {}

impl<T, G: Guard> Producer<T> for Queue<T, G> {
    /// Never fails: the queue is unbounded and `push_back` retries internally.
    #[inline]
    fn try_produce(&self, value: T) -> Result<(), T> {
        self.push_back(value);
        Ok(())
    }
}

impl<T, G: Guard> Consumer<T> for Queue<T, G> {
    #[inline]
    fn try_consume(&self) -> Option<T> {
        self.pop_front()
    }
}
