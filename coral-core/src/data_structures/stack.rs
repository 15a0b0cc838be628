//! Unbounded lock-free LIFO stack (Treiber).
//!
//! ```text
//! top ──► [c] ──► [b] ──► [a] ──► null
//! ```
//!
//! `try_push` and `try_pop` make exactly one CAS attempt on `top` and report
//! whether it took effect; retrying is up to the caller (`push` / `pop` are
//! the retrying conveniences).
//!
//! A node's `next` is written once before the node is published and never
//! changes afterwards. Popped nodes are retired through the guard, so an
//! address cannot be recycled while a thread that loaded it is still pinned;
//! this is what keeps the CAS on `top` free of ABA.

use std::mem::ManuallyDrop;
use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};

use crossbeam_utils::Backoff;

use crate::data_structures::{Consumer, Producer};
use crate::guard::Guard;

struct StackNode<T> {
    elem: ManuallyDrop<T>,
    next: *mut StackNode<T>,
}

impl<T> StackNode<T> {
    fn alloc(elem: T, next: *mut StackNode<T>) -> *mut Self {
        Box::into_raw(Box::new(StackNode {
            elem: ManuallyDrop::new(elem),
            next,
        }))
    }

    /// Free a node whose element has already been moved out.
    ///
    /// # Safety
    /// `ptr` must come from `alloc` and must not be used afterwards.
    unsafe fn dealloc_node(ptr: *mut Self) {
        unsafe { drop(Box::from_raw(ptr)) };
    }

    /// Reclaim a node that was never published, returning its element.
    ///
    /// # Safety
    /// `ptr` must come from `alloc` and no other thread may have seen it.
    unsafe fn into_elem(ptr: *mut Self) -> T {
        let mut node = unsafe { Box::from_raw(ptr) };
        unsafe { ManuallyDrop::take(&mut node.elem) }
    }
}

/// Lock-free multi-producer / multi-consumer LIFO stack.
pub struct Stack<T, G: Guard> {
    top: AtomicPtr<StackNode<T>>,
    guard: G,
}

impl<T, G: Guard> Stack<T, G> {
    pub fn new() -> Self {
        Stack {
            top: AtomicPtr::new(ptr::null_mut()),
            guard: G::default(),
        }
    }

    /// Get the guard that retired nodes are handed to.
    pub fn guard(&self) -> &G {
        &self.guard
    }

    pub fn is_empty(&self) -> bool {
        self.top.load(Ordering::Acquire).is_null()
    }

    /// Make a single attempt to push `value`.
    ///
    /// Returns the value back if another thread changed `top` between the
    /// read and the CAS.
    pub fn try_push(&self, value: T) -> Result<(), T> {
        let _guard = G::pin();
        let top = self.top.load(Ordering::Acquire);
        let node = StackNode::alloc(value, top);

        match self
            .top
            .compare_exchange(top, node, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => Ok(()),
            // Safety: the CAS failed, so `node` was never published.
            Err(_) => Err(unsafe { StackNode::into_elem(node) }),
        }
    }

    /// Make a single attempt to pop the top element.
    ///
    /// Returns `None` when the stack is empty or the CAS lost a race.
    pub fn try_pop(&self) -> Option<T> {
        let _guard = G::pin();
        let top = self.top.load(Ordering::Acquire);
        if top.is_null() {
            return None;
        }

        // Safety: `top` is protected by the pin even if another thread pops it.
        let next = unsafe { (*top).next };
        self.top
            .compare_exchange(top, next, Ordering::AcqRel, Ordering::Acquire)
            .ok()?;

        // Safety: winning the CAS transfers ownership of `top` to this thread.
        unsafe { Some(self.take_popped(top)) }
    }

    /// Push `value`, retrying with backoff until the CAS succeeds.
    pub fn push(&self, value: T) {
        let _guard = G::pin();
        let backoff = Backoff::new();
        let node = StackNode::alloc(value, ptr::null_mut());

        loop {
            let top = self.top.load(Ordering::Acquire);
            // Safety: `node` is still private to this thread.
            unsafe { (*node).next = top };
            if self
                .top
                .compare_exchange_weak(top, node, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return;
            }
            backoff.spin();
        }
    }

    /// Pop the top element, retrying with backoff until it succeeds or the
    /// stack is observed empty.
    pub fn pop(&self) -> Option<T> {
        let _guard = G::pin();
        let backoff = Backoff::new();

        loop {
            let top = self.top.load(Ordering::Acquire);
            if top.is_null() {
                return None;
            }

            let next = unsafe { (*top).next };
            if self
                .top
                .compare_exchange_weak(top, next, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return unsafe { Some(self.take_popped(top)) };
            }
            backoff.spin();
        }
    }

    /// # Safety
    /// The caller must have unlinked `node` with a successful CAS on `top`.
    unsafe fn take_popped(&self, node: *mut StackNode<T>) -> T {
        unsafe {
            let elem = ptr::read(&*(*node).elem);
            self.guard.defer_destroy(node, StackNode::dealloc_node);
            elem
        }
    }
}

impl<T, G: Guard> Default for Stack<T, G> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, G: Guard> Drop for Stack<T, G> {
    fn drop(&mut self) {
        let mut released = 0usize;
        let mut curr = *self.top.get_mut();

        while !curr.is_null() {
            unsafe {
                let mut node = Box::from_raw(curr);
                curr = node.next;
                ManuallyDrop::drop(&mut node.elem);
            }
            released += 1;
        }

        if released > 0 {
            tracing::debug!(released, "dropping stack with live elements");
        }
    }
}

// Safety: elements move between threads through push/pop; nodes are shared
// only through atomics and guarded reclamation.
unsafe impl<T: Send, G: Guard> Send for Stack<T, G> {}
unsafe impl<T: Send, G: Guard> Sync for Stack<T, G> {}

impl<T, G: Guard> Producer<T> for Stack<T, G> {
    #[inline]
    fn try_produce(&self, value: T) -> Result<(), T> {
        self.try_push(value)
    }
}

impl<T, G: Guard> Consumer<T> for Stack<T, G> {
    #[inline]
    fn try_consume(&self) -> Option<T> {
        self.try_pop()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guard::DeferredGuard;
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    type TestStack<T> = Stack<T, DeferredGuard>;

    struct DropCounter(Arc<AtomicUsize>);

    impl Drop for DropCounter {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[test]
    fn test_lifo_sequential() {
        let stack = TestStack::new();
        assert!(stack.is_empty());

        for i in 1..=3 {
            assert!(stack.try_push(i).is_ok());
        }
        assert!(!stack.is_empty());

        assert_eq!(stack.try_pop(), Some(3));
        assert_eq!(stack.try_pop(), Some(2));
        assert_eq!(stack.try_pop(), Some(1));
        assert_eq!(stack.try_pop(), None);
        assert!(stack.is_empty());
    }

    #[test]
    fn test_popped_nodes_are_retired() {
        let stack = TestStack::new();
        for i in 0..10 {
            stack.push(i);
        }
        for _ in 0..4 {
            assert!(stack.pop().is_some());
        }
        assert_eq!(stack.guard().retired(), 4);
    }

    #[test]
    fn test_elements_dropped_exactly_once() {
        let drops = Arc::new(AtomicUsize::new(0));
        {
            let stack = TestStack::new();
            for _ in 0..6 {
                stack.push(DropCounter(Arc::clone(&drops)));
            }
            drop(stack.pop());
            drop(stack.pop());
            assert_eq!(drops.load(Ordering::Relaxed), 2);
        }
        assert_eq!(drops.load(Ordering::Relaxed), 6);
    }

    #[test]
    fn test_concurrent_push_pop_conserves_elements() {
        let stack = Arc::new(TestStack::new());
        let threads = 4;
        let per_thread = 5_000;

        let pushers: Vec<_> = (0..threads)
            .map(|t| {
                let stack = Arc::clone(&stack);
                thread::spawn(move || {
                    for i in 0..per_thread {
                        stack.push(t * per_thread + i);
                    }
                })
            })
            .collect();

        let poppers: Vec<_> = (0..threads)
            .map(|_| {
                let stack = Arc::clone(&stack);
                thread::spawn(move || {
                    let mut popped = Vec::new();
                    for _ in 0..per_thread {
                        if let Some(v) = stack.pop() {
                            popped.push(v);
                        }
                    }
                    popped
                })
            })
            .collect();

        for handle in pushers {
            handle.join().unwrap();
        }

        let mut seen: Vec<usize> = poppers
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        while let Some(v) = stack.pop() {
            seen.push(v);
        }

        seen.sort_unstable();
        let expected: Vec<usize> = (0..threads * per_thread).collect();
        assert_eq!(seen, expected);
    }
}
