//! A lock-free, double-ended task queue: owner-side `push_bottom`/`pop_bottom`
//! at one end, concurrent `pop_top` stealing at the other.
//!
//! This has no precedent in the host crate (which parallelizes with `rayon`'s
//! safe iterators); it is a from-scratch reimplementation of the behavioral
//! contract described in `original_source/workStealing/taskQueueLockFree.go`,
//! built on `AtomicPtr` rather than a garbage-collected runtime. Nodes are
//! heap-allocated once via `Box::into_raw` and reclaimed exactly once, either
//! when a pop takes ownership of them or when the deque is dropped while
//! still holding elements.
//!
//! `push_bottom`/`pop_bottom` must never run concurrently with each other
//! (owner-only); `pop_top` may race with anything, including other thieves.

use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};

struct Node<T> {
    task: T,
    /// Toward bottom.
    next: AtomicPtr<Node<T>>,
    /// Toward top.
    prev: AtomicPtr<Node<T>>,
}

impl<T> Node<T> {
    fn new(task: T) -> *mut Self {
        Box::into_raw(Box::new(Self {
            task,
            next: AtomicPtr::new(ptr::null_mut()),
            prev: AtomicPtr::new(ptr::null_mut()),
        }))
    }
}

/// An unbounded lock-free double-ended queue of tasks. The empty state is
/// both `top` and `bottom` null.
pub struct Deque<T> {
    top: AtomicPtr<Node<T>>,
    bottom: AtomicPtr<Node<T>>,
}

// SAFETY: access to node contents is mediated entirely by the CAS protocols
// below; a node is only ever read by the side that won the CAS claiming it.
unsafe impl<T: Send> Send for Deque<T> {}
unsafe impl<T: Send> Sync for Deque<T> {}

impl<T> Default for Deque<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Deque<T> {
    pub fn new() -> Self {
        Self {
            top: AtomicPtr::new(ptr::null_mut()),
            bottom: AtomicPtr::new(ptr::null_mut()),
        }
    }

    /// Owner-only. Never runs concurrently with `pop_bottom`.
    pub fn push_bottom(&self, task: T) {
        let new = Node::new(task);

        loop {
            let bottom = self.bottom.load(Ordering::Acquire);

            if bottom.is_null() {
                // Queue was empty: claim both endpoints.
                if self
                    .bottom
                    .compare_exchange(bottom, new, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    self.top.store(new, Ordering::Release);
                    return;
                }
                // A concurrent pop_top can't un-empty the queue, so this can
                // only fail due to another push_bottom, which never happens
                // concurrently with us; retry defensively regardless.
                continue;
            }

            unsafe {
                (*new).prev.store(bottom, Ordering::Release);
            }
            let bottom_next = unsafe { (*bottom).next.load(Ordering::Acquire) };
            let cas_next = unsafe {
                (*bottom)
                    .next
                    .compare_exchange(bottom_next, new, Ordering::AcqRel, Ordering::Acquire)
            };
            if cas_next.is_err() {
                // A concurrent pop_top detached `bottom`'s successor link; retry.
                continue;
            }
            if self
                .bottom
                .compare_exchange(bottom, new, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return;
            }
            // A concurrent pop_top emptied the queue out from under us between
            // the two CASes above; retry from the top.
        }
    }

    /// Owner-only. Never runs concurrently with `push_bottom`.
    pub fn pop_bottom(&self) -> Option<T> {
        let bottom = self.bottom.load(Ordering::Acquire);
        let top = self.top.load(Ordering::Acquire);
        if bottom.is_null() || top.is_null() {
            return None;
        }

        if ptr::eq(top, bottom) {
            // Single element: serialize against a racing pop_top of the same node.
            if self
                .top
                .compare_exchange(top, ptr::null_mut(), Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                self.bottom.store(ptr::null_mut(), Ordering::Release);
                return Some(take_task(bottom));
            }
            return None;
        }

        let prev = unsafe { (*bottom).prev.load(Ordering::Acquire) };
        if self
            .bottom
            .compare_exchange(bottom, prev, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            // Shouldn't happen: pop_bottom is owner-only and never concurrent
            // with another pop_bottom or a push_bottom. Treat defensively as
            // a transient empty result rather than panicking.
            return None;
        }

        // `bottom` is about to be freed; sever the new bottom's forward link
        // to it so nothing can chase a dangling pointer through `.next`.
        unsafe {
            (*prev).next.store(ptr::null_mut(), Ordering::Release);
        }

        // If a concurrent pop_top just claimed this same node as top, finish
        // emptying the queue's endpoints on its behalf.
        if self
            .top
            .compare_exchange(bottom, ptr::null_mut(), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.bottom.compare_exchange(prev, ptr::null_mut(), Ordering::AcqRel, Ordering::Acquire).ok();
        }

        Some(take_task(bottom))
    }

    /// May be called by any thief concurrently with anything, including
    /// other thieves and the owner's own operations.
    pub fn pop_top(&self) -> Option<T> {
        let top = self.top.load(Ordering::Acquire);
        let bottom = self.bottom.load(Ordering::Acquire);
        if top.is_null() || bottom.is_null() {
            return None;
        }

        if ptr::eq(top, bottom) {
            if self
                .top
                .compare_exchange(top, ptr::null_mut(), Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                return None;
            }
            if self
                .bottom
                .compare_exchange(bottom, ptr::null_mut(), Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                // A concurrent pop_bottom already took the bottom pointer
                // elsewhere; the element is still ours since we won the top CAS.
            }
            return Some(take_task(top));
        }

        let next = unsafe { (*top).next.load(Ordering::Acquire) };
        if self
            .top
            .compare_exchange(top, next, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return None;
        }

        // `top` is about to be freed; sever the new top's backward link to
        // it. Left alone, `Drop` walking bottom-to-top via `.prev` would
        // later chase this into freed memory and double-free it.
        unsafe {
            (*next).prev.store(ptr::null_mut(), Ordering::Release);
        }

        // Handle the rare case where a concurrent pop_bottom emptied the
        // queue down to this same node just as we detached it.
        if self
            .bottom
            .compare_exchange(top, ptr::null_mut(), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.top.compare_exchange(next, ptr::null_mut(), Ordering::AcqRel, Ordering::Acquire).ok();
        }

        Some(take_task(top))
    }

    /// True only as a snapshot; under contention this can be stale the
    /// instant it's read. Used by the scheduler as a hint, never as a proof.
    pub fn is_empty_hint(&self) -> bool {
        self.bottom.load(Ordering::Acquire).is_null()
    }
}

/// Reconstructs the `Box` for `node` and extracts its task, freeing the node.
/// Must only be called once per node, by whichever side's CAS won ownership
/// of it.
fn take_task<T>(node: *mut Node<T>) -> T {
    let boxed = unsafe { Box::from_raw(node) };
    boxed.task
}

impl<T> Drop for Deque<T> {
    fn drop(&mut self) {
        // Single-threaded at drop time (no owner or thieves can still be
        // racing us): walk from bottom to top and free every remaining node.
        let mut cur = self.bottom.load(Ordering::Acquire);
        while !cur.is_null() {
            let prev = unsafe { (*cur).prev.load(Ordering::Acquire) };
            unsafe {
                drop(Box::from_raw(cur));
            }
            cur = prev;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn drop_after_partial_pop_top_does_not_double_free() {
        // Regression test: popping from the top must sever the new top's
        // backward link to the freed node, or Drop's bottom-to-top walk
        // chases a dangling pointer. Run under Miri/ASan to catch a
        // regression; under a plain test run this mainly guards the
        // queue-order invariant survives a partial steal.
        let dq: Deque<i32> = Deque::new();
        for i in 0..5 {
            dq.push_bottom(i);
        }
        assert_eq!(dq.pop_top(), Some(0));
        assert_eq!(dq.pop_top(), Some(1));
        // `dq` drops here with elements 2, 3, 4 still owned by the arena.
    }

    #[test]
    fn drop_after_partial_pop_bottom_does_not_double_free() {
        let dq: Deque<i32> = Deque::new();
        for i in 0..5 {
            dq.push_bottom(i);
        }
        assert_eq!(dq.pop_bottom(), Some(4));
        assert_eq!(dq.pop_bottom(), Some(3));
        // `dq` drops here with elements 0, 1, 2 still owned by the arena.
    }

    #[test]
    fn single_threaded_push_pop_bottom_is_stack_order() {
        let dq: Deque<i32> = Deque::new();
        for i in 0..10 {
            dq.push_bottom(i);
        }
        let mut popped = Vec::new();
        while let Some(x) = dq.pop_bottom() {
            popped.push(x);
        }
        let expected: Vec<i32> = (0..10).rev().collect();
        assert_eq!(popped, expected);
    }

    #[test]
    fn single_threaded_push_bottom_pop_top_is_queue_order() {
        let dq: Deque<i32> = Deque::new();
        for i in 0..10 {
            dq.push_bottom(i);
        }
        let mut popped = Vec::new();
        while let Some(x) = dq.pop_top() {
            popped.push(x);
        }
        let expected: Vec<i32> = (0..10).collect();
        assert_eq!(popped, expected);
    }

    #[test]
    fn single_owner_drains_against_single_thief() {
        let dq = Arc::new(Deque::new());
        for i in 0..100 {
            dq.push_bottom(i);
        }

        let thief_dq = Arc::clone(&dq);
        let thief = thread::spawn(move || {
            let mut stolen = Vec::new();
            loop {
                match thief_dq.pop_top() {
                    Some(x) => stolen.push(x),
                    None => {
                        if thief_dq.is_empty_hint() {
                            break;
                        }
                    }
                }
            }
            stolen
        });

        let stolen = thief.join().unwrap();
        let recovered: HashSet<i32> = stolen.into_iter().collect();
        let expected: HashSet<i32> = (0..100).collect();
        assert_eq!(recovered, expected);
    }

    #[test]
    fn losslessness_under_contention() {
        const N: i32 = 10_000;
        const THIEVES: usize = 7;

        let dq = Arc::new(Deque::new());
        let done = Arc::new(std::sync::atomic::AtomicBool::new(false));

        let owner_dq = Arc::clone(&dq);
        let owner_done = Arc::clone(&done);
        let owner = thread::spawn(move || {
            let mut taken = Vec::new();
            for i in 0..N {
                owner_dq.push_bottom(i);
                if i % 4 == 0 {
                    if let Some(x) = owner_dq.pop_bottom() {
                        taken.push(x);
                    }
                }
            }
            while let Some(x) = owner_dq.pop_bottom() {
                taken.push(x);
            }
            owner_done.store(true, Ordering::Release);
            taken
        });

        let mut thieves = Vec::new();
        for _ in 0..THIEVES {
            let dq = Arc::clone(&dq);
            let done = Arc::clone(&done);
            thieves.push(thread::spawn(move || {
                let mut stolen = Vec::new();
                loop {
                    match dq.pop_top() {
                        Some(x) => stolen.push(x),
                        None => {
                            if done.load(Ordering::Acquire) && dq.is_empty_hint() {
                                break;
                            }
                        }
                    }
                }
                stolen
            }));
        }

        let mut all = owner.join().unwrap();
        for t in thieves {
            all.extend(t.join().unwrap());
        }

        // Drain whatever the owner's push/pop interleaving left behind after
        // thieves observed `done` but a last element was still in flight.
        while let Some(x) = dq.pop_bottom() {
            all.push(x);
        }

        let recovered: HashSet<i32> = all.iter().copied().collect();
        let expected: HashSet<i32> = (0..N).collect();
        assert_eq!(all.len(), expected.len(), "no duplicates and no losses");
        assert_eq!(recovered, expected);
    }
}
