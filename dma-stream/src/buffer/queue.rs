//! Lock-free single-producer single-consumer (SPSC) ring buffer.
//!
//! Used for both pool queues. Capacity is chosen at construction (the pool's
//! buffer count), and the slot array is the only allocation the queue ever
//! makes.
//!
//! # Safety Contract
//!
//! - Only ONE context may call [`push()`](BoundedQueue::push) (the "producer").
//! - Only ONE context may call [`pop()`](BoundedQueue::pop) (the "consumer").
//! - The two may be an interrupt handler and thread-mode code running
//!   concurrently.

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::cell::UnsafeCell;
use core::mem::MaybeUninit;
use core::sync::atomic::{AtomicUsize, Ordering};

use crate::error::Error;

/// A bounded SPSC queue holding up to `capacity` items.
///
/// One extra slot is allocated to tell full from empty (Lamport queue).
pub struct BoundedQueue<T> {
    slots: Box<[UnsafeCell<MaybeUninit<T>>]>,
    /// Write position (only modified by the producer).
    head: AtomicUsize,
    /// Read position (only modified by the consumer).
    tail: AtomicUsize,
}

// SAFETY: T: Send is required because values cross context boundaries.
// head and tail are each written by one side only, and the release/acquire
// pairs order slot accesses against index updates.
unsafe impl<T: Send> Sync for BoundedQueue<T> {}
unsafe impl<T: Send> Send for BoundedQueue<T> {}

impl<T> BoundedQueue<T> {
    /// Create an empty queue that can hold `capacity` items.
    pub fn new(capacity: usize) -> Result<Self, Error> {
        let len = capacity.checked_add(1).ok_or(Error::OutOfMemory)?;
        let mut slots = Vec::new();
        slots
            .try_reserve_exact(len)
            .map_err(|_| Error::OutOfMemory)?;
        slots.extend((0..len).map(|_| UnsafeCell::new(MaybeUninit::uninit())));

        Ok(BoundedQueue {
            slots: slots.into_boxed_slice(),
            head: AtomicUsize::new(0),
            tail: AtomicUsize::new(0),
        })
    }

    #[inline]
    fn next(&self, pos: usize) -> usize {
        let next = pos + 1;
        if next == self.slots.len() {
            0
        } else {
            next
        }
    }

    /// Push a value (producer side).
    ///
    /// Returns `Err(val)` if the queue is full, handing ownership back.
    pub fn push(&self, val: T) -> Result<(), T> {
        let head = self.head.load(Ordering::Relaxed);
        let next_head = self.next(head);

        if next_head == self.tail.load(Ordering::Acquire) {
            return Err(val);
        }

        // SAFETY: we are the sole producer and `next_head != tail`, so the
        // consumer is not reading this slot.
        unsafe {
            (*self.slots[head].get()).write(val);
        }

        self.head.store(next_head, Ordering::Release);
        Ok(())
    }

    /// Pop the oldest value (consumer side).
    pub fn pop(&self) -> Option<T> {
        let tail = self.tail.load(Ordering::Relaxed);

        if tail == self.head.load(Ordering::Acquire) {
            return None;
        }

        // SAFETY: we are the sole consumer and `tail != head`, so this slot
        // was initialised by a completed push.
        let val = unsafe { (*self.slots[tail].get()).assume_init_read() };

        self.tail.store(self.next(tail), Ordering::Release);
        Some(val)
    }

    pub fn is_empty(&self) -> bool {
        self.tail.load(Ordering::Acquire) == self.head.load(Ordering::Acquire)
    }

    pub fn is_full(&self) -> bool {
        let head = self.head.load(Ordering::Acquire);
        let tail = self.tail.load(Ordering::Acquire);
        self.next(head) == tail
    }

    /// Number of queued items. Exact from either side when the other is idle,
    /// otherwise a snapshot.
    pub fn len(&self) -> usize {
        let n = self.slots.len();
        let head = self.head.load(Ordering::Acquire);
        let tail = self.tail.load(Ordering::Acquire);
        (head + n - tail) % n
    }

    pub fn capacity(&self) -> usize {
        self.slots.len() - 1
    }
}

impl<T> Drop for BoundedQueue<T> {
    fn drop(&mut self) {
        while self.pop().is_some() {}
    }
}
