//! Bounded single-producer/single-consumer ring buffer.
//!
//! The replay thread is the only producer and each drain thread the only
//! consumer, so no compare-and-swap loops are needed: the producer and
//! consumer each own their cursor and publish elements through a per-slot
//! `written` flag with release/acquire ordering. Head and tail live on their
//! own cache lines to avoid false sharing between the two threads.
//!
//! The ring never blocks. A full ring rejects the push and hands the value
//! back; callers count the drop and move on.

use crossbeam::utils::CachePadded;
use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

struct Slot<T> {
    written: AtomicBool,
    value: UnsafeCell<MaybeUninit<T>>,
}

/// A bounded SPSC queue with power-of-two capacity.
pub struct SpscRing<T> {
    /// Consumer cursor; monotonically increasing, masked on use.
    head: CachePadded<AtomicUsize>,
    /// Producer cursor; monotonically increasing, masked on use.
    tail: CachePadded<AtomicUsize>,
    slots: Box<[Slot<T>]>,
    mask: usize,
}

// SAFETY: Values move across threads exactly once, handed off through the
// per-slot `written` flag (release on write, acquire on read). The SPSC
// discipline — enforced by usage, one producer and one consumer — means the
// two cursors are each written by a single thread.
unsafe impl<T: Send> Send for SpscRing<T> {}
unsafe impl<T: Send> Sync for SpscRing<T> {}

impl<T> SpscRing<T> {
    /// Create a ring holding up to `capacity` elements, rounded up to a
    /// power of two (minimum 2).
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(2).next_power_of_two();
        let slots = (0..capacity)
            .map(|_| Slot {
                written: AtomicBool::new(false),
                value: UnsafeCell::new(MaybeUninit::uninit()),
            })
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            head: CachePadded::new(AtomicUsize::new(0)),
            tail: CachePadded::new(AtomicUsize::new(0)),
            slots,
            mask: capacity - 1,
        }
    }

    /// Push from the producer thread.
    ///
    /// # Errors
    ///
    /// Returns the value back when the ring is full.
    pub fn push(&self, value: T) -> Result<(), T> {
        let tail = self.tail.load(Ordering::Relaxed);
        let slot = &self.slots[tail & self.mask];

        // The slot is free only once the consumer has taken the value that
        // was in it one lap ago.
        if slot.written.load(Ordering::Acquire) {
            return Err(value);
        }

        // SAFETY: `written == false` means the consumer is done with this
        // slot and only this (single) producer may fill it.
        unsafe { (*slot.value.get()).write(value) };
        slot.written.store(true, Ordering::Release);
        self.tail.store(tail.wrapping_add(1), Ordering::Relaxed);
        Ok(())
    }

    /// Pop from the consumer thread.
    #[must_use]
    pub fn pop(&self) -> Option<T> {
        let head = self.head.load(Ordering::Relaxed);
        let slot = &self.slots[head & self.mask];

        if !slot.written.load(Ordering::Acquire) {
            return None;
        }

        // SAFETY: `written == true` publishes an initialized value and only
        // this (single) consumer may take it.
        let value = unsafe { (*slot.value.get()).assume_init_read() };
        slot.written.store(false, Ordering::Release);
        self.head.store(head.wrapping_add(1), Ordering::Relaxed);
        Some(value)
    }

    /// True when no elements are waiting. Exact only from the consumer side.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        let head = self.head.load(Ordering::Acquire);
        !self.slots[head & self.mask].written.load(Ordering::Acquire)
    }

    /// Number of elements currently queued (racy snapshot).
    #[must_use]
    pub fn len(&self) -> usize {
        let tail = self.tail.load(Ordering::Acquire);
        let head = self.head.load(Ordering::Acquire);
        tail.wrapping_sub(head)
    }

    /// Maximum number of elements the ring can hold.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }
}

impl<T> Drop for SpscRing<T> {
    fn drop(&mut self) {
        // Drain whatever the consumer never took.
        while self.pop().is_some() {}
    }
}

impl<T> std::fmt::Debug for SpscRing<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpscRing")
            .field("capacity", &self.capacity())
            .field("len", &self.len())
            .finish()
    }
}
