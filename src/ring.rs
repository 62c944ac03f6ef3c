//! SPSC Ring - lock-free bounded queue for stage hand-off
//!
//! Every pipeline boundary uses one of these: exactly one producer thread
//! and one consumer thread, zero contention, bounded memory, no allocation
//! after construction.
//!
//! # Counter scheme
//!
//! `head` and `tail` are free-running u64 sequence numbers, not wrapped
//! indices. The slot index is `seq & mask`. Full/empty are distinguished by
//! counter arithmetic, never by index equality, so the ring stores its full
//! capacity (no sacrificial slot):
//!
//! - empty: `tail == head`
//! - full:  `tail - head == capacity`
//!
//! # Memory ordering
//!
//! Producer: loads `tail` Relaxed (sole writer), loads `head` Acquire when
//! its cached view is stale, writes the slot, stores `tail` Release. The
//! Release store publishes the slot write; the consumer's Acquire load of
//! `tail` synchronizes with it.
//!
//! Consumer: symmetric. Loads `head` Relaxed (sole writer), loads `tail`
//! Acquire when its cached view is stale, moves the element out, stores
//! `head` Release.
//!
//! The cached counters (`cached_head`, `cached_tail`) are plain cells with a
//! single writer each; they only ever hold stale-but-safe views and exist to
//! keep the common case free of cross-core cache traffic.

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicU64, Ordering};

/// Pads the wrapped value out to its own cache line to prevent the producer
/// and consumer counters from false-sharing.
#[repr(align(64))]
struct CacheLine<T>(T);

/// Single-producer single-consumer bounded ring.
///
/// `capacity` must be a power of two. Elements are written in place on push
/// and destructively moved out on pop; a failed `try_push` hands the element
/// back to the caller.
pub struct SpscRing<T> {
    // === PRODUCER HOT ===
    /// Next sequence to publish (written by producer only)
    tail: CacheLine<AtomicU64>,
    /// Producer's stale view of head
    cached_head: CacheLine<UnsafeCell<u64>>,

    // === CONSUMER HOT ===
    /// Next sequence to consume (written by consumer only)
    head: CacheLine<AtomicU64>,
    /// Consumer's stale view of tail
    cached_tail: CacheLine<UnsafeCell<u64>>,

    // === SHARED COLD ===
    mask: u64,
    buf: Box<[UnsafeCell<MaybeUninit<T>>]>,
}

// Slots are handed off via the Release/Acquire protocol above; an element is
// only ever touched by one side at a time.
unsafe impl<T: Send> Send for SpscRing<T> {}
unsafe impl<T: Send> Sync for SpscRing<T> {}

impl<T> SpscRing<T> {
    /// Allocate a ring with the given power-of-two capacity.
    ///
    /// This is the only allocation the ring ever performs.
    pub fn with_capacity(capacity: usize) -> Self {
        assert!(
            capacity.is_power_of_two() && capacity > 0,
            "ring capacity must be a power of two, got {}",
            capacity
        );
        let mut buf = Vec::with_capacity(capacity);
        buf.resize_with(capacity, || UnsafeCell::new(MaybeUninit::uninit()));

        Self {
            tail: CacheLine(AtomicU64::new(0)),
            cached_head: CacheLine(UnsafeCell::new(0)),
            head: CacheLine(AtomicU64::new(0)),
            cached_tail: CacheLine(UnsafeCell::new(0)),
            mask: (capacity - 1) as u64,
            buf: buf.into_boxed_slice(),
        }
    }

    /// Ring capacity (power of two, fully usable)
    #[inline]
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Producer: publish one element.
    ///
    /// Fails iff the ring is full; the element is returned to the caller.
    /// Never blocks, never allocates.
    #[inline]
    pub fn try_push(&self, item: T) -> Result<(), T> {
        let tail = self.tail.0.load(Ordering::Relaxed);

        // Fast path against the cached head; refresh only when it looks full.
        let mut head = unsafe { *self.cached_head.0.get() };
        if tail.wrapping_sub(head) >= self.buf.len() as u64 {
            head = self.head.0.load(Ordering::Acquire);
            unsafe { *self.cached_head.0.get() = head };
            if tail.wrapping_sub(head) >= self.buf.len() as u64 {
                return Err(item);
            }
        }

        let slot = self.buf[(tail & self.mask) as usize].get();
        unsafe { (*slot).write(item) };

        self.tail.0.store(tail.wrapping_add(1), Ordering::Release);
        Ok(())
    }

    /// Consumer: take one element.
    ///
    /// Returns `None` iff the ring is empty. Never blocks.
    #[inline]
    pub fn try_pop(&self) -> Option<T> {
        let head = self.head.0.load(Ordering::Relaxed);

        let mut tail = unsafe { *self.cached_tail.0.get() };
        if head == tail {
            tail = self.tail.0.load(Ordering::Acquire);
            unsafe { *self.cached_tail.0.get() = tail };
            if head == tail {
                return None;
            }
        }

        let slot = self.buf[(head & self.mask) as usize].get();
        let item = unsafe { (*slot).assume_init_read() };

        self.head.0.store(head.wrapping_add(1), Ordering::Release);
        Some(item)
    }

    /// Number of elements currently queued.
    ///
    /// Exact when called from either endpoint thread; a racy estimate from
    /// anywhere else.
    #[inline]
    pub fn len(&self) -> usize {
        let tail = self.tail.0.load(Ordering::Acquire);
        let head = self.head.0.load(Ordering::Acquire);
        tail.wrapping_sub(head) as usize
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Drop for SpscRing<T> {
    fn drop(&mut self) {
        // Exclusive access here; drop any elements still in flight.
        let head = *self.head.0.get_mut();
        let tail = *self.tail.0.get_mut();
        let mut seq = head;
        while seq != tail {
            let slot = self.buf[(seq & self.mask) as usize].get();
            unsafe { (*slot).assume_init_drop() };
            seq = seq.wrapping_add(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_push_pop_order() {
        let ring = SpscRing::with_capacity(8);
        for i in 0..5u64 {
            assert!(ring.try_push(i).is_ok());
        }
        assert_eq!(ring.len(), 5);
        for i in 0..5u64 {
            assert_eq!(ring.try_pop(), Some(i));
        }
        assert_eq!(ring.try_pop(), None);
    }

    #[test]
    fn test_full_returns_element() {
        let ring = SpscRing::with_capacity(4);
        for i in 0..4u64 {
            assert!(ring.try_push(i).is_ok());
        }
        // Full: element must come back untouched, nothing overwritten
        assert_eq!(ring.try_push(99), Err(99));
        assert_eq!(ring.len(), 4);
        assert_eq!(ring.try_pop(), Some(0));
        // One slot freed
        assert!(ring.try_push(99).is_ok());
    }

    #[test]
    fn test_empty_pop() {
        let ring: SpscRing<u32> = SpscRing::with_capacity(2);
        assert_eq!(ring.try_pop(), None);
        assert!(ring.is_empty());
    }

    #[test]
    fn test_full_capacity_usable() {
        // Separate-counter scheme: all `capacity` slots hold elements
        let ring = SpscRing::with_capacity(4);
        let mut pushed = 0;
        while ring.try_push(pushed).is_ok() {
            pushed += 1;
        }
        assert_eq!(pushed, 4);
    }

    #[test]
    #[should_panic(expected = "power of two")]
    fn test_non_power_of_two_rejected() {
        let _ = SpscRing::<u8>::with_capacity(6);
    }

    #[test]
    fn test_wraparound_reuses_slots() {
        let ring = SpscRing::with_capacity(4);
        for round in 0..10u64 {
            for i in 0..4u64 {
                assert!(ring.try_push(round * 4 + i).is_ok());
            }
            for i in 0..4u64 {
                assert_eq!(ring.try_pop(), Some(round * 4 + i));
            }
        }
    }

    #[test]
    fn test_drop_releases_inflight() {
        struct Counted(Arc<std::sync::atomic::AtomicU64>);
        impl Drop for Counted {
            fn drop(&mut self) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let drops = Arc::new(AtomicU64::new(0));
        {
            let ring = SpscRing::with_capacity(8);
            for _ in 0..3 {
                assert!(ring.try_push(Counted(drops.clone())).is_ok());
            }
            drop(ring.try_pop());
        }
        // 1 popped + 2 still queued at drop
        assert_eq!(drops.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_cross_thread_no_loss_no_reorder() {
        const N: u64 = 100_000;
        let ring = Arc::new(SpscRing::with_capacity(1024));

        let producer = {
            let ring = ring.clone();
            std::thread::spawn(move || {
                for i in 0..N {
                    let mut v = i;
                    loop {
                        match ring.try_push(v) {
                            Ok(()) => break,
                            Err(back) => {
                                v = back;
                                std::hint::spin_loop();
                            }
                        }
                    }
                }
            })
        };

        let mut expected = 0u64;
        while expected < N {
            if let Some(v) = ring.try_pop() {
                assert_eq!(v, expected, "element lost, duplicated, or reordered");
                expected += 1;
            } else {
                std::hint::spin_loop();
            }
        }
        producer.join().unwrap();
        assert_eq!(ring.try_pop(), None);
    }
}
