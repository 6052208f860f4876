//! Sequenced-slot MPMC ring buffer
//!
//! Each slot carries a 64-bit `sequence` ticket next to its value cell. The
//! ticket encodes which operation the slot is ready for:
//!
//! ```text
//! sequence == ticket          slot is ready for the producer holding `ticket`
//! sequence == ticket + 1      slot is ready for the consumer holding `ticket`
//! sequence == ticket + C      slot is ready for the producer holding `ticket + C`
//! ```
//!
//! Producers and consumers race on the `tail`/`head` counters with
//! compare-and-swap; the winner of a ticket owns its slot until the release
//! store of the next sequence value publishes it to the other side. The
//! release store pairs with the acquire load of the sequence on the opposite
//! side, which is the edge that carries the value cell across threads.
//!
//! `try_put`/`try_get` complete in a bounded number of atomic steps: a retry
//! only happens when another thread won the same ticket, and a full/empty
//! observation returns immediately.

use core::cell::UnsafeCell;
use core::fmt;
use core::mem::MaybeUninit;
use core::sync::atomic::{AtomicU64, Ordering};

use crate::ring::{snapshot_metrics, PutError, RingMetrics};
use crate::util::{effective_capacity, Backoff, CachePadded};

/// One ring cell: a readiness ticket plus the value it guards.
///
/// Aligned to a cache line so neighbouring slots do not false-share.
#[repr(align(64))]
struct Slot<T> {
    sequence: AtomicU64,
    value: UnsafeCell<MaybeUninit<T>>,
}

/// Bounded MPMC ring buffer with per-slot sequence tickets.
///
/// See the [module docs](self) for the slot protocol. Capacity is rounded up
/// to the next power of two (minimum 2) so physical indices are computed by
/// masking the monotonic 64-bit counters.
pub struct Classical<T> {
    /// Total dequeues completed or reserved; next consumer ticket.
    head: CachePadded<AtomicU64>,
    /// Total enqueues completed or reserved; next producer ticket.
    tail: CachePadded<AtomicU64>,
    slots: Box<[Slot<T>]>,
    mask: u64,
}

// Safety: slot hand-off is synchronized by the sequence tickets; the value
// cell is only touched by the single thread holding the matching ticket.
unsafe impl<T: Send> Send for Classical<T> {}
unsafe impl<T: Send> Sync for Classical<T> {}

impl<T> Classical<T> {
    /// Creates a ring with at least `capacity` slots, rounded up to the next
    /// power of two (minimum 2).
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is 0.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "ring capacity must be greater than 0");
        let capacity = effective_capacity(capacity);

        let slots: Box<[Slot<T>]> = (0..capacity as u64)
            .map(|i| Slot {
                sequence: AtomicU64::new(i),
                value: UnsafeCell::new(MaybeUninit::uninit()),
            })
            .collect();

        Self {
            head: CachePadded::new(AtomicU64::new(0)),
            tail: CachePadded::new(AtomicU64::new(0)),
            slots,
            mask: capacity as u64 - 1,
        }
    }

    /// Effective capacity of the ring.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    fn slot(&self, ticket: u64) -> &Slot<T> {
        &self.slots[(ticket & self.mask) as usize]
    }

    /// Attempts to enqueue `value` without blocking.
    ///
    /// Returns the value back inside [`PutError`] if the slot for the current
    /// producer ticket has not been reclaimed yet, i.e. the ring is full from
    /// this producer's standpoint.
    pub fn try_put(&self, value: T) -> Result<(), PutError<T>> {
        let mut tail = self.tail.load(Ordering::Relaxed);
        loop {
            let slot = self.slot(tail);
            let seq = slot.sequence.load(Ordering::Acquire);
            let diff = seq.wrapping_sub(tail) as i64;

            if diff == 0 {
                // Slot is ready for this ticket; race for it on the counter.
                match self.tail.compare_exchange_weak(
                    tail,
                    tail.wrapping_add(1),
                    Ordering::AcqRel,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        // The slot is ours until the release store below.
                        unsafe { (*slot.value.get()).write(value) };
                        slot.sequence.store(tail.wrapping_add(1), Ordering::Release);
                        return Ok(());
                    }
                    Err(current) => tail = current,
                }
            } else if diff < 0 {
                // The consumer for ticket `tail - capacity` has not freed
                // this slot.
                return Err(PutError(value));
            } else {
                // Another producer already took this ticket.
                tail = self.tail.load(Ordering::Relaxed);
            }
        }
    }

    /// Attempts to dequeue one element without blocking.
    ///
    /// Returns `None` if the slot for the current consumer ticket has not
    /// been written yet, i.e. the ring is empty from this consumer's
    /// standpoint.
    pub fn try_get(&self) -> Option<T> {
        let mut head = self.head.load(Ordering::Relaxed);
        loop {
            let slot = self.slot(head);
            let seq = slot.sequence.load(Ordering::Acquire);
            let diff = seq.wrapping_sub(head.wrapping_add(1)) as i64;

            if diff == 0 {
                match self.head.compare_exchange_weak(
                    head,
                    head.wrapping_add(1),
                    Ordering::AcqRel,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        let value = unsafe { (*slot.value.get()).assume_init_read() };
                        // Hand the slot to the producer one lap ahead.
                        slot.sequence.store(
                            head.wrapping_add(self.slots.len() as u64),
                            Ordering::Release,
                        );
                        return Some(value);
                    }
                    Err(current) => head = current,
                }
            } else if diff < 0 {
                return None;
            } else {
                head = self.head.load(Ordering::Relaxed);
            }
        }
    }

    /// Invokes `supplier` exactly once; if it yields a value, spins with
    /// backoff until the enqueue commits.
    pub fn produce<F>(&self, supplier: F)
    where
        F: FnOnce() -> Option<T>,
    {
        let Some(value) = supplier() else { return };
        let mut value = value;
        let mut backoff = Backoff::new();
        loop {
            match self.try_put(value) {
                Ok(()) => return,
                Err(PutError(rejected)) => {
                    value = rejected;
                    backoff.snooze();
                }
            }
        }
    }

    /// Spins with backoff until one element is dequeued, then invokes
    /// `consumer` with it.
    pub fn consume<F>(&self, consumer: F)
    where
        F: FnOnce(T),
    {
        let mut backoff = Backoff::new();
        loop {
            if let Some(value) = self.try_get() {
                consumer(value);
                return;
            }
            backoff.snooze();
        }
    }

    /// Dequeues up to the vector's spare capacity in one pass, appending in
    /// FIFO order, and returns the count written.
    ///
    /// The head counter is advanced by one CAS for the whole batch: every
    /// ticket in the window is first verified ready via its slot sequence, so
    /// winning the CAS proves exclusive ownership of the entire run. Each
    /// slot is still released individually to the producer a lap ahead.
    pub fn consume_batch(&self, out: &mut Vec<T>) -> usize {
        let budget = (out.capacity() - out.len()) as u64;
        if budget == 0 {
            return 0;
        }

        loop {
            let head = self.head.load(Ordering::Relaxed);

            // Count contiguous ready tickets from `head`.
            let mut ready = 0u64;
            while ready < budget {
                let ticket = head.wrapping_add(ready);
                let seq = self.slot(ticket).sequence.load(Ordering::Acquire);
                if seq.wrapping_sub(ticket.wrapping_add(1)) as i64 != 0 {
                    break;
                }
                ready += 1;
            }
            if ready == 0 {
                return 0;
            }

            if self
                .head
                .compare_exchange(
                    head,
                    head.wrapping_add(ready),
                    Ordering::AcqRel,
                    Ordering::Relaxed,
                )
                .is_err()
            {
                // Another consumer advanced head under us; rescan.
                continue;
            }

            for i in 0..ready {
                let ticket = head.wrapping_add(i);
                let slot = self.slot(ticket);
                let value = unsafe { (*slot.value.get()).assume_init_read() };
                out.push(value);
                slot.sequence.store(
                    ticket.wrapping_add(self.slots.len() as u64),
                    Ordering::Release,
                );
            }
            return ready as usize;
        }
    }

    /// Number of resident elements; may be stale under contention.
    pub fn len(&self) -> usize {
        // Retry until the counter pair is a consistent snapshot, otherwise a
        // head advancing between the two loads could make the difference
        // wrap.
        loop {
            let tail = self.tail.load(Ordering::SeqCst);
            let head = self.head.load(Ordering::SeqCst);
            if self.tail.load(Ordering::SeqCst) == tail {
                return tail.wrapping_sub(head) as usize;
            }
        }
    }

    /// Whether the ring appears empty; may be stale under contention.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Occupancy snapshot for monitoring.
    pub fn metrics(&self) -> RingMetrics {
        snapshot_metrics(self.capacity(), self.len())
    }

    #[cfg(test)]
    pub(crate) fn head_ticket(&self) -> u64 {
        self.head.load(Ordering::Relaxed)
    }

    #[cfg(test)]
    pub(crate) fn tail_ticket(&self) -> u64 {
        self.tail.load(Ordering::Relaxed)
    }
}

impl<T> fmt::Debug for Classical<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Classical")
            .field("capacity", &self.capacity())
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}

impl<T> Drop for Classical<T> {
    fn drop(&mut self) {
        // Exclusive access: drop the initialized cells between head and tail.
        let head = self.head.load(Ordering::Relaxed);
        let tail = self.tail.load(Ordering::Relaxed);

        let mut ticket = head;
        while ticket != tail {
            let slot = self.slot(ticket);
            unsafe { (*slot.value.get()).assume_init_drop() };
            ticket = ticket.wrapping_add(1);
        }
    }
}
