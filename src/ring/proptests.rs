//! Property-based tests for the ring buffers.
//!
//! These check the algebraic invariants both variants share: conservation of
//! values, the capacity bound, single-threaded FIFO order, and power-of-two
//! capacity normalisation.

use super::{Kind, RingBuffer};
use proptest::prelude::*;
use std::collections::VecDeque;
use std::sync::Arc;
use std::thread;

fn kinds() -> impl Strategy<Value = Kind> {
    prop_oneof![Just(Kind::Classical), Just(Kind::NodeBased)]
}

proptest! {
    /// A single thread interleaving puts and gets sees exactly the behaviour
    /// of a model FIFO queue of the same capacity.
    #[test]
    fn matches_model_queue_single_thread(
        kind in kinds(),
        capacity in 1usize..32,
        ops in prop::collection::vec(prop::bool::weighted(0.6), 1..200),
    ) {
        let ring = RingBuffer::new(kind, capacity);
        let mut model: VecDeque<u32> = VecDeque::new();
        let mut next = 0u32;

        for put in ops {
            if put {
                match ring.try_put(next) {
                    Ok(()) => {
                        prop_assert!(model.len() < ring.capacity());
                        model.push_back(next);
                    }
                    Err(rejected) => {
                        prop_assert_eq!(model.len(), ring.capacity());
                        prop_assert_eq!(rejected.0, next);
                    }
                }
                next += 1;
            } else {
                prop_assert_eq!(ring.try_get(), model.pop_front());
            }
            prop_assert_eq!(ring.len(), model.len());
            prop_assert!(ring.len() <= ring.capacity());
        }

        // Drain and compare the tails.
        while let Some(expected) = model.pop_front() {
            prop_assert_eq!(ring.try_get(), Some(expected));
        }
        prop_assert_eq!(ring.try_get(), None);
        prop_assert!(ring.is_empty());
    }

    /// Requested capacities normalise to the next power of two, never below 2.
    #[test]
    fn capacity_normalisation(kind in kinds(), requested in 1usize..4096) {
        let ring: RingBuffer<u8> = RingBuffer::new(kind, requested);
        let capacity = ring.capacity();
        prop_assert!(capacity.is_power_of_two());
        prop_assert!(capacity >= 2);
        prop_assert!(capacity >= requested);
        // Tight: halving it would not fit the request.
        prop_assert!(capacity / 2 < requested.max(2));
    }

    /// Batch dequeue returns the same elements in the same order the scalar
    /// path would, and never writes past the output buffer's capacity.
    #[test]
    fn batch_agrees_with_scalar_order(
        fill in 0usize..16,
        batch_capacity in 0usize..8,
    ) {
        let ring = RingBuffer::new(Kind::Classical, 16);
        for i in 0..fill as u32 {
            ring.try_put(i).unwrap();
        }

        let mut out = Vec::with_capacity(batch_capacity);
        let taken = ring.consume_batch(&mut out);

        prop_assert_eq!(taken, fill.min(batch_capacity));
        prop_assert_eq!(out.capacity(), batch_capacity);
        prop_assert_eq!(&out[..], &(0..taken as u32).collect::<Vec<_>>()[..]);

        // The remainder is still there, still in order.
        for i in taken as u32..fill as u32 {
            prop_assert_eq!(ring.try_get(), Some(i));
        }
        prop_assert_eq!(ring.try_get(), None);
    }

}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Concurrent producers and consumers lose nothing and duplicate nothing.
    #[test]
    fn concurrent_conservation(
        kind in kinds(),
        threads in 2usize..4,
        per_thread in 16usize..64,
    ) {
        let ring = Arc::new(RingBuffer::new(kind, 8));
        let total = threads * per_thread;

        let producers: Vec<_> = (0..threads)
            .map(|id| {
                let ring = Arc::clone(&ring);
                thread::spawn(move || {
                    for i in 0..per_thread {
                        let mut value = id * per_thread + i;
                        loop {
                            match ring.try_put(value) {
                                Ok(()) => break,
                                Err(rejected) => {
                                    value = rejected.0;
                                    thread::yield_now();
                                }
                            }
                        }
                    }
                })
            })
            .collect();

        let consumer = {
            let ring = Arc::clone(&ring);
            thread::spawn(move || {
                let mut seen = Vec::with_capacity(total);
                while seen.len() < total {
                    if let Some(value) = ring.try_get() {
                        seen.push(value);
                    } else {
                        thread::yield_now();
                    }
                }
                seen
            })
        };

        for handle in producers {
            handle.join().unwrap();
        }
        let mut seen = consumer.join().unwrap();

        prop_assert_eq!(seen.len(), total);
        seen.sort_unstable();
        seen.dedup();
        prop_assert_eq!(seen.len(), total);
        prop_assert!(ring.is_empty());
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Every value a ring still holds when it is dropped is released exactly
    /// once, and nothing consumed is released twice.
    #[test]
    fn drop_releases_each_value_once(
        kind in kinds(),
        fill in 1usize..8,
        take in 0usize..8,
    ) {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let drops = Arc::new(AtomicUsize::new(0));

        struct Counted(Arc<AtomicUsize>);
        impl Drop for Counted {
            fn drop(&mut self) {
                self.0.fetch_add(1, Ordering::Relaxed);
            }
        }

        let ring = RingBuffer::new(kind, 8);
        for _ in 0..fill {
            ring.try_put(Counted(Arc::clone(&drops))).unwrap();
        }
        let taken = (0..take.min(fill)).filter(|_| ring.try_get().is_some()).count();
        prop_assert_eq!(drops.load(Ordering::Relaxed), taken);

        drop(ring);
        prop_assert_eq!(drops.load(Ordering::Relaxed), fill);
    }
}
