//! Integration tests driving the public API end to end.
//!
//! Everything here goes through `lfring::RingBuffer`, the way an embedding
//! would use the crate: construct with a kind tag, share behind `Arc`, and
//! move values between worker threads with the five queue operations.

use lfring::{Classical, Kind, NodeBased, PutError, RingBuffer};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

const BOTH: [Kind; 2] = [Kind::Classical, Kind::NodeBased];

fn put_retrying<T>(ring: &RingBuffer<T>, value: T) {
    let mut value = value;
    loop {
        match ring.try_put(value) {
            Ok(()) => return,
            Err(PutError(rejected)) => {
                value = rejected;
                thread::yield_now();
            }
        }
    }
}

#[test]
fn request_dispatch_fan_in_fan_out() {
    // Several request sources, several workers, one small hand-off ring.
    for kind in BOTH {
        let ring = Arc::new(RingBuffer::new(kind, 4));
        let handled = Arc::new(AtomicUsize::new(0));
        let sources = 3usize;
        let per_source = 50usize;
        let total = sources * per_source;

        let producers: Vec<_> = (0..sources)
            .map(|source| {
                let ring = Arc::clone(&ring);
                thread::spawn(move || {
                    for request in 0..per_source {
                        put_retrying(&ring, (source, request));
                    }
                })
            })
            .collect();

        let workers: Vec<_> = (0..3)
            .map(|_| {
                let ring = Arc::clone(&ring);
                let handled = Arc::clone(&handled);
                thread::spawn(move || {
                    let mut mine = Vec::new();
                    while handled.load(Ordering::Acquire) < total {
                        if let Some(request) = ring.try_get() {
                            handled.fetch_add(1, Ordering::AcqRel);
                            mine.push(request);
                        } else {
                            thread::yield_now();
                        }
                    }
                    mine
                })
            })
            .collect();

        for handle in producers {
            handle.join().unwrap();
        }
        let mut seen = HashSet::new();
        for handle in workers {
            for request in handle.join().unwrap() {
                assert!(seen.insert(request), "request dispatched twice");
            }
        }
        assert_eq!(seen.len(), total);
        assert!(ring.is_empty());
    }
}

#[test]
fn single_consumer_preserves_producer_order() {
    for kind in BOTH {
        let ring = Arc::new(RingBuffer::new(kind, 8));
        let count = 200usize;

        let producer = {
            let ring = Arc::clone(&ring);
            thread::spawn(move || {
                for i in 0..count {
                    put_retrying(&ring, i);
                }
            })
        };

        let mut received = Vec::with_capacity(count);
        while received.len() < count {
            ring.consume(|value| received.push(value));
        }
        producer.join().unwrap();

        assert_eq!(received, (0..count).collect::<Vec<_>>());
    }
}

#[test]
fn supplier_driven_production() {
    for kind in BOTH {
        let ring = Arc::new(RingBuffer::new(kind, 4));
        let count = 100usize;

        let producer = {
            let ring = Arc::clone(&ring);
            thread::spawn(move || {
                let mut next = 0usize;
                loop {
                    let mut exhausted = false;
                    ring.produce(|| {
                        if next == count {
                            exhausted = true;
                            return None;
                        }
                        let value = next;
                        next += 1;
                        Some(value)
                    });
                    if exhausted {
                        break;
                    }
                }
            })
        };

        let drained = Arc::new(AtomicUsize::new(0));
        let consumers: Vec<_> = (0..3)
            .map(|_| {
                let ring = Arc::clone(&ring);
                let drained = Arc::clone(&drained);
                thread::spawn(move || {
                    let mut mine = Vec::new();
                    while drained.load(Ordering::Acquire) < count {
                        if let Some(value) = ring.try_get() {
                            drained.fetch_add(1, Ordering::AcqRel);
                            mine.push(value);
                        } else {
                            thread::yield_now();
                        }
                    }
                    mine
                })
            })
            .collect();

        producer.join().unwrap();
        let mut seen: Vec<usize> = Vec::new();
        for handle in consumers {
            seen.extend(handle.join().unwrap());
        }
        seen.sort_unstable();
        assert_eq!(seen, (0..count).collect::<Vec<_>>());
    }
}

#[test]
fn batch_drain_with_scalar_fallback() {
    for kind in BOTH {
        let ring = Arc::new(RingBuffer::new(kind, 4));
        let count = 96usize;

        let producer = {
            let ring = Arc::clone(&ring);
            thread::spawn(move || {
                for i in 0..count {
                    put_retrying(&ring, i);
                }
            })
        };

        let mut received = Vec::with_capacity(count);
        let mut batch = Vec::with_capacity(4);
        while received.len() < count {
            let taken = ring.consume_batch(&mut batch);
            assert!(taken <= 4);
            if taken > 0 {
                received.append(&mut batch);
            } else if let Some(value) = ring.try_get() {
                received.push(value);
            } else {
                thread::yield_now();
            }
        }
        producer.join().unwrap();

        // One consumer: order survives batching.
        assert_eq!(received, (0..count).collect::<Vec<_>>());
    }
}

#[test]
fn full_and_empty_observations() {
    for kind in BOTH {
        let ring = RingBuffer::new(kind, 2);
        assert_eq!(ring.capacity(), 2);

        assert!(ring.try_put("a").is_ok());
        assert!(ring.try_put("b").is_ok());
        let PutError(rejected) = ring.try_put("c").unwrap_err();
        assert_eq!(rejected, "c");

        assert_eq!(ring.try_get(), Some("a"));
        assert!(ring.try_put("d").is_ok());
        assert!(ring.try_put("e").is_err());

        assert_eq!(ring.try_get(), Some("b"));
        assert_eq!(ring.try_get(), Some("d"));
        assert_eq!(ring.try_get(), None);
        assert!(ring.is_empty());
    }
}

#[test]
fn capacity_is_normalised_to_powers_of_two() {
    for kind in BOTH {
        for (requested, effective) in [(1, 2), (2, 2), (3, 4), (5, 8), (7, 8)] {
            let ring: RingBuffer<u8> = RingBuffer::new(kind, requested);
            assert_eq!(ring.capacity(), effective);
            assert_eq!(ring.kind(), kind);
        }
    }
}

#[test]
fn concrete_types_match_the_front() {
    // Embedders that know the variant statically skip the tag dispatch.
    let classical: Classical<u32> = Classical::new(3);
    assert_eq!(classical.capacity(), 4);
    classical.try_put(1).unwrap();
    classical.produce(|| Some(2));
    assert_eq!(classical.try_get(), Some(1));
    classical.consume(|v| assert_eq!(v, 2));

    let node: NodeBased<u32> = NodeBased::new(3);
    assert_eq!(node.capacity(), 4);
    node.try_put(1).unwrap();
    node.produce(|| Some(2));
    assert_eq!(node.try_get(), Some(1));
    node.consume(|v| assert_eq!(v, 2));

    let mut out = Vec::with_capacity(2);
    assert_eq!(node.consume_batch(&mut out), 0);
}

#[test]
fn metrics_snapshot_tracks_occupancy() {
    for kind in BOTH {
        let ring = RingBuffer::new(kind, 8);
        assert!(ring.metrics().is_empty);

        for i in 0..4 {
            ring.try_put(i).unwrap();
        }
        let metrics = ring.metrics();
        assert_eq!(metrics.capacity, 8);
        assert_eq!(metrics.len, 4);
        assert!((metrics.utilization - 0.5).abs() < f64::EPSILON);
    }
}

#[test]
fn debug_formatting_names_the_kind() {
    let ring: RingBuffer<u8> = RingBuffer::new(Kind::Classical, 4);
    let rendered = format!("{ring:?}");
    assert!(rendered.contains("RingBuffer"));
    assert!(rendered.contains("Classical"));
}
