//! Tests specifically for miri
//!
//! Miri runs real threads but slowly, so the counts stay small.

#![cfg(miri)]

use std::collections::HashSet;
use std::thread;

use lax::RelaxedQueue;

#[test]
fn fill_and_drain() {
    let queue = RelaxedQueue::<8, 7, u8>::new(1, 1).unwrap();
    let mut handle = queue.handle();
    let capacity = queue.capacity() as u64;
    for value in 1..=capacity {
        assert!(handle.push(value));
    }
    assert!(!handle.push(capacity + 1));
    let mut drained: Vec<u64> = std::iter::from_fn(|| handle.pop()).collect();
    drained.sort_unstable();
    assert_eq!(drained, (1..=capacity).collect::<Vec<u64>>());
}

#[test]
fn two_threads() {
    const ITEMS: u64 = 200;

    let queue = RelaxedQueue::<8, 7, u8>::new(2, 64).unwrap();
    thread::scope(|scope| {
        scope.spawn(|| {
            let mut handle = queue.handle();
            for value in 1..=ITEMS {
                while !handle.push(value) {
                    thread::yield_now();
                }
            }
        });

        let mut handle = queue.handle();
        let mut received = HashSet::new();
        while (received.len() as u64) < ITEMS {
            match handle.pop() {
                Some(value) => {
                    assert!(received.insert(value));
                }
                None => thread::yield_now(),
            }
        }
    });
}
