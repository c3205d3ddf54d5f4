//! Producer/consumer throughput for the relaxed queue against a strict
//! lock-free FIFO and a mutex-guarded ring.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::thread;

use crossbeam_queue::ArrayQueue;
use divan::Bencher;
use divan::black_box;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use lax::RelaxedQueue;

/// Producer/consumer pairs to run concurrently.
const PAIRS: &[usize] = &[1, 2, 4, 8];

/// Items moved through the queue per producer.
const ITEMS: u64 = 100_000;

/// Items sitting in the queue before the timed section begins.
const PREFILL: u64 = 512;

const CAPACITY: usize = 8192;

fn pairs() -> impl Iterator<Item = usize> {
    PAIRS.iter().cloned()
}

// -----------------------------------------------------------------------------
// Subjects

#[divan::bench(args = pairs(), threads = false)]
fn relaxed(bencher: Bencher, pairs: usize) {
    bencher.bench_local(move || {
        let queue = RelaxedQueue::<64, 7>::new(pairs * 2, CAPACITY).unwrap();

        {
            let mut handle = queue.handle();
            for value in 1..=PREFILL {
                assert!(handle.push(value));
            }
        }

        thread::scope(|scope| {
            for _ in 0..pairs {
                scope.spawn(|| {
                    let mut handle = queue.handle();
                    for value in 1..=ITEMS {
                        while !handle.push(black_box(value)) {
                            std::hint::spin_loop();
                        }
                    }
                });
                scope.spawn(|| {
                    let mut handle = queue.handle();
                    let mut received = 0;
                    while received < ITEMS {
                        if handle.pop().is_some() {
                            received += 1;
                        } else {
                            std::hint::spin_loop();
                        }
                    }
                });
            }
        });
    });
}

#[divan::bench(args = pairs(), threads = false)]
fn strict_fifo(bencher: Bencher, pairs: usize) {
    bencher.bench_local(move || {
        let queue = ArrayQueue::new(CAPACITY);
        for value in 1..=PREFILL {
            assert!(queue.push(value).is_ok());
        }

        thread::scope(|scope| {
            for _ in 0..pairs {
                scope.spawn(|| {
                    for value in 1..=ITEMS {
                        while queue.push(black_box(value)).is_err() {
                            std::hint::spin_loop();
                        }
                    }
                });
                scope.spawn(|| {
                    let mut received = 0;
                    while received < ITEMS {
                        if queue.pop().is_some() {
                            received += 1;
                        } else {
                            std::hint::spin_loop();
                        }
                    }
                });
            }
        });
    });
}

#[divan::bench(args = pairs(), threads = false)]
fn mutex_ring(bencher: Bencher, pairs: usize) {
    bencher.bench_local(move || {
        let queue = Mutex::new(VecDeque::with_capacity(CAPACITY));
        for value in 1..=PREFILL {
            queue.lock().unwrap().push_back(value);
        }

        thread::scope(|scope| {
            for _ in 0..pairs {
                scope.spawn(|| {
                    for value in 1..=ITEMS {
                        loop {
                            let mut ring = queue.lock().unwrap();
                            if ring.len() < CAPACITY {
                                ring.push_back(black_box(value));
                                break;
                            }
                        }
                    }
                });
                scope.spawn(|| {
                    let mut received = 0;
                    while received < ITEMS {
                        if queue.lock().unwrap().pop_front().is_some() {
                            received += 1;
                        }
                    }
                });
            }
        });
    });
}

fn main() {
    let fmt_layer = fmt::layer()
        .without_time()
        .with_target(false)
        .compact();

    tracing_subscriber::registry().with(fmt_layer).init();

    divan::main();
}
