//! A relaxed, bounded MPMC queue aiming for "throughput through disorder".
//!
//! Lax is a multi-producer multi-consumer FIFO queue that deliberately gives
//! up strict ordering to stay fast under heavy contention. Instead of a
//! single head/tail pair that every thread hammers, the queue is carved into
//! fixed-size *blocks* of cells grouped into *windows*. Producers and
//! consumers claim whole blocks through a randomized atomic bitset, so
//! parallel threads spread out across independent cache lines. The one
//! ordering guarantee that survives: values pushed into the same block are
//! popped from that block in insertion order.
//!
//! Operations never block and never allocate after construction. A full
//! queue rejects the push; an empty queue returns `None`. Both are ordinary
//! return values, not errors.
//!
//! ```rust
//! use lax::RelaxedQueue;
//!
//! let queue: RelaxedQueue = RelaxedQueue::new(2, 1024).unwrap();
//!
//! let mut handle = queue.handle();
//! assert!(handle.push(7));
//! assert_eq!(handle.pop(), Some(7));
//! assert_eq!(handle.pop(), None);
//! ```
//!
//! Payloads are 64-bit words with `0` reserved as the "empty cell" sentinel;
//! pushing `0` is a contract violation caught by a debug assertion. To move
//! richer data, push indices or addresses into storage you own.
//!
//! # Acknowledgments
//!
//! The block/window scheme follows the design space of relaxed k-FIFO
//! queues and multiqueues, where bounded reordering buys scalability. The
//! randomized bitset claim is what keeps contending producers from piling
//! up on bit zero.

// -----------------------------------------------------------------------------
// Boilerplate for building without the standard library

#![no_std]

extern crate alloc;
extern crate std;

// -----------------------------------------------------------------------------
// Modules

mod bitset;
mod block;
mod compile_fail;
mod handle;
mod queue;
mod util;

// -----------------------------------------------------------------------------
// Top-level exports

pub use bitset::ClaimWord;
pub use handle::Handle;
pub use queue::ConfigError;
pub use queue::RelaxedQueue;

// -----------------------------------------------------------------------------
// Platform Support

// This crate uses `loom` for testing, which requires mocking the atomic
// primitives. To keep the rest of the code oblivious, the `platform` module
// re-exports the real atomics normally and the loom mocks under
// `--cfg loom`.

#[cfg(not(loom))]
pub(crate) mod platform {

    pub use core::sync::atomic::AtomicU8;
    pub use core::sync::atomic::AtomicU16;
    pub use core::sync::atomic::AtomicU32;
    pub use core::sync::atomic::AtomicU64;
    pub use core::sync::atomic::Ordering;

    /// Tells the processor we are in a spin loop.
    #[inline(always)]
    pub fn spin_loop() {
        core::hint::spin_loop();
    }
}

#[cfg(loom)]
pub(crate) mod platform {

    pub use loom::sync::atomic::AtomicU8;
    pub use loom::sync::atomic::AtomicU16;
    pub use loom::sync::atomic::AtomicU32;
    pub use loom::sync::atomic::AtomicU64;
    pub use loom::sync::atomic::Ordering;

    /// Under loom a spin must yield, otherwise the model never switches to
    /// the thread that would let the spin terminate.
    #[inline(always)]
    pub fn spin_loop() {
        loom::thread::yield_now();
    }
}
