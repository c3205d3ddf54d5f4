//! Per-thread queue access.
//!
//! A handle caches the block it most recently pushed to and the block it
//! most recently popped from. The fast path is a single CAS on that cached
//! block's header; only when the cached block is exhausted (or its epoch
//! has moved on) does the handle fall into the claim path, which picks a
//! new block through the randomized bitset and, when a whole window is
//! spent, slides the matching cursor forward.

use alloc::boxed::Box;
use core::ptr::NonNull;

use tracing::trace;

use crate::bitset::ClaimWord;
use crate::block::Block;
use crate::block::COMMIT_ONE;
use crate::block::EMPTY_CELL;
use crate::block::Header;
use crate::platform::*;
use crate::queue::RelaxedQueue;
use crate::queue::epoch_tag;
use crate::util::XorShift64Star;

// -----------------------------------------------------------------------------
// Handle

/// A fresh handle's cursor snapshots start at zero, whose epoch tag is
/// zero. Stamping the dummy block with a different tag guarantees the
/// first push and the first pop both miss the cache and run the claim
/// path. Real cursors never produce either tag before the first claim
/// overwrites the snapshot, because they start at the window count, which
/// is at least four.
const DUMMY_EPOCH: u16 = 1;

/// A per-thread accessor for a [`RelaxedQueue`].
///
/// Handles are created with [`RelaxedQueue::handle`] and borrow the queue,
/// so they cannot outlive it. They are `Send` but not `Sync`: one handle
/// serves one thread, and operations take `&mut self`.
pub struct Handle<'queue, const BLOCKS: usize, const CELLS: usize, W: ClaimWord> {
    queue: &'queue RelaxedQueue<BLOCKS, CELLS, W>,

    /// Cursor snapshot, filled-bit index and block pointer of the last
    /// successful push claim.
    push_window: u64,
    push_bit: usize,
    push_block: NonNull<Block<CELLS>>,

    /// The same trio for the pop side.
    pop_window: u64,
    pop_bit: usize,
    pop_block: NonNull<Block<CELLS>>,

    /// Randomness for the bitset claims.
    rng: XorShift64Star,

    /// Both block pointers start out aimed at this private heap-allocated
    /// block, whose epoch never matches. Held raw so the cached pointers
    /// survive the handle being moved; freed when the handle drops.
    dummy: NonNull<Block<CELLS>>,
}

// SAFETY: The raw block pointers target either the handle's own boxed dummy
// block or the queue's buffer, which outlives the handle; everything behind
// them is atomics. Moving the handle to another thread moves exclusive
// access along with it.
unsafe impl<const BLOCKS: usize, const CELLS: usize, W: ClaimWord> Send
    for Handle<'_, BLOCKS, CELLS, W>
{
}

impl<'queue, const BLOCKS: usize, const CELLS: usize, W: ClaimWord>
    Handle<'queue, BLOCKS, CELLS, W>
{
    pub(crate) fn new(queue: &'queue RelaxedQueue<BLOCKS, CELLS, W>) -> Self {
        // SAFETY: Pointers produced by `Box::into_raw` are never null.
        let dummy =
            unsafe { NonNull::new_unchecked(Box::into_raw(Box::new(Block::new(DUMMY_EPOCH)))) };
        Handle {
            queue,
            push_window: 0,
            push_bit: 0,
            push_block: dummy,
            pop_window: 0,
            pop_bit: 0,
            pop_block: dummy,
            rng: XorShift64Star::new(),
            dummy,
        }
    }

    // -------------------------------------------------------------------------
    // Push

    /// Appends `value` to the queue. Returns `false` when the queue is
    /// full. `value` must not be zero, which is reserved as the empty-cell
    /// sentinel.
    pub fn push(&mut self, value: u64) -> bool {
        debug_assert_ne!(value, EMPTY_CELL, "zero payloads are reserved");

        // Whether the current cached block was claimed by this very call.
        // Only such a block can be a spurious claim.
        let mut fresh_claim = false;
        loop {
            // SAFETY: `push_block` points at the handle's own dummy block
            // or into the queue's buffer; both outlive the handle and are
            // never moved.
            let block = unsafe { self.push_block.as_ref() };
            let header = block.load_header(Ordering::Acquire);
            let epoch = epoch_tag(self.push_window);

            if header.epoch != epoch || header.write as usize >= CELLS {
                if fresh_claim && header.epoch != epoch && header.write == 0 {
                    // The window was force-moved between our bitset claim
                    // and this check; nobody will ever drain the block, so
                    // hand the bit back before claiming elsewhere.
                    self.queue
                        .window(self.push_window)
                        .filled
                        .reset(self.push_bit);
                    trace!(window = self.push_window, "relinquished a spurious claim");
                }
                if !self.claim_write_block() {
                    return false;
                }
                fresh_claim = true;
                continue;
            }

            // Reserve the next cell. The CAS covers the whole header, so it
            // fails if a concurrent pop moved the read counters; reloading
            // and retrying is all that's needed.
            let mut reserved = header;
            reserved.write += 1;
            if block
                .header
                .compare_exchange_weak(
                    header.pack(),
                    reserved.pack(),
                    Ordering::AcqRel,
                    Ordering::Relaxed,
                )
                .is_ok()
            {
                block.cells[header.write as usize].store(value, Ordering::Release);
                return true;
            }
        }
    }

    /// Claims a block for pushing, sliding the write window forward when
    /// the current one has no unclaimed blocks left.
    #[cold]
    fn claim_write_block(&mut self) -> bool {
        let queue = self.queue;
        loop {
            let w = queue.write_window.load(Ordering::Acquire);
            let window = queue.window(w);
            if let Some(bit) = window.filled.claim_unset(&self.rng) {
                self.push_window = w;
                self.push_bit = bit;
                self.push_block = NonNull::from(&window.blocks[bit]);
                return true;
            }

            // The window is fully claimed. Advancing would close the gap to
            // the read cursor; refuse once only one lap remains.
            let r = queue.read_window.load(Ordering::Acquire);
            if w + 1 - r >= queue.window_count() {
                return false;
            }
            if queue
                .write_window
                .compare_exchange(w, w + 1, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                trace!(from = w, "advanced the write window");
            }
            // On CAS failure another producer advanced it; either way the
            // next iteration sees the new cursor.
        }
    }

    // -------------------------------------------------------------------------
    // Pop

    /// Removes some value from the queue. Returns `None` when the queue is
    /// observed empty. Values from one block arrive in push order; values
    /// from different blocks arrive in whatever order the claims land.
    pub fn pop(&mut self) -> Option<u64> {
        loop {
            // SAFETY: `pop_block` points at the handle's own dummy block or
            // into the queue's buffer; both outlive the handle and are
            // never moved.
            let block = unsafe { self.pop_block.as_ref() };
            let header = block.load_header(Ordering::Acquire);

            if header.epoch != epoch_tag(self.pop_window) || header.claimed >= header.write {
                if !self.claim_read_block() {
                    return None;
                }
                continue;
            }

            // Reserve the next unread cell.
            let mut reserved = header;
            reserved.claimed += 1;
            if block
                .header
                .compare_exchange_weak(
                    header.pack(),
                    reserved.pack(),
                    Ordering::AcqRel,
                    Ordering::Relaxed,
                )
                .is_err()
            {
                continue;
            }

            // The producer that reserved this cell may not have stored yet;
            // the gap between its reservation CAS and its store is a few
            // instructions, so spin rather than give up the reservation.
            let cell = &block.cells[header.claimed as usize];
            let mut value = cell.load(Ordering::Acquire);
            while value == EMPTY_CELL {
                spin_loop();
                value = cell.load(Ordering::Acquire);
            }
            cell.store(EMPTY_CELL, Ordering::Release);

            // Commit the pop. The release half of the AcqRel makes the
            // cell's zero-restore visible before the block can recycle.
            let before = Header::unpack(block.header.fetch_add(COMMIT_ONE, Ordering::AcqRel));
            debug_assert!(before.committed < before.write, "commit overran the block");
            let committed = before.committed + 1;

            if committed == header.write {
                // A producer that claimed this block for the next lap while
                // we were mid-drain walked away from the stale header and
                // left its filled bit behind. Dropping the bit before the
                // recycle means it can never shadow a claim on the fresh
                // block; afterwards would be too late.
                self.queue.window(self.pop_window).filled.reset(self.pop_bit);
                self.recycle(block, header.epoch, header.write);
            }
            return Some(value);
        }
    }

    /// Returns a fully drained block to the empty state, stamped for the
    /// next lap of the cursor.
    ///
    /// The expected header is reconstructed rather than re-read: if a
    /// producer slipped in another reservation since our last load, the
    /// CAS simply fails and the pop that drains that reservation performs
    /// the recycle instead.
    fn recycle(&self, block: &Block<CELLS>, epoch: u16, write: u16) {
        let drained = Header::terminal(epoch, write);
        let next = Header::new(epoch_tag(self.pop_window + self.queue.window_count()));
        let _ = block.header.compare_exchange(
            drained.pack(),
            next.pack(),
            Ordering::AcqRel,
            Ordering::Relaxed,
        );
    }

    /// Claims a block for popping, sliding the read window forward when the
    /// current one has no filled blocks left.
    #[cold]
    fn claim_read_block(&mut self) -> bool {
        let queue = self.queue;
        loop {
            let r = queue.read_window.load(Ordering::Acquire);
            let window = queue.window(r);
            if let Some(bit) = window.filled.claim_set(&self.rng) {
                self.pop_window = r;
                self.pop_bit = bit;
                self.pop_block = NonNull::from(&window.blocks[bit]);
                return true;
            }

            let w = queue.write_window.load(Ordering::Acquire);
            if w == r + 1 {
                // The producers' window is right ahead of us. If nothing in
                // it has been claimed either, the queue is empty as far as
                // anyone can observe.
                if !queue.window(w).filled.any() {
                    return false;
                }
                // Producers have blocks in flight there; push the write
                // window onward so we may enter theirs.
                queue.force_move_write(w);
            }
            if queue
                .read_window
                .compare_exchange(r, r + 1, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                trace!(from = r, "advanced the read window");
            }
        }
    }
}

impl<const BLOCKS: usize, const CELLS: usize, W: ClaimWord> Drop
    for Handle<'_, BLOCKS, CELLS, W>
{
    fn drop(&mut self) {
        // SAFETY: `dummy` was created by `Box::into_raw` in `new`, is freed
        // nowhere else, and the cached block pointers that may still alias
        // it are never dereferenced again.
        drop(unsafe { Box::from_raw(self.dummy.as_ptr()) });
    }
}

// -----------------------------------------------------------------------------
// Tests

#[cfg(test)]
mod tests {
    use super::*;
    use std::vec::Vec;

    fn small_queue() -> RelaxedQueue<8, 7, u8> {
        RelaxedQueue::new(1, 1).unwrap()
    }

    #[test]
    fn pop_on_a_fresh_queue_is_none() {
        let queue = small_queue();
        assert_eq!(queue.handle().pop(), None);
    }

    #[test]
    fn push_pop_single_value() {
        let queue = small_queue();
        let mut handle = queue.handle();
        assert_eq!(handle.pop(), None);
        assert!(handle.push(42));
        assert_eq!(handle.pop(), Some(42));
        assert_eq!(handle.pop(), None);
    }

    #[test]
    fn alternating_push_pop_returns_each_value() {
        // Single-threaded, so every pop drains the block the push landed
        // in: the value comes straight back. This sweeps the cursors
        // through many windows and exercises recycling.
        let queue = small_queue();
        let mut handle = queue.handle();
        for value in 1..=1000 {
            assert!(handle.push(value));
            assert_eq!(handle.pop(), Some(value));
        }
        assert_eq!(handle.pop(), None);
    }

    #[test]
    fn fill_exactly_to_capacity() {
        let queue = small_queue();
        let capacity = queue.capacity() as u64;
        let mut handle = queue.handle();
        for value in 1..=capacity {
            assert!(handle.push(value), "push {value} of {capacity} failed");
        }
        assert!(!handle.push(capacity + 1), "queue accepted more than capacity");
    }

    #[test]
    fn drain_returns_the_pushed_multiset() {
        let queue = small_queue();
        let capacity = queue.capacity() as u64;
        let mut handle = queue.handle();
        for value in 1..=capacity {
            assert!(handle.push(value));
        }

        let mut drained: Vec<u64> = core::iter::from_fn(|| handle.pop()).collect();
        drained.sort_unstable();
        let expected: Vec<u64> = (1..=capacity).collect();
        assert_eq!(drained, expected);
        assert_eq!(handle.pop(), None);
    }

    #[test]
    fn refill_after_full_drain() {
        let queue = small_queue();
        let mut handle = queue.handle();
        for round in 0..5 {
            let base = round * 1000 + 1;
            for value in base..base + 100 {
                assert!(handle.push(value));
            }
            let mut drained: Vec<u64> = core::iter::from_fn(|| handle.pop()).collect();
            drained.sort_unstable();
            let expected: Vec<u64> = (base..base + 100).collect();
            assert_eq!(drained, expected);
        }
    }

    #[test]
    fn same_block_pops_in_push_order() {
        // With a single thread the first CELLS pushes land in one block,
        // and a block hands its values back in insertion order.
        let queue = small_queue();
        let mut handle = queue.handle();
        for value in 1..=7 {
            assert!(handle.push(value));
        }
        for value in 1..=7 {
            assert_eq!(handle.pop(), Some(value));
        }
    }

    #[test]
    fn handles_are_independent() {
        let queue = small_queue();
        let mut producer = queue.handle();
        let mut consumer = queue.handle();
        assert!(producer.push(5));
        assert_eq!(consumer.pop(), Some(5));
        assert_eq!(consumer.pop(), None);
    }

    #[test]
    fn full_push_fails_without_losing_values() {
        let queue = small_queue();
        let capacity = queue.capacity() as u64;
        let mut handle = queue.handle();
        for value in 1..=capacity {
            assert!(handle.push(value));
        }
        assert!(!handle.push(u64::MAX));
        assert!(!handle.push(u64::MAX));

        // A failed push must not have corrupted anything: everything
        // drains back out.
        let drained: Vec<u64> = core::iter::from_fn(|| handle.pop()).collect();
        assert_eq!(drained.len(), capacity as usize);
    }

    #[test]
    fn pop_after_partial_drain_keeps_counting() {
        let queue = small_queue();
        let mut handle = queue.handle();
        for value in 1..=20 {
            assert!(handle.push(value));
        }
        let mut drained: Vec<u64> = (0..10).map(|_| handle.pop().unwrap()).collect();
        for value in 21..=30 {
            assert!(handle.push(value));
        }
        drained.extend(core::iter::from_fn(|| handle.pop()));
        drained.sort_unstable();
        let expected: Vec<u64> = (1..=30).collect();
        assert_eq!(drained, expected);
    }
}
