//! The queue itself: a circular buffer of windows, each a group of blocks
//! behind a filled bitset, swept by two monotonically increasing window
//! cursors.
//!
//! Producers work the window at `write_window`, consumers the one at
//! `read_window`. The write cursor always runs at least one window ahead of
//! the read cursor and at most one lap; those two bounds are the entire
//! full/empty story.

use alloc::boxed::Box;
use alloc::vec::Vec;

use crossbeam_utils::CachePadded;
use thiserror::Error;
use tracing::debug;
use tracing::trace;

use crate::bitset::AtomicBitset;
use crate::bitset::ClaimWord;
use crate::block::Block;
use crate::block::Header;
use crate::handle::Handle;
use crate::platform::*;

// -----------------------------------------------------------------------------
// Geometry limits

/// Fewer than four windows degenerates into producers and consumers
/// fighting over the same two windows with no slack between them.
const MIN_WINDOWS: usize = 4;

/// The header stores only the low 16 bits of a cursor, so two cursors one
/// lap apart must never alias. Capping the window count at 2^15 keeps a
/// full lap shorter than half the tag space.
const MAX_WINDOWS: usize = 1 << 15;

/// The epoch tag of a window cursor. Blocks are stamped with this to tie
/// them to one pass of the cursor over their slot.
#[inline]
pub(crate) fn epoch_tag(cursor: u64) -> u16 {
    cursor as u16
}

// -----------------------------------------------------------------------------
// Configuration errors

/// The ways a queue geometry can be unbuildable. Everything here is
/// detected at construction; a constructed queue never reports errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// `CELLS` must fit the 16-bit `write` counter and cannot be zero.
    #[error("cells per block must be in 1..=65535, got {0}")]
    BadCellCount(usize),

    /// `BLOCKS` must be a nonzero power of two so window-relative indices
    /// can be masked.
    #[error("blocks per window must be a nonzero power of two, got {0}")]
    BadBlockCount(usize),

    /// `BLOCKS` must fill the claim words of the filled bitset exactly.
    #[error("blocks per window ({blocks}) must be a multiple of the {word_bits}-bit claim word")]
    UnalignedBlockCount { blocks: usize, word_bits: usize },

    /// The requested capacity needs more windows than the 16-bit epoch tag
    /// can keep apart.
    #[error("capacity {capacity} needs {windows} windows, more than the 16-bit epoch tag allows")]
    CapacityTooLarge { capacity: usize, windows: usize },
}

// -----------------------------------------------------------------------------
// Windows

/// A group of blocks sharing a filled bitset; the unit of cursor movement.
pub(crate) struct Window<const BLOCKS: usize, const CELLS: usize, W: ClaimWord> {
    /// One bit per block: set by the producer that owns the block this
    /// epoch, cleared by the consumer that takes it for draining.
    pub filled: AtomicBitset<W>,
    pub blocks: [Block<CELLS>; BLOCKS],
}

impl<const BLOCKS: usize, const CELLS: usize, W: ClaimWord> Window<BLOCKS, CELLS, W> {
    fn new(epoch: u16) -> Window<BLOCKS, CELLS, W> {
        Window {
            filled: AtomicBitset::new(BLOCKS),
            blocks: core::array::from_fn(|_| Block::new(epoch)),
        }
    }
}

// -----------------------------------------------------------------------------
// The queue

/// A relaxed, bounded MPMC FIFO queue.
///
/// `BLOCKS` is the number of blocks per window (the contention fan-out,
/// a power of two, a multiple of the claim word width) and `CELLS` the
/// number of payload cells per block (typically one less than a cache
/// line's worth of 64-bit slots). `W` selects the word width of the filled
/// bitsets.
///
/// All operations go through per-thread [`Handle`]s obtained from
/// [`RelaxedQueue::handle`]; handles borrow the queue and cannot outlive
/// it.
pub struct RelaxedQueue<const BLOCKS: usize = 64, const CELLS: usize = 7, W: ClaimWord = u64> {
    windows: Box<[Window<BLOCKS, CELLS, W>]>,
    pub(crate) read_window: CachePadded<AtomicU64>,
    pub(crate) write_window: CachePadded<AtomicU64>,
}

impl<const BLOCKS: usize, const CELLS: usize, W: ClaimWord> core::fmt::Debug
    for RelaxedQueue<BLOCKS, CELLS, W>
{
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RelaxedQueue").finish_non_exhaustive()
    }
}

impl<const BLOCKS: usize, const CELLS: usize, W: ClaimWord> RelaxedQueue<BLOCKS, CELLS, W> {
    /// Creates a queue that accepts at least `capacity` items, laid out for
    /// roughly `threads` concurrently active handles.
    ///
    /// The window count is the smallest power of two that covers the
    /// requested capacity, floored at four windows and at two blocks of
    /// slack per hinted thread so the claim paths stay spread out.
    pub fn new(threads: usize, capacity: usize) -> Result<Self, ConfigError> {
        if CELLS == 0 || CELLS > u16::MAX as usize {
            return Err(ConfigError::BadCellCount(CELLS));
        }
        if BLOCKS == 0 || !BLOCKS.is_power_of_two() {
            return Err(ConfigError::BadBlockCount(BLOCKS));
        }
        if BLOCKS % W::BITS != 0 {
            return Err(ConfigError::UnalignedBlockCount {
                blocks: BLOCKS,
                word_bits: W::BITS,
            });
        }

        // One lap of separation stays reserved for the consumers, so a
        // queue with N windows holds (N - 1) windows' worth of items.
        let per_window = BLOCKS * CELLS;
        let wanted = (capacity.div_ceil(per_window) + 1).next_power_of_two();
        let slack = threads
            .saturating_mul(2)
            .div_ceil(BLOCKS)
            .next_power_of_two();
        let window_count = wanted.max(slack).max(MIN_WINDOWS);
        if window_count > MAX_WINDOWS {
            return Err(ConfigError::CapacityTooLarge {
                capacity,
                windows: window_count,
            });
        }

        // Blocks are stamped with the cursor value that will first reach
        // them. The cursors start at `window_count`, keeping epoch 0 free
        // as a never-matching sentinel, so slot i is first swept by cursor
        // `window_count + i` -- except slot 0, which the write cursor
        // (starting one past the read cursor) only reaches a lap later.
        let windows: Vec<Window<BLOCKS, CELLS, W>> = (0..window_count)
            .map(|slot| {
                let first_use = if slot == 0 {
                    2 * window_count
                } else {
                    window_count + slot
                };
                Window::new(epoch_tag(first_use as u64))
            })
            .collect();

        debug!(
            windows = window_count,
            blocks = BLOCKS,
            cells = CELLS,
            capacity = (window_count - 1) * per_window,
            "created relaxed queue"
        );

        Ok(RelaxedQueue {
            windows: windows.into_boxed_slice(),
            read_window: CachePadded::new(AtomicU64::new(window_count as u64)),
            write_window: CachePadded::new(AtomicU64::new(window_count as u64 + 1)),
        })
    }

    /// Creates a new handle. Every push or pop goes through one; a thread
    /// should keep reusing its handle rather than creating one per
    /// operation, since the handle caches the block it last worked on.
    pub fn handle(&self) -> Handle<'_, BLOCKS, CELLS, W> {
        Handle::new(self)
    }

    /// The exact number of items the queue accepts before a push fails,
    /// starting from empty and with no concurrent pops.
    pub fn capacity(&self) -> usize {
        (self.windows.len() - 1) * BLOCKS * CELLS
    }

    /// Number of windows in the buffer.
    pub(crate) fn window_count(&self) -> u64 {
        self.windows.len() as u64
    }

    /// The window a cursor value addresses.
    #[inline]
    pub(crate) fn window(&self, cursor: u64) -> &Window<BLOCKS, CELLS, W> {
        &self.windows[(cursor & (self.window_count() - 1)) as usize]
    }

    /// Forces the write window past `w` on behalf of a consumer that has
    /// run out of filled blocks.
    ///
    /// Every block of window `w` still untouched this epoch is stamped
    /// with the epoch of the next lap, which invalidates it: a producer
    /// that observed the old `write_window` can no longer reserve cells
    /// there, though one that already claimed a block and wrote into it
    /// keeps it. A producer that claimed a block but had not yet written
    /// sees the stamp as an epoch mismatch on an empty block and hands the
    /// filled bit back.
    pub(crate) fn force_move_write(&self, w: u64) {
        let stale = Header::new(epoch_tag(w)).pack();
        let advanced = Header::new(epoch_tag(w + self.window_count())).pack();
        for block in &self.window(w).blocks {
            let _ = block
                .header
                .compare_exchange(stale, advanced, Ordering::AcqRel, Ordering::Relaxed);
        }
        if self
            .write_window
            .compare_exchange(w, w + 1, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
        {
            trace!(window = w, "force-moved the write window");
        }
    }
}

// -----------------------------------------------------------------------------
// Tests
