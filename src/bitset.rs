//! A fixed-size atomic bitset with a randomized claim operation.
//!
//! The queue marks each block of a window with one "filled" bit: a producer
//! sets the bit when it takes ownership of the block, a consumer clears it
//! when it takes the block for draining. Both directions go through
//! [`AtomicBitset::claim_unset`] / [`AtomicBitset::claim_set`], which pick a
//! matching bit *at random* and flip it in one CAS. A deterministic
//! low-to-high scan would funnel every thread onto bit zero; the two random
//! offsets (starting word, rotation within the word) spread contending
//! threads across the whole set.

use alloc::boxed::Box;
use alloc::vec::Vec;

use crate::platform::*;
use crate::util::XorShift64Star;

// -----------------------------------------------------------------------------
// Claim words

mod sealed {
    pub trait Sealed {}
}

/// An unsigned integer usable as the atomic word backing an
/// [`AtomicBitset`]. Implemented for `u8`, `u16`, `u32` and `u64`; the
/// width trades scan granularity against CAS contention per word.
///
/// This trait is sealed and exists only as a type-level configuration knob.
pub trait ClaimWord: sealed::Sealed + Copy + 'static {
    /// Number of bits in one word.
    const BITS: usize;

    /// The atomic form of the word.
    type Atomic: Send + Sync;

    /// Creates an all-zero atomic word.
    fn new_atomic() -> Self::Atomic;

    /// Loads the current value.
    fn load(word: &Self::Atomic, order: Ordering) -> Self;

    /// Returns true if no bit is set.
    fn is_zero(self) -> bool;

    /// Returns true if the given bit is set.
    fn test(self, bit: usize) -> bool;

    /// Moves the given bit into the given state. Returns `false` when the
    /// bit was already there, `true` when this call transitioned it.
    fn transition(word: &Self::Atomic, bit: usize, set: bool) -> bool;

    /// The single-word randomized claim. Starting from `rotation`, finds
    /// the first bit equal to `want_set` (wrapping around within the word)
    /// and flips it in one CAS. On CAS failure the word is rescanned with
    /// its updated value; `None` means the word held no matching bit.
    fn claim(word: &Self::Atomic, rotation: usize, want_set: bool) -> Option<usize>;
}

macro_rules! claim_word {
    ($word:ty, $atomic:ty, $bits:expr) => {
        impl sealed::Sealed for $word {}

        impl ClaimWord for $word {
            const BITS: usize = $bits;

            type Atomic = $atomic;

            fn new_atomic() -> Self::Atomic {
                <$atomic>::new(0)
            }

            fn load(word: &Self::Atomic, order: Ordering) -> Self {
                word.load(order)
            }

            fn is_zero(self) -> bool {
                self == 0
            }

            fn test(self, bit: usize) -> bool {
                self & (1 << bit) != 0
            }

            fn transition(word: &Self::Atomic, bit: usize, set: bool) -> bool {
                let mask = (1 as $word) << bit;
                let mut current = word.load(Ordering::Acquire);
                loop {
                    let next = if set { current | mask } else { current & !mask };
                    if next == current {
                        return false;
                    }
                    match word.compare_exchange_weak(
                        current,
                        next,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    ) {
                        Ok(_) => return true,
                        Err(actual) => current = actual,
                    }
                }
            }

            fn claim(word: &Self::Atomic, rotation: usize, want_set: bool) -> Option<usize> {
                let mut current = word.load(Ordering::Acquire);
                loop {
                    // Rotate so the scan starts at `rotation`, then count
                    // trailing zeros (hunting a set bit) or trailing ones
                    // (hunting a clear bit) to find the first candidate.
                    let rotated = current.rotate_right(rotation as u32);
                    let skipped = if want_set {
                        rotated.trailing_zeros() as usize
                    } else {
                        rotated.trailing_ones() as usize
                    };
                    if skipped >= $bits {
                        return None;
                    }
                    // Undo the rotation to recover the real bit index.
                    let index = (rotation + skipped) % $bits;
                    let flipped = current ^ ((1 as $word) << index);
                    match word.compare_exchange_weak(
                        current,
                        flipped,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    ) {
                        Ok(_) => return Some(index),
                        Err(actual) => current = actual,
                    }
                }
            }
        }
    };
}

claim_word!(u8, crate::platform::AtomicU8, 8);
claim_word!(u16, crate::platform::AtomicU16, 16);
claim_word!(u32, crate::platform::AtomicU32, 32);
claim_word!(u64, crate::platform::AtomicU64, 64);

// -----------------------------------------------------------------------------
// Bitset

/// A fixed-size array of atomic bits. The bit count is set at construction
/// and must be a nonzero multiple of the word width.
pub(crate) struct AtomicBitset<W: ClaimWord> {
    words: Box<[W::Atomic]>,
}

impl<W: ClaimWord> AtomicBitset<W> {
    /// Creates a bitset with all bits clear.
    pub fn new(bits: usize) -> Self {
        assert!(bits > 0 && bits % W::BITS == 0);
        let words: Vec<W::Atomic> = (0..bits / W::BITS).map(|_| W::new_atomic()).collect();
        AtomicBitset {
            words: words.into_boxed_slice(),
        }
    }

    /// Number of bits in the set.
    pub fn len(&self) -> usize {
        self.words.len() * W::BITS
    }

    /// Sets the given bit. Returns `false` if it was already set.
    pub fn set(&self, index: usize) -> bool {
        debug_assert!(index < self.len());
        W::transition(&self.words[index / W::BITS], index % W::BITS, true)
    }

    /// Clears the given bit. Returns `false` if it was already clear.
    pub fn reset(&self, index: usize) -> bool {
        debug_assert!(index < self.len());
        W::transition(&self.words[index / W::BITS], index % W::BITS, false)
    }

    /// Returns the current state of the given bit.
    pub fn test(&self, index: usize) -> bool {
        debug_assert!(index < self.len());
        W::load(&self.words[index / W::BITS], Ordering::Acquire).test(index % W::BITS)
    }

    /// Returns true if any bit is set. Like every multi-word observation
    /// this is a snapshot, not a fact.
    pub fn any(&self) -> bool {
        self.words
            .iter()
            .any(|word| !W::load(word, Ordering::Acquire).is_zero())
    }

    /// Finds some set bit and atomically clears it, returning its index.
    pub fn claim_set(&self, rng: &XorShift64Star) -> Option<usize> {
        self.claim(rng, true)
    }

    /// Finds some clear bit and atomically sets it, returning its index.
    pub fn claim_unset(&self, rng: &XorShift64Star) -> Option<usize> {
        self.claim(rng, false)
    }

    /// The randomized claim. `None` after a full scan means no matching bit
    /// was observed; bits may have changed mid-scan, so this is a hint
    /// rather than an emptiness proof. The queue only uses it to decide
    /// when to slide a window forward.
    fn claim(&self, rng: &XorShift64Star, want_set: bool) -> Option<usize> {
        let offset = if self.words.len() > 1 {
            rng.next_usize(self.words.len())
        } else {
            0
        };
        let rotation = rng.next_usize(W::BITS);
        for i in 0..self.words.len() {
            let at = (i + offset) % self.words.len();
            if let Some(bit) = W::claim(&self.words[at], rotation, want_set) {
                return Some(at * W::BITS + bit);
            }
        }
        None
    }
}

// -----------------------------------------------------------------------------
// Tests

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::vec::Vec;

    #[test]
    fn set_reset_test() {
        let bits = AtomicBitset::<u8>::new(16);
        assert_eq!(bits.len(), 16);
        assert!(!bits.test(3));
        assert!(bits.set(3));
        assert!(!bits.set(3), "setting twice reports no transition");
        assert!(bits.test(3));
        assert!(bits.reset(3));
        assert!(!bits.reset(3));
        assert!(!bits.test(3));
    }

    #[test]
    fn any_sees_every_word() {
        let bits = AtomicBitset::<u8>::new(32);
        assert!(!bits.any());
        for index in [0, 9, 17, 31] {
            bits.set(index);
            assert!(bits.any());
            bits.reset(index);
            assert!(!bits.any());
        }
    }

    #[test]
    fn claim_unset_exhausts_exactly_once() {
        let bits = AtomicBitset::<u16>::new(64);
        let rng = XorShift64Star::new();
        let mut seen = HashSet::new();
        for _ in 0..64 {
            let index = bits.claim_unset(&rng).expect("a clear bit must remain");
            assert!(index < 64);
            assert!(seen.insert(index), "claimed bit {index} twice");
        }
        assert_eq!(bits.claim_unset(&rng), None);
        assert!(bits.any());
    }

    #[test]
    fn claim_set_drains_exactly_once() {
        let bits = AtomicBitset::<u32>::new(32);
        let rng = XorShift64Star::new();
        for index in 0..32 {
            bits.set(index);
        }
        let mut seen = HashSet::new();
        for _ in 0..32 {
            let index = bits.claim_set(&rng).expect("a set bit must remain");
            assert!(seen.insert(index));
        }
        assert_eq!(bits.claim_set(&rng), None);
        assert!(!bits.any());
    }

    #[test]
    fn claim_spreads_over_the_set() {
        // Not a statistical test, just a guard against the claim collapsing
        // onto a constant starting point.
        let mut first_claims = HashSet::new();
        for _ in 0..64 {
            let bits = AtomicBitset::<u64>::new(64);
            let rng = XorShift64Star::new();
            first_claims.insert(bits.claim_unset(&rng).unwrap());
        }
        assert!(first_claims.len() > 1);
    }

    #[test]
    fn concurrent_claims_are_exclusive() {
        use std::sync::Arc;
        use std::thread;

        let bits = Arc::new(AtomicBitset::<u8>::new(256));
        let mut workers = Vec::new();
        for _ in 0..4 {
            let bits = Arc::clone(&bits);
            workers.push(thread::spawn(move || {
                let rng = XorShift64Star::new();
                let mut claimed = Vec::new();
                while let Some(index) = bits.claim_unset(&rng) {
                    claimed.push(index);
                }
                claimed
            }));
        }

        let mut all = HashSet::new();
        for worker in workers {
            for index in worker.join().unwrap() {
                assert!(all.insert(index), "bit {index} claimed by two threads");
            }
        }
        assert_eq!(all.len(), 256);
    }
}
