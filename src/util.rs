#[cfg(not(feature = "shuttle"))]
use core::cell::Cell;

/// [xorshift*] is a fast pseudorandom number generator which will
/// even tolerate weak seeding, as long as it's not zero.
///
/// Every queue handle owns one of these and draws the starting word and the
/// bit rotation for its randomized bitset claims from it. Keeping the state
/// in the handle avoids a process-wide singleton and any thread-local
/// machinery.
///
/// [xorshift*]: https://en.wikipedia.org/wiki/Xorshift#xorshift*
#[cfg(not(feature = "shuttle"))]
pub struct XorShift64Star {
    state: Cell<u64>,
}

#[cfg(not(feature = "shuttle"))]
impl XorShift64Star {
    /// Seeds a new generator from the hash of a global counter.
    ///
    /// Under loom the seed must be a constant instead: the model checker
    /// replays executions and a seed that changes between iterations would
    /// make the program non-deterministic in its eyes.
    pub fn new() -> Self {
        #[cfg(loom)]
        let seed = 0x9e37_79b9_7f4a_7c15;

        #[cfg(not(loom))]
        let seed = {
            use core::hash::Hasher;
            use core::sync::atomic::AtomicUsize;
            use core::sync::atomic::Ordering;
            use std::hash::DefaultHasher;

            let mut seed = 0;
            while seed == 0 {
                let mut hasher = DefaultHasher::new();
                static COUNTER: AtomicUsize = AtomicUsize::new(0);
                hasher.write_usize(COUNTER.fetch_add(1, Ordering::Relaxed));
                seed = hasher.finish();
            }
            seed
        };

        XorShift64Star {
            state: Cell::new(seed),
        }
    }

    #[allow(dead_code)]
    pub fn from_seed(seed: u64) -> Self {
        debug_assert_ne!(seed, 0);
        XorShift64Star {
            state: Cell::new(seed),
        }
    }

    fn next(&self) -> u64 {
        let mut x = self.state.get();
        debug_assert_ne!(x, 0);
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.state.set(x);
        x.wrapping_mul(0x2545_f491_4f6c_dd1d)
    }

    /// Return a value from `0..n`.
    pub fn next_usize(&self, n: usize) -> usize {
        (self.next() % n as u64) as usize
    }
}

#[cfg(feature = "shuttle")]
pub struct XorShift64Star;

#[cfg(feature = "shuttle")]
impl XorShift64Star {
    pub fn new() -> Self {
        Self
    }

    pub fn next_usize(&self, n: usize) -> usize {
        use shuttle::rand::Rng;
        use shuttle::rand::thread_rng;

        thread_rng().gen_range(0..n)
    }
}
