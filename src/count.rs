use std::sync::atomic::{AtomicI32, AtomicU64, Ordering::SeqCst};

/// A 32-bit counter usable from any thread without external locking.
///
/// Every operation is sequentially consistent, so a thread that reads a
/// value is guaranteed to see all writes made by the threads that produced
/// it. Handy for instrumentation, e.g. counting how many times a destructor
/// actually ran.
pub struct AtomicCount(AtomicI32);

impl AtomicCount {
    pub const fn new(initial: i32) -> Self {
        Self(AtomicI32::new(initial))
    }

    pub fn get(&self) -> i32 {
        self.0.load(SeqCst)
    }

    /// increment, then return the incremented value
    pub fn inc_get(&self) -> i32 {
        self.0.fetch_add(1, SeqCst) + 1
    }

    /// decrement, then return the decremented value
    pub fn dec_get(&self) -> i32 {
        self.0.fetch_sub(1, SeqCst) - 1
    }
}

/*
 * The control block tracks two numbers:
 *   combined - one per live handle of either kind
 *   weak     - weak handles only
 * and the number of strong handles is derived: strong = combined - weak.
 *
 * The pair lives in a single 64-bit word (combined in the high half).
 * Keeping them in two separate atomics would let another thread read the
 * pair mid-update and derive a strong count that is off by one, which is
 * exactly the wrong moment to decide whether to run a destructor. With one
 * word every mutation is a single fetch_add/fetch_sub/CAS and every read is
 * a consistent snapshot.
 */

const WEAK_UNIT: u64 = 1;
const COMBINED_UNIT: u64 = 1 << 32;

/// A consistent snapshot of the counter pair.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Counts {
    pub combined: u32,
    pub weak: u32,
}

impl Counts {
    fn unpack(word: u64) -> Self {
        Self {
            combined: (word >> 32) as u32,
            weak: word as u32,
        }
    }

    /// number of live strong handles at the moment of the snapshot
    pub fn strong(self) -> u32 {
        // combined >= weak holds because weak handles always move both fields
        self.combined - self.weak
    }
}

/// The counter pair of one control block.
pub(crate) struct RefCounts(AtomicU64);

impl RefCounts {
    /// the pair comes to life together with the first strong handle
    pub fn new_strong() -> Self {
        Self(AtomicU64::new(COMBINED_UNIT))
    }

    pub fn load(&self) -> Counts {
        Counts::unpack(self.0.load(SeqCst))
    }

    /// one more strong handle; caller must already hold a live reference
    pub fn add_strong(&self) -> Counts {
        let old = Counts::unpack(self.0.fetch_add(COMBINED_UNIT, SeqCst));
        if old.combined > u32::MAX / 2 {
            // far from the real limit on purpose: aborting takes time
            std::process::abort();
        }
        Counts {
            combined: old.combined + 1,
            ..old
        }
    }

    /// Turn one strong unit into a weak one; the combined count is
    /// untouched, so the holder keeps the block allocated while the strong
    /// count drops. This is how a strong handle is released: demote, then
    /// give up the resulting weak unit.
    pub fn demote_strong(&self) -> Counts {
        let old = Counts::unpack(self.0.fetch_add(WEAK_UNIT, SeqCst));
        assert!(
            old.combined > old.weak,
            "strong count underflow: demoted a reference that was never held"
        );
        Counts {
            weak: old.weak + 1,
            ..old
        }
    }

    /// one more weak handle; both fields move, the strong count stays put
    pub fn add_weak(&self) -> Counts {
        let old = Counts::unpack(self.0.fetch_add(COMBINED_UNIT | WEAK_UNIT, SeqCst));
        if old.combined > u32::MAX / 2 {
            std::process::abort();
        }
        Counts {
            combined: old.combined + 1,
            weak: old.weak + 1,
        }
    }

    /// one less weak handle
    pub fn sub_weak(&self) -> Counts {
        let old = Counts::unpack(self.0.fetch_sub(COMBINED_UNIT | WEAK_UNIT, SeqCst));
        assert!(
            old.weak > 0,
            "weak count underflow: released a reference that was never held"
        );
        Counts {
            combined: old.combined - 1,
            weak: old.weak - 1,
        }
    }

    /// The promotion primitive: add a strong unit only if at least one strong
    /// handle is still alive. Check and increment are one CAS, so there is no
    /// window for the last strong handle to die in between.
    pub fn try_add_strong(&self) -> Option<Counts> {
        let mut word = self.0.load(SeqCst);
        loop {
            let counts = Counts::unpack(word);
            if counts.strong() == 0 {
                return None;
            }
            if counts.combined > u32::MAX / 2 {
                std::process::abort();
            }
            match self
                .0
                .compare_exchange_weak(word, word + COMBINED_UNIT, SeqCst, SeqCst)
            {
                Ok(_) => {
                    return Some(Counts {
                        combined: counts.combined + 1,
                        ..counts
                    })
                }
                Err(e) => word = e,
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn atomic_count_round_trip() {
        let n = AtomicCount::new(5);
        assert_eq!(n.get(), 5);
        assert_eq!(n.inc_get(), 6);
        assert_eq!(n.inc_get(), 7);
        assert_eq!(n.dec_get(), 6);
        assert_eq!(n.get(), 6);
    }

    #[test]
    fn atomic_count_from_many_threads() {
        let n = AtomicCount::new(0);
        std::thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    for _ in 0..1000 {
                        n.inc_get();
                    }
                });
            }
        });
        assert_eq!(n.get(), 8000);
    }

    #[test]
    fn pair_accounting() {
        let counts = RefCounts::new_strong();
        assert_eq!(counts.load(), Counts { combined: 1, weak: 0 });
        assert_eq!(counts.load().strong(), 1);

        let c = counts.add_strong();
        assert_eq!(c, Counts { combined: 2, weak: 0 });

        // weak handles move both fields, the strong count is unaffected
        let c = counts.add_weak();
        assert_eq!(c, Counts { combined: 3, weak: 1 });
        assert_eq!(c.strong(), 2);

        let c = counts.sub_weak();
        assert_eq!(c, Counts { combined: 2, weak: 0 });

        // strong units die in two steps: demote, then release the weak unit
        assert_eq!(counts.demote_strong().strong(), 1);
        assert_eq!(counts.sub_weak(), Counts { combined: 1, weak: 0 });
        assert_eq!(counts.demote_strong().strong(), 0);
        assert_eq!(counts.sub_weak().combined, 0);
    }

    #[test]
    fn demote_keeps_combined() {
        let counts = RefCounts::new_strong();
        let c = counts.demote_strong();
        assert_eq!(c, Counts { combined: 1, weak: 1 });
        assert_eq!(c.strong(), 0);
        // the demoted unit still counts towards the allocation
        assert_eq!(counts.sub_weak().combined, 0);
    }

    #[test]
    fn promotion_fails_once_dead() {
        let counts = RefCounts::new_strong();
        counts.add_weak();
        counts.demote_strong();
        counts.sub_weak();
        // only a weak unit remains
        assert_eq!(counts.load().strong(), 0);
        assert!(counts.try_add_strong().is_none());
    }

    #[test]
    fn promotion_succeeds_while_alive() {
        let counts = RefCounts::new_strong();
        let c = counts.try_add_strong().unwrap();
        assert_eq!(c, Counts { combined: 2, weak: 0 });
    }

    #[test]
    #[should_panic(expected = "underflow")]
    fn double_release_is_fatal() {
        let counts = RefCounts::new_strong();
        counts.demote_strong();
        // demoting again releases a strong unit that was never held
        counts.demote_strong();
    }
}
