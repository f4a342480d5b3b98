use std::ptr::NonNull;

use crate::block::RootBlock;
use crate::strong::Strong;

/// A handle that observes the owned value without keeping it alive.
///
/// A weak handle holds the control block (not the value) allocated, can ask
/// whether the value still exists and can try to [`upgrade`](Weak::upgrade)
/// into a [`Strong`]. It never hands out `&Y` by itself: the cached target
/// pointer below only seeds the `Strong` a successful upgrade produces,
/// because another thread may destroy the value at any moment.
pub struct Weak<Y> {
    pub(crate) block: NonNull<RootBlock>,
    pub(crate) target: NonNull<Y>,
}

unsafe impl<Y: Send + Sync> Send for Weak<Y> {}
unsafe impl<Y: Send + Sync> Sync for Weak<Y> {}

impl<Y> Weak<Y> {
    fn block(&self) -> &RootBlock {
        // SAFETY: a live weak handle keeps the block allocated
        unsafe { self.block.as_ref() }
    }

    /// Whether at least one strong handle is still alive.
    ///
    /// Advisory only. The answer can turn stale before the caller acts on
    /// it; the supported pattern is "upgrade, then use the Strong", never
    /// "check alive, then reach for the value".
    pub fn is_alive(&self) -> bool {
        self.block().is_alive()
    }

    /// Try to produce a strong handle over the same value.
    ///
    /// Succeeds only if a strong handle is alive at the very moment of the
    /// increment: the liveness check and the count bump are a single CAS,
    /// so the value cannot die in between. `None` is a routine outcome, not
    /// an error.
    pub fn upgrade(&self) -> Option<Strong<Y>> {
        if !self.block().try_add_strong() {
            return None;
        }
        Some(Strong {
            block: self.block,
            target: self.target,
        })
    }
}

impl<Y> Clone for Weak<Y> {
    fn clone(&self) -> Self {
        self.block().add_weak();
        Self {
            block: self.block,
            target: self.target,
        }
    }
}

impl<Y> Drop for Weak<Y> {
    fn drop(&mut self) {
        // SAFETY: giving up the one weak unit this handle owns
        unsafe { RootBlock::release_weak(self.block) };
    }
}
