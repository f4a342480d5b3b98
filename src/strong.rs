use std::alloc::{handle_alloc_error, Layout};
use std::fmt;
use std::ops::Deref;
use std::ptr::NonNull;

use crate::block::{destroy_erased, BoxDestroyer, Destroyer, RootBlock};
use crate::error::AllocError;
use crate::weak::Weak;

/// A handle that keeps the owned value alive.
///
/// All strong handles pointing at the same control block share the value;
/// it dies when the last of them is dropped. There is no empty state,
/// absence is `Option<Strong<Y>>` and a moved-from handle stops existing,
/// which is how the null-deref bug class of hand-rolled handle types is
/// kept unrepresentable.
pub struct Strong<Y> {
    pub(crate) block: NonNull<RootBlock>,
    pub(crate) target: NonNull<Y>,
}

/*
 * Sending a Strong can move the last reference (and thus the drop of Y) to
 * another thread => Y: Send. Sharing it hands out &Y across threads => Y: Sync.
 * Same reasoning for sharing &Strong.
 */
unsafe impl<Y: Send + Sync> Send for Strong<Y> {}
unsafe impl<Y: Send + Sync> Sync for Strong<Y> {}

impl<Y> Strong<Y> {
    /// Box the value and allocate a control block over it. Aborts on heap
    /// exhaustion like the standard containers do; use [`Strong::from_raw`]
    /// for the fallible path.
    pub fn new(value: Y) -> Self {
        let target = NonNull::from(Box::leak(Box::new(value)));
        // SAFETY: target was just leaked from a Box, BoxDestroyer undoes that
        match unsafe { Self::from_raw(target) } {
            Ok(handle) => handle,
            Err(AllocError) => handle_alloc_error(Layout::new::<RootBlock>()),
        }
    }

    /// Adopt an existing allocation, destroying it with [`BoxDestroyer`]
    /// when the last strong handle goes.
    ///
    /// On `Err` the pointer is untouched and still owned by the caller.
    ///
    /// # Safety
    ///
    /// `target` must have been allocated as `Box<Y>` and ownership of it
    /// passes to the handle on success.
    pub unsafe fn from_raw(target: NonNull<Y>) -> Result<Self, AllocError> {
        Self::from_raw_with::<BoxDestroyer>(target)
    }

    /// Adopt an existing allocation with a caller-chosen [`Destroyer`].
    ///
    /// # Safety
    ///
    /// `target` must be valid for `D::destroy` and ownership of it passes
    /// to the handle on success.
    pub unsafe fn from_raw_with<D: Destroyer<Y>>(target: NonNull<Y>) -> Result<Self, AllocError> {
        let block = RootBlock::try_alloc(target.cast(), destroy_erased::<Y, D>)?;
        Ok(Self { block, target })
    }

    fn block(&self) -> &RootBlock {
        // SAFETY: a live strong handle keeps the block allocated
        unsafe { self.block.as_ref() }
    }

    /// Make a weak handle over the same control block.
    // associated fn, so it can't shadow a `downgrade` on Y behind Deref
    pub fn downgrade(this: &Self) -> Weak<Y> {
        this.block().add_weak();
        Weak {
            block: this.block,
            target: this.target,
        }
    }

    /// Current number of strong handles. Diagnostic only: other threads may
    /// have moved it by the time the caller looks at the result.
    pub fn ref_count(this: &Self) -> u32 {
        this.block().strong_count()
    }

    /// whether two handles share one control block
    pub fn ptr_eq(this: &Self, other: &Self) -> bool {
        this.block == other.block
    }
}

impl<Y> Deref for Strong<Y> {
    type Target = Y;

    fn deref(&self) -> &Y {
        // SAFETY: the target outlives every strong handle
        unsafe { self.target.as_ref() }
    }
}

impl<Y> Clone for Strong<Y> {
    fn clone(&self) -> Self {
        self.block().add_strong();
        Self {
            block: self.block,
            target: self.target,
        }
    }
}

impl<Y> Drop for Strong<Y> {
    fn drop(&mut self) {
        // SAFETY: giving up the one unit this handle owns; the block pointer
        // is never used again
        unsafe { RootBlock::release_strong(self.block) };
    }
}

impl<Y: fmt::Debug> fmt::Debug for Strong<Y> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Strong").field(&**self).finish()
    }
}
