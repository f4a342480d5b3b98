use std::alloc::{alloc, dealloc, Layout};
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicPtr, Ordering::SeqCst};

use crate::count::RefCounts;
use crate::error::AllocError;

/// Type-erased destruction of an owned value.
///
/// An implementation is picked when the control block is built and then
/// erased to a plain `unsafe fn(*mut ())`, so the block itself is not
/// generic over how its value dies. No `&self`: a destroyer carries no
/// state, it is a compile-time strategy.
pub trait Destroyer<Y> {
    /// # Safety
    ///
    /// `target` must be the pointer this destroyer was registered for, it
    /// must still be live, and nothing may touch it afterwards.
    unsafe fn destroy(target: *mut Y);
}

/// The default destroyer: the value was allocated as a `Box<Y>` and dies as
/// one.
pub struct BoxDestroyer;

impl<Y> Destroyer<Y> for BoxDestroyer {
    unsafe fn destroy(target: *mut Y) {
        drop(Box::from_raw(target));
    }
}

// monomorphization glue: one instance per (Y, D) pair, stored as a bare fn
pub(crate) unsafe fn destroy_erased<Y, D: Destroyer<Y>>(target: *mut ()) {
    D::destroy(target.cast::<Y>());
}

/*
 * One allocation per owned value, shared by every handle pointing at it.
 * It dies in two stages:
 *   1. the target is destroyed when the strong count reaches 0
 *   2. the block is freed when the combined count reaches 0
 * Stage 2 never precedes stage 1 and may run on a different thread.
 * No mutex anywhere, the counter word carries all the ordering.
 */
pub(crate) struct RootBlock {
    counts: RefCounts,
    /// raw address of the owned value, null once destroyed
    target: AtomicPtr<()>,
    destroy_fn: unsafe fn(*mut ()),
}

impl RootBlock {
    /// Allocate a block owning one strong unit over `target`. On failure
    /// nothing is built and `target` still belongs to the caller.
    pub(crate) fn try_alloc(
        target: NonNull<()>,
        destroy_fn: unsafe fn(*mut ()),
    ) -> Result<NonNull<RootBlock>, AllocError> {
        let layout = Layout::new::<RootBlock>();
        // SAFETY: RootBlock is not zero-sized
        let raw = unsafe { alloc(layout) }.cast::<RootBlock>();
        let block = NonNull::new(raw).ok_or(AllocError)?;
        // SAFETY: freshly allocated for exactly this layout
        unsafe {
            block.as_ptr().write(RootBlock {
                counts: RefCounts::new_strong(),
                target: AtomicPtr::new(target.as_ptr()),
                destroy_fn,
            });
        }
        Ok(block)
    }

    /// returns the new strong count, for observability
    pub(crate) fn add_strong(&self) -> u32 {
        self.counts.add_strong().strong()
    }

    pub(crate) fn add_weak(&self) -> u32 {
        self.counts.add_weak().strong()
    }

    /// check-and-increment in one CAS, see [`RefCounts::try_add_strong`]
    pub(crate) fn try_add_strong(&self) -> bool {
        self.counts.try_add_strong().is_some()
    }

    pub(crate) fn is_alive(&self) -> bool {
        self.counts.load().strong() > 0
    }

    pub(crate) fn strong_count(&self) -> u32 {
        self.counts.load().strong()
    }

    /// current target address; null once destroyed
    pub(crate) fn target(&self) -> *mut () {
        self.target.load(SeqCst)
    }

    /// Run the stored destroyer on the target, effectively once. The swap
    /// makes any second caller lose: it sees null and does nothing. The
    /// second call is not hypothetical, the last strong release and a weak
    /// release can both observe a zero strong count.
    fn destroy(&self) {
        let target = self.target.swap(ptr::null_mut(), SeqCst);
        if !target.is_null() {
            // SAFETY: only ever called with the pointer the block was built
            // over, and the swap guarantees we are the only caller to see it
            unsafe { (self.destroy_fn)(target) };
        }
    }

    /// Give up one strong unit.
    ///
    /// The unit is first demoted to a weak one, so whoever ends up running
    /// the destructor still holds a combined unit and the block cannot be
    /// freed under it by a concurrent weak release. The temporary weak unit
    /// is then released normally, which is also what frees the block when
    /// it was the last reference overall.
    ///
    /// # Safety
    ///
    /// The caller must own one strong unit and must not use `block` again:
    /// this call may be the one that frees it.
    pub(crate) unsafe fn release_strong(block: NonNull<RootBlock>) -> u32 {
        let counts = block.as_ref().counts.demote_strong();
        let strong = counts.strong();
        if strong == 0 {
            block.as_ref().destroy();
        }
        Self::release_weak(block);
        strong
    }

    /// Give up one weak unit.
    ///
    /// After the decrement the caller no longer keeps the block allocated:
    /// any further access is only legal on the `combined == 0` path, where
    /// freeing is exclusive. Destroying the target is the demoter's duty in
    /// [`RootBlock::release_strong`]; the destroy() below is its idempotent
    /// second invocation, kept inside the exclusive path on purpose.
    ///
    /// # Safety
    ///
    /// The caller must own one weak unit and must not use `block` again.
    pub(crate) unsafe fn release_weak(block: NonNull<RootBlock>) -> u32 {
        let counts = block.as_ref().counts.sub_weak();
        if counts.combined == 0 {
            block.as_ref().destroy();
            free_block(block);
        }
        counts.strong()
    }
}

/// # Safety
///
/// Only the caller that observed the combined count reach zero may free.
unsafe fn free_block(block: NonNull<RootBlock>) {
    ptr::drop_in_place(block.as_ptr());
    dealloc(block.as_ptr().cast(), Layout::new::<RootBlock>());
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::count::AtomicCount;

    // each test gets its own counter: tests run in parallel
    macro_rules! counting_destroyer {
        ($destroyer:ident, $counter:ident) => {
            static $counter: AtomicCount = AtomicCount::new(0);

            struct $destroyer;

            impl Destroyer<u64> for $destroyer {
                unsafe fn destroy(target: *mut u64) {
                    $counter.inc_get();
                    drop(Box::from_raw(target));
                }
            }
        };
    }

    fn block_over<D: Destroyer<u64>>(value: u64) -> NonNull<RootBlock> {
        let target = NonNull::from(Box::leak(Box::new(value)));
        RootBlock::try_alloc(target.cast(), destroy_erased::<u64, D>).unwrap()
    }

    #[test]
    fn last_strong_release_destroys_once() {
        counting_destroyer!(D, DESTROYS);
        let block = block_over::<D>(7);
        // a second strong holder comes and goes
        unsafe {
            block.as_ref().add_strong();
            RootBlock::release_strong(block);
            assert_eq!(DESTROYS.get(), 0);
            assert!(block.as_ref().is_alive());
            RootBlock::release_strong(block);
        }
        assert_eq!(DESTROYS.get(), 1);
    }

    #[test]
    fn weak_units_keep_block_not_value() {
        counting_destroyer!(D, DESTROYS);
        let block = block_over::<D>(7);
        unsafe {
            block.as_ref().add_weak();
            RootBlock::release_strong(block);
            // value gone, block still allocated for the weak holder
            assert_eq!(DESTROYS.get(), 1);
            assert!(!block.as_ref().is_alive());
            assert!(block.as_ref().target().is_null());
            assert!(!block.as_ref().try_add_strong());
            // the weak release is the second caller into destroy(): a no-op
            RootBlock::release_weak(block);
        }
        assert_eq!(DESTROYS.get(), 1);
    }

    #[test]
    fn weak_release_after_death_leaves_other_blocks_alone() {
        counting_destroyer!(First, FIRST);
        counting_destroyer!(Second, SECOND);
        let block = block_over::<First>(1);
        unsafe {
            block.as_ref().add_weak();
            block.as_ref().add_weak();
            // the demoter destroys; two weak units remain on the block
            RootBlock::release_strong(block);
            assert_eq!(FIRST.get(), 1);
            // a weak release that sees a dead value but remaining units must
            // not reach into the block again: a concurrent release could be
            // freeing it, and the allocator may hand the slot to a new block
            RootBlock::release_weak(block);
            let fresh = block_over::<Second>(2);
            assert_eq!(*fresh.as_ref().target().cast::<u64>(), 2);
            assert_eq!(SECOND.get(), 0);
            // the last unit frees the old block; the fresh one stays whole
            RootBlock::release_weak(block);
            assert!(!fresh.as_ref().target().is_null());
            assert_eq!(SECOND.get(), 0);
            assert_eq!(FIRST.get(), 1);
            RootBlock::release_strong(fresh);
        }
        assert_eq!(SECOND.get(), 1);
    }

    #[test]
    fn target_readable_while_alive() {
        let block = block_over::<BoxDestroyer>(42);
        unsafe {
            let p = block.as_ref().target().cast::<u64>();
            assert_eq!(*p, 42);
            RootBlock::release_strong(block);
        }
    }
}
