use std::marker::PhantomData;
use std::mem::ManuallyDrop;
use std::ptr::NonNull;
use std::thread::{self, JoinHandle};

use crate::block::RootBlock;
use crate::strong::Strong;

/*
 * Moving a Strong into a freshly spawned thread by copy would cost an
 * increment on one side and a decrement on the other, in two different
 * threads. detach/attach moves the one reference unit itself: the donor
 * handle is consumed without running its Drop, the raw block pointer rides
 * across as an opaque token, and the receiver rebuilds the handle without
 * touching a counter either. The happens-before edge of the thread spawn is
 * all the synchronization the transfer needs.
 */

/// Opaque carrier of exactly one strong reference unit, produced by
/// [`Strong::detach`] and consumed by [`Token::attach`].
///
/// A token that is dropped instead of attached releases its unit, so an
/// aborted handoff does not leak the value.
pub struct Token<Y> {
    block: NonNull<RootBlock>,
    _target: PhantomData<*mut Y>,
}

// the token moves the unit (and with it a potential drop of Y and access
// to &Y) to another thread, same bounds as for the handle itself
unsafe impl<Y: Send + Sync> Send for Token<Y> {}

impl<Y> Strong<Y> {
    /// Give this handle's reference unit away as a [`Token`].
    ///
    /// No counter is touched; the handle is consumed, so its Drop can never
    /// run on the donor side again.
    pub fn detach(this: Self) -> Token<Y> {
        let this = ManuallyDrop::new(this);
        Token {
            block: this.block,
            _target: PhantomData,
        }
    }
}

impl<Y> Token<Y> {
    fn block(&self) -> &RootBlock {
        // SAFETY: the token owns a strong unit, the block is allocated
        unsafe { self.block.as_ref() }
    }

    /// Rebuild the strong handle on the receiving side, taking over the
    /// unit the token carried. No counter is touched here either.
    pub fn attach(self) -> Strong<Y> {
        let token = ManuallyDrop::new(self);
        let target = token.block().target().cast::<Y>();
        // a null target here means the token was forged or double-attached,
        // a protocol violation rather than a runtime condition
        assert!(!target.is_null(), "attach on a dead handoff token");
        Strong {
            block: token.block,
            // SAFETY: checked right above
            target: unsafe { NonNull::new_unchecked(target) },
        }
    }

    /// The single-pointer form of the token, for passing through a
    /// pointer-sized thread-start or FFI parameter.
    pub fn into_raw(self) -> *mut () {
        let token = ManuallyDrop::new(self);
        token.block.as_ptr().cast()
    }

    /// # Safety
    ///
    /// `raw` must come from [`Token::into_raw`] of a token for the same `Y`
    /// and must not be used again afterwards.
    pub unsafe fn from_raw(raw: *mut ()) -> Self {
        let block = raw.cast::<RootBlock>();
        assert!(!block.is_null(), "null handoff token");
        Token {
            block: NonNull::new_unchecked(block),
            _target: PhantomData,
        }
    }
}

impl<Y> Drop for Token<Y> {
    fn drop(&mut self) {
        // an aborted handoff still owns its unit
        // SAFETY: the unit detach() carried in is given up exactly once
        unsafe { RootBlock::release_strong(self.block) };
    }
}

/// Spawn a thread that takes ownership of `handle` through the handoff
/// protocol: detached here, attached as the first thing the new thread does.
pub fn spawn_owned<Y, F, R>(handle: Strong<Y>, f: F) -> JoinHandle<R>
where
    Y: Send + Sync + 'static,
    F: FnOnce(Strong<Y>) -> R + Send + 'static,
    R: Send + 'static,
{
    let token = Strong::detach(handle);
    thread::spawn(move || f(token.attach()))
}
