//! Thread-safe shared/weak ownership handles over a lock-free control block.
//!
//! [`Strong`] keeps the owned value alive, [`Weak`] observes it without
//! extending its lifetime, and [`Token`] moves one unit of strong ownership
//! into another thread without any counter traffic during the transfer.
//! All accounting is a combined handle counter plus a weak-only counter in
//! one atomic word; there is no mutex and no operation ever blocks.

pub mod block;
pub mod count;
pub mod error;
pub mod handoff;
pub mod strong;
pub mod weak;

pub use block::{BoxDestroyer, Destroyer};
pub use count::AtomicCount;
pub use error::AllocError;
pub use handoff::{spawn_owned, Token};
pub use strong::Strong;
pub use weak::Weak;
