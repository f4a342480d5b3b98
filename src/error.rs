use thiserror::Error;

/// The control block heap allocation failed.
///
/// The only recoverable failure in this crate: the caller keeps ownership of
/// whatever raw pointer it was adopting and may retry or bail. Protocol
/// violations (double release, token misuse) are not errors, they are bugs,
/// and fail with an assertion instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("control block allocation failed")]
pub struct AllocError;
