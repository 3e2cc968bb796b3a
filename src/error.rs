//! Failure classification for allocator operations.
//!
//! Every failure is also reported through the backend error hook before the
//! operation returns; the hook is advisory and the `Err` value is the
//! contract callers observe.

use core::fmt;

/// The error type for ownership-tree operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The backend refused an allocation or reallocation.
    Alloc,
    /// A size computation overflowed.
    Overflow,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Alloc => f.write_str("memory allocation failed"),
            Error::Overflow => f.write_str("allocation size overflow"),
        }
    }
}

impl std::error::Error for Error {}
