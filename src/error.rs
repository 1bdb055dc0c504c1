use std::fmt::{Display, Formatter};

/// Errors raised by ordinary (if incorrect) calls into the public API.
///
/// Cursor-contract violations (a malformed postfix stream) are not represented
/// here: those are undefined behavior the [`Builder`](crate::builder::Builder)
/// has no way to check for cheaply, and are instead caught by `debug_assert!`s
/// in development builds.
#[derive(Debug, Eq, PartialEq, Clone, Copy)]
#[non_exhaustive]
pub enum TreeError {
    /// Returned by [`Tree::append`](crate::tree::Tree::append) when the
    /// appended tree's first child would start before the end of the
    /// receiver.
    Overlap {
        /// Length of the receiver tree (the point after which `other` must start).
        receiver_len: u32,
        /// Absolute start offset `other` tried to place its first child at.
        other_start: u32,
    },
}

impl Display for TreeError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            TreeError::Overlap { receiver_len, other_start } => write!(
                f,
                "cannot append tree starting at {other_start} onto a tree of length {receiver_len}: ranges overlap"
            ),
        }
    }
}

impl std::error::Error for TreeError {}
