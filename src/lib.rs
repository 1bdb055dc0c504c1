//! A persistent, memory-efficient syntax tree core for an incremental
//! parser.
//!
//! The tree has two representations for its content, chosen per region by
//! the [`builder`]: pointer [`tree::Tree`] nodes for sparse structure, and
//! packed [`buffer::NodeBuffer`] quad arrays for dense leafy regions where a
//! pointer per node would be wasteful. Both are navigated uniformly through
//! [`view::SubtreeView`], produced by [`tree::Tree::resolve`] and friends.
//!
//! Construction goes through [`builder::Builder`], which consumes a postfix
//! `(type, start, end, size)` record stream from a [`cursor::BufferCursor`]
//! and emits a balanced [`tree::Tree`]. Edits reuse untouched subtrees via
//! [`tree::Tree::unchanged`] rather than rebuilding from scratch.

pub mod buffer;
pub mod builder;
pub mod change;
pub mod cursor;
pub mod error;
pub(crate) mod scan;
pub mod tags;
pub mod tree;
pub mod view;
pub mod visit;

pub use buffer::{BufferRecord, NodeBuffer};
pub use builder::{Builder, BRANCH_FACTOR, DEFAULT_MAX_BUFFER_LENGTH};
pub use change::ChangedRange;
pub use cursor::{BufferCursor, FlatBufferCursor, REUSED_VALUE};
pub use error::TreeError;
pub use tags::TypeTagTable;
pub use tree::{Child, Tree};
pub use view::SubtreeView;
pub use visit::VisitResult;
