/// Outcome of an `enter` callback during [`Tree::iterate`](crate::tree::Tree::iterate)
/// or [`NodeBuffer::iterate`](crate::buffer::NodeBuffer::iterate).
///
/// `Skip` suppresses descent into the node's children *and* the matching
/// `leave` call, symmetrically. This is a plain enum rather than `bool`
/// because a bare boolean reads ambiguously at the callback boundary (does
/// `true` mean "descend" or "this node matched"?).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisitResult {
    Enter,
    Skip,
}

impl VisitResult {
    #[inline]
    pub fn is_skip(self) -> bool {
        matches!(self, VisitResult::Skip)
    }
}
