use std::rc::Rc;

use crate::buffer::{BufferRecord, NodeBuffer};
use crate::tags::TypeTagTable;
use crate::tree::Tree;
use crate::visit::VisitResult;

/// An ephemeral navigational handle produced by [`Tree::resolve`],
/// [`Tree::child_before`], and [`Tree::child_after`].
///
/// Unlike [`Tree`], which is a bare content node with no notion of where it
/// sits, a `SubtreeView` carries its absolute position and a parent link, so
/// callers can walk upward after a positional lookup. It borrows nothing
/// from the tree it was resolved against — every variant holds owned
/// (`Rc`-shared) handles — so views can outlive the call that produced them.
#[derive(Debug, Clone)]
pub enum SubtreeView {
    /// No tagged ancestor contains the query position; wraps the tree the
    /// lookup started from.
    Root(Tree),
    /// A tagged pointer node.
    Node { tree: Tree, start: u32, parent: Rc<SubtreeView> },
    /// A record living inside a packed buffer.
    Buffer { buffer: Rc<NodeBuffer>, record: BufferRecord, buffer_start: u32, parent: Rc<SubtreeView> },
}

impl PartialEq for SubtreeView {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (SubtreeView::Root(a), SubtreeView::Root(b)) => a == b,
            (
                SubtreeView::Node { tree: t1, start: s1, .. },
                SubtreeView::Node { tree: t2, start: s2, .. },
            ) => t1 == t2 && s1 == s2,
            (
                SubtreeView::Buffer { buffer: b1, record: r1, buffer_start: o1, .. },
                SubtreeView::Buffer { buffer: b2, record: r2, buffer_start: o2, .. },
            ) => Rc::ptr_eq(b1, b2) && r1 == r2 && o1 == o2,
            _ => false,
        }
    }
}

impl SubtreeView {
    pub fn type_id(&self) -> u16 {
        match self {
            SubtreeView::Root(t) => t.type_id(),
            SubtreeView::Node { tree, .. } => tree.type_id(),
            SubtreeView::Buffer { record, .. } => record.type_id,
        }
    }

    pub fn start(&self) -> u32 {
        match self {
            SubtreeView::Root(_) => 0,
            SubtreeView::Node { start, .. } => *start,
            SubtreeView::Buffer { record, buffer_start, .. } => record.start + buffer_start,
        }
    }

    pub fn end(&self) -> u32 {
        match self {
            SubtreeView::Root(t) => t.length(),
            SubtreeView::Node { tree, start, .. } => start + tree.length(),
            SubtreeView::Buffer { record, buffer_start, .. } => record.end + buffer_start,
        }
    }

    /// The enclosing view, or `None` at the root.
    pub fn parent(&self) -> Option<&SubtreeView> {
        match self {
            SubtreeView::Root(_) => None,
            SubtreeView::Node { parent, .. } => Some(parent),
            SubtreeView::Buffer { parent, .. } => Some(parent),
        }
    }

    /// Distance from the root; the root itself is depth `0`.
    pub fn depth(&self) -> usize {
        let mut d = 0;
        let mut cur = self;
        while let Some(p) = cur.parent() {
            d += 1;
            cur = p;
        }
        d
    }

    /// Re-resolves `pos` within this view's own subtree, following the same
    /// innermost-tagged-node rule as [`Tree::resolve`].
    pub fn resolve(&self, pos: u32) -> SubtreeView {
        match self {
            SubtreeView::Root(t) => t.resolve(pos),
            SubtreeView::Node { tree, start, parent } => {
                if pos < *start || pos >= start + tree.length() {
                    return self.clone();
                }
                tree.resolve_within(Rc::new(SubtreeView::Node {
                    tree: tree.clone(),
                    start: *start,
                    parent: parent.clone(),
                }), *start, pos)
            }
            SubtreeView::Buffer { buffer, record, buffer_start, .. } => {
                if pos < self.start() || pos >= self.end() {
                    return self.clone();
                }
                let mut range = record.children;
                let mut best = self.clone();
                loop {
                    let Some(idx) = buffer.find_index(pos, 0, *buffer_start, range.0, range.1) else { break };
                    let rec = buffer.record_at(idx);
                    best = SubtreeView::Buffer {
                        buffer: buffer.clone(),
                        record: rec,
                        buffer_start: *buffer_start,
                        parent: Rc::new(best),
                    };
                    range = rec.children;
                    if range.0 == range.1 {
                        break;
                    }
                }
                best
            }
        }
    }

    /// Nearest tagged child before `pos`, scoped to this view's own content.
    pub fn child_before(&self, pos: u32) -> Option<SubtreeView> {
        self.direct_child(pos, -1)
    }

    /// Nearest tagged child at-or-after `pos`, scoped to this view's own content.
    pub fn child_after(&self, pos: u32) -> Option<SubtreeView> {
        self.direct_child(pos, 1)
    }

    fn direct_child(&self, pos: u32, side: i8) -> Option<SubtreeView> {
        match self {
            SubtreeView::Root(t) => t.direct_child_at_side(0, Rc::new(self.clone()), pos, side),
            SubtreeView::Node { tree, start, .. } => {
                tree.direct_child_at_side(*start, Rc::new(self.clone()), pos, side)
            }
            SubtreeView::Buffer { buffer, record, buffer_start, .. } => {
                let idx = buffer.find_index(pos, side, *buffer_start, record.children.0, record.children.1)?;
                let rec = buffer.record_at(idx);
                Some(SubtreeView::Buffer {
                    buffer: buffer.clone(),
                    record: rec,
                    buffer_start: *buffer_start,
                    parent: Rc::new(self.clone()),
                })
            }
        }
    }

    /// Visits descendants of this view in prefix order, same semantics as
    /// [`Tree::iterate`].
    pub fn iterate(
        &self,
        from: u32,
        to: u32,
        enter: &mut dyn FnMut(u16, u32, u32) -> VisitResult,
        leave: &mut dyn FnMut(u16, u32, u32),
    ) {
        match self {
            SubtreeView::Root(t) => t.iterate(from, to, enter, leave),
            SubtreeView::Node { tree, start, .. } => tree.iterate_at(*start, from, to, enter, leave),
            SubtreeView::Buffer { buffer, record, buffer_start, .. } => {
                buffer.iterate_children(record.children, from, to, *buffer_start, enter, leave)
            }
        }
    }

    /// `NAME(c1,c2,…)` textual rendering of the node this view points at,
    /// same contract as [`Tree::to_string`]: a tagged leaf renders bare, a
    /// tagged parent wraps its children in parens, and `tags` supplies names
    /// for ids that have one.
    pub fn to_string(&self, tags: Option<&TypeTagTable<String>>) -> String {
        match self {
            SubtreeView::Root(tree) => tree.to_string(tags),
            SubtreeView::Node { tree, .. } => tree.to_string(tags),
            SubtreeView::Buffer { buffer, record, .. } => {
                let mut out = String::new();
                buffer.child_to_string(record.idx, &mut out, tags);
                out
            }
        }
    }
}
