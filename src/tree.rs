use std::rc::Rc;

use smallvec::SmallVec;

use crate::buffer::NodeBuffer;
use crate::change::ChangedRange;
use crate::error::TreeError;
use crate::scan::scan_for_side;
use crate::tags::TypeTagTable;
use crate::view::SubtreeView;
use crate::visit::VisitResult;

/// A child slot in a [`Tree`]: either another pointer node, or a packed
/// buffer covering a dense leafy region. Matched on directly at navigation
/// sites rather than dispatched virtually — the set is closed and small.
#[derive(Debug, Clone, PartialEq)]
pub enum Child {
    Node(Tree),
    Buffer(Rc<NodeBuffer>),
}

impl Child {
    pub fn length(&self) -> u32 {
        match self {
            Child::Node(t) => t.length(),
            Child::Buffer(b) => b.length(),
        }
    }
}

#[derive(Debug, PartialEq)]
struct TreeData {
    type_id: u16,
    length: u32,
    children: SmallVec<[Child; 4]>,
    positions: SmallVec<[u32; 4]>,
}

/// An immutable pointer node: ordered children plus their start offsets,
/// relative to this tree's own start.
///
/// Shared by reference (`Rc`) so `unchanged`, `cut`, and `append` can reuse
/// untouched children without deep-copying them; the crate is explicitly
/// single-threaded (see the Non-goals), so `Rc` rather than `Arc`.
#[derive(Debug, Clone, PartialEq)]
pub struct Tree(Rc<TreeData>);

impl Tree {
    /// Builds a tree and, in debug builds, checks the invariants from the
    /// spec: nondecreasing positions and `positions[i] + children[i].length
    /// <= length`. Malformed input here is a builder bug, not a caller
    /// error, so this panics rather than returning `Result`.
    pub(crate) fn new(
        type_id: u16,
        length: u32,
        children: SmallVec<[Child; 4]>,
        positions: SmallVec<[u32; 4]>,
    ) -> Tree {
        debug_assert_eq!(children.len(), positions.len());
        #[cfg(debug_assertions)]
        {
            let mut prev = 0u32;
            for (i, (pos, child)) in positions.iter().zip(children.iter()).enumerate() {
                assert!(i == 0 || *pos >= prev, "positions must be nondecreasing");
                assert!(
                    pos.checked_add(child.length()).map(|e| e <= length).unwrap_or(false),
                    "child {i} exceeds parent length"
                );
                prev = *pos;
            }
        }
        Tree(Rc::new(TreeData { type_id, length, children, positions }))
    }

    /// The empty anonymous tree: no children, zero length.
    pub fn empty() -> Tree {
        Tree::new(0, 0, SmallVec::new(), SmallVec::new())
    }

    pub fn type_id(&self) -> u16 {
        self.0.type_id
    }

    pub fn length(&self) -> u32 {
        self.0.length
    }

    /// A node whose type id has the low bit set: visible to `iterate` and
    /// metadata lookup. Id `0` (the anonymous root) and other even ids are
    /// transparent grouping nodes.
    pub fn is_tagged(&self) -> bool {
        self.0.type_id & 1 == 1
    }

    pub fn children(&self) -> &[Child] {
        &self.0.children
    }

    pub fn positions(&self) -> &[u32] {
        &self.0.positions
    }

    /// Reference-identity check, distinct from the structural `PartialEq`
    /// impl — used to confirm subtree reuse across `unchanged`/`cut`.
    pub fn ptr_eq(&self, other: &Tree) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    fn child_spans(&self, abs_start: u32) -> impl Iterator<Item = (usize, u32, u32)> + '_ {
        self.0.children.iter().enumerate().map(move |(i, c)| {
            let start = abs_start + self.0.positions[i];
            (i, start, start + c.length())
        })
    }

    /// Textual rendering: a tagged node renders as `NAME` (a leaf) or
    /// `NAME(c1,c2,…)`; an anonymous node is transparent and renders as the
    /// bare comma-joined list of its own rendered items. `tags` supplies
    /// names for tagged ids; ids with no entry (or no table at all) fall
    /// back to the raw numeric id.
    pub fn to_string(&self, tags: Option<&TypeTagTable<String>>) -> String {
        if self.is_tagged() {
            self.to_tagged_string(tags)
        } else {
            self.rendered_items(tags).join(",")
        }
    }

    fn to_tagged_string(&self, tags: Option<&TypeTagTable<String>>) -> String {
        let name = tags
            .and_then(|t| t.get(self.type_id()).cloned())
            .unwrap_or_else(|| self.type_id().to_string());
        let items = self.rendered_items(tags);
        if items.is_empty() {
            name
        } else {
            format!("{name}({})", items.join(","))
        }
    }

    /// Top-level rendered items among this tree's children, splicing in the
    /// items of anonymous children and every top-level record of a buffer
    /// child, so anonymous grouping nodes stay transparent in the output.
    fn rendered_items(&self, tags: Option<&TypeTagTable<String>>) -> Vec<String> {
        let mut items = Vec::new();
        for child in &self.0.children {
            match child {
                Child::Node(t) => {
                    if t.is_tagged() {
                        items.push(t.to_tagged_string(tags));
                    } else {
                        items.extend(t.rendered_items(tags));
                    }
                }
                Child::Buffer(buf) => {
                    let mut idx = 0;
                    while idx < buf.slot_len() {
                        let mut rendered = String::new();
                        buf.child_to_string(idx, &mut rendered, tags);
                        items.push(rendered);
                        idx = buf.next_sibling(idx);
                    }
                }
            }
        }
        items
    }

    /// Depth-first visitation of every tagged descendant whose absolute span
    /// intersects `[from, to]`. Untagged nodes are transparent: their
    /// children are visited but no callback fires for them.
    pub fn iterate(
        &self,
        from: u32,
        to: u32,
        enter: &mut dyn FnMut(u16, u32, u32) -> VisitResult,
        leave: &mut dyn FnMut(u16, u32, u32),
    ) {
        self.iterate_at(0, from, to, enter, leave);
    }

    pub(crate) fn iterate_at(
        &self,
        abs_start: u32,
        from: u32,
        to: u32,
        enter: &mut dyn FnMut(u16, u32, u32) -> VisitResult,
        leave: &mut dyn FnMut(u16, u32, u32),
    ) {
        for (i, child_start, child_end) in self.child_spans(abs_start) {
            if child_start > to || child_end < from {
                continue;
            }
            match &self.0.children[i] {
                Child::Buffer(buf) => buf.iterate(from, to, child_start, enter, leave),
                Child::Node(t) => {
                    if t.is_tagged() {
                        match enter(t.type_id(), child_start, child_end) {
                            VisitResult::Skip => {}
                            VisitResult::Enter => {
                                t.iterate_at(child_start, from, to, enter, leave);
                                leave(t.type_id(), child_start, child_end);
                            }
                        }
                    } else {
                        t.iterate_at(child_start, from, to, enter, leave);
                    }
                }
            }
        }
    }

    /// The smallest tagged subtree containing `pos`, or a [`SubtreeView::Root`]
    /// wrapping `self` if no tagged node contains it (including `pos >=
    /// length`, per the out-of-range handling in the error design).
    pub fn resolve(&self, pos: u32) -> SubtreeView {
        if pos >= self.length() {
            return SubtreeView::Root(self.clone());
        }
        let root = Rc::new(SubtreeView::Root(self.clone()));
        self.resolve_within(root, 0, pos)
    }

    pub(crate) fn resolve_within(&self, current: Rc<SubtreeView>, abs_start: u32, pos: u32) -> SubtreeView {
        match scan_for_side(self.child_spans(abs_start), pos, 0) {
            None => (*current).clone(),
            Some(i) => {
                let child_start = abs_start + self.0.positions[i];
                match &self.0.children[i] {
                    Child::Buffer(buf) => {
                        let mut parent = current;
                        let mut range = (0usize, buf.slot_len());
                        let mut best = None;
                        loop {
                            let Some(idx) = buf.find_index(pos, 0, child_start, range.0, range.1) else { break };
                            let rec = buf.record_at(idx);
                            let view = Rc::new(SubtreeView::Buffer {
                                buffer: buf.clone(),
                                record: rec,
                                buffer_start: child_start,
                                parent,
                            });
                            range = rec.children;
                            best = Some(view.clone());
                            parent = view;
                            if range.0 == range.1 {
                                break;
                            }
                        }
                        best.map(|v| (*v).clone()).unwrap_or_else(|| (*parent).clone())
                    }
                    Child::Node(t) => {
                        if t.is_tagged() {
                            let view = Rc::new(SubtreeView::Node {
                                tree: t.clone(),
                                start: child_start,
                                parent: current,
                            });
                            t.resolve_within(view, child_start, pos)
                        } else {
                            t.resolve_within(current, child_start, pos)
                        }
                    }
                }
            }
        }
    }

    /// Nearest direct tagged child whose span lies strictly before `pos`.
    pub fn child_before(&self, pos: u32) -> Option<SubtreeView> {
        self.direct_child_at_side(0, Rc::new(SubtreeView::Root(self.clone())), pos, -1)
    }

    /// Nearest direct tagged child whose span lies at-or-after `pos`.
    pub fn child_after(&self, pos: u32) -> Option<SubtreeView> {
        self.direct_child_at_side(0, Rc::new(SubtreeView::Root(self.clone())), pos, 1)
    }

    pub(crate) fn direct_child_at_side(
        &self,
        abs_start: u32,
        parent: Rc<SubtreeView>,
        pos: u32,
        side: i8,
    ) -> Option<SubtreeView> {
        let i = scan_for_side(self.child_spans(abs_start), pos, side)?;
        let child_start = abs_start + self.0.positions[i];
        match &self.0.children[i] {
            Child::Buffer(buf) => {
                let idx = buf.find_index(pos, side, child_start, 0, buf.slot_len())?;
                let rec = buf.record_at(idx);
                Some(SubtreeView::Buffer { buffer: buf.clone(), record: rec, buffer_start: child_start, parent })
            }
            Child::Node(t) => {
                if t.is_tagged() {
                    Some(SubtreeView::Node { tree: t.clone(), start: child_start, parent })
                } else {
                    t.direct_child_at_side(child_start, parent, pos, side)
                }
            }
        }
    }

    /// Returns a tree containing only content with `start < at`; a child
    /// straddling `at` is cut recursively (NodeBuffer has its own `cut`, so
    /// buffers straddling the boundary are trimmed in place rather than
    /// dropped, unlike in `unchanged`).
    pub fn cut(&self, at: u32) -> Tree {
        if at >= self.length() {
            return self.clone();
        }
        let mut out_children = SmallVec::new();
        let mut out_positions = SmallVec::new();
        for (i, child) in self.0.children.iter().enumerate() {
            let start = self.0.positions[i];
            if start >= at {
                break;
            }
            let end = start + child.length();
            if end <= at {
                out_children.push(child.clone());
                out_positions.push(start);
            } else {
                match child {
                    Child::Node(t) => {
                        out_children.push(Child::Node(t.cut(at - start)));
                        out_positions.push(start);
                    }
                    Child::Buffer(buf) => {
                        out_children.push(Child::Buffer(Rc::new(buf.cut(at - start))));
                        out_positions.push(start);
                    }
                }
            }
        }
        let length = final_length(&out_children, &out_positions);
        Tree::new(self.0.type_id, length, out_children, out_positions)
    }

    /// Concatenates `other`'s children onto this tree's. `other`'s positions
    /// are assumed to already share this tree's coordinate space (i.e.
    /// `other` picks up exactly where `self` leaves off); fails if its first
    /// child would start before `self.length()`.
    pub fn append(&self, other: &Tree) -> Result<Tree, TreeError> {
        let Some(&first_pos) = other.0.positions.first() else {
            // Appending an empty tree: per the design notes, don't
            // recompute a length in this case — the result is just `self`.
            return Ok(self.clone());
        };
        if first_pos < self.length() {
            return Err(TreeError::Overlap { receiver_len: self.length(), other_start: first_pos });
        }
        let mut children = self.0.children.clone();
        let mut positions = self.0.positions.clone();
        children.extend(other.0.children.iter().cloned());
        positions.extend(other.0.positions.iter().copied());
        let length = final_length(&children, &positions);
        Ok(Tree::new(self.0.type_id, length, children, positions))
    }

    /// Builds a tree from subtrees of `self` whose spans lie entirely
    /// outside `changes`, with positions shifted so offsets refer to the new
    /// document. See the Open Questions note in `DESIGN.md` for the
    /// "trim one unit short" behavior mentioned in the original design,
    /// which this implementation intentionally does not reproduce.
    pub fn unchanged(&self, changes: &[ChangedRange]) -> Tree {
        if changes.is_empty() {
            return self.clone();
        }
        let mut out_children = SmallVec::new();
        let mut out_positions = SmallVec::new();
        let mut gap_start = 0u32;
        let mut shift: i64 = 0;
        for change in changes {
            self.partial(0, gap_start, change.from_a, shift, &mut out_children, &mut out_positions);
            shift += change.delta();
            gap_start = change.to_a;
        }
        self.partial(0, gap_start, self.length(), shift, &mut out_children, &mut out_positions);
        let length = final_length(&out_children, &out_positions);
        Tree::new(self.0.type_id, length, out_children, out_positions)
    }

    /// Appends the children of `self` (a subtree rooted at old-document
    /// absolute offset `tree_abs_start`) that fall within `[start, end]` to
    /// `out_children`/`out_positions`, shifting absolute old positions by
    /// `shift` to land in the new document's coordinates.
    fn partial(
        &self,
        tree_abs_start: u32,
        start: u32,
        end: u32,
        shift: i64,
        out_children: &mut SmallVec<[Child; 4]>,
        out_positions: &mut SmallVec<[u32; 4]>,
    ) {
        for (i, child_start, child_end) in self.child_spans(tree_abs_start) {
            if child_end <= start || child_start >= end {
                continue;
            }
            if child_start >= start && child_end <= end {
                let new_pos = (child_start as i64 + shift) as u32;
                out_children.push(self.0.children[i].clone());
                out_positions.push(new_pos);
            } else if let Child::Node(t) = &self.0.children[i] {
                let mut sub_children = SmallVec::new();
                let mut sub_positions = SmallVec::new();
                t.partial(child_start, start, end, shift, &mut sub_children, &mut sub_positions);
                if let Some(&first) = sub_positions.first() {
                    let rel_positions: SmallVec<[u32; 4]> =
                        sub_positions.iter().map(|p| p - first).collect();
                    let length = final_length(&sub_children, &rel_positions);
                    out_children.push(Child::Node(Tree::new(t.type_id(), length, sub_children, rel_positions)));
                    out_positions.push(first);
                }
            }
            // A NodeBuffer straddling the boundary is dropped: buffers are
            // not split during reuse, it's cheaper to reparse the region.
        }
    }
}

fn final_length(children: &[Child], positions: &[u32]) -> u32 {
    match (positions.last(), children.last()) {
        (Some(&p), Some(c)) => p + c.length(),
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(type_id: u16, start: u32, len: u32) -> (Child, u32) {
        (Child::Node(Tree::new(type_id, len, SmallVec::new(), SmallVec::new())), start)
    }

    fn tree_of(type_id: u16, length: u32, children: Vec<(Child, u32)>) -> Tree {
        let mut cs = SmallVec::new();
        let mut ps = SmallVec::new();
        for (c, p) in children {
            cs.push(c);
            ps.push(p);
        }
        Tree::new(type_id, length, cs, ps)
    }

    /// Scenario 4: A[0,20) containing tagged B[5,15).
    fn nested_tree() -> Tree {
        let (b, bp) = leaf(3, 5, 10);
        let a = tree_of(5, 20, vec![(b, bp)]);
        tree_of(0, 20, vec![(Child::Node(a), 0)])
    }

    #[test]
    fn resolve_prefers_innermost_containing_tagged_node() {
        let root = nested_tree();
        let view = root.resolve(10);
        assert_eq!(view.type_id(), 3);
        assert_eq!((view.start(), view.end()), (5, 15));
        assert_eq!(view.parent().unwrap().type_id(), 5);
    }

    #[test]
    fn resolve_at_length_returns_root() {
        let root = nested_tree();
        let view = root.resolve(20);
        assert!(matches!(view, SubtreeView::Root(_)));
    }

    #[test]
    fn resolve_is_inclusive_on_start() {
        let root = nested_tree();
        let view = root.resolve(5);
        assert_eq!(view.type_id(), 3);
    }

    /// Two tagged siblings meeting exactly at `pos`: inclusive-start,
    /// exclusive-end means the right-hand sibling must win.
    #[test]
    fn resolve_at_sibling_boundary_prefers_the_later_child() {
        let root = tree_of(0, 15, vec![leaf(3, 0, 5), leaf(5, 5, 10)]);
        let view = root.resolve(5);
        assert_eq!(view.type_id(), 5);
        assert_eq!((view.start(), view.end()), (5, 15));
    }

    #[test]
    fn to_string_renders_tagged_and_anonymous_nodes() {
        let root = nested_tree();
        // A(type 5) is anonymous (even id) so it's transparent: the root's
        // own rendering splices straight through to B.
        assert_eq!(root.to_string(None), "3");
        let named = tree_of(3, 10, vec![]);
        assert_eq!(named.to_string(None), "3");
    }

    #[test]
    fn to_string_is_unaffected_by_a_no_op_unchanged() {
        let root = nested_tree();
        assert_eq!(root.unchanged(&[]).to_string(None), root.to_string(None));
    }

    #[test]
    fn iterate_with_skip_suppresses_descent_and_leave() {
        let root = nested_tree();
        let mut entered = Vec::new();
        let mut left = Vec::new();
        root.iterate(
            0,
            20,
            &mut |ty, s, e| {
                entered.push((ty, s, e));
                if ty == 5 { VisitResult::Skip } else { VisitResult::Enter }
            },
            &mut |ty, s, e| left.push((ty, s, e)),
        );
        assert_eq!(entered, vec![(5, 0, 20)]);
        assert!(left.is_empty());
    }

    #[test]
    fn cut_never_exceeds_at_and_is_identity_at_length() {
        let root = nested_tree();
        assert!(root.cut(20).ptr_eq(&root));
        let cut = root.cut(10);
        assert!(cut.length() <= 10);
    }

    #[test]
    fn append_rejects_overlap() {
        let left = tree_of(0, 10, vec![leaf(3, 0, 10)]);
        let right = tree_of(0, 20, vec![leaf(3, 5, 10)]);
        assert_eq!(
            left.append(&right),
            Err(TreeError::Overlap { receiver_len: 10, other_start: 5 })
        );
    }

    #[test]
    fn append_empty_keeps_receiver_length() {
        let left = tree_of(0, 10, vec![leaf(3, 0, 10)]);
        let joined = left.append(&Tree::empty()).unwrap();
        assert_eq!(joined.length(), left.length());
        assert_eq!(joined, left);
    }

    #[test]
    fn append_concatenates_and_derives_length_from_final_child() {
        let left = tree_of(0, 10, vec![leaf(3, 0, 10)]);
        let right = tree_of(0, 20, vec![leaf(3, 10, 10)]);
        let joined = left.append(&right).unwrap();
        assert_eq!(joined.length(), 20);
        assert_eq!(joined.children().len(), 2);
    }

    #[test]
    fn unchanged_with_no_changes_is_identity() {
        let root = nested_tree();
        let same = root.unchanged(&[]);
        assert!(same.ptr_eq(&root));
    }

    #[test]
    fn empty_unchanged_stays_empty() {
        assert_eq!(Tree::empty().unchanged(&[ChangedRange::new(0, 5, 0, 2)]), Tree::empty());
    }

    /// Scenario 3: ten leaves every 10 units over [0,100); change [40,60)->[40,50).
    #[test]
    fn unchanged_reuses_untouched_subtrees_and_shifts_the_rest() {
        let mut children = Vec::new();
        for i in 0..10u32 {
            children.push(leaf(3, i * 10, 10));
        }
        let root = tree_of(0, 100, children);
        let original_first_four: Vec<Tree> = root
            .children()
            .iter()
            .take(4)
            .map(|c| match c {
                Child::Node(t) => t.clone(),
                _ => unreachable!(),
            })
            .collect();

        let reused = root.unchanged(&[ChangedRange::new(40, 60, 40, 50)]);

        // [0,40) preserved by reference, at the same positions.
        for (i, orig) in original_first_four.iter().enumerate() {
            match &reused.children()[i] {
                Child::Node(t) => assert!(t.ptr_eq(orig)),
                _ => panic!("expected node"),
            }
            assert_eq!(reused.positions()[i], i as u32 * 10);
        }
        // Exactly 8 leaves survive: 4 before the change, 4 after.
        assert_eq!(reused.children().len(), 8);
        // The tail is shifted left by 10 (60->50, 70->60, ..., 90->80).
        let tail_positions: Vec<u32> = reused.positions()[4..].to_vec();
        assert_eq!(tail_positions, vec![50, 60, 70, 80]);
        assert_eq!(reused.length(), 90);
    }
}
