use smallvec::SmallVec;

use crate::scan::scan_for_side;
use crate::visit::VisitResult;
use crate::tags::TypeTagTable;

/// A packed store of node records in prefix (parent-before-children) order.
///
/// Each record occupies four `i32` slots: `type`, `start`, `end`,
/// `child_count`. `start`/`end` are offsets relative to the buffer's own
/// start within its containing [`Tree`](crate::tree::Tree). `child_count` is
/// the number of *direct* child records; the children immediately follow the
/// parent record in the array. Total descendant count (and hence a record's
/// footprint) is derived by walking the children, not stored, which keeps
/// every record down to exactly four slots regardless of subtree size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeBuffer {
    data: SmallVec<[i32; 16]>,
}

/// One four-slot record, already resolved to absolute positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferRecord {
    pub idx: usize,
    pub type_id: u16,
    pub start: u32,
    pub end: u32,
    /// Slot range `[first_child, end_of_subtree)` covering this record's descendants.
    pub children: (usize, usize),
}

impl NodeBuffer {
    /// Build a buffer directly from already-laid-out prefix-order quads.
    /// Used by the [`Builder`](crate::builder::Builder); not validated beyond
    /// `debug_assert!`s, since the caller (the builder) constructed this
    /// layout itself.
    pub(crate) fn from_raw(data: SmallVec<[i32; 16]>) -> Self {
        debug_assert!(data.len() % 4 == 0, "buffer length must be a multiple of 4");
        let buf = NodeBuffer { data };
        #[cfg(debug_assertions)]
        buf.check_invariants();
        buf
    }

    #[cfg(debug_assertions)]
    fn check_invariants(&self) {
        if self.data.is_empty() {
            return;
        }
        assert_eq!(self.data.len() % 4, 0);
        let mut idx = 0;
        while idx < self.data.len() {
            let rec = self.record_at(idx);
            assert!(rec.end >= rec.start, "record end before start at slot {idx}");
            idx = self.next_sibling(idx);
        }
        assert_eq!(idx, self.data.len());
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Total span covered by this buffer: the `end` field of the very last
    /// quad physically stored (always the rightmost, deepest leaf, whose end
    /// bounds every ancestor's end by the containment invariant).
    pub fn length(&self) -> u32 {
        if self.data.is_empty() {
            0
        } else {
            self.data[self.data.len() - 2] as u32
        }
    }

    fn type_at(&self, idx: usize) -> u16 {
        self.data[idx] as u16
    }
    fn start_at(&self, idx: usize) -> u32 {
        self.data[idx + 1] as u32
    }
    fn end_at(&self, idx: usize) -> u32 {
        self.data[idx + 2] as u32
    }
    fn child_count_at(&self, idx: usize) -> usize {
        self.data[idx + 3] as usize
    }

    /// Total slot footprint (`4 * (1 + total_descendants)`) of the record at `idx`.
    fn subtree_slots(&self, idx: usize) -> usize {
        let child_count = self.child_count_at(idx);
        let mut next = idx + 4;
        for _ in 0..child_count {
            next += self.subtree_slots(next);
        }
        next - idx
    }

    /// Slot index immediately after the subtree rooted at `idx`.
    pub(crate) fn next_sibling(&self, idx: usize) -> usize {
        idx + self.subtree_slots(idx)
    }

    pub(crate) fn slot_len(&self) -> usize {
        self.data.len()
    }

    pub(crate) fn record_at(&self, idx: usize) -> BufferRecord {
        let child_count = self.child_count_at(idx);
        let mut children_end = idx + 4;
        for _ in 0..child_count {
            children_end = self.next_sibling(children_end);
        }
        BufferRecord {
            idx,
            type_id: self.type_at(idx),
            start: self.start_at(idx),
            end: self.end_at(idx),
            children: (idx + 4, children_end),
        }
    }

    fn top_level_records(&self, from: usize, to: usize) -> impl Iterator<Item = (usize, u32, u32)> + '_ {
        TopLevelIter { buf: self, idx: from, to }
            .map(|idx| (idx, self.start_at(idx), self.end_at(idx)))
    }

    /// Locate the record within slot range `[from, to)` that a positional
    /// query with the given `side` should select. `buffer_start` shifts the
    /// buffer-relative `start`/`end` fields to absolute offsets before the
    /// comparison against `pos` (also absolute).
    pub fn find_index(&self, pos: u32, side: i8, buffer_start: u32, from: usize, to: usize) -> Option<usize> {
        let items = self
            .top_level_records(from, to)
            .map(|(idx, s, e)| (idx, buffer_start + s, buffer_start + e));
        scan_for_side(items, pos, side)
    }

    /// Innermost record (descending through nested children) that contains
    /// `pos`, or `None` if `pos` falls outside every top-level record.
    pub fn deepest_containing(&self, buffer_start: u32, pos: u32) -> Option<BufferRecord> {
        let mut range = (0, self.data.len());
        let mut found: Option<BufferRecord> = None;
        loop {
            let idx = self.find_index(pos, 0, buffer_start, range.0, range.1)?;
            let rec = self.record_at(idx);
            range = rec.children;
            found = Some(rec);
            if range.0 == range.1 {
                break;
            }
        }
        found
    }

    /// Visits every record whose absolute span (`start + offset`, `end +
    /// offset`) intersects `[from, to]`, in prefix order.
    pub fn iterate(
        &self,
        from: u32,
        to: u32,
        offset: u32,
        enter: &mut dyn FnMut(u16, u32, u32) -> VisitResult,
        leave: &mut dyn FnMut(u16, u32, u32),
    ) {
        self.iterate_range(0, self.data.len(), from, to, offset, enter, leave);
    }

    /// Like [`iterate`](Self::iterate) but scoped to a slot range, used by
    /// [`SubtreeView::Buffer`](crate::view::SubtreeView) to iterate a single
    /// record's descendants.
    pub(crate) fn iterate_children(
        &self,
        range: (usize, usize),
        from: u32,
        to: u32,
        offset: u32,
        enter: &mut dyn FnMut(u16, u32, u32) -> VisitResult,
        leave: &mut dyn FnMut(u16, u32, u32),
    ) {
        self.iterate_range(range.0, range.1, from, to, offset, enter, leave);
    }

    fn iterate_range(
        &self,
        lo: usize,
        hi: usize,
        from: u32,
        to: u32,
        offset: u32,
        enter: &mut dyn FnMut(u16, u32, u32) -> VisitResult,
        leave: &mut dyn FnMut(u16, u32, u32),
    ) {
        let mut idx = lo;
        while idx < hi {
            let rec = self.record_at(idx);
            let abs_start = rec.start + offset;
            let abs_end = rec.end + offset;
            if abs_start > to || abs_end < from {
                idx = self.next_sibling(idx);
                continue;
            }
            match enter(rec.type_id, abs_start, abs_end) {
                VisitResult::Skip => {}
                VisitResult::Enter => {
                    self.iterate_range(rec.children.0, rec.children.1, from, to, offset, enter, leave);
                    leave(rec.type_id, abs_start, abs_end);
                }
            }
            idx = self.next_sibling(idx);
        }
    }

    /// Returns a new buffer containing only top-level records whose `start <
    /// at`, with `end` and `child_count` clamped at every retained level.
    pub fn cut(&self, at: u32) -> NodeBuffer {
        let mut out: SmallVec<[i32; 16]> = SmallVec::new();
        let mut idx = 0;
        while idx < self.data.len() {
            let footprint = self.subtree_slots(idx);
            self.cut_record(idx, at, &mut out);
            idx += footprint;
        }
        NodeBuffer::from_raw(out)
    }

    /// Returns whether the record was retained (`start < at`); appends it
    /// (and any surviving children) to `out` if so.
    fn cut_record(&self, idx: usize, at: u32, out: &mut SmallVec<[i32; 16]>) -> bool {
        let start = self.start_at(idx);
        if start >= at {
            return false;
        }
        let header = out.len();
        out.push(self.type_at(idx) as i32);
        out.push(start as i32);
        out.push(0);
        out.push(0);

        let child_count = self.child_count_at(idx);
        let mut child_idx = idx + 4;
        let mut kept = 0usize;
        for _ in 0..child_count {
            let footprint = self.subtree_slots(child_idx);
            if self.cut_record(child_idx, at, out) {
                kept += 1;
            }
            child_idx += footprint;
        }
        let new_end = self.end_at(idx).min(at);
        out[header + 2] = new_end as i32;
        out[header + 3] = kept as i32;
        true
    }

    /// Appends a textual rendering of the subtree rooted at `idx` to `sink`,
    /// `NAME(c1,c2,…)` for records with children, bare `NAME` for leaves.
    pub fn child_to_string(&self, idx: usize, sink: &mut String, tags: Option<&TypeTagTable<String>>) {
        let rec = self.record_at(idx);
        let name = tags
            .and_then(|t| t.get(rec.type_id).cloned())
            .unwrap_or_else(|| rec.type_id.to_string());
        sink.push_str(&name);
        if rec.children.0 < rec.children.1 {
            sink.push('(');
            let mut child = rec.children.0;
            let mut first = true;
            while child < rec.children.1 {
                if !first {
                    sink.push(',');
                }
                first = false;
                self.child_to_string(child, sink, tags);
                child = self.next_sibling(child);
            }
            sink.push(')');
        }
    }
}

struct TopLevelIter<'a> {
    buf: &'a NodeBuffer,
    idx: usize,
    to: usize,
}

impl<'a> Iterator for TopLevelIter<'a> {
    type Item = usize;
    fn next(&mut self) -> Option<usize> {
        if self.idx >= self.to {
            return None;
        }
        let cur = self.idx;
        self.idx = self.buf.next_sibling(cur);
        Some(cur)
    }
}
