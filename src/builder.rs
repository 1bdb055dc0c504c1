use std::rc::Rc;

use smallvec::{smallvec, SmallVec};

use crate::buffer::NodeBuffer;
use crate::cursor::{BufferCursor, REUSED_VALUE};
use crate::tree::{Child, Tree};

/// Upper bound, in children, on how wide a balanced node is allowed to get
/// before [`Builder::balance_range`] partitions it into sub-groups.
pub const BRANCH_FACTOR: usize = 8;

/// Default upper bound on the span covered by a single [`NodeBuffer`].
pub const DEFAULT_MAX_BUFFER_LENGTH: usize = 1024;

/// Turns a postfix `(type, start, end, size)` record stream into a [`Tree`],
/// deciding along the way which runs of sibling records are dense enough to
/// pack into a [`NodeBuffer`] and which need to stay pointer nodes, and
/// keeping the result shallow via [`Builder::balance_range`].
///
/// One `Builder` consumes exactly one cursor to exhaustion; it isn't reused
/// across builds.
pub struct Builder<'r, C> {
    cursor: C,
    reused: &'r [Tree],
    max_buffer_length: usize,
}

impl<'r, C: BufferCursor> Builder<'r, C> {
    pub fn new(cursor: C, reused: &'r [Tree], max_buffer_length: usize) -> Self {
        Builder { cursor, reused, max_buffer_length }
    }

    /// Consumes `cursor` fully and returns the tree it describes, rooted
    /// under `top_type` and spanning `[0, length)`.
    ///
    /// Balancing always runs for an untagged (collector) `top_type`. For a
    /// tagged `top_type`, balancing only runs when `distribute` is set —
    /// the default is to leave a tagged root's direct children as-is, even
    /// if there are more than [`BRANCH_FACTOR`] of them.
    pub fn build(
        cursor: C,
        reused: &'r [Tree],
        max_buffer_length: usize,
        top_type: u16,
        length: u32,
        distribute: bool,
    ) -> Tree {
        let mut builder = Builder::new(cursor, reused, max_buffer_length);
        let mut children = SmallVec::new();
        let mut positions = SmallVec::new();
        while builder.cursor.pos() > 0 {
            builder.take_node(0, 0, &mut children, &mut positions);
        }
        children.reverse();
        positions.reverse();
        if top_type & 1 == 1 && !distribute {
            Tree::new(top_type, length, children, positions)
        } else {
            builder.balance_range(top_type, &children, &positions, length)
        }
    }

    /// Emits exactly one child into `out_children`/`out_positions`, reading
    /// (and consuming) one full record — and, if it's a pointer node, all of
    /// its descendants — from the cursor.
    fn take_node(
        &mut self,
        parent_start: u32,
        min_pos: usize,
        out_children: &mut SmallVec<[Child; 4]>,
        out_positions: &mut SmallVec<[u32; 4]>,
    ) {
        let id = self.cursor.type_id();
        let start = self.cursor.start();
        let end = self.cursor.end();
        let size = self.cursor.size();

        if size == REUSED_VALUE {
            let reused = self.reused[id as usize].clone();
            out_children.push(Child::Node(reused));
            out_positions.push(start - parent_start);
            self.cursor.next();
            return;
        }

        let span = end - start;
        if span as usize <= self.max_buffer_length {
            if let Some((slot_count, buf_start)) = self.find_buffer_size(self.cursor.pos() - min_pos) {
                let buffer = self.copy_to_buffer(slot_count, buf_start);
                out_children.push(Child::Buffer(Rc::new(buffer)));
                out_positions.push(buf_start - parent_start);
                return;
            }
        }

        let end_slot = self.cursor.pos() - size as usize;
        self.cursor.next();
        let mut local_children = SmallVec::new();
        let mut local_positions = SmallVec::new();
        while self.cursor.pos() > end_slot {
            self.take_node(start, end_slot, &mut local_children, &mut local_positions);
        }
        local_children.reverse();
        local_positions.reverse();

        let node = if id & 1 == 1 {
            Tree::new(id, end - start, local_children, local_positions)
        } else {
            self.balance_range(id, &local_children, &local_positions, end - start)
        };
        out_children.push(Child::Node(node));
        out_positions.push(start - parent_start);
    }

    /// Forks the cursor and scans backwards over complete sibling subtrees
    /// (skipping whole subtrees via their `size` field, never descending),
    /// accumulating slot count and span as long as both stay within budget
    /// and no reuse sentinel is crossed. Returns `None` if fewer than two
    /// records (`<= 4` slots) qualify — not worth a buffer.
    fn find_buffer_size(&self, slot_budget: usize) -> Option<(usize, u32)> {
        let mut fork = self.cursor.fork();
        if fork.pos() == 0 || fork.is_reused() {
            return None;
        }
        let last_end = fork.end();
        let mut total_slots = 0usize;
        let mut start = fork.start();
        loop {
            if fork.is_reused() {
                break;
            }
            let size = fork.size();
            if size < 0 {
                break;
            }
            let size = size as usize;
            if total_slots + size > slot_budget {
                break;
            }
            let rec_start = fork.start();
            if (last_end - rec_start) as usize > self.max_buffer_length {
                break;
            }
            total_slots += size;
            start = rec_start;
            let records = size / 4;
            for _ in 0..records {
                if fork.pos() == 0 {
                    break;
                }
                fork.next();
            }
            if fork.pos() == 0 {
                break;
            }
        }
        if total_slots > 4 {
            Some((total_slots, start))
        } else {
            None
        }
    }

    /// Consumes `slot_count` slots' worth of sibling records from the real
    /// cursor and lays them out in prefix order, writing backwards from the
    /// end of a freshly allocated array (see [`Builder::copy_one`]).
    fn copy_to_buffer(&mut self, slot_count: usize, buf_start: u32) -> NodeBuffer {
        let mut data: SmallVec<[i32; 16]> = SmallVec::from_elem(0, slot_count);
        let mut write_pos = slot_count;
        while write_pos > 0 {
            write_pos = self.copy_one(buf_start, &mut data, write_pos);
        }
        NodeBuffer::from_raw(data)
    }

    /// Copies one record, and recursively its descendants, into `data`,
    /// writing the parent's own four slots only after its children — the
    /// postfix-to-prefix flip described in the module's design notes.
    /// Returns the write cursor position after this subtree.
    fn copy_one(&mut self, buf_start: u32, data: &mut SmallVec<[i32; 16]>, write_pos: usize) -> usize {
        let type_id = self.cursor.type_id();
        let start = self.cursor.start();
        let end = self.cursor.end();
        let size = self.cursor.size() as usize;
        let end_slot = self.cursor.pos() - size;
        self.cursor.next();

        let mut pos = write_pos;
        let mut direct_children = 0usize;
        while self.cursor.pos() > end_slot {
            pos = self.copy_one(buf_start, data, pos);
            direct_children += 1;
        }

        let header = pos - 4;
        data[header] = type_id as i32;
        data[header + 1] = (start - buf_start) as i32;
        data[header + 2] = (end - buf_start) as i32;
        data[header + 3] = direct_children as i32;
        header
    }

    /// Keeps `children` shallow: flattens same-`type_id` runs when the whole
    /// span already fits in a buffer, otherwise partitions into groups of at
    /// most `max(maxBufferLength, ceil(length / BRANCH_FACTOR))` and
    /// recurses. `positions` are relative to this range's own start.
    fn balance_range(&self, type_id: u16, children: &[Child], positions: &[u32], length: u32) -> Tree {
        if children.is_empty() {
            return Tree::new(type_id, length, SmallVec::new(), SmallVec::new());
        }
        if length as usize <= self.max_buffer_length || children.len() <= 1 {
            let mut out_children = SmallVec::new();
            let mut out_positions = SmallVec::new();
            for (pos, child) in positions.iter().zip(children.iter()) {
                match child {
                    Child::Node(t) if t.type_id() == type_id => {
                        for (j, c) in t.children().iter().enumerate() {
                            out_children.push(c.clone());
                            out_positions.push(pos + t.positions()[j]);
                        }
                    }
                    other => {
                        out_children.push(other.clone());
                        out_positions.push(*pos);
                    }
                }
            }
            return Tree::new(type_id, length, out_children, out_positions);
        }

        let max_group_span =
            (self.max_buffer_length as u32).max((length + BRANCH_FACTOR as u32 - 1) / BRANCH_FACTOR as u32);
        let mut out_children = SmallVec::new();
        let mut out_positions = SmallVec::new();
        let mut i = 0;
        while i < children.len() {
            let group_start = positions[i];
            let mut j = i + 1;
            while j < children.len() && positions[j] + children[j].length() - group_start <= max_group_span {
                j += 1;
            }
            let group_end = positions[j - 1] + children[j - 1].length();
            let group_len = group_end - group_start;

            if j - i == 1 {
                match &children[i] {
                    Child::Node(t) if t.type_id() == type_id => {
                        if t.length() as usize > 2 * max_group_span as usize {
                            let inlined = self.balance_range(type_id, t.children(), t.positions(), t.length());
                            out_children.push(Child::Node(inlined));
                        } else {
                            out_children.push(children[i].clone());
                        }
                    }
                    other => {
                        let wrapped = Tree::new(
                            type_id,
                            group_len,
                            smallvec![other.clone()],
                            smallvec![0],
                        );
                        out_children.push(Child::Node(wrapped));
                    }
                }
            } else {
                let group_positions_rel: SmallVec<[u32; 4]> =
                    positions[i..j].iter().map(|p| p - group_start).collect();
                let sub = self.balance_range(type_id, &children[i..j], &group_positions_rel, group_len);
                out_children.push(Child::Node(sub));
            }
            out_positions.push(group_start);
            i = j;
        }
        Tree::new(type_id, length, out_children, out_positions)
    }
}
