//! Randomized property checks for `Builder`, `Tree::cut`, and
//! `Tree::unchanged`, in the style of the crate's own content-tree fuzzer:
//! build random inputs with `SmallRng`, then assert the invariants that must
//! hold regardless of what was generated.

use rand::prelude::*;

use parse_tree_core::builder::Builder;
use parse_tree_core::{BRANCH_FACTOR, Child, ChangedRange, FlatBufferCursor, REUSED_VALUE, Tree};

const TAGGED_LEAF: u16 = 3;
const ANON_GROUP: u16 = 4;

/// One node in the random document shape, before it's flattened into a
/// postfix record stream.
enum Unit {
    Leaf { len: u32 },
    Reuse { table_index: u16, len: u32 },
    Group { children: Vec<Unit> },
}

fn unit_span(u: &Unit) -> u32 {
    match u {
        Unit::Leaf { len } => *len,
        Unit::Reuse { len, .. } => *len,
        Unit::Group { children } => children.iter().map(unit_span).sum(),
    }
}

/// Appends `unit`'s postfix (children-before-parent) record(s) to `data`,
/// starting at absolute position `start`. Returns the number of i32 slots
/// written, so the caller can compute the `size` field of an enclosing group.
fn emit(unit: &Unit, start: u32, data: &mut Vec<i32>) -> usize {
    match unit {
        Unit::Leaf { len } => {
            data.push(TAGGED_LEAF as i32);
            data.push(start as i32);
            data.push((start + len) as i32);
            data.push(4);
            4
        }
        Unit::Reuse { table_index, len } => {
            data.push(*table_index as i32);
            data.push(start as i32);
            data.push((start + len) as i32);
            data.push(REUSED_VALUE);
            4
        }
        Unit::Group { children } => {
            let mut pos = start;
            let mut child_slots = 0usize;
            for c in children {
                child_slots += emit(c, pos, data);
                pos += unit_span(c);
            }
            data.push(ANON_GROUP as i32);
            data.push(start as i32);
            data.push(pos as i32);
            data.push((child_slots + 4) as i32);
            child_slots + 4
        }
    }
}

/// Builds a single tagged leaf `Tree` via the real `Builder`, for use as a
/// `reused` table entry — the only way to obtain a `Tree` value from outside
/// the crate, matching how a host would actually come by a reusable subtree
/// (the output of an earlier build, not a hand-assembled value).
fn build_single_leaf(start: u32, len: u32) -> Tree {
    let data = [TAGGED_LEAF as i32, start as i32, (start + len) as i32, 4];
    let cursor = FlatBufferCursor::new(&data);
    let wrapper = Builder::build(cursor, &[], 1024, 0, start + len, true);
    match &wrapper.children()[0] {
        Child::Node(t) => t.clone(),
        Child::Buffer(_) => unreachable!("a single 1-record stream never packs into a buffer"),
    }
}

fn random_unit(rng: &mut SmallRng, reused_table: &mut Vec<Tree>, depth: usize) -> Unit {
    let roll = rng.gen_range(0..10);
    if roll == 0 && depth < 2 {
        let len = rng.gen_range(1..=9u32);
        let table_index = reused_table.len() as u16;
        reused_table.push(build_single_leaf(0, len));
        Unit::Reuse { table_index, len }
    } else if roll <= 2 && depth < 2 {
        let n = rng.gen_range(2..=4);
        let children = (0..n).map(|_| random_unit(rng, reused_table, depth + 1)).collect();
        Unit::Group { children }
    } else {
        Unit::Leaf { len: rng.gen_range(1..=9u32) }
    }
}

/// Generates `top_level_count` sibling units — a mix of plain tagged
/// leaves, reuse sentinels, and nested anonymous groups — laid out as a
/// postfix record stream, plus the `reused` table any reuse sentinels
/// reference.
fn random_stream(rng: &mut SmallRng, top_level_count: usize) -> (Vec<i32>, u32, Vec<Tree>) {
    let mut reused_table = Vec::new();
    let units: Vec<Unit> = (0..top_level_count).map(|_| random_unit(rng, &mut reused_table, 0)).collect();

    let mut data = Vec::new();
    let mut pos = 0u32;
    for unit in &units {
        emit(unit, pos, &mut data);
        pos += unit_span(unit);
    }
    (data, pos, reused_table)
}

fn max_tree_depth(t: &Tree) -> usize {
    t.children()
        .iter()
        .map(|c| match c {
            Child::Node(n) => 1 + max_tree_depth(n),
            Child::Buffer(_) => 1,
        })
        .max()
        .unwrap_or(0)
}

fn max_fanout(t: &Tree) -> usize {
    let here = t.children().len();
    t.children()
        .iter()
        .filter_map(|c| match c {
            Child::Node(n) => Some(max_fanout(n)),
            Child::Buffer(_) => None,
        })
        .fold(here, usize::max)
}

fn assert_nondecreasing_positions(t: &Tree) {
    let mut prev = 0u32;
    for (i, &pos) in t.positions().iter().enumerate() {
        assert!(i == 0 || pos >= prev, "positions must never decrease");
        prev = pos;
    }
    for child in t.children() {
        if let Child::Node(n) = child {
            assert_nondecreasing_positions(n);
        }
    }
}

/// No buffer may contain a reused node — `Builder::find_buffer_size` must
/// stop scanning at a reuse sentinel rather than pack across it.
fn assert_no_buffer_contains_a_reused_subtree(t: &Tree, reused: &[Tree]) {
    for child in t.children() {
        match child {
            Child::Node(n) => {
                if !reused.iter().any(|r| r.ptr_eq(n)) {
                    assert_no_buffer_contains_a_reused_subtree(n, reused);
                }
            }
            Child::Buffer(_) => {}
        }
    }
}

#[test]
fn random_streams_build_into_depth_and_fanout_bounded_trees() {
    let mut rng = SmallRng::seed_from_u64(0xC0FFEE);
    for trial in 0..200 {
        let count = rng.gen_range(1..=400usize);
        let max_buffer_length = *[8usize, 32, 128, 1024].choose(&mut rng).unwrap();
        let (data, length, reused) = random_stream(&mut rng, count);
        let cursor = FlatBufferCursor::new(&data);
        let tree = Builder::build(cursor, &reused, max_buffer_length, 0, length, true);

        assert_eq!(tree.length(), length, "trial {trial}: top length must match declared span");
        assert_nondecreasing_positions(&tree);
        assert_no_buffer_contains_a_reused_subtree(&tree, &reused);
        assert!(
            max_fanout(&tree) <= BRANCH_FACTOR,
            "trial {trial}: a balanced node exceeded branch factor {BRANCH_FACTOR}"
        );
        // Depth is bounded by log_BRANCH_FACTOR(count) plus slack for
        // buffer-vs-node grouping overhead and the nested-group units.
        let bound = ((count as f64).log(BRANCH_FACTOR as f64).ceil() as usize) + 8;
        assert!(max_tree_depth(&tree) <= bound, "trial {trial}: tree grew deeper than {bound}");
    }
}

#[test]
fn cut_at_random_position_never_exceeds_the_cut_point() {
    let mut rng = SmallRng::seed_from_u64(0xBEEF);
    for trial in 0..200 {
        let count = rng.gen_range(1..=200usize);
        let (data, length, reused) = random_stream(&mut rng, count);
        let cursor = FlatBufferCursor::new(&data);
        let tree = Builder::build(cursor, &reused, 64, 0, length, true);

        let at = rng.gen_range(0..=length + 5);
        let cut = tree.cut(at);
        assert!(cut.length() <= at, "trial {trial}: cut({at}) produced length {}", cut.length());
        assert_nondecreasing_positions(&cut);
    }
}

/// Builds a set of sorted, non-overlapping change ranges covering a document
/// of length `doc_len`, with random net growth/shrink per edit.
fn random_changes(rng: &mut SmallRng, doc_len: u32) -> Vec<ChangedRange> {
    let mut changes = Vec::new();
    let mut cursor = 0u32;
    let mut shift = 0i64;
    while cursor < doc_len {
        if !rng.gen_bool(0.3) {
            cursor += rng.gen_range(1..=5);
            continue;
        }
        let from_a = cursor;
        let span = rng.gen_range(1..=5u32).min(doc_len - cursor);
        let to_a = from_a + span;
        let new_span = rng.gen_range(0..=6u32);
        let from_b = (from_a as i64 + shift) as u32;
        let to_b = from_b + new_span;
        changes.push(ChangedRange::new(from_a, to_a, from_b, to_b));
        shift += new_span as i64 - span as i64;
        cursor = to_a;
    }
    changes
}

#[test]
fn unchanged_with_random_nonoverlapping_edits_never_panics_and_stays_ordered() {
    let mut rng = SmallRng::seed_from_u64(0x5EED);
    for trial in 0..200 {
        let count = rng.gen_range(1..=150usize);
        let (data, length, reused) = random_stream(&mut rng, count);
        let cursor = FlatBufferCursor::new(&data);
        let tree = Builder::build(cursor, &reused, 64, 0, length, true);

        let changes = random_changes(&mut rng, length);
        let reused_after = tree.unchanged(&changes);
        assert_nondecreasing_positions(&reused_after);

        let mut prev_end = None;
        for (pos, child) in reused_after.positions().iter().zip(reused_after.children().iter()) {
            if let Some(end) = prev_end {
                assert!(*pos >= end, "trial {trial}: unchanged produced overlapping children");
            }
            prev_end = Some(pos + child.length());
        }
    }
}
