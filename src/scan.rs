//! Shared positional-scan algorithm used by both [`crate::buffer::NodeBuffer::find_index`]
//! and [`crate::tree::Tree`]'s direct-child lookups (`resolve`, `child_before`,
//! `child_after`). Kept as one routine so the tie-break rules in the spec
//! (zero-width skip, side selection, "last record before pos") can't drift
//! between the two call sites.

/// Scan `items` (already in ascending-start order) for the record a
/// positional query with the given `side` should select.
///
/// `side < 0` looks for the nearest record strictly before `pos` (or one
/// that contains it); `side == 0` looks for containment or an exact start
/// match; `side > 0` looks for the nearest record at-or-after `pos`.
pub(crate) fn scan_for_side<I, K>(items: I, pos: u32, side: i8) -> Option<K>
where
    I: IntoIterator<Item = (K, u32, u32)>,
{
    let mut last_before: Option<K> = None;
    for (key, start, end) in items {
        if start == end && start == pos {
            // Zero-width record exactly at `pos`: invisible to every side.
            continue;
        }
        if start >= pos {
            if side > 0 || (side == 0 && start == pos) {
                return Some(key);
            } else {
                break;
            }
        }
        if end > pos {
            // pos lies strictly inside this record.
            return Some(key);
        }
        if side < 0 {
            last_before = Some(key);
        }
    }
    if side < 0 { last_before } else { None }
}
