use std::collections::BTreeSet;

use crate::model::*;

use super::capacity::blocking_spans;

/// Raw intervals for one resource, already expanded from its rules and events.
#[derive(Debug, Clone, Default)]
pub struct ResourceIntervals {
    /// Occurrences of positive (non-exclude) rules.
    pub positive: Vec<Span>,
    /// Occurrences of exclude rules.
    pub negative: Vec<Span>,
    /// Busy events.
    pub busy: Vec<Span>,
    pub capacity: u32,
}

/// Free time for one resource: positive rules minus exclusions minus busy blocks.
///
/// When `capacity_aware` is false every busy event blocks regardless of the
/// resource's capacity.
pub fn availability(
    resource_id: ResourceId,
    intervals: &ResourceIntervals,
    capacity_aware: bool,
    merge_by_exact_set: bool,
) -> Vec<Slot> {
    // Step 1: positive time, normalized. Nothing positive → unavailable.
    let positive: Vec<Slot> = intervals
        .positive
        .iter()
        .map(|s| Slot::single(*s, resource_id))
        .collect();
    let free = normalize(positive, merge_by_exact_set);
    if free.is_empty() {
        return free;
    }

    // Step 2: exclusions plus capacity blocks form one block list
    let capacity = if capacity_aware { intervals.capacity } else { 1 };
    let mut blocks = intervals.negative.clone();
    blocks.extend(blocking_spans(&intervals.busy, capacity));
    if blocks.is_empty() {
        return free;
    }
    let blocks = coalesce(blocks);

    // Step 3: punch the blocks out
    normalize(subtract(&free, &blocks), merge_by_exact_set)
}

/// Sort `spans` and fold overlapping or touching ones together.
pub(super) fn coalesce(mut spans: Vec<Span>) -> Vec<Span> {
    spans.sort_unstable();
    let mut out: Vec<Span> = Vec::with_capacity(spans.len());
    for span in spans {
        match out.last_mut() {
            Some(prev) if span.start <= prev.end => prev.end = prev.end.max(span.end),
            _ => out.push(span),
        }
    }
    out
}

/// What is left of `base` once every block (sorted by start) is cut out.
fn punch(base: Span, blocks: &[Span]) -> Vec<Span> {
    let mut pieces = Vec::new();
    let mut cursor = base.start;
    for block in blocks.iter().skip_while(|b| b.end <= base.start) {
        if block.start >= base.end {
            break;
        }
        if block.start > cursor {
            pieces.push(Span::new(cursor, block.start));
        }
        cursor = cursor.max(block.end);
        if cursor >= base.end {
            return pieces;
        }
    }
    pieces.push(Span::new(cursor, base.end));
    pieces
}

/// Sort by start then end and merge touching/overlapping slots.
///
/// With `merge_by_exact_set` only neighbours carrying the identical resource
/// set merge; otherwise slots merge by time alone and their sets are unioned.
pub fn normalize(mut slots: Vec<Slot>, merge_by_exact_set: bool) -> Vec<Slot> {
    slots.sort_by(|a, b| (a.start, a.end).cmp(&(b.start, b.end)));

    let mut merged: Vec<Slot> = Vec::with_capacity(slots.len());
    for slot in slots {
        if merge_by_exact_set {
            // A slot with a different set may sit between two mergeable ones.
            if let Some(target) = merged
                .iter_mut()
                .rev()
                .find(|m| m.end >= slot.start && m.resource_ids == slot.resource_ids)
            {
                target.end = target.end.max(slot.end);
                continue;
            }
        } else if let Some(last) = merged.last_mut()
            && slot.start <= last.end
        {
            last.end = last.end.max(slot.end);
            last.resource_ids.extend(slot.resource_ids);
            continue;
        }
        merged.push(slot);
    }
    if merge_by_exact_set {
        merged.sort_by(|a, b| (a.start, a.end).cmp(&(b.start, b.end)));
    }
    merged
}

/// Subtract sorted, merged `blocks` from every slot, keeping each slot's resource set.
///
/// Disjoint (including touching) blocks leave a slot alone; a containing block
/// removes it; anything else trims one or both sides.
pub fn subtract(base: &[Slot], blocks: &[Span]) -> Vec<Slot> {
    let mut result = Vec::with_capacity(base.len());
    for slot in base {
        for piece in punch(slot.span(), blocks) {
            result.push(Slot::new(piece, slot.resource_ids.clone()));
        }
    }
    result
}

/// Pairwise intersection of two sorted lists.
///
/// Merge-pointer walk: advance whichever side ends first; only strictly
/// positive overlaps are emitted, carrying the union of both resource sets.
pub fn intersect(a: &[Slot], b: &[Slot]) -> Vec<Slot> {
    let mut result = Vec::new();
    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        let (x, y) = (&a[i], &b[j]);
        if let Some(overlap) = x.span().intersection(&y.span()) {
            let ids = x.resource_ids.union(&y.resource_ids).copied().collect();
            result.push(Slot::new(overlap, ids));
        }
        if x.end <= y.end {
            i += 1;
        } else {
            j += 1;
        }
    }
    result
}

/// Union of several lists, normalized by time.
pub fn union(lists: Vec<Vec<Slot>>, merge_by_exact_set: bool) -> Vec<Slot> {
    normalize(lists.into_iter().flatten().collect(), merge_by_exact_set)
}

/// Replace every slot's resource set with `ids`.
pub fn retag(slots: Vec<Slot>, ids: &BTreeSet<ResourceId>) -> Vec<Slot> {
    slots
        .into_iter()
        .map(|s| Slot::new(s.span(), ids.clone()))
        .collect()
}
