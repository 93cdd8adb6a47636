use crate::model::*;

use super::availability::coalesce;

/// Sweep-line: time ranges where concurrent busy events reach `capacity`.
///
/// Capacity floors at 1. With capacity 1 every busy span blocks on its own.
/// Returns sorted, merged spans.
pub fn blocking_spans(busy: &[Span], capacity: u32) -> Vec<Span> {
    if busy.is_empty() {
        return Vec::new();
    }
    let capacity = i64::from(capacity.max(1));
    if capacity == 1 {
        return coalesce(busy.to_vec());
    }

    // Build sweep-line edges: +1 at start, -1 at end
    let mut edges: Vec<(Ms, i64)> = Vec::with_capacity(busy.len() * 2);
    for b in busy {
        edges.push((b.start, 1));
        edges.push((b.end, -1));
    }
    edges.sort_by_key(|e| e.0);

    // Fold every edge at one timestamp into a single delta
    let mut deltas: Vec<(Ms, i64)> = Vec::with_capacity(edges.len());
    for (time, delta) in edges {
        match deltas.last_mut() {
            Some(last) if last.0 == time => last.1 += delta,
            _ => deltas.push((time, delta)),
        }
    }

    let mut result: Vec<Span> = Vec::new();
    let mut occupancy = 0i64;
    for pair in deltas.windows(2) {
        let (time, delta) = pair[0];
        let next = pair[1].0;
        occupancy += delta;
        if occupancy >= capacity {
            match result.last_mut() {
                Some(last) if last.end == time => last.end = next,
                _ => result.push(Span::new(time, next)),
            }
        }
    }

    result
}
