//! Why a computation came back empty.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::engine::{AvailabilityInputs, Engine, EngineError};
use crate::model::*;
use crate::planner::SolvePlan;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmptyReason {
    /// A resource that has to be free never is, rules alone considered.
    NoPositiveRule,
    FullyBlockedByBusy,
    FullyBlockedByNegativeRule,
    /// Several blocks combine, or rule windows never coincide.
    PartiallyBlocked,
    /// Filtering left nothing to compute.
    EmptySelection,
}

impl EmptyReason {
    pub fn label(self) -> &'static str {
        match self {
            EmptyReason::NoPositiveRule => "no_positive_rule",
            EmptyReason::FullyBlockedByBusy => "fully_blocked_by_busy",
            EmptyReason::FullyBlockedByNegativeRule => "fully_blocked_by_negative_rule",
            EmptyReason::PartiallyBlocked => "partially_blocked",
            EmptyReason::EmptySelection => "empty_selection",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Explanation {
    pub reason: EmptyReason,
    /// Resources the reason applies to.
    pub resource_ids: Vec<ResourceId>,
    pub message: String,
}

impl Explanation {
    fn new(reason: EmptyReason, resource_ids: impl IntoIterator<Item = ResourceId>, message: impl Into<String>) -> Self {
        let mut resource_ids: Vec<ResourceId> = resource_ids.into_iter().collect();
        resource_ids.sort_unstable();
        resource_ids.dedup();
        Self {
            reason,
            resource_ids,
            message: message.into(),
        }
    }

    /// `stage` names the filter that removed the last resource.
    pub fn empty_selection(stage: &str) -> Self {
        Self::new(
            EmptyReason::EmptySelection,
            Vec::new(),
            format!("no resources left after {stage}"),
        )
    }
}

/// Ids to report when some obligation has no positive rule at all: a required
/// resource, or every candidate of an OR-group.
fn starved(plan: &SolvePlan, barren: &BTreeSet<ResourceId>) -> Vec<ResourceId> {
    let (required, groups) = plan.demands();
    let hits: Vec<ResourceId> = required.into_iter().filter(|id| barren.contains(id)).collect();
    if !hits.is_empty() {
        return hits;
    }
    for group in groups {
        let dead: Vec<Vec<ResourceId>> = group
            .iter()
            .map(|needs| needs.iter().copied().filter(|id| barren.contains(id)).collect::<Vec<_>>())
            .collect();
        if dead.iter().all(|d| !d.is_empty()) {
            return dead.into_iter().flatten().collect();
        }
    }
    Vec::new()
}

/// Classify an empty result.
///
/// `free_before_slicing` marks results that only emptied because no interval
/// fit the requested slot length.
pub fn explain_empty(
    engine: &Engine,
    plan: &SolvePlan,
    period: &DatePeriod,
    inputs: &AvailabilityInputs,
    free_before_slicing: bool,
) -> Result<Explanation, EngineError> {
    let involved = plan.involved();
    if free_before_slicing {
        return Ok(Explanation::new(
            EmptyReason::PartiallyBlocked,
            involved,
            "free time exists but no interval is as long as the slot duration",
        ));
    }

    let mut barren = BTreeSet::new();
    for &id in &involved {
        if engine.resource_intervals(id, period, inputs)?.positive.is_empty() {
            barren.insert(id);
        }
    }
    let starved = starved(plan, &barren);
    if !starved.is_empty() {
        return Ok(Explanation::new(
            EmptyReason::NoPositiveRule,
            starved,
            "no availability rule produces time in the period",
        ));
    }

    let positive_only = inputs.without_busy().without_exclusions();
    if plan.run(engine, period, &positive_only)?.is_empty() {
        return Ok(Explanation::new(
            EmptyReason::PartiallyBlocked,
            involved,
            "availability rules of the selected resources never coincide",
        ));
    }

    if plan.run(engine, period, &inputs.without_exclusions())?.is_empty() {
        return Ok(Explanation::new(
            EmptyReason::FullyBlockedByBusy,
            involved.iter().copied().filter(|id| inputs.has_busy(*id)),
            "busy events cover all remaining time",
        ));
    }

    if plan.run(engine, period, &inputs.without_busy())?.is_empty() {
        return Ok(Explanation::new(
            EmptyReason::FullyBlockedByNegativeRule,
            involved.iter().copied().filter(|id| inputs.has_exclusions(*id)),
            "exclusion rules cover all remaining time",
        ));
    }

    Ok(Explanation::new(
        EmptyReason::PartiallyBlocked,
        involved
            .iter()
            .copied()
            .filter(|id| inputs.has_busy(*id) || inputs.has_exclusions(*id)),
        "busy events and exclusion rules together cover all remaining time",
    ))
}
