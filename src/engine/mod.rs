mod availability;
mod capacity;
mod error;
mod occurrence;
mod solve;

pub use availability::{
    availability, intersect, normalize, retag, subtract, union,
    ResourceIntervals,
};
pub use capacity::blocking_spans;
pub use error::{EngineError, ValidationError};
pub use occurrence::{occurrences, Occurrence};
pub use solve::ResourceCache;

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::model::*;

/// Knobs that distinguish the historical engine behaviours.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Rule kinds this engine will expand; any other kind fails the computation.
    pub supported_kinds: Vec<RuleKind>,
    /// Apply per-resource capacity to busy events (otherwise every event blocks).
    pub capacity_aware: bool,
    /// Merge contiguous slots only when their resource sets are identical.
    pub merge_by_exact_resource_set: bool,
}

impl EngineConfig {
    /// Weekly, single-date and date-range rules only; exact-set merging.
    pub fn restricted() -> Self {
        Self {
            supported_kinds: vec![RuleKind::Weekly, RuleKind::SingleDate, RuleKind::DateRange],
            capacity_aware: true,
            merge_by_exact_resource_set: true,
        }
    }

    /// Every rule kind; merging by time alone.
    pub fn full() -> Self {
        Self {
            supported_kinds: RuleKind::ALL.to_vec(),
            capacity_aware: true,
            merge_by_exact_resource_set: false,
        }
    }

    pub fn supports(&self, kind: RuleKind) -> bool {
        self.supported_kinds.contains(&kind)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::full()
    }
}

/// Rules, busy events and capacities, indexed per resource.
#[derive(Debug, Clone, Default)]
pub struct AvailabilityInputs {
    rules: HashMap<ResourceId, Vec<Arc<SchedulingRule>>>,
    busy: HashMap<ResourceId, Vec<Span>>,
    capacities: HashMap<ResourceId, u32>,
}

impl AvailabilityInputs {
    /// Expand rules and events into one fact per bound resource.
    pub fn new(
        rules: Vec<SchedulingRule>,
        busy: &[BusyEvent],
        capacities: HashMap<ResourceId, u32>,
    ) -> Self {
        let rules: Vec<Arc<SchedulingRule>> = rules.into_iter().map(Arc::new).collect();
        Self::from_facts(
            rules.iter().flat_map(|r| r.facts()),
            busy.iter().flat_map(BusyEvent::facts),
            capacities,
        )
    }

    pub fn from_facts(
        rule_facts: impl IntoIterator<Item = RuleFact>,
        busy_facts: impl IntoIterator<Item = BusyFact>,
        capacities: HashMap<ResourceId, u32>,
    ) -> Self {
        let mut rules: HashMap<ResourceId, Vec<Arc<SchedulingRule>>> = HashMap::new();
        for fact in rule_facts {
            rules.entry(fact.resource_id).or_default().push(fact.rule);
        }
        let mut busy: HashMap<ResourceId, Vec<Span>> = HashMap::new();
        for fact in busy_facts {
            busy.entry(fact.resource_id).or_default().push(fact.span);
        }
        Self {
            rules,
            busy,
            capacities,
        }
    }

    pub fn rules_for(&self, resource_id: ResourceId) -> &[Arc<SchedulingRule>] {
        self.rules.get(&resource_id).map_or(&[], Vec::as_slice)
    }

    pub fn busy_for(&self, resource_id: ResourceId) -> &[Span] {
        self.busy.get(&resource_id).map_or(&[], Vec::as_slice)
    }

    /// Configured capacity, floored at 1.
    pub fn capacity(&self, resource_id: ResourceId) -> u32 {
        self.capacities.get(&resource_id).copied().unwrap_or(1).max(1)
    }

    pub fn has_busy(&self, resource_id: ResourceId) -> bool {
        !self.busy_for(resource_id).is_empty()
    }

    pub fn has_exclusions(&self, resource_id: ResourceId) -> bool {
        self.rules_for(resource_id).iter().any(|r| r.is_exclude)
    }

    /// Same rules and capacities, no busy events.
    pub fn without_busy(&self) -> Self {
        Self {
            rules: self.rules.clone(),
            busy: HashMap::new(),
            capacities: self.capacities.clone(),
        }
    }

    /// Same events and capacities, positive rules only.
    pub fn without_exclusions(&self) -> Self {
        let rules = self
            .rules
            .iter()
            .map(|(id, rules)| (*id, rules.iter().filter(|r| !r.is_exclude).cloned().collect()))
            .collect();
        Self {
            rules,
            busy: self.busy.clone(),
            capacities: self.capacities.clone(),
        }
    }
}

/// Which resources must be jointly free.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selection {
    /// Every one of these must be free.
    pub required: Vec<ResourceId>,
    /// At least one member of each group must be free.
    pub or_groups: Vec<Vec<ResourceId>>,
}

impl Selection {
    pub fn new(required: Vec<ResourceId>, or_groups: Vec<Vec<ResourceId>>) -> Self {
        Self { required, or_groups }
    }

    pub fn is_empty(&self) -> bool {
        self.required.is_empty() && self.or_groups.is_empty()
    }

    /// Keep only the ids `keep` accepts.
    ///
    /// `None` when the result can never be satisfied: an OR-group lost every
    /// member, or no id survived at all.
    pub fn retain(&self, mut keep: impl FnMut(ResourceId) -> bool) -> Option<Selection> {
        let required: Vec<ResourceId> = self.required.iter().copied().filter(|id| keep(*id)).collect();
        let mut or_groups = Vec::with_capacity(self.or_groups.len());
        for group in &self.or_groups {
            let kept: Vec<ResourceId> = group.iter().copied().filter(|id| keep(*id)).collect();
            if kept.is_empty() {
                return None;
            }
            or_groups.push(kept);
        }
        let narrowed = Selection { required, or_groups };
        (!narrowed.is_empty()).then_some(narrowed)
    }

    /// Every resource mentioned, required or alternative.
    pub fn resource_ids(&self) -> BTreeSet<ResourceId> {
        self.required
            .iter()
            .chain(self.or_groups.iter().flatten())
            .copied()
            .collect()
    }
}

/// Pure availability algebra, parameterized by [`EngineConfig`].
#[derive(Debug, Clone, Default)]
pub struct Engine {
    config: EngineConfig,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }
}
