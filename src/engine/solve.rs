use std::collections::{BTreeSet, HashMap};

use tracing::debug;

use crate::model::*;

use super::availability::{availability, intersect, normalize, retag, union, ResourceIntervals};
use super::occurrence::occurrences;
use super::{AvailabilityInputs, Engine, EngineError, Selection};

/// Per-request memo of single-resource availability.
#[derive(Debug, Default)]
pub struct ResourceCache {
    free: HashMap<ResourceId, Vec<Slot>>,
}

impl ResourceCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resources whose availability has been computed so far.
    pub(crate) fn len(&self) -> usize {
        self.free.len()
    }
}

impl Engine {
    /// Fail if any rule bound to `resource_ids` has a kind this engine cannot expand.
    pub fn check_rule_kinds(
        &self,
        resource_ids: impl IntoIterator<Item = ResourceId>,
        inputs: &AvailabilityInputs,
    ) -> Result<(), EngineError> {
        for rid in resource_ids {
            if let Some(rule) = inputs
                .rules_for(rid)
                .iter()
                .find(|r| !self.config.supports(r.kind))
            {
                return Err(EngineError::UnsupportedRuleKind {
                    rule_id: rule.id,
                    kind: rule.kind,
                });
            }
        }
        Ok(())
    }

    /// Expand a resource's rules and events for `period`.
    pub fn resource_intervals(
        &self,
        resource_id: ResourceId,
        period: &DatePeriod,
        inputs: &AvailabilityInputs,
    ) -> Result<ResourceIntervals, EngineError> {
        self.check_rule_kinds([resource_id], inputs)?;

        let mut intervals = ResourceIntervals {
            capacity: inputs.capacity(resource_id),
            busy: inputs.busy_for(resource_id).to_vec(),
            ..Default::default()
        };
        for rule in inputs.rules_for(resource_id) {
            let target = if rule.is_exclude {
                &mut intervals.negative
            } else {
                &mut intervals.positive
            };
            target.extend(occurrences(rule, period).iter().map(|o| o.span()));
        }
        Ok(intervals)
    }

    /// Normalized free time of one resource, tagged with its own id.
    pub fn resource_availability(
        &self,
        resource_id: ResourceId,
        period: &DatePeriod,
        inputs: &AvailabilityInputs,
        cache: &mut ResourceCache,
    ) -> Result<Vec<Slot>, EngineError> {
        if let Some(hit) = cache.free.get(&resource_id) {
            return Ok(hit.clone());
        }
        let intervals = self.resource_intervals(resource_id, period, inputs)?;
        let free = availability(
            resource_id,
            &intervals,
            self.config.capacity_aware,
            self.config.merge_by_exact_resource_set,
        );
        debug!(resource_id, slots = free.len(), "resource availability");
        cache.free.insert(resource_id, free.clone());
        Ok(free)
    }

    /// Running intersection across `resource_ids`.
    ///
    /// `None` when there is nothing to intersect; stops early once empty.
    pub fn intersect_resources(
        &self,
        resource_ids: &[ResourceId],
        period: &DatePeriod,
        inputs: &AvailabilityInputs,
        cache: &mut ResourceCache,
    ) -> Result<Option<Vec<Slot>>, EngineError> {
        let mut running: Option<Vec<Slot>> = None;
        for &rid in resource_ids {
            let free = self.resource_availability(rid, period, inputs, cache)?;
            let next = self.narrow(running, free);
            if next.is_empty() {
                debug!(resource_id = rid, "intersection emptied");
                return Ok(Some(next));
            }
            running = Some(next);
        }
        Ok(running)
    }

    /// Union of alternative candidates, each retagged with the whole group's ids.
    pub fn join_candidates(&self, group_ids: &BTreeSet<ResourceId>, candidates: Vec<Vec<Slot>>) -> Vec<Slot> {
        let retagged = candidates.into_iter().map(|c| retag(c, group_ids)).collect();
        union(retagged, self.config.merge_by_exact_resource_set)
    }

    /// Intersect `next` into the running result; an absent running result adopts `next`.
    pub fn narrow(&self, running: Option<Vec<Slot>>, next: Vec<Slot>) -> Vec<Slot> {
        match running {
            Some(current) => intersect(&current, &next),
            None => next,
        }
    }

    /// Tag every surviving interval with `tag` and merge what now touches.
    pub fn finish(&self, slots: Vec<Slot>, tag: &BTreeSet<ResourceId>) -> Vec<Slot> {
        normalize(retag(slots, tag), self.config.merge_by_exact_resource_set)
    }

    /// Jointly free time for `selection`, tagged with `tag`.
    pub fn solve(
        &self,
        selection: &Selection,
        period: &DatePeriod,
        inputs: &AvailabilityInputs,
        tag: &BTreeSet<ResourceId>,
    ) -> Result<Vec<Slot>, EngineError> {
        let mut cache = ResourceCache::new();
        self.solve_cached(selection, period, inputs, tag, &mut cache)
    }

    pub fn solve_cached(
        &self,
        selection: &Selection,
        period: &DatePeriod,
        inputs: &AvailabilityInputs,
        tag: &BTreeSet<ResourceId>,
        cache: &mut ResourceCache,
    ) -> Result<Vec<Slot>, EngineError> {
        self.check_rule_kinds(selection.resource_ids(), inputs)?;

        let mut running = self.intersect_resources(&selection.required, period, inputs, cache)?;
        if running.as_ref().is_some_and(Vec::is_empty) {
            return Ok(Vec::new());
        }

        for (index, group) in selection.or_groups.iter().enumerate() {
            if group.is_empty() {
                debug!(index, "empty OR-group");
                return Ok(Vec::new());
            }
            let group_ids: BTreeSet<ResourceId> = group.iter().copied().collect();
            let mut candidates = Vec::with_capacity(group.len());
            for &rid in group {
                candidates.push(self.resource_availability(rid, period, inputs, cache)?);
            }
            let joined = self.join_candidates(&group_ids, candidates);
            if joined.is_empty() {
                debug!(index, "OR-group has no free member");
                return Ok(Vec::new());
            }
            let next = self.narrow(running, joined);
            if next.is_empty() {
                return Ok(Vec::new());
            }
            running = Some(next);
        }

        debug!(resources = cache.len(), "selection solved");
        Ok(running.map(|r| self.finish(r, tag)).unwrap_or_default())
    }
}
