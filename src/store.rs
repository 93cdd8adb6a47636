use std::collections::{HashMap, HashSet, VecDeque};

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::engine::EngineError;
use crate::model::*;
use crate::source::{DataSource, MatchMode};

/// Link between a resource and a property node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceProperty {
    pub resource_id: ResourceId,
    pub property_id: PropertyId,
}

/// Serializable snapshot of everything an [`InMemoryStore`] holds.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreFixture {
    pub resources: Vec<Resource>,
    pub rules: Vec<SchedulingRule>,
    pub busy_events: Vec<BusyEvent>,
    pub relations: Vec<ResourceRelation>,
    pub properties: Vec<PropertyNode>,
    pub resource_properties: Vec<ResourceProperty>,
}

/// A [`DataSource`] held entirely in memory. Safe to share between requests.
pub struct InMemoryStore {
    resources: DashMap<ResourceId, Resource>,
    rules: DashMap<RuleId, SchedulingRule>,
    busy: DashMap<EventId, BusyEvent>,
    /// child → parent edges
    relations: DashMap<ResourceId, Vec<ResourceRelation>>,
    /// Parent → children index for subtree expansion.
    property_children: DashMap<PropertyId, Vec<PropertyId>>,
    resource_properties: DashMap<ResourceId, HashSet<PropertyId>>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            resources: DashMap::new(),
            rules: DashMap::new(),
            busy: DashMap::new(),
            relations: DashMap::new(),
            property_children: DashMap::new(),
            resource_properties: DashMap::new(),
        }
    }

    pub fn from_fixture(fixture: StoreFixture) -> Self {
        let store = Self::new();
        for r in fixture.resources {
            store.insert_resource(r);
        }
        for r in fixture.rules {
            store.insert_rule(r);
        }
        for e in fixture.busy_events {
            store.insert_busy_event(e);
        }
        for rel in fixture.relations {
            store.insert_relation(rel);
        }
        for node in fixture.properties {
            store.insert_property(node);
        }
        for link in fixture.resource_properties {
            store.tag_resource(link.resource_id, link.property_id);
        }
        store
    }

    // ── Loading ──────────────────────────────────────────────

    pub fn resource_count(&self) -> usize {
        self.resources.len()
    }

    pub fn insert_resource(&self, resource: Resource) {
        self.resources.insert(resource.id, resource);
    }

    pub fn insert_rule(&self, rule: SchedulingRule) {
        self.rules.insert(rule.id, rule);
    }

    pub fn insert_busy_event(&self, event: BusyEvent) {
        self.busy.insert(event.id, event);
    }

    pub fn insert_relation(&self, relation: ResourceRelation) {
        self.relations.entry(relation.child_id).or_default().push(relation);
    }

    pub fn insert_property(&self, node: PropertyNode) {
        if let Some(parent) = node.parent_id {
            self.property_children.entry(parent).or_default().push(node.id);
        }
    }

    pub fn tag_resource(&self, resource_id: ResourceId, property_id: PropertyId) {
        self.resource_properties
            .entry(resource_id)
            .or_default()
            .insert(property_id);
    }
}

/// Whether a rule's dates can fall inside `period` at all.
fn rule_may_occur(rule: &SchedulingRule, period: &DatePeriod) -> bool {
    match rule.kind {
        RuleKind::SingleDate => rule.date.is_some_and(|d| period.contains(d)),
        _ => period.clip(rule.from, rule.to).is_some(),
    }
}

#[async_trait]
impl DataSource for InMemoryStore {
    async fn rules(&self, resource_ids: &[ResourceId], period: &DatePeriod) -> Result<Vec<SchedulingRule>, EngineError> {
        let wanted: HashSet<ResourceId> = resource_ids.iter().copied().collect();
        let mut rules: Vec<SchedulingRule> = self
            .rules
            .iter()
            .filter(|e| e.resource_ids.iter().any(|r| wanted.contains(r)) && rule_may_occur(e.value(), period))
            .map(|e| e.value().clone())
            .collect();
        rules.sort_by_key(|r| r.id);
        Ok(rules)
    }

    async fn busy_events(&self, resource_ids: &[ResourceId], window: &Span) -> Result<Vec<BusyEvent>, EngineError> {
        let wanted: HashSet<ResourceId> = resource_ids.iter().copied().collect();
        let mut events: Vec<BusyEvent> = self
            .busy
            .iter()
            .filter(|e| e.resource_ids.iter().any(|r| wanted.contains(r)) && e.span().overlaps(window))
            .map(|e| e.value().clone())
            .collect();
        events.sort_by_key(|e| (e.start(), e.id));
        Ok(events)
    }

    async fn capacities(&self, resource_ids: &[ResourceId]) -> Result<HashMap<ResourceId, u32>, EngineError> {
        Ok(resource_ids
            .iter()
            .filter_map(|id| self.resources.get(id).map(|r| (*id, r.capacity)))
            .collect())
    }

    async fn property_descendants(&self, property_id: PropertyId) -> Result<Vec<PropertyId>, EngineError> {
        let mut seen = HashSet::from([property_id]);
        let mut out = vec![property_id];
        let mut queue = VecDeque::from([property_id]);
        while let Some(node) = queue.pop_front() {
            if let Some(children) = self.property_children.get(&node) {
                for &child in children.iter() {
                    if seen.insert(child) {
                        out.push(child);
                        queue.push_back(child);
                    }
                }
            }
        }
        Ok(out)
    }

    async fn resources_with_properties(
        &self,
        property_ids: &[PropertyId],
        mode: MatchMode,
    ) -> Result<HashSet<ResourceId>, EngineError> {
        if property_ids.is_empty() {
            return Ok(HashSet::new());
        }
        Ok(self
            .resource_properties
            .iter()
            .filter(|e| match mode {
                MatchMode::Or => property_ids.iter().any(|p| e.contains(p)),
                MatchMode::And => property_ids.iter().all(|p| e.contains(p)),
            })
            .map(|e| *e.key())
            .collect())
    }

    async fn relations(
        &self,
        child_ids: &[ResourceId],
        relation_types: Option<&[RelationType]>,
    ) -> Result<Vec<ResourceRelation>, EngineError> {
        let mut out = Vec::new();
        for child in child_ids {
            if let Some(edges) = self.relations.get(child) {
                out.extend(
                    edges
                        .iter()
                        .filter(|r| relation_types.is_none_or(|types| types.contains(&r.relation_type)))
                        .copied(),
                );
            }
        }
        Ok(out)
    }

    async fn resource_types(&self, resource_ids: &[ResourceId]) -> Result<HashMap<ResourceId, ResourceTypeId>, EngineError> {
        Ok(resource_ids
            .iter()
            .filter_map(|id| self.resources.get(id).map(|r| (*id, r.type_id)))
            .collect())
    }
}
