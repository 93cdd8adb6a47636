use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::engine::EngineError;
use crate::model::*;

/// How several property ids combine when resolving resources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMode {
    /// Resource carries at least one of the ids.
    Or,
    /// Resource carries every id.
    And,
}

/// Everything the planner reads. Implementations own storage; the planner
/// only ever reads through these calls, each of which may suspend.
#[async_trait]
pub trait DataSource: Send + Sync {
    /// Rules bound to any of `resource_ids` that may produce occurrences in `period`.
    async fn rules(&self, resource_ids: &[ResourceId], period: &DatePeriod) -> Result<Vec<SchedulingRule>, EngineError>;

    /// Busy events for any of `resource_ids` overlapping `window`.
    async fn busy_events(&self, resource_ids: &[ResourceId], window: &Span) -> Result<Vec<BusyEvent>, EngineError>;

    /// Capacity overrides; absent resources have capacity 1.
    async fn capacities(&self, resource_ids: &[ResourceId]) -> Result<HashMap<ResourceId, u32>, EngineError>;

    /// `property_id` and every node below it.
    async fn property_descendants(&self, property_id: PropertyId) -> Result<Vec<PropertyId>, EngineError>;

    /// Resources tagged with the given property ids, combined per `mode`.
    async fn resources_with_properties(
        &self,
        property_ids: &[PropertyId],
        mode: MatchMode,
    ) -> Result<HashSet<ResourceId>, EngineError>;

    /// Parent edges of `child_ids`, optionally restricted to some relation types.
    async fn relations(
        &self,
        child_ids: &[ResourceId],
        relation_types: Option<&[RelationType]>,
    ) -> Result<Vec<ResourceRelation>, EngineError>;

    /// Type id of each known resource.
    async fn resource_types(&self, resource_ids: &[ResourceId]) -> Result<HashMap<ResourceId, ResourceTypeId>, EngineError>;
}
