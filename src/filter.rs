//! Tag-based resource filters.
//!
//! Plain property filters narrow the selection directly. Ancestor-property
//! filters keep a resource only when its ancestors of a given type carry the
//! requested properties.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::engine::EngineError;
use crate::graph::AncestorGraph;
use crate::model::*;
use crate::source::{DataSource, MatchMode};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyFilter {
    pub property_ids: Vec<PropertyId>,
    #[serde(default)]
    pub include_descendants: bool,
}

/// Which ancestors are eligible for an ancestor-property check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AncestorScope {
    AnyAncestor,
    DirectParent,
    NearestOfType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AncestorPropertyFilter {
    /// Only ancestors of this type are considered.
    pub resource_type_id: ResourceTypeId,
    pub property_ids: Vec<PropertyId>,
    pub include_descendants: bool,
    pub match_mode: MatchMode,
    pub scope: AncestorScope,
    /// Require every eligible ancestor to match instead of at least one.
    pub match_all_ancestors: bool,
}

/// A filter paired with the resources that satisfy its property condition.
#[derive(Debug, Clone)]
pub struct ResolvedAncestorFilter {
    pub filter: AncestorPropertyFilter,
    pub matching: HashSet<ResourceId>,
}

/// Resources carrying `property_id` (or, optionally, any node in its subtree).
async fn tagged_with<S>(source: &S, property_id: PropertyId, include_descendants: bool) -> Result<HashSet<ResourceId>, EngineError>
where
    S: DataSource + ?Sized,
{
    let ids = if include_descendants {
        source.property_descendants(property_id).await?
    } else {
        vec![property_id]
    };
    source.resources_with_properties(&ids, MatchMode::Or).await
}

/// Resources matching a plain property filter.
///
/// Several ids without descendant expansion go through a single AND lookup;
/// otherwise each id is resolved on its own (subtree OR) and the per-id sets
/// are intersected.
pub async fn resolve_property_filter<S>(source: &S, filter: &PropertyFilter) -> Result<HashSet<ResourceId>, EngineError>
where
    S: DataSource + ?Sized,
{
    if filter.property_ids.len() > 1 && !filter.include_descendants {
        return source
            .resources_with_properties(&filter.property_ids, MatchMode::And)
            .await;
    }

    let mut acc: Option<HashSet<ResourceId>> = None;
    for &pid in &filter.property_ids {
        let matching = tagged_with(source, pid, filter.include_descendants).await?;
        let next = match acc {
            Some(current) => current.intersection(&matching).copied().collect(),
            None => matching,
        };
        if next.is_empty() {
            return Ok(next);
        }
        acc = Some(next);
    }
    Ok(acc.unwrap_or_default())
}

/// Resources satisfying the property half of an ancestor-property filter.
pub async fn resolve_ancestor_filter<S>(source: &S, filter: &AncestorPropertyFilter) -> Result<ResolvedAncestorFilter, EngineError>
where
    S: DataSource + ?Sized,
{
    let mut acc: Option<HashSet<ResourceId>> = None;
    for &pid in &filter.property_ids {
        let matching = tagged_with(source, pid, filter.include_descendants).await?;
        acc = Some(match (acc, filter.match_mode) {
            (None, _) => matching,
            (Some(mut current), MatchMode::Or) => {
                current.extend(matching);
                current
            }
            (Some(current), MatchMode::And) => current.intersection(&matching).copied().collect(),
        });
    }
    Ok(ResolvedAncestorFilter {
        filter: filter.clone(),
        matching: acc.unwrap_or_default(),
    })
}

/// Ancestors of `id` the filter looks at: in scope and of the filter's type.
pub fn eligible_ancestors(graph: &mut AncestorGraph, id: ResourceId, filter: &AncestorPropertyFilter) -> Vec<ResourceId> {
    let type_id = filter.resource_type_id;
    let mut eligible: Vec<ResourceId> = match filter.scope {
        AncestorScope::AnyAncestor => {
            let all: Vec<ResourceId> = graph.ancestors(id).iter().copied().collect();
            all.into_iter().filter(|a| graph.type_of(*a) == Some(type_id)).collect()
        }
        AncestorScope::DirectParent => graph
            .direct_parents(id)
            .iter()
            .copied()
            .filter(|p| graph.type_of(*p) == Some(type_id))
            .collect(),
        AncestorScope::NearestOfType => graph.nearest_of_type(id, type_id),
    };
    eligible.sort_unstable();
    eligible
}

impl ResolvedAncestorFilter {
    /// Zero eligible ancestors never passes.
    pub fn passes(&self, graph: &mut AncestorGraph, id: ResourceId) -> bool {
        let eligible = eligible_ancestors(graph, id, &self.filter);
        if eligible.is_empty() {
            return false;
        }
        if self.filter.match_all_ancestors {
            eligible.iter().all(|a| self.matching.contains(a))
        } else {
            eligible.iter().any(|a| self.matching.contains(a))
        }
    }
}

/// Keep the ids that pass every filter, preserving order.
pub fn retain_passing(graph: &mut AncestorGraph, filters: &[ResolvedAncestorFilter], ids: &[ResourceId]) -> Vec<ResourceId> {
    ids.iter()
        .copied()
        .filter(|&id| filters.iter().all(|f| f.passes(graph, id)))
        .collect()
}
