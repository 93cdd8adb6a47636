//! Resource hierarchy: parent edges, memoized ancestor closures, and
//! type-scoped ancestor lookups.
//!
//! The graph is loaded once per request (one relation fetch per BFS level) and
//! is immutable afterwards; only the closure cache grows.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use tracing::debug;

use crate::engine::EngineError;
use crate::model::*;
use crate::source::DataSource;

#[derive(Debug, Clone, Default)]
pub struct AncestorGraph {
    /// child → direct parents (deduplicated, in discovery order)
    parents: HashMap<ResourceId, Vec<ResourceId>>,
    types: HashMap<ResourceId, ResourceTypeId>,
    /// Lazily filled transitive closures.
    closures: HashMap<ResourceId, HashSet<ResourceId>>,
}

impl AncestorGraph {
    pub fn new(
        relations: impl IntoIterator<Item = ResourceRelation>,
        types: HashMap<ResourceId, ResourceTypeId>,
    ) -> Self {
        let mut parents: HashMap<ResourceId, Vec<ResourceId>> = HashMap::new();
        for rel in relations {
            let entry = parents.entry(rel.child_id).or_default();
            // Several relation types may link the same pair.
            if !entry.contains(&rel.parent_id) {
                entry.push(rel.parent_id);
            }
        }
        Self {
            parents,
            types,
            closures: HashMap::new(),
        }
    }

    /// Fetch every ancestor edge reachable from `seeds`, level by level.
    pub async fn load<S>(
        source: &S,
        seeds: &[ResourceId],
        relation_types: Option<&[RelationType]>,
    ) -> Result<Self, EngineError>
    where
        S: DataSource + ?Sized,
    {
        let mut known: HashSet<ResourceId> = seeds.iter().copied().collect();
        let mut frontier: Vec<ResourceId> = known.iter().copied().collect();
        frontier.sort_unstable();
        let mut relations = Vec::new();
        let mut levels = 0usize;

        while !frontier.is_empty() {
            levels += 1;
            let fetched = source.relations(&frontier, relation_types).await?;
            let mut next = Vec::new();
            for rel in &fetched {
                if known.insert(rel.parent_id) {
                    next.push(rel.parent_id);
                }
            }
            relations.extend(fetched);
            next.sort_unstable();
            frontier = next;
        }

        let mut ids: Vec<ResourceId> = known.into_iter().collect();
        ids.sort_unstable();
        let types = source.resource_types(&ids).await?;
        debug!(
            nodes = ids.len(),
            edges = relations.len(),
            levels,
            "ancestor graph loaded"
        );
        Ok(Self::new(relations, types))
    }

    pub fn direct_parents(&self, id: ResourceId) -> &[ResourceId] {
        self.parents.get(&id).map_or(&[], Vec::as_slice)
    }

    pub fn type_of(&self, id: ResourceId) -> Option<ResourceTypeId> {
        self.types.get(&id).copied()
    }

    /// Every transitive parent of `id`, computed once and cached.
    pub fn ancestors(&mut self, id: ResourceId) -> &HashSet<ResourceId> {
        if !self.closures.contains_key(&id) {
            let closure = self.walk_up(id);
            self.closures.insert(id, closure);
        }
        &self.closures[&id]
    }

    /// Union of the ancestor closures of `ids`.
    pub fn closure(&mut self, ids: &[ResourceId]) -> BTreeSet<ResourceId> {
        let mut all = BTreeSet::new();
        for &id in ids {
            all.extend(self.ancestors(id).iter().copied());
        }
        all
    }

    /// Iterative BFS; reuses any closure already cached for an intermediate node.
    fn walk_up(&self, id: ResourceId) -> HashSet<ResourceId> {
        let mut seen = HashSet::new();
        let mut queue: VecDeque<ResourceId> = self.direct_parents(id).iter().copied().collect();
        while let Some(p) = queue.pop_front() {
            // Guards against cycles in bad data.
            if p == id || !seen.insert(p) {
                continue;
            }
            if let Some(cached) = self.closures.get(&p) {
                seen.extend(cached.iter().copied().filter(|a| *a != id));
                continue;
            }
            queue.extend(self.direct_parents(p).iter().copied());
        }
        seen
    }

    /// Ancestors of type `type_id` at the nearest depth where any exist.
    ///
    /// Deeper levels are never searched once a level has a match.
    pub fn nearest_of_type(&self, id: ResourceId, type_id: ResourceTypeId) -> Vec<ResourceId> {
        let mut seen = HashSet::from([id]);
        let mut frontier = vec![id];
        while !frontier.is_empty() {
            let mut next = Vec::new();
            for node in frontier {
                for &p in self.direct_parents(node) {
                    if seen.insert(p) {
                        next.push(p);
                    }
                }
            }
            let mut hits: Vec<ResourceId> = next
                .iter()
                .copied()
                .filter(|p| self.type_of(*p) == Some(type_id))
                .collect();
            if !hits.is_empty() {
                hits.sort_unstable();
                return hits;
            }
            frontier = next;
        }
        Vec::new()
    }
}
