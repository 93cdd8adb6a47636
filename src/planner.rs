//! Request pipeline: validate, filter, expand ancestors, fetch, solve, slice,
//! explain.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, info_span, Instrument};
use ulid::Ulid;

use crate::engine::{AvailabilityInputs, Engine, EngineError, ResourceCache, Selection};
use crate::explain::{explain_empty, Explanation};
use crate::filter::{resolve_ancestor_filter, resolve_property_filter, retain_passing};
use crate::graph::AncestorGraph;
use crate::model::*;
use crate::observability;
use crate::query::{AncestorMode, AvailabilityQuery, QueryRequest, Slicing};
use crate::source::DataSource;

/// Result of one computation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Availability {
    pub request_id: Ulid,
    pub slots: Vec<Slot>,
    /// At most one entry, present only for empty results with `explain` set.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub explanations: Vec<Explanation>,
}

/// An OR-group member together with everything above it in the hierarchy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub resource_id: ResourceId,
    /// The candidate first, then its ancestors in id order.
    pub with_ancestors: Vec<ResourceId>,
}

/// The concrete solve a request reduces to once filters and ancestors are
/// resolved. Output slots are tagged with `tag` either way.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SolvePlan {
    /// One ordinary solve over `selection`.
    Joint {
        selection: Selection,
        tag: BTreeSet<ResourceId>,
    },
    /// `required` solved once; each candidate solved with its own ancestors and
    /// the candidates of a group unioned.
    PerCandidate {
        required: Vec<ResourceId>,
        groups: Vec<Vec<Candidate>>,
        tag: BTreeSet<ResourceId>,
    },
}

impl SolvePlan {
    /// Every resource whose rules and events the solve reads.
    pub fn involved(&self) -> BTreeSet<ResourceId> {
        match self {
            SolvePlan::Joint { selection, .. } => selection.resource_ids(),
            SolvePlan::PerCandidate { required, groups, .. } => required
                .iter()
                .copied()
                .chain(groups.iter().flatten().flat_map(|c| c.with_ancestors.iter().copied()))
                .collect(),
        }
    }

    /// Ids that must each be free, and per group, what each alternative needs.
    pub fn demands(&self) -> (Vec<ResourceId>, Vec<Vec<Vec<ResourceId>>>) {
        match self {
            SolvePlan::Joint { selection, .. } => (
                selection.required.clone(),
                selection
                    .or_groups
                    .iter()
                    .map(|g| g.iter().map(|id| vec![*id]).collect())
                    .collect(),
            ),
            SolvePlan::PerCandidate { required, groups, .. } => (
                required.clone(),
                groups
                    .iter()
                    .map(|g| g.iter().map(|c| c.with_ancestors.clone()).collect())
                    .collect(),
            ),
        }
    }

    pub fn run(&self, engine: &Engine, period: &DatePeriod, inputs: &AvailabilityInputs) -> Result<Vec<Slot>, EngineError> {
        match self {
            SolvePlan::Joint { selection, tag } => engine.solve(selection, period, inputs, tag),
            SolvePlan::PerCandidate { required, groups, tag } => {
                engine.check_rule_kinds(self.involved(), inputs)?;
                let mut cache = ResourceCache::new();

                let mut running = engine.intersect_resources(required, period, inputs, &mut cache)?;
                if running.as_ref().is_some_and(Vec::is_empty) {
                    return Ok(Vec::new());
                }

                for group in groups {
                    let group_ids: BTreeSet<ResourceId> = group.iter().map(|c| c.resource_id).collect();
                    let mut results = Vec::with_capacity(group.len());
                    for candidate in group {
                        let free = engine.intersect_resources(&candidate.with_ancestors, period, inputs, &mut cache)?;
                        results.push(free.unwrap_or_default());
                    }
                    let joined = engine.join_candidates(&group_ids, results);
                    if joined.is_empty() {
                        return Ok(Vec::new());
                    }
                    let next = engine.narrow(running, joined);
                    if next.is_empty() {
                        return Ok(Vec::new());
                    }
                    running = Some(next);
                }

                Ok(running.map(|r| engine.finish(r, tag)).unwrap_or_default())
            }
        }
    }
}

/// Cut every slot into consecutive pieces of `slicing.duration_ms`.
///
/// A shorter remainder is kept as a final piece only with
/// `include_partial_tail`.
pub fn slice(slots: &[Slot], slicing: Slicing) -> Vec<Slot> {
    let step = slicing.duration_ms;
    let mut out = Vec::new();
    for slot in slots {
        let mut t = slot.start;
        while t + step <= slot.end {
            out.push(Slot::new(Span::new(t, t + step), slot.resource_ids.clone()));
            t += step;
        }
        if slicing.include_partial_tail && t < slot.end {
            out.push(Slot::new(Span::new(t, slot.end), slot.resource_ids.clone()));
        }
    }
    out
}

/// `ids` followed by the closure members not already among them.
fn with_closure(ids: &[ResourceId], closure: BTreeSet<ResourceId>) -> Vec<ResourceId> {
    let mut seen: HashSet<ResourceId> = ids.iter().copied().collect();
    let mut out = ids.to_vec();
    out.extend(closure.into_iter().filter(|a| seen.insert(*a)));
    out
}

pub struct Planner<S: ?Sized> {
    source: Arc<S>,
    engine: Engine,
}

impl<S: DataSource + ?Sized> Planner<S> {
    pub fn new(source: Arc<S>, engine: Engine) -> Self {
        Self { source, engine }
    }

    /// Free time for `request`, possibly explained when empty.
    pub async fn compute(&self, request: QueryRequest) -> Result<Availability, EngineError> {
        let request_id = Ulid::new();
        let span = info_span!("compute", %request_id);
        let started = Instant::now();
        let result = self.run(request_id, &request).instrument(span).await;
        observability::record_computation(&result, started.elapsed());
        result
    }

    async fn run(&self, request_id: Ulid, request: &QueryRequest) -> Result<Availability, EngineError> {
        let query = request.validate()?;
        info!(
            from = %query.period.from(),
            to = %query.period.to(),
            required = query.selection.required.len(),
            or_groups = query.selection.or_groups.len(),
            "computing availability"
        );

        let empty = |stage: &str| Availability {
            request_id,
            slots: Vec::new(),
            explanations: if query.explain {
                vec![Explanation::empty_selection(stage)]
            } else {
                Vec::new()
            },
        };

        let mut selection = query.selection.clone();
        if let Some(filter) = &query.property_filter {
            let matching = resolve_property_filter(&*self.source, filter).await?;
            match selection.retain(|id| matching.contains(&id)) {
                Some(narrowed) => selection = narrowed,
                None => {
                    debug!("property filter left no resources");
                    return Ok(empty("property filter"));
                }
            }
        }

        let mut graph = if query.needs_graph() {
            let seeds: Vec<ResourceId> = selection.resource_ids().into_iter().collect();
            let relation_types = query.ancestors.as_ref().and_then(|a| a.relation_types.as_deref());
            Some(AncestorGraph::load(&*self.source, &seeds, relation_types).await?)
        } else {
            None
        };

        if let Some(graph) = graph.as_mut()
            && !query.ancestor_filters.is_empty()
        {
            let resolved = futures::future::try_join_all(
                query
                    .ancestor_filters
                    .iter()
                    .map(|f| resolve_ancestor_filter(&*self.source, f)),
            )
            .await?;
            let ids: Vec<ResourceId> = selection.resource_ids().into_iter().collect();
            let passing: HashSet<ResourceId> = retain_passing(graph, &resolved, &ids).into_iter().collect();
            match selection.retain(|id| passing.contains(&id)) {
                Some(narrowed) => selection = narrowed,
                None => {
                    debug!("ancestor property filters left no resources");
                    return Ok(empty("ancestor property filters"));
                }
            }
        }

        let plan = self.plan(&query, selection, graph.as_mut());
        let ids: Vec<ResourceId> = plan.involved().into_iter().collect();
        debug!(resources = ids.len(), "fetching inputs");

        let window = query.period.window();
        let (rules, busy, capacities) = futures::try_join!(
            self.source.rules(&ids, &query.period),
            self.source.busy_events(&ids, &window),
            self.source.capacities(&ids),
        )?;
        let inputs = AvailabilityInputs::new(rules, &busy, capacities);

        let free = plan.run(&self.engine, &query.period, &inputs)?;
        let slots = match query.slicing {
            Some(slicing) => slice(&free, slicing),
            None => free.clone(),
        };

        let mut explanations = Vec::new();
        if query.explain && slots.is_empty() {
            let explanation = explain_empty(&self.engine, &plan, &query.period, &inputs, !free.is_empty())?;
            debug!(reason = explanation.reason.label(), "empty result explained");
            explanations.push(explanation);
        }

        info!(slots = slots.len(), "availability computed");
        Ok(Availability {
            request_id,
            slots,
            explanations,
        })
    }

    fn plan(&self, query: &AvailabilityQuery, selection: Selection, graph: Option<&mut AncestorGraph>) -> SolvePlan {
        let tag = selection.resource_ids();
        let (Some(expansion), Some(graph)) = (&query.ancestors, graph) else {
            return SolvePlan::Joint { selection, tag };
        };

        match expansion.mode {
            AncestorMode::Global => {
                let all: Vec<ResourceId> = tag.iter().copied().collect();
                let closure = graph.closure(&all);
                let required = with_closure(&selection.required, closure);
                SolvePlan::Joint {
                    selection: Selection::new(required, selection.or_groups),
                    tag,
                }
            }
            AncestorMode::PerGroup => {
                let closure = graph.closure(&selection.required);
                let required = with_closure(&selection.required, closure);
                let mut groups = Vec::with_capacity(selection.or_groups.len());
                for group in &selection.or_groups {
                    let mut candidates = Vec::with_capacity(group.len());
                    for &resource_id in group {
                        let ancestors = graph.closure(&[resource_id]);
                        candidates.push(Candidate {
                            resource_id,
                            with_ancestors: with_closure(&[resource_id], ancestors),
                        });
                    }
                    groups.push(candidates);
                }
                SolvePlan::PerCandidate { required, groups, tag }
            }
        }
    }
}
