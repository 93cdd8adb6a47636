use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime, TimeZone, Utc};

use slotwise::engine::{Engine, EngineConfig, EngineError, ValidationError};
use slotwise::explain::EmptyReason;
use slotwise::filter::PropertyFilter;
use slotwise::model::*;
use slotwise::planner::{Availability, Planner};
use slotwise::query::{AncestorFilterRequest, AncestorOptions, QueryRequest};
use slotwise::source::{DataSource, MatchMode};
use slotwise::store::InMemoryStore;

const ROOM: ResourceTypeId = 1;
const FLOOR: ResourceTypeId = 2;
const BUILDING: ResourceTypeId = 3;

/// Mon, Tue, Wed
const MON_TUE_WED: u8 = 0b0000_1110;

fn date(s: &str) -> NaiveDate {
    s.parse().unwrap()
}

fn at(d: &str, h: u32, m: u32) -> Ms {
    instant(date(d), NaiveTime::from_hms_opt(h, m, 0).unwrap())
}

fn ids(v: &[ResourceId]) -> BTreeSet<ResourceId> {
    v.iter().copied().collect()
}

fn resource(store: &InMemoryStore, id: ResourceId, type_id: ResourceTypeId, capacity: u32) {
    store.insert_resource(Resource { id, type_id, capacity });
}

fn weekly(id: RuleId, mask: u8, from_h: u32, to_h: u32, resource_ids: Vec<ResourceId>) -> SchedulingRule {
    let mut rule = SchedulingRule::new(id, RuleKind::Weekly, TimeRange::hours(from_h, to_h).unwrap(), resource_ids);
    rule.weekday_mask = Some(mask);
    rule
}

fn single(id: RuleId, d: &str, from_h: u32, to_h: u32, resource_ids: Vec<ResourceId>) -> SchedulingRule {
    let mut rule = SchedulingRule::new(id, RuleKind::SingleDate, TimeRange::hours(from_h, to_h).unwrap(), resource_ids);
    rule.date = Some(date(d));
    rule
}

fn busy(id: EventId, d: &str, from: (u32, u32), to: (u32, u32), resource_ids: Vec<ResourceId>) -> BusyEvent {
    let day = date(d);
    let ts = |(h, m): (u32, u32)| Utc.from_utc_datetime(&day.and_hms_opt(h, m, 0).unwrap());
    BusyEvent::new(id, ts(from), ts(to), resource_ids).unwrap()
}

fn week(resource_ids: Vec<ResourceId>) -> QueryRequest {
    QueryRequest::new(date("2025-03-10"), date("2025-03-16"), resource_ids)
}

fn planner(store: InMemoryStore) -> Planner<InMemoryStore> {
    Planner::new(Arc::new(store), Engine::default())
}

fn spans(a: &Availability) -> Vec<(Ms, Ms)> {
    a.slots.iter().map(|s| (s.start, s.end)).collect()
}

fn reason(a: &Availability) -> EmptyReason {
    assert!(a.slots.is_empty());
    assert_eq!(a.explanations.len(), 1);
    a.explanations[0].reason
}

// ── Core scenarios ───────────────────────────────────────

#[tokio::test]
async fn weekly_rule_split_by_busy_hour() {
    let store = InMemoryStore::new();
    resource(&store, 1, ROOM, 1);
    resource(&store, 2, ROOM, 1);
    store.insert_rule(weekly(1, MON_TUE_WED, 14, 18, vec![1, 2]));
    store.insert_busy_event(busy(1, "2025-03-11", (15, 0), (16, 0), vec![1]));

    let out = planner(store).compute(week(vec![1, 2])).await.unwrap();
    assert_eq!(
        spans(&out),
        vec![
            (at("2025-03-10", 14, 0), at("2025-03-10", 18, 0)),
            (at("2025-03-11", 14, 0), at("2025-03-11", 15, 0)),
            (at("2025-03-11", 16, 0), at("2025-03-11", 18, 0)),
            (at("2025-03-12", 14, 0), at("2025-03-12", 18, 0)),
        ]
    );
    assert!(out.slots.iter().all(|s| s.resource_ids == ids(&[1, 2])));
    assert!(out.explanations.is_empty());
}

#[tokio::test]
async fn touching_busy_event_does_not_trim() {
    let store = InMemoryStore::new();
    resource(&store, 1, ROOM, 1);
    store.insert_rule(single(1, "2025-03-12", 9, 12, vec![1]));
    store.insert_busy_event(busy(1, "2025-03-12", (12, 0), (13, 0), vec![1]));

    let out = planner(store).compute(week(vec![1])).await.unwrap();
    assert_eq!(spans(&out), vec![(at("2025-03-12", 9, 0), at("2025-03-12", 12, 0))]);
}

#[tokio::test]
async fn capacity_two_blocks_only_full_occupancy() {
    let store = InMemoryStore::new();
    resource(&store, 1, ROOM, 2);
    store.insert_rule(single(1, "2025-03-12", 14, 16, vec![1]));
    store.insert_busy_event(busy(1, "2025-03-12", (14, 30), (15, 0), vec![1]));
    store.insert_busy_event(busy(2, "2025-03-12", (14, 45), (15, 15), vec![1]));

    let out = planner(store).compute(week(vec![1])).await.unwrap();
    assert_eq!(
        spans(&out),
        vec![
            (at("2025-03-12", 14, 0), at("2025-03-12", 14, 45)),
            (at("2025-03-12", 15, 0), at("2025-03-12", 16, 0)),
        ]
    );
}

#[tokio::test]
async fn unsupported_kind_restricted_vs_full() {
    let store = Arc::new(InMemoryStore::new());
    resource(&store, 1, ROOM, 1);
    let mut monthly = SchedulingRule::new(7, RuleKind::Monthly, TimeRange::hours(9, 17).unwrap(), vec![1]);
    monthly.day_of_month = Some(12);
    store.insert_rule(monthly);

    let restricted = Planner::new(store.clone(), Engine::new(EngineConfig::restricted()));
    let err = restricted.compute(week(vec![1])).await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::UnsupportedRuleKind { rule_id: 7, kind: RuleKind::Monthly }
    ));

    let full = Planner::new(store, Engine::new(EngineConfig::full()));
    let out = full.compute(week(vec![1])).await.unwrap();
    assert_eq!(spans(&out), vec![(at("2025-03-12", 9, 0), at("2025-03-12", 17, 0))]);
}

#[tokio::test]
async fn validation_errors_surface_immediately() {
    let mut request = week(vec![1]);
    request.to = date("2025-05-01");
    let err = planner(InMemoryStore::new()).compute(request).await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::Validation(ValidationError::PeriodTooLong { .. })
    ));
}

#[tokio::test]
async fn each_computation_gets_its_own_request_id() {
    let store = InMemoryStore::new();
    resource(&store, 1, ROOM, 1);
    let p = planner(store);
    let a = p.compute(week(vec![1])).await.unwrap();
    let b = p.compute(week(vec![1])).await.unwrap();
    assert_ne!(a.request_id, b.request_id);
}

// ── OR-groups and ancestors ──────────────────────────────

/// 1: 9–12 on Wednesday. Group {2, 3}: 2 is 9–12 but its parent 20 only
/// 9–10; 3 is 9–12 with no parents.
fn grouped_store() -> InMemoryStore {
    let store = InMemoryStore::new();
    for id in [1, 2, 3] {
        resource(&store, id, ROOM, 1);
    }
    resource(&store, 20, FLOOR, 1);
    store.insert_rule(single(1, "2025-03-12", 9, 12, vec![1, 2, 3]));
    store.insert_rule(single(2, "2025-03-12", 9, 10, vec![20]));
    store.insert_relation(ResourceRelation {
        parent_id: 20,
        child_id: 2,
        relation_type: 1,
    });
    store
}

fn grouped_request(mode: Option<&str>) -> QueryRequest {
    let mut request = week(vec![1]);
    request.or_groups = vec![vec![2, 3]];
    request.ancestors = mode.map(|m| AncestorOptions {
        mode: m.into(),
        relation_types: None,
    });
    request
}

#[tokio::test]
async fn or_group_union_tags_full_query_set() {
    let out = planner(grouped_store()).compute(grouped_request(None)).await.unwrap();
    assert_eq!(spans(&out), vec![(at("2025-03-12", 9, 0), at("2025-03-12", 12, 0))]);
    assert_eq!(out.slots[0].resource_ids, ids(&[1, 2, 3]));
}

#[tokio::test]
async fn per_group_candidate_only_pays_for_own_ancestors() {
    let out = planner(grouped_store())
        .compute(grouped_request(Some("per_group")))
        .await
        .unwrap();
    // Candidate 3 covers 10–12 even though candidate 2 is limited by its parent.
    assert_eq!(spans(&out), vec![(at("2025-03-12", 9, 0), at("2025-03-12", 12, 0))]);
    assert_eq!(out.slots[0].resource_ids, ids(&[1, 2, 3]));
}

#[tokio::test]
async fn global_mode_applies_every_ancestor_to_all() {
    let out = planner(grouped_store())
        .compute(grouped_request(Some("global")))
        .await
        .unwrap();
    assert_eq!(spans(&out), vec![(at("2025-03-12", 9, 0), at("2025-03-12", 10, 0))]);
    assert_eq!(out.slots[0].resource_ids, ids(&[1, 2, 3]));
}

#[tokio::test]
async fn required_ancestors_narrow_in_per_group_mode() {
    let store = grouped_store();
    store.insert_relation(ResourceRelation {
        parent_id: 20,
        child_id: 1,
        relation_type: 1,
    });
    let out = planner(store).compute(grouped_request(Some("per_group"))).await.unwrap();
    assert_eq!(spans(&out), vec![(at("2025-03-12", 9, 0), at("2025-03-12", 10, 0))]);
}

#[tokio::test]
async fn relation_types_limit_the_walk() {
    let store = grouped_store();
    let mut request = grouped_request(Some("global"));
    request.ancestors = Some(AncestorOptions {
        mode: "global".into(),
        relation_types: Some(vec![9]),
    });
    let out = planner(store).compute(request).await.unwrap();
    // Parent 20 hangs off relation type 1 only, so it is never reached.
    assert_eq!(spans(&out), vec![(at("2025-03-12", 9, 0), at("2025-03-12", 12, 0))]);
}

// ── Filters ──────────────────────────────────────────────

/// room 1 ← floor 10 ← building 100 (tagged 7); room 2 ← building 200 (tagged 7)
fn campus() -> InMemoryStore {
    let store = InMemoryStore::new();
    resource(&store, 1, ROOM, 1);
    resource(&store, 2, ROOM, 1);
    resource(&store, 10, FLOOR, 1);
    resource(&store, 100, BUILDING, 1);
    resource(&store, 200, BUILDING, 1);
    for (parent_id, child_id) in [(10, 1), (100, 10), (200, 2)] {
        store.insert_relation(ResourceRelation {
            parent_id,
            child_id,
            relation_type: 1,
        });
    }
    store.insert_property(PropertyNode { id: 7, parent_id: None });
    store.tag_resource(100, 7);
    store.tag_resource(200, 7);
    store.insert_rule(single(1, "2025-03-12", 9, 12, vec![1, 2]));
    store
}

fn building_filter(scope: &str) -> AncestorFilterRequest {
    AncestorFilterRequest {
        resource_type_id: BUILDING,
        property_ids: vec![7],
        include_descendants: false,
        match_mode: "or".into(),
        scope: scope.into(),
        match_all_ancestors: false,
    }
}

#[tokio::test]
async fn direct_parent_scope_rejects_grandparent_match() {
    let mut request = week(vec![1]);
    request.ancestor_property_filters = vec![building_filter("direct_parent")];
    request.explain = true;
    let out = planner(campus()).compute(request).await.unwrap();
    assert_eq!(reason(&out), EmptyReason::EmptySelection);
}

#[tokio::test]
async fn any_ancestor_scope_accepts_grandparent_match() {
    let mut request = week(vec![1]);
    request.ancestor_property_filters = vec![building_filter("any_ancestor")];
    let out = planner(campus()).compute(request).await.unwrap();
    assert_eq!(spans(&out), vec![(at("2025-03-12", 9, 0), at("2025-03-12", 12, 0))]);
}

#[tokio::test]
async fn ancestor_filter_drops_failing_group_member() {
    let mut request = week(vec![]);
    request.or_groups = vec![vec![1, 2]];
    request.ancestor_property_filters = vec![building_filter("direct_parent")];
    let out = planner(campus()).compute(request).await.unwrap();
    assert_eq!(out.slots.len(), 1);
    assert_eq!(out.slots[0].resource_ids, ids(&[2]));
}

#[tokio::test]
async fn property_filter_narrows_selection() {
    let store = campus();
    store.tag_resource(2, 7);
    let mut request = week(vec![1, 2]);
    request.property_filter = Some(PropertyFilter {
        property_ids: vec![7],
        include_descendants: false,
    });
    let out = planner(store).compute(request).await.unwrap();
    assert_eq!(out.slots[0].resource_ids, ids(&[2]));
}

#[tokio::test]
async fn property_filter_emptying_a_group_short_circuits() {
    let mut request = week(vec![]);
    request.or_groups = vec![vec![1, 2]];
    request.property_filter = Some(PropertyFilter {
        property_ids: vec![99],
        include_descendants: true,
    });
    request.explain = true;
    let out = planner(campus()).compute(request).await.unwrap();
    assert_eq!(reason(&out), EmptyReason::EmptySelection);
}

// ── Slicing ──────────────────────────────────────────────

#[tokio::test]
async fn slot_duration_slicing() {
    let store = Arc::new(InMemoryStore::new());
    resource(&store, 1, ROOM, 1);
    store.insert_rule(single(1, "2025-03-12", 14, 18, vec![1]));
    let p = Planner::new(store, Engine::default());

    let mut request = week(vec![1]);
    request.slot_duration_minutes = Some(90);
    let dropped = p.compute(request.clone()).await.unwrap();
    assert_eq!(
        spans(&dropped),
        vec![
            (at("2025-03-12", 14, 0), at("2025-03-12", 15, 30)),
            (at("2025-03-12", 15, 30), at("2025-03-12", 17, 0)),
        ]
    );

    request.include_partial_tail = true;
    let kept = p.compute(request).await.unwrap();
    assert_eq!(kept.slots.len(), 3);
    assert_eq!(
        (kept.slots[2].start, kept.slots[2].end),
        (at("2025-03-12", 17, 0), at("2025-03-12", 18, 0))
    );
}

#[tokio::test]
async fn slicing_that_empties_is_explained_as_partial() {
    let store = InMemoryStore::new();
    resource(&store, 1, ROOM, 1);
    store.insert_rule(single(1, "2025-03-12", 14, 15, vec![1]));
    let mut request = week(vec![1]);
    request.slot_duration_minutes = Some(120);
    request.explain = true;
    let out = planner(store).compute(request).await.unwrap();
    assert_eq!(reason(&out), EmptyReason::PartiallyBlocked);
}

// ── Explanations ─────────────────────────────────────────

#[tokio::test]
async fn explain_no_positive_rule() {
    let store = InMemoryStore::new();
    resource(&store, 1, ROOM, 1);
    resource(&store, 2, ROOM, 1);
    store.insert_rule(single(1, "2025-03-12", 9, 12, vec![1]));
    let mut request = week(vec![1, 2]);
    request.explain = true;
    let out = planner(store).compute(request).await.unwrap();
    assert_eq!(reason(&out), EmptyReason::NoPositiveRule);
    assert_eq!(out.explanations[0].resource_ids, vec![2]);
}

#[tokio::test]
async fn explain_fully_blocked_by_busy() {
    let store = InMemoryStore::new();
    resource(&store, 1, ROOM, 1);
    store.insert_rule(single(1, "2025-03-12", 9, 12, vec![1]));
    store.insert_busy_event(busy(1, "2025-03-12", (8, 0), (13, 0), vec![1]));
    let mut request = week(vec![1]);
    request.explain = true;
    let out = planner(store).compute(request).await.unwrap();
    assert_eq!(reason(&out), EmptyReason::FullyBlockedByBusy);
    assert_eq!(out.explanations[0].resource_ids, vec![1]);
}

#[tokio::test]
async fn explain_fully_blocked_by_negative_rule() {
    let store = InMemoryStore::new();
    resource(&store, 1, ROOM, 1);
    store.insert_rule(single(1, "2025-03-12", 9, 12, vec![1]));
    let mut exclude = single(2, "2025-03-12", 9, 12, vec![1]);
    exclude.is_exclude = true;
    store.insert_rule(exclude);
    let mut request = week(vec![1]);
    request.explain = true;
    let out = planner(store).compute(request).await.unwrap();
    assert_eq!(reason(&out), EmptyReason::FullyBlockedByNegativeRule);
}

#[tokio::test]
async fn explain_rules_that_never_coincide() {
    let store = InMemoryStore::new();
    resource(&store, 1, ROOM, 1);
    resource(&store, 2, ROOM, 1);
    store.insert_rule(single(1, "2025-03-12", 9, 10, vec![1]));
    store.insert_rule(single(2, "2025-03-12", 11, 12, vec![2]));
    let mut request = week(vec![1, 2]);
    request.explain = true;
    let out = planner(store).compute(request).await.unwrap();
    assert_eq!(reason(&out), EmptyReason::PartiallyBlocked);
    assert_eq!(out.explanations[0].resource_ids, vec![1, 2]);
}

#[tokio::test]
async fn explain_combined_blocks() {
    let store = InMemoryStore::new();
    resource(&store, 1, ROOM, 1);
    store.insert_rule(single(1, "2025-03-12", 9, 12, vec![1]));
    let mut exclude = single(2, "2025-03-12", 9, 10, vec![1]);
    exclude.is_exclude = true;
    store.insert_rule(exclude);
    store.insert_busy_event(busy(1, "2025-03-12", (10, 0), (12, 0), vec![1]));
    let mut request = week(vec![1]);
    request.explain = true;
    let out = planner(store).compute(request).await.unwrap();
    assert_eq!(reason(&out), EmptyReason::PartiallyBlocked);
}

#[tokio::test]
async fn no_explanation_unless_asked() {
    let store = InMemoryStore::new();
    resource(&store, 1, ROOM, 1);
    let out = planner(store).compute(week(vec![1])).await.unwrap();
    assert!(out.slots.is_empty());
    assert!(out.explanations.is_empty());
}

// ── Data source failures ─────────────────────────────────

/// Serves everything from a store but fails busy-event lookups.
struct FlakySource(InMemoryStore);

#[async_trait]
impl DataSource for FlakySource {
    async fn rules(&self, resource_ids: &[ResourceId], period: &DatePeriod) -> Result<Vec<SchedulingRule>, EngineError> {
        self.0.rules(resource_ids, period).await
    }

    async fn busy_events(&self, _: &[ResourceId], _: &Span) -> Result<Vec<BusyEvent>, EngineError> {
        Err(EngineError::Source("calendar backend unavailable".into()))
    }

    async fn capacities(&self, resource_ids: &[ResourceId]) -> Result<HashMap<ResourceId, u32>, EngineError> {
        self.0.capacities(resource_ids).await
    }

    async fn property_descendants(&self, property_id: PropertyId) -> Result<Vec<PropertyId>, EngineError> {
        self.0.property_descendants(property_id).await
    }

    async fn resources_with_properties(
        &self,
        property_ids: &[PropertyId],
        mode: MatchMode,
    ) -> Result<HashSet<ResourceId>, EngineError> {
        self.0.resources_with_properties(property_ids, mode).await
    }

    async fn relations(
        &self,
        child_ids: &[ResourceId],
        relation_types: Option<&[RelationType]>,
    ) -> Result<Vec<ResourceRelation>, EngineError> {
        self.0.relations(child_ids, relation_types).await
    }

    async fn resource_types(&self, resource_ids: &[ResourceId]) -> Result<HashMap<ResourceId, ResourceTypeId>, EngineError> {
        self.0.resource_types(resource_ids).await
    }
}

#[tokio::test]
async fn source_errors_propagate() {
    let store = InMemoryStore::new();
    resource(&store, 1, ROOM, 1);
    store.insert_rule(single(1, "2025-03-12", 9, 12, vec![1]));
    let source: Arc<dyn DataSource> = Arc::new(FlakySource(store));
    let p = Planner::new(source, Engine::default());
    let err = p.compute(week(vec![1])).await.unwrap_err();
    assert!(matches!(err, EngineError::Source(msg) if msg.contains("unavailable")));
}
