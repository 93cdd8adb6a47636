//! Incoming availability requests and their validation.
//!
//! [`QueryRequest`] is the loose wire shape (mode names are free strings);
//! [`QueryRequest::validate`] turns it into a typed [`AvailabilityQuery`] or
//! the first [`ValidationError`] found.

use std::collections::HashSet;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::engine::{Selection, ValidationError};
use crate::filter::{AncestorPropertyFilter, AncestorScope, PropertyFilter};
use crate::limits::*;
use crate::model::*;
use crate::source::MatchMode;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryRequest {
    pub from: NaiveDate,
    pub to: NaiveDate,
    #[serde(default)]
    pub resource_ids: Vec<ResourceId>,
    #[serde(default)]
    pub or_groups: Vec<Vec<ResourceId>>,
    #[serde(default)]
    pub property_filter: Option<PropertyFilter>,
    #[serde(default)]
    pub ancestors: Option<AncestorOptions>,
    #[serde(default)]
    pub ancestor_property_filters: Vec<AncestorFilterRequest>,
    #[serde(default)]
    pub slot_duration_minutes: Option<i64>,
    #[serde(default)]
    pub include_partial_tail: bool,
    #[serde(default)]
    pub explain: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AncestorOptions {
    /// `per_group` or `global`.
    #[serde(default = "default_ancestor_mode")]
    pub mode: String,
    /// Restrict the walk to these relation types; all types when absent.
    #[serde(default)]
    pub relation_types: Option<Vec<RelationType>>,
}

fn default_ancestor_mode() -> String {
    "per_group".into()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AncestorFilterRequest {
    pub resource_type_id: ResourceTypeId,
    pub property_ids: Vec<PropertyId>,
    #[serde(default)]
    pub include_descendants: bool,
    #[serde(default = "default_match_mode")]
    pub match_mode: String,
    #[serde(default = "default_scope")]
    pub scope: String,
    #[serde(default)]
    pub match_all_ancestors: bool,
}

fn default_match_mode() -> String {
    "or".into()
}

fn default_scope() -> String {
    "any_ancestor".into()
}

/// How ancestor closures join the computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AncestorMode {
    /// Each OR-group candidate brings only its own ancestors.
    PerGroup,
    /// One closure over every selected resource joins the required set.
    Global,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AncestorExpansion {
    pub mode: AncestorMode,
    pub relation_types: Option<Vec<RelationType>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slicing {
    pub duration_ms: Ms,
    pub include_partial_tail: bool,
}

/// A request that passed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvailabilityQuery {
    pub period: DatePeriod,
    pub selection: Selection,
    pub property_filter: Option<PropertyFilter>,
    pub ancestors: Option<AncestorExpansion>,
    pub ancestor_filters: Vec<AncestorPropertyFilter>,
    pub slicing: Option<Slicing>,
    pub explain: bool,
}

impl AvailabilityQuery {
    /// Whether the ancestor graph has to be loaded.
    pub fn needs_graph(&self) -> bool {
        self.ancestors.is_some() || !self.ancestor_filters.is_empty()
    }
}

fn parse_ancestor_mode(s: &str) -> Result<AncestorMode, ValidationError> {
    match s {
        "per_group" | "perGroup" => Ok(AncestorMode::PerGroup),
        "global" => Ok(AncestorMode::Global),
        other => Err(ValidationError::UnknownAncestorMode(other.to_string())),
    }
}

fn parse_match_mode(s: &str) -> Result<MatchMode, ValidationError> {
    match s {
        "or" => Ok(MatchMode::Or),
        "and" => Ok(MatchMode::And),
        other => Err(ValidationError::UnknownMatchMode(other.to_string())),
    }
}

fn parse_scope(s: &str) -> Result<AncestorScope, ValidationError> {
    match s {
        "any_ancestor" | "anyAncestor" => Ok(AncestorScope::AnyAncestor),
        "direct_parent" | "directParent" => Ok(AncestorScope::DirectParent),
        "nearest_of_type" | "nearestOfType" => Ok(AncestorScope::NearestOfType),
        other => Err(ValidationError::UnknownScope(other.to_string())),
    }
}

fn check_ids(ids: &[ResourceId]) -> Result<(), ValidationError> {
    match ids.iter().find(|id| **id <= 0) {
        Some(&bad) => Err(ValidationError::NonPositiveId(bad)),
        None => Ok(()),
    }
}

/// Drop repeats, keeping first occurrences in order.
fn dedup(ids: &[ResourceId]) -> Vec<ResourceId> {
    let mut seen = HashSet::new();
    ids.iter().copied().filter(|id| seen.insert(*id)).collect()
}

fn check_property_ids(ids: &[PropertyId]) -> Result<(), ValidationError> {
    if ids.is_empty() {
        return Err(ValidationError::EmptyPropertyFilter);
    }
    if ids.len() > MAX_PROPERTY_IDS {
        return Err(ValidationError::TooManyPropertyIds {
            count: ids.len(),
            max: MAX_PROPERTY_IDS,
        });
    }
    Ok(())
}

impl QueryRequest {
    /// A bare request over `from..=to` for `resource_ids`.
    pub fn new(from: NaiveDate, to: NaiveDate, resource_ids: Vec<ResourceId>) -> Self {
        Self {
            from,
            to,
            resource_ids,
            or_groups: Vec::new(),
            property_filter: None,
            ancestors: None,
            ancestor_property_filters: Vec::new(),
            slot_duration_minutes: None,
            include_partial_tail: false,
            explain: false,
        }
    }

    pub fn validate(&self) -> Result<AvailabilityQuery, ValidationError> {
        let period = DatePeriod::new(self.from, self.to)?;
        if period.len_days() > MAX_PERIOD_DAYS {
            return Err(ValidationError::PeriodTooLong {
                days: period.len_days(),
                max: MAX_PERIOD_DAYS,
            });
        }

        if self.resource_ids.is_empty() && self.or_groups.is_empty() {
            return Err(ValidationError::NoResources);
        }
        if self.resource_ids.len() > MAX_RESOURCE_IDS {
            return Err(ValidationError::TooManyResources {
                count: self.resource_ids.len(),
                max: MAX_RESOURCE_IDS,
            });
        }
        check_ids(&self.resource_ids)?;

        if self.or_groups.len() > MAX_OR_GROUPS {
            return Err(ValidationError::TooManyOrGroups {
                count: self.or_groups.len(),
                max: MAX_OR_GROUPS,
            });
        }
        let mut or_groups = Vec::with_capacity(self.or_groups.len());
        for (index, group) in self.or_groups.iter().enumerate() {
            if group.is_empty() {
                return Err(ValidationError::EmptyOrGroup { index });
            }
            if group.len() > MAX_OR_GROUP_SIZE {
                return Err(ValidationError::OrGroupTooLarge {
                    index,
                    count: group.len(),
                    max: MAX_OR_GROUP_SIZE,
                });
            }
            check_ids(group)?;
            or_groups.push(dedup(group));
        }

        if let Some(filter) = &self.property_filter {
            check_property_ids(&filter.property_ids)?;
        }

        let ancestors = match &self.ancestors {
            Some(opts) => Some(AncestorExpansion {
                mode: parse_ancestor_mode(&opts.mode)?,
                relation_types: opts.relation_types.clone(),
            }),
            None => None,
        };

        if self.ancestor_property_filters.len() > MAX_ANCESTOR_FILTERS {
            return Err(ValidationError::TooManyAncestorFilters {
                count: self.ancestor_property_filters.len(),
                max: MAX_ANCESTOR_FILTERS,
            });
        }
        let ancestor_filters = self
            .ancestor_property_filters
            .iter()
            .map(|f| {
                check_property_ids(&f.property_ids)?;
                Ok(AncestorPropertyFilter {
                    resource_type_id: f.resource_type_id,
                    property_ids: f.property_ids.clone(),
                    include_descendants: f.include_descendants,
                    match_mode: parse_match_mode(&f.match_mode)?,
                    scope: parse_scope(&f.scope)?,
                    match_all_ancestors: f.match_all_ancestors,
                })
            })
            .collect::<Result<Vec<_>, ValidationError>>()?;

        let slicing = match self.slot_duration_minutes {
            Some(minutes) if !(MIN_SLOT_DURATION_MINUTES..=MAX_SLOT_DURATION_MINUTES).contains(&minutes) => {
                return Err(ValidationError::InvalidSlotDuration {
                    got: minutes,
                    min: MIN_SLOT_DURATION_MINUTES,
                    max: MAX_SLOT_DURATION_MINUTES,
                });
            }
            Some(minutes) => Some(Slicing {
                duration_ms: minutes * MINUTE_MS,
                include_partial_tail: self.include_partial_tail,
            }),
            None => None,
        };

        Ok(AvailabilityQuery {
            period,
            selection: Selection::new(dedup(&self.resource_ids), or_groups),
            property_filter: self.property_filter.clone(),
            ancestors,
            ancestor_filters,
            slicing,
            explain: self.explain,
        })
    }
}
