use chrono::{NaiveDate, NaiveTime};
use thiserror::Error;

use crate::model::{EventId, ResourceId, RuleId, RuleKind};

/// Caller-correctable problems with a request. Never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("period starts after it ends: {from} > {to}")]
    PeriodOrder { from: NaiveDate, to: NaiveDate },

    #[error("period spans {days} days; at most {max} allowed")]
    PeriodTooLong { days: i64, max: i64 },

    #[error("time range must have start before end: {start} >= {end}")]
    InvalidTimeRange { start: NaiveTime, end: NaiveTime },

    #[error("not a time of day: {0}")]
    InvalidTimeOfDay(String),

    #[error("busy event {id} must start before it ends")]
    InvalidBusyEvent { id: EventId },

    #[error("hour out of range: {0}")]
    HourOutOfRange(u32),

    #[error("no resources selected")]
    NoResources,

    #[error("too many resource ids: {count} (max {max})")]
    TooManyResources { count: usize, max: usize },

    #[error("resource id must be positive: {0}")]
    NonPositiveId(ResourceId),

    #[error("OR-group {index} is empty")]
    EmptyOrGroup { index: usize },

    #[error("too many OR-groups: {count} (max {max})")]
    TooManyOrGroups { count: usize, max: usize },

    #[error("OR-group {index} has {count} members (max {max})")]
    OrGroupTooLarge { index: usize, count: usize, max: usize },

    #[error("property filter needs at least one property id")]
    EmptyPropertyFilter,

    #[error("too many property ids: {count} (max {max})")]
    TooManyPropertyIds { count: usize, max: usize },

    #[error("too many ancestor property filters: {count} (max {max})")]
    TooManyAncestorFilters { count: usize, max: usize },

    #[error("unknown ancestor mode: {0}")]
    UnknownAncestorMode(String),

    #[error("unknown match mode: {0}")]
    UnknownMatchMode(String),

    #[error("unknown ancestor scope: {0}")]
    UnknownScope(String),

    #[error("slot duration must be between {min} and {max} minutes, got {got}")]
    InvalidSlotDuration { got: i64, min: i64, max: i64 },
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid request: {0}")]
    Validation(#[from] ValidationError),

    #[error("rule {rule_id}: unsupported rule kind {kind}")]
    UnsupportedRuleKind { rule_id: RuleId, kind: RuleKind },

    #[error("data source error: {0}")]
    Source(String),
}

impl EngineError {
    /// Short label for metrics.
    pub fn label(&self) -> &'static str {
        match self {
            EngineError::Validation(_) => "invalid",
            EngineError::UnsupportedRuleKind { .. } => "unsupported_rule_kind",
            EngineError::Source(_) => "source_error",
        }
    }
}
