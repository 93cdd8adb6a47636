use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use crate::engine::ValidationError;

/// Unix milliseconds, the only instant type.
pub type Ms = i64;

pub type ResourceId = i64;
pub type ResourceTypeId = i64;
pub type PropertyId = i64;
pub type RelationType = i64;
pub type RuleId = i64;
pub type EventId = i64;

pub const MINUTE_MS: Ms = 60_000;
pub const DAY_MS: Ms = 86_400_000;

/// Absolute instant of `time` on `date`. Dates carry no zone; they are read as UTC.
pub fn instant(date: NaiveDate, time: NaiveTime) -> Ms {
    date.and_time(time).and_utc().timestamp_millis()
}

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Returns true if `self` fully contains `other`.
    pub fn contains_span(&self, other: &Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    /// Strictly positive overlap, if any.
    pub fn intersection(&self, other: &Span) -> Option<Span> {
        let start = self.start.max(other.start);
        let end = self.end.min(other.end);
        (start < end).then(|| Span::new(start, end))
    }
}

/// Time-of-day range, `start < end` on the same day.
///
/// The end may be midnight closing the day (`24:00`), so a whole-day range
/// touches the next day's range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "TimeRangeRepr", into = "TimeRangeRepr")]
pub struct TimeRange {
    start: NaiveTime,
    /// `None` is 24:00.
    end: Option<NaiveTime>,
}

#[derive(Serialize, Deserialize)]
struct TimeRangeRepr {
    start: NaiveTime,
    end: String,
}

const END_OF_DAY: [&str; 2] = ["24:00", "24:00:00"];

impl TryFrom<TimeRangeRepr> for TimeRange {
    type Error = ValidationError;

    fn try_from(repr: TimeRangeRepr) -> Result<Self, Self::Error> {
        if END_OF_DAY.contains(&repr.end.as_str()) {
            return Ok(TimeRange::until_end_of_day(repr.start));
        }
        let end = repr
            .end
            .parse()
            .map_err(|_| ValidationError::InvalidTimeOfDay(repr.end))?;
        TimeRange::new(repr.start, end)
    }
}

impl From<TimeRange> for TimeRangeRepr {
    fn from(range: TimeRange) -> Self {
        Self {
            start: range.start,
            end: range.end.map_or_else(|| END_OF_DAY[1].to_string(), |t| t.to_string()),
        }
    }
}

/// Milliseconds since the start of the day.
fn day_offset(time: NaiveTime) -> Ms {
    (time - NaiveTime::MIN).num_milliseconds()
}

impl TimeRange {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Result<Self, ValidationError> {
        if start >= end {
            return Err(ValidationError::InvalidTimeRange { start, end });
        }
        Ok(Self { start, end: Some(end) })
    }

    /// From `start` until midnight at the end of the day.
    pub fn until_end_of_day(start: NaiveTime) -> Self {
        Self { start, end: None }
    }

    /// Whole-hour convenience constructor, used heavily by fixtures. `end` may be 24.
    pub fn hours(start: u32, end: u32) -> Result<Self, ValidationError> {
        let at = |h: u32| NaiveTime::from_hms_opt(h, 0, 0).ok_or(ValidationError::HourOutOfRange(h));
        if end == 24 {
            return Ok(Self::until_end_of_day(at(start)?));
        }
        Self::new(at(start)?, at(end)?)
    }

    pub fn start(&self) -> NaiveTime {
        self.start
    }

    /// `None` when the range runs to midnight.
    pub fn end(&self) -> Option<NaiveTime> {
        self.end
    }

    fn start_ms(&self) -> Ms {
        day_offset(self.start)
    }

    fn end_ms(&self) -> Ms {
        self.end.map_or(DAY_MS, day_offset)
    }

    /// Half-open: touching ranges never overlap.
    pub fn overlaps(&self, other: &TimeRange) -> bool {
        self.start_ms() < other.end_ms() && self.end_ms() > other.start_ms()
    }

    /// The absolute span this range covers on `date`.
    pub fn on(&self, date: NaiveDate) -> Span {
        let midnight = instant(date, NaiveTime::MIN);
        Span::new(midnight + self.start_ms(), midnight + self.end_ms())
    }
}

/// Inclusive date period `from..=to`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "DatePeriodRepr")]
pub struct DatePeriod {
    from: NaiveDate,
    to: NaiveDate,
}

#[derive(Deserialize)]
struct DatePeriodRepr {
    from: NaiveDate,
    to: NaiveDate,
}

impl TryFrom<DatePeriodRepr> for DatePeriod {
    type Error = ValidationError;

    fn try_from(repr: DatePeriodRepr) -> Result<Self, Self::Error> {
        DatePeriod::new(repr.from, repr.to)
    }
}

impl DatePeriod {
    pub fn new(from: NaiveDate, to: NaiveDate) -> Result<Self, ValidationError> {
        if from > to {
            return Err(ValidationError::PeriodOrder { from, to });
        }
        Ok(Self { from, to })
    }

    pub fn from(&self) -> NaiveDate {
        self.from
    }

    pub fn to(&self) -> NaiveDate {
        self.to
    }

    /// Every date in the period, in order. Each call starts a fresh sequence.
    pub fn days(&self) -> impl Iterator<Item = NaiveDate> + use<> {
        let to = self.to;
        self.from.iter_days().take_while(move |d| *d <= to)
    }

    pub fn len_days(&self) -> i64 {
        (self.to - self.from).num_days() + 1
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.from <= date && date <= self.to
    }

    /// Narrow the period by optional bounds; `None` when nothing is left.
    pub fn clip(&self, from: Option<NaiveDate>, to: Option<NaiveDate>) -> Option<DatePeriod> {
        let from = from.map_or(self.from, |f| f.max(self.from));
        let to = to.map_or(self.to, |t| t.min(self.to));
        (from <= to).then_some(DatePeriod { from, to })
    }

    /// Absolute window `[from 00:00, to + 1 day 00:00)`.
    pub fn window(&self) -> Span {
        let start = instant(self.from, NaiveTime::MIN);
        Span::new(start, start + self.len_days() * DAY_MS)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    Weekly,
    SingleDate,
    DateRange,
    Monthly,
    Repeating,
}

impl RuleKind {
    pub const ALL: [RuleKind; 5] = [
        RuleKind::Weekly,
        RuleKind::SingleDate,
        RuleKind::DateRange,
        RuleKind::Monthly,
        RuleKind::Repeating,
    ];

    /// Numeric kind as stored upstream (1-based).
    pub fn code(self) -> u8 {
        match self {
            RuleKind::Weekly => 1,
            RuleKind::SingleDate => 2,
            RuleKind::DateRange => 3,
            RuleKind::Monthly => 4,
            RuleKind::Repeating => 5,
        }
    }
}

impl fmt::Display for RuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RuleKind::Weekly => "weekly",
            RuleKind::SingleDate => "single_date",
            RuleKind::DateRange => "date_range",
            RuleKind::Monthly => "monthly",
            RuleKind::Repeating => "repeating",
        };
        write!(f, "{name} ({})", self.code())
    }
}

/// Day-of-week bit for a date: `1 << weekday`, Sunday = 0.
pub fn weekday_bit(date: NaiveDate) -> u8 {
    1 << date.weekday().num_days_from_sunday()
}

/// A recurring or one-off availability (or exclusion) definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulingRule {
    pub id: RuleId,
    pub kind: RuleKind,
    #[serde(default)]
    pub is_exclude: bool,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub date: Option<NaiveDate>,
    pub time_range: TimeRange,
    pub weekday_mask: Option<u8>,
    pub day_of_month: Option<u32>,
    pub interval_days: Option<u32>,
    pub resource_ids: Vec<ResourceId>,
}

impl SchedulingRule {
    /// A rule with only the mandatory parts set; callers fill the kind-specific fields.
    pub fn new(id: RuleId, kind: RuleKind, time_range: TimeRange, resource_ids: Vec<ResourceId>) -> Self {
        Self {
            id,
            kind,
            is_exclude: false,
            from: None,
            to: None,
            date: None,
            time_range,
            weekday_mask: None,
            day_of_month: None,
            interval_days: None,
            resource_ids,
        }
    }

    /// One fact per bound resource.
    pub fn facts(self: &Arc<Self>) -> impl Iterator<Item = RuleFact> + '_ {
        self.resource_ids.iter().map(move |&resource_id| RuleFact {
            resource_id,
            rule: Arc::clone(self),
        })
    }
}

/// A rule bound to exactly one resource.
#[derive(Debug, Clone)]
pub struct RuleFact {
    pub resource_id: ResourceId,
    pub rule: Arc<SchedulingRule>,
}

/// An already-booked interval blocking one or more resources. `start < end`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "BusyEventRepr")]
pub struct BusyEvent {
    pub id: EventId,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    pub resource_ids: Vec<ResourceId>,
}

#[derive(Deserialize)]
struct BusyEventRepr {
    id: EventId,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    resource_ids: Vec<ResourceId>,
}

impl TryFrom<BusyEventRepr> for BusyEvent {
    type Error = ValidationError;

    fn try_from(repr: BusyEventRepr) -> Result<Self, Self::Error> {
        BusyEvent::new(repr.id, repr.start, repr.end, repr.resource_ids)
    }
}

impl BusyEvent {
    pub fn new(
        id: EventId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        resource_ids: Vec<ResourceId>,
    ) -> Result<Self, ValidationError> {
        if start.timestamp_millis() >= end.timestamp_millis() {
            return Err(ValidationError::InvalidBusyEvent { id });
        }
        Ok(Self {
            id,
            start,
            end,
            resource_ids,
        })
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    pub fn span(&self) -> Span {
        Span::new(self.start.timestamp_millis(), self.end.timestamp_millis())
    }

    pub fn facts(&self) -> impl Iterator<Item = BusyFact> + '_ {
        let span = self.span();
        self.resource_ids
            .iter()
            .map(move |&resource_id| BusyFact { resource_id, span })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusyFact {
    pub resource_id: ResourceId,
    pub span: Span,
}

fn default_capacity() -> u32 {
    1
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub id: ResourceId,
    pub type_id: ResourceTypeId,
    /// Max concurrent occupancy (default 1 = exclusive use).
    #[serde(default = "default_capacity")]
    pub capacity: u32,
}

/// Directed edge `parent -> child`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceRelation {
    pub parent_id: ResourceId,
    pub child_id: ResourceId,
    pub relation_type: RelationType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyNode {
    pub id: PropertyId,
    pub parent_id: Option<PropertyId>,
}

/// Time during which a set of resources is jointly free.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    pub start: Ms,
    pub end: Ms,
    pub resource_ids: BTreeSet<ResourceId>,
}

impl Slot {
    pub fn new(span: Span, resource_ids: BTreeSet<ResourceId>) -> Self {
        Self {
            start: span.start,
            end: span.end,
            resource_ids,
        }
    }

    pub fn single(span: Span, resource_id: ResourceId) -> Self {
        Self::new(span, BTreeSet::from([resource_id]))
    }

    pub fn span(&self) -> Span {
        Span::new(self.start, self.end)
    }
}
