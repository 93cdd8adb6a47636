use chrono::{Datelike, Days, NaiveDate};

use crate::model::*;

/// One dated occurrence of a rule's time range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Occurrence {
    pub date: NaiveDate,
    pub range: TimeRange,
}

impl Occurrence {
    pub fn span(&self) -> Span {
        self.range.on(self.date)
    }
}

/// Expand one rule into its concrete occurrences inside `period`.
///
/// Kind support is not checked here; the engine rejects unsupported kinds
/// before generating anything.
pub fn occurrences(rule: &SchedulingRule, period: &DatePeriod) -> Vec<Occurrence> {
    let dated = |date: NaiveDate| Occurrence {
        date,
        range: rule.time_range,
    };

    match rule.kind {
        RuleKind::Weekly => {
            let Some(mask) = rule.weekday_mask else {
                return Vec::new();
            };
            let Some(clipped) = period.clip(rule.from, rule.to) else {
                return Vec::new();
            };
            clipped
                .days()
                .filter(|d| mask & weekday_bit(*d) != 0)
                .map(dated)
                .collect()
        }
        RuleKind::SingleDate => rule
            .date
            .filter(|d| period.contains(*d))
            .map(dated)
            .into_iter()
            .collect(),
        RuleKind::DateRange => match period.clip(rule.from, rule.to) {
            Some(clipped) => clipped.days().map(dated).collect(),
            None => Vec::new(),
        },
        RuleKind::Monthly => {
            let Some(day) = rule.day_of_month else {
                return Vec::new();
            };
            let Some(clipped) = period.clip(rule.from, rule.to) else {
                return Vec::new();
            };
            // Months without that day (31st in February) simply never match.
            clipped.days().filter(|d| d.day() == day).map(dated).collect()
        }
        RuleKind::Repeating => repeating_dates(rule, period).into_iter().map(dated).collect(),
    }
}

fn repeating_dates(rule: &SchedulingRule, period: &DatePeriod) -> Vec<NaiveDate> {
    let interval = match rule.interval_days {
        Some(i) if i >= 1 => i64::from(i),
        other => {
            tracing::warn!(rule_id = rule.id, interval = ?other, "repeating rule without a positive interval");
            return Vec::new();
        }
    };

    let anchor = rule.from.unwrap_or(period.from());
    let last = rule.to.map_or(period.to(), |t| t.min(period.to()));

    let mut current = anchor;
    if anchor < period.from() {
        let behind = (period.from() - anchor).num_days();
        current = step(anchor, behind.div_euclid(interval) * interval);
        if current < period.from() {
            current = step(current, interval);
        }
    }

    let mut dates = Vec::new();
    while current <= last {
        dates.push(current);
        current = step(current, interval);
    }
    dates
}

fn step(date: NaiveDate, days: i64) -> NaiveDate {
    // Day counts here are bounded by the period length, far below the calendar limit.
    date.checked_add_days(Days::new(days as u64)).unwrap_or(NaiveDate::MAX)
}
