/// Longest query period, in days (inclusive count).
pub const MAX_PERIOD_DAYS: i64 = 31;
/// Required resource ids per query.
pub const MAX_RESOURCE_IDS: usize = 50;
pub const MAX_OR_GROUPS: usize = 10;
pub const MAX_OR_GROUP_SIZE: usize = 50;
pub const MAX_PROPERTY_IDS: usize = 20;
pub const MAX_ANCESTOR_FILTERS: usize = 10;
pub const MIN_SLOT_DURATION_MINUTES: i64 = 5;
/// One day.
pub const MAX_SLOT_DURATION_MINUTES: i64 = 1440;
