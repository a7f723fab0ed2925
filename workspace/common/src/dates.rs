use chrono::{DateTime, Days, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::trace;
use utoipa::ToSchema;

/// A closed calendar range. The end date is included through its final instant,
/// so a record stamped `end 23:59:59.999` is still inside.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    /// Returns `None` when `start` is after `end`.
    pub fn new(start: NaiveDate, end: NaiveDate) -> Option<Self> {
        (start <= end).then_some(Self { start, end })
    }

    /// Builds a range from optional bounds; a missing bound is left open.
    pub fn from_bounds(start: Option<NaiveDate>, end: Option<NaiveDate>) -> Option<Self> {
        match (start, end) {
            (None, None) => None,
            (start, end) => {
                let start = start.unwrap_or(NaiveDate::MIN);
                let end = end.unwrap_or(NaiveDate::MAX);
                trace!(%start, %end, "building date range from bounds");
                Self::new(start, end)
            }
        }
    }

    pub fn contains_date(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }

    pub fn contains(&self, instant: &DateTime<Utc>) -> bool {
        let start = self.start.and_time(NaiveTime::MIN).and_utc();
        if *instant < start {
            return false;
        }
        match self.end.checked_add_days(Days::new(1)) {
            Some(next_day) => *instant < next_day.and_time(NaiveTime::MIN).and_utc(),
            None => true,
        }
    }
}
