pub mod accounts;
pub mod audit_logs;
pub mod budgets;
pub mod health;
pub mod reports;
pub mod sync;
pub mod transactions;

use axum::http::HeaderMap;
use chrono::NaiveDate;
use common::DateRange;
use model::Actor;

use crate::schemas::{ApiError, bad_request};

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_EMAIL_HEADER: &str = "x-user-email";

/// The acting user of a request; `system` when no user header is sent.
pub fn actor(headers: &HeaderMap) -> Actor {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
    };
    match header(USER_ID_HEADER) {
        Some(user_id) => Actor::new(user_id, header(USER_EMAIL_HEADER)),
        None => Actor::system(),
    }
}

/// Optional `start_date`/`end_date` query bounds as a range.
pub fn date_range(
    start_date: Option<NaiveDate>,
    end_date: Option<NaiveDate>,
) -> Result<Option<DateRange>, ApiError> {
    if let (Some(start), Some(end)) = (start_date, end_date) {
        if start > end {
            return Err(bad_request(format!(
                "start_date {start} is after end_date {end}"
            )));
        }
    }
    Ok(DateRange::from_bounds(start_date, end_date))
}

/// Parses an optional enum query value, answering 400 on unknown values.
pub fn parse_optional<T>(value: Option<&str>) -> Result<Option<T>, ApiError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .filter(|value| !value.is_empty())
        .map(|value| value.parse::<T>().map_err(|e| bad_request(e.to_string())))
        .transpose()
}
