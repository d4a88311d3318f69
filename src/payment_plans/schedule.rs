use chrono::{DateTime, Days, Months, Utc};

use super::models::ScheduleUnit;
use crate::error::{AppResult, PlanError};

/// Add `n` schedule units to `timestamp` in UTC calendar arithmetic.
///
/// Months and years roll over by calendar; a day that does not exist in the
/// target month is clamped to that month's last day (Jan 31 + 1 month is the
/// end of February). Fails on an unknown unit, a non-positive `n`, or any
/// result that does not lie strictly after `timestamp`.
pub fn advance_time(timestamp: DateTime<Utc>, n: i32, unit: &str) -> AppResult<DateTime<Utc>> {
    advance(timestamp, n, unit.parse()?)
}

pub fn advance(timestamp: DateTime<Utc>, n: i32, unit: ScheduleUnit) -> AppResult<DateTime<Utc>> {
    let Ok(n) = u32::try_from(n) else {
        return Err(PlanError::InvalidSchedule(n).into());
    };
    if n == 0 {
        return Err(PlanError::InvalidSchedule(0).into());
    }

    let next = match unit {
        ScheduleUnit::Day => timestamp.checked_add_days(Days::new(u64::from(n))),
        ScheduleUnit::Week => timestamp.checked_add_days(Days::new(u64::from(n) * 7)),
        ScheduleUnit::Month => timestamp.checked_add_months(Months::new(n)),
        ScheduleUnit::Year => n
            .checked_mul(12)
            .and_then(|months| timestamp.checked_add_months(Months::new(months))),
    };

    match next {
        Some(next) if next > timestamp => Ok(next),
        _ => Err(PlanError::ScheduleOverflow { from: timestamp }.into()),
    }
}
