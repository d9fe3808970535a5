//! Schedule arithmetic for recurring rules.
//!
//! Month and year steps keep the time of day and the day of the month. When
//! the target month is too short for that day, the date is clamped to the last
//! day of the target month, e.g. 31 January + 1 month is 29 February in a
//! leap year. The clamped day is carried forward by later steps, so a rule
//! anchored on the 31st drifts to the 29th after passing through February.

use std::{fmt::Display, str::FromStr};

use rusqlite::{
    ToSql,
    types::{FromSql, FromSqlResult, ToSqlOutput, ValueRef},
};
use serde::{Deserialize, Serialize};
use time::{Date, Duration, Month, OffsetDateTime, UtcOffset, macros::time};

use crate::db::{UnknownVariant, parse_text_column};

/// The default cap on the number of steps [catch_up] may take.
pub const DEFAULT_MAX_CATCH_UP_ITERATIONS: u32 = 10_000;

/// The unit of a recurring rule's frequency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
#[allow(missing_docs)]
pub enum FrequencyUnit {
    Minutes,
    Hours,
    Days,
    Weeks,
    /// A calendar month of variable length.
    Months,
    /// A calendar year of variable length.
    Years,
}

impl FrequencyUnit {
    /// The name used for this unit on the wire and in the database.
    pub fn as_str(self) -> &'static str {
        match self {
            FrequencyUnit::Minutes => "MINUTES",
            FrequencyUnit::Hours => "HOURS",
            FrequencyUnit::Days => "DAYS",
            FrequencyUnit::Weeks => "WEEKS",
            FrequencyUnit::Months => "MONTHS",
            FrequencyUnit::Years => "YEARS",
        }
    }

    /// The length of `step` units, or `None` for calendar units whose length varies.
    fn fixed_length(self, step: u32) -> Option<Duration> {
        let step = i64::from(step);

        match self {
            FrequencyUnit::Minutes => Some(Duration::minutes(step)),
            FrequencyUnit::Hours => Some(Duration::hours(step)),
            FrequencyUnit::Days => Some(Duration::days(step)),
            FrequencyUnit::Weeks => Some(Duration::weeks(step)),
            FrequencyUnit::Months | FrequencyUnit::Years => None,
        }
    }
}

impl Display for FrequencyUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for FrequencyUnit {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "MINUTES" => Ok(FrequencyUnit::Minutes),
            "HOURS" => Ok(FrequencyUnit::Hours),
            "DAYS" => Ok(FrequencyUnit::Days),
            "WEEKS" => Ok(FrequencyUnit::Weeks),
            "MONTHS" => Ok(FrequencyUnit::Months),
            "YEARS" => Ok(FrequencyUnit::Years),
            other => Err(UnknownVariant(other.to_owned())),
        }
    }
}

impl ToSql for FrequencyUnit {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for FrequencyUnit {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        parse_text_column(value)
    }
}

/// The reasons a schedule cannot be computed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[allow(missing_docs)]
pub enum SchedulingError {
    /// Rules must advance by at least one unit.
    #[error("the frequency must be at least 1")]
    ZeroStep,

    /// The next occurrence does not fit in a timestamp.
    #[error("advancing {anchor} by {step} {unit} is out of range")]
    OutOfRange {
        anchor: OffsetDateTime,
        step: u32,
        unit: FrequencyUnit,
    },

    /// Catching up took more steps than allowed.
    #[error("catching up from {anchor} to {now} needs more than {limit} steps")]
    CatchUpLimitExceeded {
        anchor: OffsetDateTime,
        now: OffsetDateTime,
        limit: u32,
    },
}

/// Get the occurrence `step` units after `anchor`.
///
/// The result is always strictly after `anchor`.
///
/// # Errors
/// Returns a [SchedulingError] if `step` is zero or the result is out of range.
pub fn advance(
    anchor: OffsetDateTime,
    step: u32,
    unit: FrequencyUnit,
) -> Result<OffsetDateTime, SchedulingError> {
    if step == 0 {
        return Err(SchedulingError::ZeroStep);
    }

    let next = match unit.fixed_length(step) {
        Some(length) => anchor.checked_add(length),
        None if unit == FrequencyUnit::Years => add_months(anchor, i64::from(step) * 12),
        None => add_months(anchor, i64::from(step)),
    };

    next.ok_or(SchedulingError::OutOfRange { anchor, step, unit })
}

/// Advance `anchor` until it is at or after `now`, using the default step cap.
///
/// See [catch_up_with_limit].
pub fn catch_up(
    anchor: OffsetDateTime,
    step: u32,
    unit: FrequencyUnit,
    now: OffsetDateTime,
) -> Result<OffsetDateTime, SchedulingError> {
    catch_up_with_limit(anchor, step, unit, now, DEFAULT_MAX_CATCH_UP_ITERATIONS)
}

/// Advance `anchor` until it is at or after `now`.
///
/// Returns `anchor` unchanged if it is already at or after `now`, otherwise
/// returns the earliest occurrence at or after `now`. Fixed-length units jump
/// straight to that occurrence, calendar units step one occurrence at a time
/// and give up after `limit` steps.
///
/// # Errors
/// Returns a [SchedulingError] if a step fails or `limit` steps are not enough.
pub fn catch_up_with_limit(
    anchor: OffsetDateTime,
    step: u32,
    unit: FrequencyUnit,
    now: OffsetDateTime,
    limit: u32,
) -> Result<OffsetDateTime, SchedulingError> {
    if step == 0 {
        return Err(SchedulingError::ZeroStep);
    }

    if anchor >= now {
        return Ok(anchor);
    }

    if let Some(length) = unit.fixed_length(step) {
        let out_of_range = SchedulingError::OutOfRange { anchor, step, unit };
        let gap = (now - anchor).whole_nanoseconds();
        let length = length.whole_nanoseconds();
        let steps = (gap + length - 1) / length;
        let offset = i64::try_from(steps * length).map_err(|_| out_of_range.clone())?;

        return anchor
            .checked_add(Duration::nanoseconds(offset))
            .ok_or(out_of_range);
    }

    let mut next = anchor;

    for _ in 0..limit {
        next = advance(next, step, unit)?;

        if next >= now {
            return Ok(next);
        }
    }

    Err(SchedulingError::CatchUpLimitExceeded { anchor, now, limit })
}

/// The last millisecond of the calendar day containing `date_time`, in the timezone `offset`.
///
/// End dates are normalized with this so that an end date of "today" still
/// allows an occurrence later today.
pub fn end_of_day(date_time: OffsetDateTime, offset: UtcOffset) -> OffsetDateTime {
    date_time
        .to_offset(offset)
        .replace_time(time!(23:59:59.999))
}

fn add_months(anchor: OffsetDateTime, months: i64) -> Option<OffsetDateTime> {
    let date = anchor.date();
    let month_index = i64::from(date.year()) * 12 + i64::from(u8::from(date.month()) - 1) + months;

    let year = i32::try_from(month_index.div_euclid(12)).ok()?;
    let month = Month::try_from(month_index.rem_euclid(12) as u8 + 1).ok()?;
    let day = date.day().min(last_day_of_month(year, month)?);

    let date = Date::from_calendar_date(year, month, day).ok()?;

    Some(anchor.replace_date(date))
}

fn last_day_of_month(year: i32, month: Month) -> Option<u8> {
    (28..=31)
        .rev()
        .find(|&day| Date::from_calendar_date(year, month, day).is_ok())
}
