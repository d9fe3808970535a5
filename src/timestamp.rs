//! Conversions between [OffsetDateTime] and the integer timestamps stored in SQLite.
//!
//! Timestamps are stored as unix milliseconds in UTC. Integer columns compare
//! exactly, which the day-bounded range queries used for duplicate detection
//! rely on.

use rusqlite::{Row, types::Type};
use time::{Duration, OffsetDateTime, Time, UtcOffset};

/// Convert `date_time` to unix milliseconds.
pub fn to_millis(date_time: OffsetDateTime) -> i64 {
    (date_time.unix_timestamp_nanos() / 1_000_000) as i64
}

/// Convert unix milliseconds to a UTC [OffsetDateTime].
pub fn from_millis(millis: i64) -> Result<OffsetDateTime, time::error::ComponentRange> {
    OffsetDateTime::from_unix_timestamp_nanos(millis as i128 * 1_000_000)
}

/// Read the timestamp stored in column `index` of `row`.
pub fn column(row: &Row, index: usize) -> Result<OffsetDateTime, rusqlite::Error> {
    let millis: i64 = row.get(index)?;

    from_millis(millis).map_err(|error| {
        rusqlite::Error::FromSqlConversionFailure(index, Type::Integer, Box::new(error))
    })
}

/// Read the nullable timestamp stored in column `index` of `row`.
pub fn optional_column(row: &Row, index: usize) -> Result<Option<OffsetDateTime>, rusqlite::Error> {
    let millis: Option<i64> = row.get(index)?;

    millis
        .map(|millis| {
            from_millis(millis).map_err(|error| {
                rusqlite::Error::FromSqlConversionFailure(index, Type::Integer, Box::new(error))
            })
        })
        .transpose()
}

/// The half-open range `[start, end)` of the calendar day containing `date_time`,
/// where the day is taken in the timezone `offset`.
pub fn day_bounds(date_time: OffsetDateTime, offset: UtcOffset) -> (OffsetDateTime, OffsetDateTime) {
    let start = date_time.to_offset(offset).replace_time(Time::MIDNIGHT);

    (start, start + Duration::days(1))
}

#[cfg(test)]
mod tests {
    use time::{UtcOffset, macros::datetime};

    use super::{day_bounds, from_millis, to_millis};

    #[test]
    fn millis_preserve_the_instant() {
        let date_time = datetime!(2024-01-05 23:59:59.999 UTC);

        let got = from_millis(to_millis(date_time)).unwrap();

        assert_eq!(got, date_time);
    }

    #[test]
    fn millis_normalize_offsets_to_utc() {
        let date_time = datetime!(2024-01-05 09:00 +13:00);

        let got = from_millis(to_millis(date_time)).unwrap();

        assert_eq!(got, datetime!(2024-01-04 20:00 UTC));
    }

    #[test]
    fn day_bounds_in_utc() {
        let (start, end) = day_bounds(datetime!(2024-01-01 09:00 UTC), UtcOffset::UTC);

        assert_eq!(start, datetime!(2024-01-01 00:00 UTC));
        assert_eq!(end, datetime!(2024-01-02 00:00 UTC));
    }

    #[test]
    fn day_bounds_follow_the_offset() {
        let offset = UtcOffset::from_hms(13, 0, 0).unwrap();

        let (start, end) = day_bounds(datetime!(2024-01-01 20:00 UTC), offset);

        assert_eq!(start, datetime!(2024-01-02 00:00 +13:00));
        assert_eq!(end, datetime!(2024-01-03 00:00 +13:00));
    }
}
