//! Detects transactions that a recurring rule already created.
//!
//! Materialized transactions carry no reference to the rule that created them.
//! Instead, a transaction counts as a previous run of a rule when it has the
//! same owner, title, amount and category as the rule and falls on the same
//! calendar day as the occurrence. A transaction the user entered by hand that
//! happens to match is also treated as a previous run.

use rusqlite::{Connection, OptionalExtension};
use time::{OffsetDateTime, UtcOffset};

use crate::{
    Error,
    category::CategoryId,
    recurring::RecurringRule,
    timestamp,
    transaction::{Transaction, map_transaction_row},
    user::UserId,
};

/// The fields that identify a transaction created by a recurring rule.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Fingerprint<'a> {
    /// The owner of the transaction.
    pub user_id: UserId,
    /// The title of the transaction.
    pub title: &'a str,
    /// The amount of the transaction.
    pub amount: f64,
    /// The category of the transaction.
    pub category_id: Option<CategoryId>,
}

impl<'a> Fingerprint<'a> {
    /// The fingerprint of the transactions created by `rule`.
    pub fn of(rule: &'a RecurringRule) -> Self {
        Self {
            user_id: rule.user_id,
            title: rule.title.trim(),
            amount: rule.amount,
            category_id: rule.category_id,
        }
    }
}

/// Find a transaction matching `fingerprint` on the calendar day of `day`.
///
/// The day is taken in the timezone `offset`.
pub fn find_existing(
    fingerprint: Fingerprint<'_>,
    day: OffsetDateTime,
    offset: UtcOffset,
    connection: &Connection,
) -> Result<Option<Transaction>, Error> {
    let (start, end) = timestamp::day_bounds(day, offset);

    connection
        .prepare(
            "SELECT id, user_id, title, type, amount, date, description, category_id
             FROM \"transaction\"
             WHERE user_id = ?1 AND title = ?2 AND amount = ?3 AND category_id IS ?4
                AND date >= ?5 AND date < ?6
             ORDER BY id ASC
             LIMIT 1",
        )?
        .query_row(
            (
                fingerprint.user_id,
                fingerprint.title,
                fingerprint.amount,
                fingerprint.category_id,
                timestamp::to_millis(start),
                timestamp::to_millis(end),
            ),
            map_transaction_row,
        )
        .optional()
        .map_err(Error::from)
}

/// Whether a transaction matching `fingerprint` exists on the calendar day of `day`.
pub fn exists(
    fingerprint: Fingerprint<'_>,
    day: OffsetDateTime,
    offset: UtcOffset,
    connection: &Connection,
) -> Result<bool, Error> {
    find_existing(fingerprint, day, offset, connection).map(|found| found.is_some())
}

#[cfg(test)]
mod tests {
    use rusqlite::Connection;
    use time::{UtcOffset, macros::datetime};

    use crate::{
        category::{CategoryName, NewCategory, create_category},
        db::initialize,
        transaction::{Transaction, TransactionType, create_transaction},
    };

    use super::{Fingerprint, exists, find_existing};

    fn get_test_connection() -> Connection {
        let connection = Connection::open_in_memory().unwrap();
        initialize(&connection).unwrap();
        connection
    }

    fn rent(category_id: Option<i64>) -> Fingerprint<'static> {
        Fingerprint {
            user_id: 1,
            title: "Rent",
            amount: 450.0,
            category_id,
        }
    }

    fn insert_rent(date: time::OffsetDateTime, category_id: Option<i64>, connection: &Connection) {
        create_transaction(
            1,
            Transaction::build("Rent", TransactionType::Expense, 450.0, date)
                .category_id(category_id),
            connection,
        )
        .unwrap();
    }

    #[test]
    fn finds_transaction_on_same_day() {
        let connection = get_test_connection();
        insert_rent(datetime!(2024-01-01 09:00 UTC), None, &connection);

        let found = find_existing(
            rent(None),
            datetime!(2024-01-01 23:00 UTC),
            UtcOffset::UTC,
            &connection,
        )
        .unwrap();

        assert_eq!(found.map(|transaction| transaction.date), Some(datetime!(2024-01-01 09:00 UTC)));
    }

    #[test]
    fn ignores_other_days() {
        let connection = get_test_connection();
        insert_rent(datetime!(2024-01-01 09:00 UTC), None, &connection);

        let found = exists(
            rent(None),
            datetime!(2024-01-02 00:00 UTC),
            UtcOffset::UTC,
            &connection,
        );

        assert_eq!(found, Ok(false));
    }

    #[test]
    fn day_follows_configured_offset() {
        let connection = get_test_connection();
        // 2024-01-02 09:00 in UTC+13.
        insert_rent(datetime!(2024-01-01 20:00 UTC), None, &connection);
        let offset = UtcOffset::from_hms(13, 0, 0).unwrap();

        assert_eq!(
            exists(rent(None), datetime!(2024-01-02 10:00 +13:00), offset, &connection),
            Ok(true)
        );
        assert_eq!(
            exists(rent(None), datetime!(2024-01-01 12:00 UTC), UtcOffset::UTC, &connection),
            Ok(true)
        );
        assert_eq!(
            exists(rent(None), datetime!(2024-01-01 10:00 +13:00), offset, &connection),
            Ok(false)
        );
    }

    #[test]
    fn category_must_match_including_none() {
        let connection = get_test_connection();
        let category = create_category(
            1,
            NewCategory::named(CategoryName::new_unchecked("Housing")),
            &connection,
        )
        .unwrap();
        insert_rent(datetime!(2024-01-01 09:00 UTC), Some(category.id), &connection);
        let day = datetime!(2024-01-01 12:00 UTC);

        assert_eq!(exists(rent(Some(category.id)), day, UtcOffset::UTC, &connection), Ok(true));
        assert_eq!(exists(rent(None), day, UtcOffset::UTC, &connection), Ok(false));
    }

    #[test]
    fn amount_and_title_must_match() {
        let connection = get_test_connection();
        insert_rent(datetime!(2024-01-01 09:00 UTC), None, &connection);
        let day = datetime!(2024-01-01 12:00 UTC);

        let mut other_amount = rent(None);
        other_amount.amount = 451.0;
        let mut other_title = rent(None);
        other_title.title = "Rent (garage)";

        assert_eq!(exists(other_amount, day, UtcOffset::UTC, &connection), Ok(false));
        assert_eq!(exists(other_title, day, UtcOffset::UTC, &connection), Ok(false));
    }
}
