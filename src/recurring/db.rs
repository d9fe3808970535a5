//! Database operations for recurring rules.

use rusqlite::{Connection, Row};
use time::OffsetDateTime;

use crate::{
    Error, RecurrenceConfig,
    category::category_belongs_to_user,
    recurring::{
        models::{RecurringRule, RuleDraft, RuleId},
        schedule::{catch_up_with_limit, end_of_day},
    },
    timestamp,
    user::{UserId, get_plan},
};

const RULE_COLUMNS: &str = "id, user_id, title, type, amount, category_id, frequency_value, \
    frequency_unit, start_date, end_date, next_run, last_run_at, is_active, notify_on_run, \
    description, created_at";

/// The fields of a rule that change each time it runs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RuleSchedule {
    /// The next occurrence that has not been materialized.
    pub next_run: OffsetDateTime,
    /// When the rule last created a transaction.
    pub last_run_at: Option<OffsetDateTime>,
    /// Whether the rule will run again.
    pub is_active: bool,
}

/// Create a recurring rule for `user_id`.
///
/// The end date is normalized to the end of its day. The first run is the
/// start date, or the first occurrence at or after `now` if the start date
/// has passed. A rule whose first run is after its end date is stored
/// inactive.
///
/// # Errors
/// This function will return a:
/// - [Error::Validation] if a field is invalid,
/// - or [Error::InvalidCategory] if the category does not belong to the user,
/// - or [Error::RuleQuotaExceeded] if the user's plan does not allow another active rule,
/// - or [Error::Scheduling] if the first run cannot be computed.
pub fn create_recurring_rule(
    user_id: UserId,
    draft: RuleDraft,
    now: OffsetDateTime,
    config: &RecurrenceConfig,
    connection: &Connection,
) -> Result<RecurringRule, Error> {
    let draft = normalize(draft, config);
    check_draft(user_id, &draft, connection)?;

    if draft.is_active {
        check_quota(user_id, None, connection)?;
    }

    let schedule = initial_schedule(&draft, None, now, config)?;

    let rule = connection
        .prepare(&format!(
            "INSERT INTO recurring_rule (user_id, title, type, amount, category_id, frequency_value,
                frequency_unit, start_date, end_date, next_run, last_run_at, is_active, notify_on_run,
                description, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
             RETURNING {RULE_COLUMNS}"
        ))?
        .query_row(
            rusqlite::params![
                user_id,
                draft.title.trim(),
                draft.transaction_type,
                draft.amount,
                draft.category_id,
                draft.frequency_value,
                draft.frequency_unit,
                timestamp::to_millis(draft.start_date),
                draft.end_date.map(timestamp::to_millis),
                timestamp::to_millis(schedule.next_run),
                schedule.last_run_at.map(timestamp::to_millis),
                schedule.is_active,
                draft.notify_on_run,
                &draft.description,
                timestamp::to_millis(now),
            ],
            map_rule_row,
        )?;

    tracing::debug!(
        "created recurring rule {} for user {} with first run at {}",
        rule.id,
        user_id,
        rule.next_run
    );

    Ok(rule)
}

/// Retrieve a recurring rule owned by `user_id`.
///
/// # Errors
/// Returns an [Error::NotFound] if the rule does not exist or belongs to another user.
pub fn get_recurring_rule(
    user_id: UserId,
    rule_id: RuleId,
    connection: &Connection,
) -> Result<RecurringRule, Error> {
    connection
        .prepare(&format!(
            "SELECT {RULE_COLUMNS} FROM recurring_rule WHERE id = ?1 AND user_id = ?2"
        ))?
        .query_row((rule_id, user_id), map_rule_row)
        .map_err(Error::from)
}

/// Retrieve a recurring rule regardless of its owner.
pub(crate) fn get_rule_by_id(
    rule_id: RuleId,
    connection: &Connection,
) -> Result<RecurringRule, Error> {
    connection
        .prepare(&format!(
            "SELECT {RULE_COLUMNS} FROM recurring_rule WHERE id = ?1"
        ))?
        .query_row([rule_id], map_rule_row)
        .map_err(Error::from)
}

/// Retrieve all recurring rules owned by `user_id`, ordered by their next run.
pub fn get_recurring_rules(
    user_id: UserId,
    connection: &Connection,
) -> Result<Vec<RecurringRule>, Error> {
    connection
        .prepare(&format!(
            "SELECT {RULE_COLUMNS} FROM recurring_rule WHERE user_id = ?1 ORDER BY next_run ASC, id ASC"
        ))?
        .query_map([user_id], map_rule_row)?
        .map(|maybe_rule| maybe_rule.map_err(Error::from))
        .collect()
}

/// Retrieve the active rules of every user whose next run is at or before `now`.
pub fn get_due_rules(
    now: OffsetDateTime,
    connection: &Connection,
) -> Result<Vec<RecurringRule>, Error> {
    connection
        .prepare(&format!(
            "SELECT {RULE_COLUMNS} FROM recurring_rule
             WHERE is_active = 1 AND next_run <= ?1
             ORDER BY next_run ASC, id ASC"
        ))?
        .query_map([timestamp::to_millis(now)], map_rule_row)?
        .map(|maybe_rule| maybe_rule.map_err(Error::from))
        .collect()
}

/// Count the active rules owned by `user_id`, not counting `excluding`.
pub fn count_active_rules(
    user_id: UserId,
    excluding: Option<RuleId>,
    connection: &Connection,
) -> Result<usize, Error> {
    connection
        .query_row(
            "SELECT COUNT(id) FROM recurring_rule
             WHERE user_id = ?1 AND is_active = 1 AND id IS NOT ?2",
            (user_id, excluding),
            |row| row.get::<_, u32>(0),
        )
        .map(|count| count as usize)
        .map_err(Error::from)
}

/// Overwrite the user-editable fields of a rule and recompute its schedule.
///
/// The next run is recomputed from the (possibly new) start date, so an edit
/// never materializes occurrences that were missed in the past. Re-activating
/// a rule is checked against the user's plan.
///
/// # Errors
/// This function will return a:
/// - [Error::UpdateMissingRule] if the rule does not exist or belongs to another user,
/// - or any of the errors of [create_recurring_rule].
pub fn update_recurring_rule(
    user_id: UserId,
    rule_id: RuleId,
    draft: RuleDraft,
    now: OffsetDateTime,
    config: &RecurrenceConfig,
    connection: &Connection,
) -> Result<RecurringRule, Error> {
    let existing = get_recurring_rule(user_id, rule_id, connection).map_err(|error| match error {
        Error::NotFound => Error::UpdateMissingRule,
        error => error,
    })?;

    let draft = normalize(draft, config);
    check_draft(user_id, &draft, connection)?;

    if draft.is_active && !existing.is_active {
        check_quota(user_id, Some(rule_id), connection)?;
    }

    let schedule = initial_schedule(&draft, existing.last_run_at, now, config)?;

    connection
        .prepare(&format!(
            "UPDATE recurring_rule
             SET title = ?1, type = ?2, amount = ?3, category_id = ?4, frequency_value = ?5,
                frequency_unit = ?6, start_date = ?7, end_date = ?8, next_run = ?9, is_active = ?10,
                notify_on_run = ?11, description = ?12
             WHERE id = ?13 AND user_id = ?14
             RETURNING {RULE_COLUMNS}"
        ))?
        .query_row(
            rusqlite::params![
                draft.title.trim(),
                draft.transaction_type,
                draft.amount,
                draft.category_id,
                draft.frequency_value,
                draft.frequency_unit,
                timestamp::to_millis(draft.start_date),
                draft.end_date.map(timestamp::to_millis),
                timestamp::to_millis(schedule.next_run),
                schedule.is_active,
                draft.notify_on_run,
                &draft.description,
                rule_id,
                user_id,
            ],
            map_rule_row,
        )
        .map_err(|error| match error {
            rusqlite::Error::QueryReturnedNoRows => Error::UpdateMissingRule,
            error => error.into(),
        })
}

/// Persist the outcome of running a rule.
///
/// # Errors
/// Returns an [Error::UpdateMissingRule] if the rule no longer exists.
pub fn update_rule_schedule(
    rule_id: RuleId,
    schedule: RuleSchedule,
    connection: &Connection,
) -> Result<RecurringRule, Error> {
    connection
        .prepare(&format!(
            "UPDATE recurring_rule SET next_run = ?1, last_run_at = ?2, is_active = ?3
             WHERE id = ?4
             RETURNING {RULE_COLUMNS}"
        ))?
        .query_row(
            (
                timestamp::to_millis(schedule.next_run),
                schedule.last_run_at.map(timestamp::to_millis),
                schedule.is_active,
                rule_id,
            ),
            map_rule_row,
        )
        .map_err(|error| match error {
            rusqlite::Error::QueryReturnedNoRows => Error::UpdateMissingRule,
            error => error.into(),
        })
}

/// Stop a rule from running again.
pub fn deactivate_rule(rule_id: RuleId, connection: &Connection) -> Result<(), Error> {
    connection.execute(
        "UPDATE recurring_rule SET is_active = 0 WHERE id = ?1",
        [rule_id],
    )?;

    Ok(())
}

/// Delete a recurring rule owned by `user_id`.
///
/// Transactions the rule already created are kept.
///
/// # Errors
/// Returns an [Error::DeleteMissingRule] if the rule does not exist.
pub fn delete_recurring_rule(
    user_id: UserId,
    rule_id: RuleId,
    connection: &Connection,
) -> Result<(), Error> {
    let rows_affected = connection.execute(
        "DELETE FROM recurring_rule WHERE id = ?1 AND user_id = ?2",
        (rule_id, user_id),
    )?;

    if rows_affected == 0 {
        return Err(Error::DeleteMissingRule);
    }

    Ok(())
}

/// Create the recurring rule table in the database.
///
/// # Errors
/// Returns an error if the table cannot be created or if there is an SQL error.
pub fn create_recurring_rule_table(connection: &Connection) -> Result<(), rusqlite::Error> {
    connection.execute(
        "CREATE TABLE IF NOT EXISTS recurring_rule (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                title TEXT NOT NULL,
                type TEXT NOT NULL,
                amount REAL NOT NULL,
                category_id INTEGER,
                frequency_value INTEGER NOT NULL CHECK (frequency_value >= 1),
                frequency_unit TEXT NOT NULL,
                start_date INTEGER NOT NULL,
                end_date INTEGER,
                next_run INTEGER NOT NULL,
                last_run_at INTEGER,
                is_active INTEGER NOT NULL DEFAULT 1,
                notify_on_run INTEGER NOT NULL DEFAULT 0,
                description TEXT NOT NULL DEFAULT '',
                created_at INTEGER NOT NULL,
                FOREIGN KEY(category_id) REFERENCES category(id) ON UPDATE CASCADE ON DELETE SET NULL
                )",
        (),
    )?;

    connection.execute(
        "CREATE INDEX IF NOT EXISTS idx_recurring_rule_due ON recurring_rule(is_active, next_run);",
        (),
    )?;

    Ok(())
}

fn normalize(mut draft: RuleDraft, config: &RecurrenceConfig) -> RuleDraft {
    draft.end_date = draft
        .end_date
        .map(|end_date| end_of_day(end_date, config.utc_offset));
    draft
}

fn check_draft(user_id: UserId, draft: &RuleDraft, connection: &Connection) -> Result<(), Error> {
    draft.validate()?;

    if let Some(category_id) = draft.category_id
        && !category_belongs_to_user(user_id, category_id, connection)?
    {
        return Err(Error::InvalidCategory(Some(category_id)));
    }

    Ok(())
}

fn check_quota(
    user_id: UserId,
    excluding: Option<RuleId>,
    connection: &Connection,
) -> Result<(), Error> {
    let Some(limit) = get_plan(user_id, connection)?.max_active_rules() else {
        return Ok(());
    };

    if count_active_rules(user_id, excluding, connection)? >= limit {
        return Err(Error::RuleQuotaExceeded(limit));
    }

    Ok(())
}

fn initial_schedule(
    draft: &RuleDraft,
    last_run_at: Option<OffsetDateTime>,
    now: OffsetDateTime,
    config: &RecurrenceConfig,
) -> Result<RuleSchedule, Error> {
    let next_run = catch_up_with_limit(
        draft.start_date,
        draft.frequency_value,
        draft.frequency_unit,
        now,
        config.max_catch_up_iterations,
    )?;

    let is_active = draft.is_active && draft.end_date.is_none_or(|end_date| next_run <= end_date);

    Ok(RuleSchedule {
        next_run,
        last_run_at,
        is_active,
    })
}

fn map_rule_row(row: &Row) -> Result<RecurringRule, rusqlite::Error> {
    Ok(RecurringRule {
        id: row.get(0)?,
        user_id: row.get(1)?,
        title: row.get(2)?,
        transaction_type: row.get(3)?,
        amount: row.get(4)?,
        category_id: row.get(5)?,
        frequency_value: row.get(6)?,
        frequency_unit: row.get(7)?,
        start_date: timestamp::column(row, 8)?,
        end_date: timestamp::optional_column(row, 9)?,
        next_run: timestamp::column(row, 10)?,
        last_run_at: timestamp::optional_column(row, 11)?,
        is_active: row.get(12)?,
        notify_on_run: row.get(13)?,
        description: row.get(14)?,
        created_at: timestamp::column(row, 15)?,
    })
}
