//! Defines the core data models and database queries for transactions.

use std::{fmt::Display, str::FromStr};

use rusqlite::{
    Connection, Row, ToSql,
    types::{FromSql, FromSqlResult, ToSqlOutput, ValueRef},
};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::{
    DatabaseId, Error,
    category::{CategoryId, category_belongs_to_user},
    db::{UnknownVariant, parse_text_column},
    timestamp,
    user::UserId,
};

// ============================================================================
// MODELS
// ============================================================================

/// Database identifier for a transaction.
pub type TransactionId = DatabaseId;

/// Whether money was earned or spent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TransactionType {
    /// Money earned, e.g. wages.
    Income,
    /// Money spent, e.g. rent.
    Expense,
}

impl TransactionType {
    /// The name used for this type on the wire and in the database.
    pub fn as_str(self) -> &'static str {
        match self {
            TransactionType::Income => "INCOME",
            TransactionType::Expense => "EXPENSE",
        }
    }
}

impl Display for TransactionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for TransactionType {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "INCOME" => Ok(TransactionType::Income),
            "EXPENSE" => Ok(TransactionType::Expense),
            other => Err(UnknownVariant(other.to_owned())),
        }
    }
}

impl ToSql for TransactionType {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for TransactionType {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        parse_text_column(value)
    }
}

/// An expense or income, i.e. an event where money was either spent or earned.
///
/// To create a new `Transaction`, use [Transaction::build].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    /// The ID of the transaction.
    pub id: TransactionId,
    /// The user that owns the transaction.
    #[serde(skip_serializing, default)]
    pub user_id: UserId,
    /// A short name for the transaction, e.g. "Rent".
    pub title: String,
    /// Whether the transaction is income or an expense.
    #[serde(rename = "type")]
    pub transaction_type: TransactionType,
    /// The amount of money spent or earned, always positive.
    pub amount: f64,
    /// When the transaction happened.
    #[serde(with = "time::serde::rfc3339")]
    pub date: OffsetDateTime,
    /// A text description of what the transaction was for.
    pub description: String,
    /// The ID of the category the transaction belongs to.
    pub category_id: Option<CategoryId>,
}

impl Transaction {
    /// Create a new transaction.
    ///
    /// Shortcut for [TransactionBuilder] for discoverability.
    pub fn build(
        title: &str,
        transaction_type: TransactionType,
        amount: f64,
        date: OffsetDateTime,
    ) -> TransactionBuilder {
        TransactionBuilder {
            title: title.to_owned(),
            transaction_type,
            amount,
            date,
            description: String::new(),
            category_id: None,
        }
    }
}

/// A builder for creating [Transaction] instances.
///
/// # Examples
///
/// ```ignore
/// use time::macros::datetime;
///
/// use crate::transaction::{Transaction, TransactionType};
///
/// let builder = Transaction::build(
///         "Rent",
///         TransactionType::Expense,
///         450.0,
///         datetime!(2025-01-15 09:00 UTC),
///     )
///     .description("Weekly rent")
///     .category_id(Some(3));
/// ```
#[derive(Debug, PartialEq, Clone)]
pub struct TransactionBuilder {
    /// A short name for the transaction.
    ///
    /// Together with the amount, category and day, the title forms the
    /// fingerprint used to detect recurring transactions that were already
    /// created.
    pub title: String,

    /// Whether the transaction is income or an expense.
    pub transaction_type: TransactionType,

    /// The monetary amount of the transaction.
    ///
    /// Must be greater than zero, the direction of the money is given by
    /// [TransactionBuilder::transaction_type].
    pub amount: f64,

    /// When the transaction occurred.
    pub date: OffsetDateTime,

    /// A human-readable description of the transaction, empty by default.
    pub description: String,

    /// The category of the transaction, e.g. "Groceries", "Transport", "Rent".
    pub category_id: Option<CategoryId>,
}

impl TransactionBuilder {
    /// Set the description for the transaction.
    pub fn description(mut self, description: &str) -> Self {
        self.description = description.to_owned();
        self
    }

    /// Set the category id for the transaction.
    pub fn category_id(mut self, category_id: Option<CategoryId>) -> Self {
        self.category_id = category_id;
        self
    }

    /// Check the fields that do not need the database.
    ///
    /// # Errors
    /// Returns an [Error::Validation] if the title is empty or the amount is not a positive number.
    pub fn validate(&self) -> Result<(), Error> {
        if self.title.trim().is_empty() {
            return Err(Error::Validation("title cannot be empty".to_owned()));
        }

        if !self.amount.is_finite() || self.amount <= 0.0 {
            return Err(Error::Validation(format!(
                "amount must be greater than zero, got {}",
                self.amount
            )));
        }

        Ok(())
    }
}

// ============================================================================
// DATABASE FUNCTIONS
// ============================================================================

/// Check that `builder` is valid and that its category belongs to `user_id`.
fn check_builder(
    user_id: UserId,
    builder: &TransactionBuilder,
    connection: &Connection,
) -> Result<(), Error> {
    builder.validate()?;

    if let Some(category_id) = builder.category_id
        && !category_belongs_to_user(user_id, category_id, connection)?
    {
        return Err(Error::InvalidCategory(Some(category_id)));
    }

    Ok(())
}

/// Create a new transaction for `user_id` in the database from a builder.
///
/// # Errors
/// This function will return a:
/// - [Error::Validation] if the title is empty or the amount is not positive,
/// - or [Error::InvalidCategory] if the category ID does not refer to one of the user's categories,
/// - or [Error::SqlError] if there is some other SQL error.
pub fn create_transaction(
    user_id: UserId,
    builder: TransactionBuilder,
    connection: &Connection,
) -> Result<Transaction, Error> {
    check_builder(user_id, &builder, connection)?;

    let transaction = connection
        .prepare(
            "INSERT INTO \"transaction\" (user_id, title, type, amount, date, description, category_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             RETURNING id, user_id, title, type, amount, date, description, category_id",
        )?
        .query_row(
            (
                user_id,
                builder.title.trim(),
                builder.transaction_type,
                builder.amount,
                timestamp::to_millis(builder.date),
                &builder.description,
                builder.category_id,
            ),
            map_transaction_row,
        )?;

    Ok(transaction)
}

/// Retrieve a transaction owned by `user_id` by its `id`.
///
/// # Errors
/// This function will return a:
/// - [Error::NotFound] if `id` does not refer to one of the user's transactions,
/// - or [Error::SqlError] there is some other SQL error.
pub fn get_transaction(
    user_id: UserId,
    id: TransactionId,
    connection: &Connection,
) -> Result<Transaction, Error> {
    let transaction = connection
        .prepare(
            "SELECT id, user_id, title, type, amount, date, description, category_id
             FROM \"transaction\" WHERE id = ?1 AND user_id = ?2",
        )?
        .query_row((id, user_id), map_transaction_row)?;

    Ok(transaction)
}

/// Overwrite a transaction with the contents of `builder`.
///
/// # Errors
/// This function will return a:
/// - [Error::UpdateMissingTransaction] if the transaction does not exist,
/// - or any of the validation errors of [create_transaction].
pub fn update_transaction(
    user_id: UserId,
    id: TransactionId,
    builder: TransactionBuilder,
    connection: &Connection,
) -> Result<Transaction, Error> {
    check_builder(user_id, &builder, connection)?;

    connection
        .prepare(
            "UPDATE \"transaction\"
             SET title = ?1, type = ?2, amount = ?3, date = ?4, description = ?5, category_id = ?6
             WHERE id = ?7 AND user_id = ?8
             RETURNING id, user_id, title, type, amount, date, description, category_id",
        )?
        .query_row(
            (
                builder.title.trim(),
                builder.transaction_type,
                builder.amount,
                timestamp::to_millis(builder.date),
                &builder.description,
                builder.category_id,
                id,
                user_id,
            ),
            map_transaction_row,
        )
        .map_err(|error| match error {
            rusqlite::Error::QueryReturnedNoRows => Error::UpdateMissingTransaction,
            error => error.into(),
        })
}

/// Delete a transaction owned by `user_id`.
///
/// # Errors
/// Returns an [Error::DeleteMissingTransaction] if the transaction does not exist.
pub fn delete_transaction(
    user_id: UserId,
    id: TransactionId,
    connection: &Connection,
) -> Result<(), Error> {
    let rows_affected = connection.execute(
        "DELETE FROM \"transaction\" WHERE id = ?1 AND user_id = ?2",
        (id, user_id),
    )?;

    if rows_affected == 0 {
        return Err(Error::DeleteMissingTransaction);
    }

    Ok(())
}

/// Get the total number of transactions in the database.
///
/// # Errors
/// This function will return a [Error::SqlError] there is some SQL error.
#[cfg(test)]
pub fn count_transactions(connection: &Connection) -> Result<u32, Error> {
    connection
        .query_row("SELECT COUNT(id) FROM \"transaction\";", [], |row| {
            row.get(0)
        })
        .map_err(|error| error.into())
}

/// Create the transaction table in the database.
///
/// # Errors
/// Returns an error if the table cannot be created or if there is an SQL error.
pub fn create_transaction_table(connection: &Connection) -> Result<(), rusqlite::Error> {
    connection.execute(
        "CREATE TABLE IF NOT EXISTS \"transaction\" (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                title TEXT NOT NULL,
                type TEXT NOT NULL,
                amount REAL NOT NULL,
                date INTEGER NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                category_id INTEGER,
                FOREIGN KEY(category_id) REFERENCES category(id) ON UPDATE CASCADE ON DELETE SET NULL
                )",
        (),
    )?;

    // Used by both the list filters and the duplicate check for recurring rules.
    connection.execute(
        "CREATE INDEX IF NOT EXISTS idx_transaction_user_date ON \"transaction\"(user_id, date);",
        (),
    )?;

    Ok(())
}

/// Map a database row to a Transaction.
pub fn map_transaction_row(row: &Row) -> Result<Transaction, rusqlite::Error> {
    Ok(Transaction {
        id: row.get(0)?,
        user_id: row.get(1)?,
        title: row.get(2)?,
        transaction_type: row.get(3)?,
        amount: row.get(4)?,
        date: timestamp::column(row, 5)?,
        description: row.get(6)?,
        category_id: row.get(7)?,
    })
}

// ============================================================================
// TESTS
// ============================================================================
