//! Filtered listing of transactions.

use rusqlite::{Connection, ToSql, params_from_iter};
use serde::Deserialize;
use time::OffsetDateTime;

use crate::{
    Error,
    category::CategoryId,
    timestamp,
    transaction::{Transaction, TransactionType, map_transaction_row},
    user::UserId,
};

/// Filters for listing transactions. Every filter is optional.
#[derive(Debug, Default, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionQuery {
    /// Only include transactions on or after this time.
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub start_date: Option<OffsetDateTime>,
    /// Only include transactions on or before this time.
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub end_date: Option<OffsetDateTime>,
    /// Only include income or only include expenses.
    #[serde(default, rename = "type")]
    pub transaction_type: Option<TransactionType>,
    /// Only include transactions in this category.
    #[serde(default)]
    pub category_id: Option<CategoryId>,
    /// The maximum number of transactions to return.
    #[serde(default)]
    pub limit: Option<u32>,
    /// The number of matching transactions to skip.
    #[serde(default)]
    pub offset: Option<u32>,
}

/// Get the transactions owned by `user_id` that match `query`, newest first.
///
/// # Errors
/// This function will return a [Error::SqlError] there is some SQL error.
pub fn query_transactions(
    user_id: UserId,
    query: &TransactionQuery,
    connection: &Connection,
) -> Result<Vec<Transaction>, Error> {
    let mut clauses = vec!["user_id = ?"];
    let mut params: Vec<Box<dyn ToSql>> = vec![Box::new(user_id)];

    if let Some(start_date) = query.start_date {
        clauses.push("date >= ?");
        params.push(Box::new(timestamp::to_millis(start_date)));
    }

    if let Some(end_date) = query.end_date {
        clauses.push("date <= ?");
        params.push(Box::new(timestamp::to_millis(end_date)));
    }

    if let Some(transaction_type) = query.transaction_type {
        clauses.push("type = ?");
        params.push(Box::new(transaction_type));
    }

    if let Some(category_id) = query.category_id {
        clauses.push("category_id = ?");
        params.push(Box::new(category_id));
    }

    // SQLite treats a negative limit as no limit.
    params.push(Box::new(query.limit.map_or(-1, i64::from)));
    params.push(Box::new(i64::from(query.offset.unwrap_or(0))));

    let sql = format!(
        "SELECT id, user_id, title, type, amount, date, description, category_id
         FROM \"transaction\"
         WHERE {}
         ORDER BY date DESC, id DESC
         LIMIT ? OFFSET ?",
        clauses.join(" AND ")
    );

    connection
        .prepare(&sql)?
        .query_map(params_from_iter(params.iter()), map_transaction_row)?
        .map(|maybe_transaction| maybe_transaction.map_err(Error::from))
        .collect()
}
