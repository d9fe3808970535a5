//! Database setup for the server's record store.

use rusqlite::{
    Connection,
    types::{FromSqlError, ValueRef},
};

use crate::{
    Error, category::create_category_table, recurring::create_recurring_rule_table,
    transaction::create_transaction_table, user::create_user_table,
};

/// A stored enum value that does not match any known variant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("\"{0}\" is not a recognised value")]
pub struct UnknownVariant(pub String);

/// Parse a TEXT column into an enum that implements [std::str::FromStr].
pub(crate) fn parse_text_column<T>(value: ValueRef<'_>) -> Result<T, FromSqlError>
where
    T: std::str::FromStr<Err = UnknownVariant>,
{
    value
        .as_str()?
        .parse()
        .map_err(|error| FromSqlError::Other(Box::new(error)))
}

/// Create the tables for the server's domain models.
///
/// Safe to call on an existing database, tables that already exist are left alone.
///
/// # Errors
/// Returns an error if a table cannot be created.
pub fn initialize(connection: &Connection) -> Result<(), Error> {
    connection.execute_batch("PRAGMA foreign_keys = ON;")?;

    let transaction = connection.unchecked_transaction()?;

    create_user_table(&transaction)?;
    create_category_table(&transaction)?;
    create_transaction_table(&transaction)?;
    create_recurring_rule_table(&transaction)?;

    transaction.commit()?;

    Ok(())
}
