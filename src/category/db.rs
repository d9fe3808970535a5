//! Database operations for categories.

use rusqlite::{Connection, OptionalExtension, Row};

use crate::{
    Error,
    category::{Category, CategoryId, CategoryName, NewCategory},
    user::UserId,
};

/// Create a category for `user_id` and return it with its generated ID.
///
/// # Errors
/// This function will return a:
/// - [Error::DuplicateCategoryName] if the user already has a category with the same name,
/// - or [Error::SqlError] if there is some other SQL error.
pub fn create_category(
    user_id: UserId,
    category: NewCategory,
    connection: &Connection,
) -> Result<Category, Error> {
    connection
        .prepare(
            "INSERT INTO category (user_id, name, color, icon, is_default)
             VALUES (?1, ?2, ?3, ?4, ?5)
             RETURNING id, user_id, name, color, icon, is_default",
        )?
        .query_row(
            (
                user_id,
                category.name.as_ref(),
                &category.color,
                &category.icon,
                category.is_default,
            ),
            map_row,
        )
        .map_err(|error| map_duplicate_name(error, &category.name))
}

/// Retrieve a single category owned by `user_id`.
///
/// # Errors
/// Returns an [Error::NotFound] if the category does not exist or belongs to another user.
pub fn get_category(
    user_id: UserId,
    category_id: CategoryId,
    connection: &Connection,
) -> Result<Category, Error> {
    connection
        .prepare(
            "SELECT id, user_id, name, color, icon, is_default FROM category
             WHERE id = ?1 AND user_id = ?2",
        )?
        .query_row((category_id, user_id), map_row)
        .map_err(Error::from)
}

/// Find the category owned by `user_id` called `name`, if any.
pub fn get_category_by_name(
    user_id: UserId,
    name: &str,
    connection: &Connection,
) -> Result<Option<Category>, Error> {
    connection
        .prepare(
            "SELECT id, user_id, name, color, icon, is_default FROM category
             WHERE user_id = ?1 AND name = ?2",
        )?
        .query_row((user_id, name.trim()), map_row)
        .optional()
        .map_err(Error::from)
}

/// Retrieve all categories owned by `user_id` ordered alphabetically by name.
pub fn get_categories(user_id: UserId, connection: &Connection) -> Result<Vec<Category>, Error> {
    connection
        .prepare(
            "SELECT id, user_id, name, color, icon, is_default FROM category
             WHERE user_id = ?1 ORDER BY name ASC",
        )?
        .query_map([user_id], map_row)?
        .map(|maybe_category| maybe_category.map_err(Error::from))
        .collect()
}

/// Whether `category_id` refers to a category owned by `user_id`.
pub fn category_belongs_to_user(
    user_id: UserId,
    category_id: CategoryId,
    connection: &Connection,
) -> Result<bool, Error> {
    connection
        .query_row(
            "SELECT EXISTS(SELECT 1 FROM category WHERE id = ?1 AND user_id = ?2)",
            (category_id, user_id),
            |row| row.get(0),
        )
        .map_err(Error::from)
}

/// Overwrite a category with `category`.
///
/// # Errors
/// This function will return a:
/// - [Error::UpdateMissingCategory] if the category does not exist or belongs to another user,
/// - or [Error::DuplicateCategoryName] if the new name is taken by another category.
pub fn update_category(
    user_id: UserId,
    category_id: CategoryId,
    category: NewCategory,
    connection: &Connection,
) -> Result<Category, Error> {
    connection
        .prepare(
            "UPDATE category SET name = ?1, color = ?2, icon = ?3, is_default = ?4
             WHERE id = ?5 AND user_id = ?6
             RETURNING id, user_id, name, color, icon, is_default",
        )?
        .query_row(
            (
                category.name.as_ref(),
                &category.color,
                &category.icon,
                category.is_default,
                category_id,
                user_id,
            ),
            map_row,
        )
        .map_err(|error| match error {
            rusqlite::Error::QueryReturnedNoRows => Error::UpdateMissingCategory,
            error => map_duplicate_name(error, &category.name),
        })
}

/// Delete a category. Transactions and rules in the category become uncategorized.
///
/// # Errors
/// Returns an [Error::DeleteMissingCategory] if the category does not exist or belongs to another user.
pub fn delete_category(
    user_id: UserId,
    category_id: CategoryId,
    connection: &Connection,
) -> Result<(), Error> {
    let rows_affected = connection.execute(
        "DELETE FROM category WHERE id = ?1 AND user_id = ?2",
        (category_id, user_id),
    )?;

    if rows_affected == 0 {
        return Err(Error::DeleteMissingCategory);
    }

    Ok(())
}

/// Initialize the category table and indexes.
pub fn create_category_table(connection: &Connection) -> Result<(), rusqlite::Error> {
    connection.execute_batch(
        "CREATE TABLE IF NOT EXISTS category (
            id INTEGER PRIMARY KEY,
            user_id INTEGER NOT NULL,
            name TEXT NOT NULL,
            color TEXT NOT NULL,
            icon TEXT NOT NULL,
            is_default INTEGER NOT NULL DEFAULT 0,
            UNIQUE(user_id, name)
        );

        CREATE INDEX IF NOT EXISTS idx_category_user ON category(user_id);",
    )?;

    Ok(())
}

fn map_duplicate_name(error: rusqlite::Error, name: &CategoryName) -> Error {
    match error {
        rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error {
                code: _,
                extended_code: rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE,
            },
            _,
        ) => Error::DuplicateCategoryName(name.to_string()),
        error => error.into(),
    }
}

fn map_row(row: &Row) -> Result<Category, rusqlite::Error> {
    let raw_name: String = row.get(2)?;

    Ok(Category {
        id: row.get(0)?,
        user_id: row.get(1)?,
        name: CategoryName::new_unchecked(&raw_name),
        color: row.get(3)?,
        icon: row.get(4)?,
        is_default: row.get(5)?,
    })
}
