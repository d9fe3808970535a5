//! Database setup for the client's local store.

use rusqlite::Connection;

use crate::{Error, sync::EntityKind};

/// Create the tables for the local mirror, the operation queue and the ID mapping.
///
/// Safe to call on an existing database, tables that already exist are left alone.
///
/// # Errors
/// Returns an error if a table cannot be created.
pub fn initialize_client_db(connection: &Connection) -> Result<(), Error> {
    let transaction = connection.unchecked_transaction()?;

    for kind in EntityKind::ALL {
        create_mirror_table(kind, &transaction)?;
    }

    create_pending_operation_table(&transaction)?;
    create_id_mapping_table(&transaction)?;

    transaction.commit()?;

    Ok(())
}

fn create_mirror_table(kind: EntityKind, connection: &Connection) -> Result<(), rusqlite::Error> {
    let table = kind.mirror_table();

    connection.execute(
        &format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                id TEXT PRIMARY KEY,
                user_id INTEGER NOT NULL,
                category_id TEXT,
                data TEXT NOT NULL,
                is_pending INTEGER NOT NULL DEFAULT 0,
                is_deleted INTEGER NOT NULL DEFAULT 0
            )"
        ),
        (),
    )?;

    connection.execute(
        &format!("CREATE INDEX IF NOT EXISTS idx_{table}_category ON {table}(category_id);"),
        (),
    )?;

    Ok(())
}

fn create_pending_operation_table(connection: &Connection) -> Result<(), rusqlite::Error> {
    connection.execute(
        "CREATE TABLE IF NOT EXISTS pending_operation (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                local_id TEXT NOT NULL UNIQUE,
                user_id INTEGER NOT NULL,
                entity_kind TEXT NOT NULL,
                action TEXT NOT NULL,
                target_id TEXT,
                payload TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                retry_count INTEGER NOT NULL DEFAULT 0,
                last_error TEXT,
                remote_id TEXT,
                next_attempt_at INTEGER,
                created_at INTEGER NOT NULL
            )",
        (),
    )?;

    connection.execute(
        "CREATE INDEX IF NOT EXISTS idx_pending_operation_user_status
            ON pending_operation(user_id, status, seq);",
        (),
    )?;

    Ok(())
}

fn create_id_mapping_table(connection: &Connection) -> Result<(), rusqlite::Error> {
    connection.execute(
        "CREATE TABLE IF NOT EXISTS id_mapping (
                temp_id TEXT PRIMARY KEY,
                entity_kind TEXT NOT NULL,
                remote_id TEXT NOT NULL,
                resolved_at INTEGER NOT NULL
            )",
        (),
    )?;

    Ok(())
}
