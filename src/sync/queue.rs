//! The durable queue of operations waiting to be sent to the server.
//!
//! Operations are kept in insertion order. [mark_status] is the only way an
//! operation's status changes once it is enqueued.

use rusqlite::{Connection, OptionalExtension, Row};
use serde::Serialize;
use serde_json::Value;
use time::OffsetDateTime;

use crate::{
    Error,
    recurring::FrequencyUnit,
    sync::{
        Action, EntityKind, NewOperation, OperationStatus, PendingOperation, is_temp_id, mirror,
        operation::reference, reconcile,
    },
    timestamp,
    transaction::TransactionType,
    user::UserId,
};

const OPERATION_COLUMNS: &str = "seq, local_id, user_id, entity_kind, action, target_id, payload, \
    status, retry_count, last_error, remote_id, next_attempt_at, created_at";

/// A change to an operation's status.
#[derive(Debug, Clone, PartialEq)]
pub enum StatusChange {
    /// A drain has started sending the operation.
    Syncing,
    /// The operation is waiting to be sent again.
    Pending,
    /// The server confirmed the operation.
    Synced {
        /// The server ID of the entity the operation changed.
        remote_id: Option<String>,
    },
    /// The server or the network rejected the operation.
    Failed {
        /// A description of the failure, shown to the user.
        error: String,
        /// When to try again, `None` to wait until the user changes the operation.
        retry_at: Option<OffsetDateTime>,
    },
}

/// The number of unsent operations, for display to the user.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PendingCount {
    /// Operations that have not been attempted or are being sent.
    pub pending: usize,
    /// Operations whose last attempt failed.
    pub error: usize,
}

/// Add an operation to the end of the queue.
///
/// # Errors
/// Returns an [Error::Validation] if the operation is missing a field its
/// entity kind and action need, or refers to a category the client does not know.
pub fn enqueue(
    operation: NewOperation,
    now: OffsetDateTime,
    connection: &Connection,
) -> Result<PendingOperation, Error> {
    validate_operation(&operation, connection)?;

    let enqueued = connection
        .prepare(&format!(
            "INSERT INTO pending_operation
                (local_id, user_id, entity_kind, action, target_id, payload, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             RETURNING {OPERATION_COLUMNS}"
        ))?
        .query_row(
            (
                &operation.local_id,
                operation.user_id,
                operation.entity_kind,
                operation.action,
                &operation.target_id,
                operation.payload.to_string(),
                timestamp::to_millis(now),
            ),
            map_operation_row,
        )?;

    tracing::debug!(
        "Queued {} {} as {}",
        enqueued.action.as_str(),
        enqueued.entity_kind,
        enqueued.local_id
    );

    Ok(enqueued)
}

/// Check the fields an operation needs before it can be enqueued.
///
/// # Errors
/// Returns an [Error::Validation] describing the first problem found.
pub fn validate_operation(operation: &NewOperation, connection: &Connection) -> Result<(), Error> {
    if operation.action != Action::Create && operation.target_id.is_none() {
        return Err(Error::Validation(format!(
            "{} needs the ID of the {} to change",
            operation.action.as_str(),
            operation.entity_kind
        )));
    }

    if operation.action == Action::Delete {
        return Ok(());
    }

    validate_payload(operation.entity_kind, &operation.payload)?;

    if let Some(category_id) = reference(&operation.payload, "categoryId")
        && is_temp_id(&category_id)
        && !is_known_category(&category_id, connection)?
    {
        return Err(Error::Validation(format!(
            "the category {category_id} does not exist"
        )));
    }

    Ok(())
}

/// Check the fields of a `kind` entity in the server's JSON format.
///
/// # Errors
/// Returns an [Error::Validation] describing the first invalid field.
pub fn validate_payload(kind: EntityKind, payload: &Value) -> Result<(), Error> {
    if !payload.is_object() {
        return Err(Error::Validation(format!(
            "the {kind} fields must be a JSON object"
        )));
    }

    match kind {
        EntityKind::Category => require_text(payload, "name"),
        EntityKind::Transaction => {
            require_text(payload, "title")?;
            require_positive_amount(payload)?;
            require_parsed::<TransactionType>(payload, "type")?;
            require_date(payload, "date")
        }
        EntityKind::RecurringRule => {
            require_text(payload, "title")?;
            require_positive_amount(payload)?;
            require_parsed::<TransactionType>(payload, "type")?;
            require_parsed::<FrequencyUnit>(payload, "frequencyUnit")?;
            require_date(payload, "startDate")?;

            match payload.get("frequencyValue").and_then(Value::as_u64) {
                Some(value) if value >= 1 => Ok(()),
                _ => Err(Error::Validation(
                    "frequencyValue must be a whole number of at least 1".to_owned(),
                )),
            }
        }
    }
}

fn require_text(payload: &Value, field: &str) -> Result<(), Error> {
    match payload.get(field).and_then(Value::as_str) {
        Some(text) if !text.trim().is_empty() => Ok(()),
        _ => Err(Error::Validation(format!("{field} cannot be empty"))),
    }
}

fn require_positive_amount(payload: &Value) -> Result<(), Error> {
    match payload.get("amount").and_then(Value::as_f64) {
        Some(amount) if amount > 0.0 => Ok(()),
        _ => Err(Error::Validation(
            "amount must be greater than zero".to_owned(),
        )),
    }
}

fn require_parsed<T: serde::de::DeserializeOwned>(payload: &Value, field: &str) -> Result<(), Error> {
    payload
        .get(field)
        .cloned()
        .and_then(|value| serde_json::from_value::<T>(value).ok())
        .map(|_| ())
        .ok_or_else(|| Error::Validation(format!("{field} is missing or invalid")))
}

fn require_date(payload: &Value, field: &str) -> Result<(), Error> {
    payload
        .get(field)
        .and_then(Value::as_str)
        .and_then(|text| {
            OffsetDateTime::parse(text, &time::format_description::well_known::Rfc3339).ok()
        })
        .map(|_| ())
        .ok_or_else(|| Error::Validation(format!("{field} must be an RFC 3339 timestamp")))
}

fn is_known_category(category_id: &str, connection: &Connection) -> Result<bool, Error> {
    if reconcile::resolve(category_id, connection)?.is_some() {
        return Ok(true);
    }

    Ok(mirror::get(EntityKind::Category, category_id, connection)?
        .is_some_and(|category| !category.is_deleted))
}

/// Get the operations of `user_id` that still need to be sent, oldest first.
///
/// This includes failed operations, whether or not they are ready to retry.
pub fn list_pending(user_id: UserId, connection: &Connection) -> Result<Vec<PendingOperation>, Error> {
    connection
        .prepare(&format!(
            "SELECT {OPERATION_COLUMNS} FROM pending_operation
             WHERE user_id = ?1 AND status IN ('pending', 'error')
             ORDER BY seq ASC"
        ))?
        .query_map([user_id], map_operation_row)?
        .map(|maybe_operation| maybe_operation.map_err(Error::from))
        .collect()
}

/// Get an operation by its local ID.
pub fn get_operation(
    local_id: &str,
    connection: &Connection,
) -> Result<Option<PendingOperation>, Error> {
    connection
        .prepare(&format!(
            "SELECT {OPERATION_COLUMNS} FROM pending_operation WHERE local_id = ?1"
        ))?
        .query_row([local_id], map_operation_row)
        .optional()
        .map_err(Error::from)
}

/// Get the unsent CREATE operation that produced the entity with the temporary ID `temp_id`.
pub fn find_pending_create(
    temp_id: &str,
    connection: &Connection,
) -> Result<Option<PendingOperation>, Error> {
    get_operation(temp_id, connection).map(|operation| {
        operation.filter(|operation| {
            operation.action == Action::Create && operation.status != OperationStatus::Synced
        })
    })
}

/// Change the status of an operation.
///
/// Marking an operation that is already synced as synced again does nothing.
///
/// # Errors
/// Returns an [Error::NotFound] if there is no operation with `local_id`.
pub fn mark_status(
    local_id: &str,
    change: StatusChange,
    connection: &Connection,
) -> Result<(), Error> {
    let rows_affected = match change {
        StatusChange::Syncing => connection.execute(
            "UPDATE pending_operation SET status = 'syncing' WHERE local_id = ?1",
            [local_id],
        )?,
        StatusChange::Pending => connection.execute(
            "UPDATE pending_operation SET status = 'pending', next_attempt_at = NULL
             WHERE local_id = ?1",
            [local_id],
        )?,
        StatusChange::Synced { remote_id } => {
            let Some(operation) = get_operation(local_id, connection)? else {
                return Err(Error::NotFound);
            };

            if operation.status == OperationStatus::Synced {
                return Ok(());
            }

            connection.execute(
                "UPDATE pending_operation
                 SET status = 'synced', remote_id = ?1, last_error = NULL, next_attempt_at = NULL
                 WHERE local_id = ?2",
                (remote_id, local_id),
            )?
        }
        StatusChange::Failed { error, retry_at } => connection.execute(
            "UPDATE pending_operation
             SET status = 'error', retry_count = retry_count + 1, last_error = ?1,
                next_attempt_at = ?2
             WHERE local_id = ?3",
            (error, retry_at.map(timestamp::to_millis), local_id),
        )?,
    };

    if rows_affected == 0 {
        return Err(Error::NotFound);
    }

    Ok(())
}

/// Replace the payload of an unsent operation and make it eligible for sending again.
///
/// # Errors
/// Returns an [Error::NotFound] if there is no unsent operation with `local_id`.
pub fn replace_payload(local_id: &str, payload: &Value, connection: &Connection) -> Result<(), Error> {
    let rows_affected = connection.execute(
        "UPDATE pending_operation
         SET payload = ?1, status = 'pending', next_attempt_at = NULL
         WHERE local_id = ?2 AND status IN ('pending', 'error')",
        (payload.to_string(), local_id),
    )?;

    if rows_affected == 0 {
        return Err(Error::NotFound);
    }

    Ok(())
}

/// Delete operations the server has confirmed. Returns the number deleted.
pub fn purge_synced(connection: &Connection) -> Result<usize, Error> {
    connection
        .execute("DELETE FROM pending_operation WHERE status = 'synced'", ())
        .map_err(Error::from)
}

/// Return operations left mid-send by an interrupted drain to the queue.
///
/// Returns the number of operations reset.
pub fn resume_interrupted(connection: &Connection) -> Result<usize, Error> {
    let resumed = connection.execute(
        "UPDATE pending_operation SET status = 'pending' WHERE status = 'syncing'",
        (),
    )?;

    if resumed > 0 {
        tracing::warn!("Resuming {resumed} operations from an interrupted sync");
    }

    Ok(resumed)
}

/// Count the unsent operations of `user_id`.
pub fn pending_count(user_id: UserId, connection: &Connection) -> Result<PendingCount, Error> {
    connection
        .query_row(
            "SELECT
                COUNT(*) FILTER (WHERE status IN ('pending', 'syncing')),
                COUNT(*) FILTER (WHERE status = 'error')
             FROM pending_operation WHERE user_id = ?1",
            [user_id],
            |row| {
                Ok(PendingCount {
                    pending: row.get::<_, u32>(0)? as usize,
                    error: row.get::<_, u32>(1)? as usize,
                })
            },
        )
        .map_err(Error::from)
}

/// Drop an unsent operation and undo its local effect where possible.
///
/// Discarding a CREATE removes the entity it produced from the mirror along
/// with any operations on that entity. Entities and operations that use a
/// discarded category are kept without a category. Discarding a DELETE shows
/// the entity again. Discarding an UPDATE keeps the local change in the
/// mirror until the next refresh from the server.
///
/// # Errors
/// Returns an [Error::NotFound] if there is no operation with `local_id`
/// waiting to be sent. Operations that a drain is sending cannot be discarded.
pub fn discard(local_id: &str, connection: &Connection) -> Result<PendingOperation, Error> {
    let operation = get_operation(local_id, connection)?
        .filter(|operation| {
            matches!(operation.status, OperationStatus::Pending | OperationStatus::Error)
        })
        .ok_or(Error::NotFound)?;

    let transaction = connection.unchecked_transaction()?;

    transaction.execute(
        "DELETE FROM pending_operation WHERE local_id = ?1",
        [local_id],
    )?;

    match (operation.action, &operation.target_id) {
        (Action::Create, _) => {
            transaction.execute(
                "DELETE FROM pending_operation WHERE target_id = ?1 AND status != 'synced'",
                [local_id],
            )?;
            mirror::remove(operation.entity_kind, local_id, &transaction)?;

            if operation.entity_kind == EntityKind::Category {
                reconcile::clear_category_references(local_id, &transaction)?;
            }
        }
        (Action::Delete, Some(target_id)) => {
            mirror::restore(operation.entity_kind, target_id, &transaction)?;
        }
        _ => {}
    }

    transaction.commit()?;

    tracing::info!(
        "Discarded {} {} operation {local_id}",
        operation.action.as_str(),
        operation.entity_kind
    );

    Ok(operation)
}

fn map_operation_row(row: &Row) -> Result<PendingOperation, rusqlite::Error> {
    let payload: String = row.get(6)?;
    let payload = serde_json::from_str(&payload).map_err(|error| {
        rusqlite::Error::FromSqlConversionFailure(6, rusqlite::types::Type::Text, Box::new(error))
    })?;

    Ok(PendingOperation {
        seq: row.get(0)?,
        local_id: row.get(1)?,
        user_id: row.get(2)?,
        entity_kind: row.get(3)?,
        action: row.get(4)?,
        target_id: row.get(5)?,
        payload,
        status: row.get(7)?,
        retry_count: row.get(8)?,
        last_error: row.get(9)?,
        remote_id: row.get(10)?,
        next_attempt_at: timestamp::optional_column(row, 11)?,
        created_at: timestamp::column(row, 12)?,
    })
}
