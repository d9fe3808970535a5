//! Replaces temporary IDs with the IDs the server assigns.
//!
//! When the server confirms a CREATE, every reference to the entity's
//! temporary ID in the mirror and in the queue is rewritten to the server ID
//! inside one SQL transaction, so that a crash can never leave a mix of both.

use rusqlite::{Connection, OptionalExtension};
use serde_json::Value;
use time::OffsetDateTime;

use crate::{
    Error,
    sync::{
        Action, EntityKind, PendingOperation, is_temp_id,
        mirror::{self, MirrorEntity, entity_id, normalize_ids},
        queue::{self, StatusChange},
    },
    timestamp,
};

/// Get the server ID that replaced the temporary ID `temp_id`, if the server has confirmed it.
pub fn resolve(temp_id: &str, connection: &Connection) -> Result<Option<String>, Error> {
    connection
        .query_row(
            "SELECT remote_id FROM id_mapping WHERE temp_id = ?1",
            [temp_id],
            |row| row.get(0),
        )
        .optional()
        .map_err(Error::from)
}

/// Replace temporary IDs in `operation` that the server has since confirmed.
///
/// Returns the first temporary ID that is still unresolved. An operation
/// cannot be sent while it refers to a category or targets an entity the
/// server has not confirmed yet.
pub fn resolve_references(
    operation: &mut PendingOperation,
    connection: &Connection,
) -> Result<Option<String>, Error> {
    if let Some(category_id) = operation.category_reference()
        && is_temp_id(&category_id)
    {
        match resolve(&category_id, connection)? {
            Some(remote_id) => {
                if let Some(payload) = operation.payload.as_object_mut() {
                    payload.insert("categoryId".to_owned(), Value::String(remote_id));
                }
            }
            None => return Ok(Some(category_id)),
        }
    }

    if let Some(target_id) = operation.target_id.clone()
        && is_temp_id(&target_id)
    {
        match resolve(&target_id, connection)? {
            Some(remote_id) => operation.target_id = Some(remote_id),
            None => return Ok(Some(target_id)),
        }
    }

    Ok(None)
}

/// Record that the server created the entity of `operation` as `remote_entity`.
///
/// Returns the confirmed entity as stored in the mirror.
///
/// # Errors
/// Returns an [Error::Validation] if `remote_entity` has no ID.
pub fn confirm_create(
    operation: &PendingOperation,
    remote_entity: &Value,
    now: OffsetDateTime,
    connection: &Connection,
) -> Result<MirrorEntity, Error> {
    let remote_entity = normalize_ids(remote_entity.clone());
    let remote_id = entity_id(&remote_entity).ok_or_else(|| {
        Error::Validation(format!(
            "the server did not return an ID for {}",
            operation.local_id
        ))
    })?;
    let temp_id = operation.local_id.as_str();

    let transaction = connection.unchecked_transaction()?;

    transaction.execute(
        "INSERT INTO id_mapping (temp_id, entity_kind, remote_id, resolved_at)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(temp_id) DO UPDATE SET remote_id = excluded.remote_id",
        (
            temp_id,
            operation.entity_kind,
            &remote_id,
            timestamp::to_millis(now),
        ),
    )?;

    let latest_change = latest_local_change(temp_id, &transaction)?;
    mirror::remove(operation.entity_kind, temp_id, &transaction)?;
    let mut confirmed =
        mirror::upsert_confirmed(operation.user_id, operation.entity_kind, &remote_entity, &transaction)?;

    // Changes queued while the CREATE was in flight stay visible until they are sent.
    match latest_change {
        Some((Action::Update, payload)) => {
            confirmed =
                mirror::apply_pending_update(operation.entity_kind, &remote_id, &payload, &transaction)?;
        }
        Some((Action::Delete, _)) => {
            mirror::mark_deleted(operation.entity_kind, &remote_id, &transaction)?;
            confirmed.is_pending = true;
            confirmed.is_deleted = true;
        }
        _ => {}
    }

    if operation.entity_kind == EntityKind::Category {
        rewrite_category_references(temp_id, &remote_id, &transaction)?;
    }

    transaction.execute(
        "UPDATE pending_operation SET target_id = ?1
         WHERE target_id = ?2 AND status != 'synced'",
        (&remote_id, temp_id),
    )?;

    queue::mark_status(
        temp_id,
        StatusChange::Synced {
            remote_id: Some(remote_id.clone()),
        },
        &transaction,
    )?;

    transaction.commit()?;

    tracing::debug!("Resolved {temp_id} to {remote_id}");

    Ok(confirmed)
}

/// Get the unsent operations that wait on the server confirming `temp_id`,
/// either by targeting that entity or by referring to it as their category.
pub fn dependents(temp_id: &str, connection: &Connection) -> Result<Vec<String>, Error> {
    connection
        .prepare(
            "SELECT local_id FROM pending_operation
             WHERE local_id != ?1 AND status != 'synced'
                AND (target_id = ?1 OR json_extract(payload, '$.categoryId') = ?1)
             ORDER BY seq ASC",
        )?
        .query_map([temp_id], |row| row.get(0))?
        .map(|maybe_id| maybe_id.map_err(Error::from))
        .collect()
}

fn latest_local_change(
    temp_id: &str,
    connection: &Connection,
) -> Result<Option<(Action, Value)>, Error> {
    connection
        .query_row(
            "SELECT action, payload FROM pending_operation
             WHERE target_id = ?1 AND status != 'synced'
             ORDER BY seq DESC LIMIT 1",
            [temp_id],
            |row| Ok((row.get::<_, Action>(0)?, row.get::<_, String>(1)?)),
        )
        .optional()?
        .map(|(action, payload)| Ok::<_, Error>((action, serde_json::from_str(&payload)?)))
        .transpose()
}

fn rewrite_category_references(
    temp_id: &str,
    remote_id: &str,
    connection: &Connection,
) -> Result<(), Error> {
    for kind in EntityKind::ALL.into_iter().filter(|kind| kind.has_category()) {
        connection.execute(
            &format!(
                "UPDATE {} SET category_id = ?1, data = json_set(data, '$.categoryId', ?1)
                 WHERE category_id = ?2",
                kind.mirror_table()
            ),
            (remote_id, temp_id),
        )?;
    }

    connection.execute(
        "UPDATE pending_operation SET payload = json_set(payload, '$.categoryId', ?1)
         WHERE json_extract(payload, '$.categoryId') = ?2 AND status != 'synced'",
        (remote_id, temp_id),
    )?;

    Ok(())
}

/// Record that the server accepted the update in `operation`.
///
/// The mirror keeps the local version if a later operation changes the same
/// entity again.
pub fn confirm_update(
    operation: &PendingOperation,
    remote_entity: &Value,
    connection: &Connection,
) -> Result<(), Error> {
    let transaction = connection.unchecked_transaction()?;

    if !has_later_changes(operation, &transaction)? {
        mirror::upsert_confirmed(
            operation.user_id,
            operation.entity_kind,
            remote_entity,
            &transaction,
        )?;
    }

    queue::mark_status(
        &operation.local_id,
        StatusChange::Synced {
            remote_id: operation.target_id.clone(),
        },
        &transaction,
    )?;

    transaction.commit()?;

    Ok(())
}

/// Record that the entity targeted by `operation` no longer exists on the server.
pub fn confirm_delete(operation: &PendingOperation, connection: &Connection) -> Result<(), Error> {
    let transaction = connection.unchecked_transaction()?;

    if let Some(target_id) = &operation.target_id {
        mirror::remove(operation.entity_kind, target_id, &transaction)?;

        if operation.entity_kind == EntityKind::Category {
            clear_category_references(target_id, &transaction)?;
        }
    }

    queue::mark_status(
        &operation.local_id,
        StatusChange::Synced {
            remote_id: operation.target_id.clone(),
        },
        &transaction,
    )?;

    transaction.commit()?;

    Ok(())
}

/// Remove the category `category_id` from every mirrored entity and unsent
/// operation that refers to it, the way the server clears the category of
/// entities when the category is deleted.
pub fn clear_category_references(category_id: &str, connection: &Connection) -> Result<(), Error> {
    for kind in EntityKind::ALL.into_iter().filter(|kind| kind.has_category()) {
        connection.execute(
            &format!(
                "UPDATE {} SET category_id = NULL, data = json_set(data, '$.categoryId', NULL)
                 WHERE category_id = ?1",
                kind.mirror_table()
            ),
            [category_id],
        )?;
    }

    let cleared = connection.execute(
        "UPDATE pending_operation SET payload = json_set(payload, '$.categoryId', NULL)
         WHERE json_extract(payload, '$.categoryId') = ?1 AND status != 'synced'",
        [category_id],
    )?;

    if cleared > 0 {
        tracing::info!("Cleared category {category_id} from {cleared} queued operations");
    }

    Ok(())
}

fn has_later_changes(operation: &PendingOperation, connection: &Connection) -> Result<bool, Error> {
    let count: u32 = connection.query_row(
        "SELECT COUNT(*) FROM pending_operation
         WHERE target_id = ?1 AND entity_kind = ?2 AND seq > ?3 AND status != 'synced'",
        (&operation.target_id, operation.entity_kind, operation.seq),
        |row| row.get(0),
    )?;

    Ok(count > 0)
}
