//! The client's copy of server entities plus entities not yet confirmed by the server.
//!
//! Entities are stored as the server's JSON with their `id` and `categoryId`
//! normalized to strings, so that server IDs and temporary IDs compare the
//! same way.

use rusqlite::{Connection, OptionalExtension, Row};
use serde::Serialize;
use serde_json::Value;

use crate::{
    Error,
    sync::{EntityKind, operation::reference},
    user::UserId,
};

/// An entity in the local mirror.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MirrorEntity {
    /// The server ID, or a temporary ID if the server has not confirmed the entity.
    pub id: String,
    /// The owner of the entity.
    #[serde(skip_serializing)]
    pub user_id: UserId,
    /// The entity's fields in the server's JSON format.
    pub data: Value,
    /// Whether the entity has local changes the server has not confirmed.
    pub is_pending: bool,
    /// Whether the entity has been deleted locally but not yet on the server.
    pub is_deleted: bool,
}

/// Get the ID of an entity in the server's JSON format.
pub fn entity_id(data: &Value) -> Option<String> {
    reference(data, "id")
}

/// Convert `id` and `categoryId` in `data` to strings.
pub fn normalize_ids(mut data: Value) -> Value {
    if let Some(object) = data.as_object_mut() {
        for field in ["id", "categoryId"] {
            if let Some(Value::Number(id)) = object.get(field) {
                let id = id.to_string();
                object.insert(field.to_owned(), Value::String(id));
            }
        }
    }

    data
}

/// Store an entity confirmed by the server, replacing any local version.
///
/// # Errors
/// Returns an [Error::Validation] if `data` has no `id`.
pub fn upsert_confirmed(
    user_id: UserId,
    kind: EntityKind,
    data: &Value,
    connection: &Connection,
) -> Result<MirrorEntity, Error> {
    let data = normalize_ids(data.clone());
    let id = entity_id(&data)
        .ok_or_else(|| Error::Validation(format!("the {kind} from the server has no ID")))?;

    upsert(user_id, kind, &id, data, false, connection)
}

/// Store an entity that only exists locally under the temporary ID `id`.
pub fn insert_pending(
    user_id: UserId,
    kind: EntityKind,
    id: &str,
    data: &Value,
    connection: &Connection,
) -> Result<MirrorEntity, Error> {
    let mut data = normalize_ids(data.clone());
    if let Some(object) = data.as_object_mut() {
        object.insert("id".to_owned(), Value::String(id.to_owned()));
    }

    upsert(user_id, kind, id, data, true, connection)
}

/// Overwrite the fields of entity `id` with a local change.
///
/// # Errors
/// Returns an [Error::NotFound] if the entity is not in the mirror.
pub fn apply_pending_update(
    kind: EntityKind,
    id: &str,
    data: &Value,
    connection: &Connection,
) -> Result<MirrorEntity, Error> {
    let mut data = normalize_ids(data.clone());
    if let Some(object) = data.as_object_mut() {
        object.insert("id".to_owned(), Value::String(id.to_owned()));
    }

    connection
        .prepare(&format!(
            "UPDATE {} SET data = ?1, category_id = ?2, is_pending = 1
             WHERE id = ?3
             RETURNING id, user_id, data, is_pending, is_deleted",
            kind.mirror_table()
        ))?
        .query_row(
            (data.to_string(), category_of(kind, &data), id),
            map_entity_row,
        )
        .map_err(Error::from)
}

/// Hide entity `id` until the server confirms its deletion.
pub fn mark_deleted(kind: EntityKind, id: &str, connection: &Connection) -> Result<(), Error> {
    let rows_affected = connection.execute(
        &format!(
            "UPDATE {} SET is_deleted = 1, is_pending = 1 WHERE id = ?1",
            kind.mirror_table()
        ),
        [id],
    )?;

    if rows_affected == 0 {
        return Err(Error::NotFound);
    }

    Ok(())
}

/// Show a locally deleted entity again.
pub fn restore(kind: EntityKind, id: &str, connection: &Connection) -> Result<(), Error> {
    connection.execute(
        &format!(
            "UPDATE {} SET is_deleted = 0, is_pending = 0 WHERE id = ?1",
            kind.mirror_table()
        ),
        [id],
    )?;

    Ok(())
}

/// Remove entity `id` from the mirror. Removing a missing entity does nothing.
pub fn remove(kind: EntityKind, id: &str, connection: &Connection) -> Result<(), Error> {
    connection.execute(
        &format!("DELETE FROM {} WHERE id = ?1", kind.mirror_table()),
        [id],
    )?;

    Ok(())
}

/// Get entity `id` from the mirror, including locally deleted entities.
pub fn get(kind: EntityKind, id: &str, connection: &Connection) -> Result<Option<MirrorEntity>, Error> {
    connection
        .prepare(&format!(
            "SELECT id, user_id, data, is_pending, is_deleted FROM {} WHERE id = ?1",
            kind.mirror_table()
        ))?
        .query_row([id], map_entity_row)
        .optional()
        .map_err(Error::from)
}

/// List the entities of `user_id` that have not been deleted locally.
pub fn list(
    user_id: UserId,
    kind: EntityKind,
    connection: &Connection,
) -> Result<Vec<MirrorEntity>, Error> {
    connection
        .prepare(&format!(
            "SELECT id, user_id, data, is_pending, is_deleted FROM {}
             WHERE user_id = ?1 AND is_deleted = 0 ORDER BY rowid ASC",
            kind.mirror_table()
        ))?
        .query_map([user_id], map_entity_row)?
        .map(|maybe_entity| maybe_entity.map_err(Error::from))
        .collect()
}

fn upsert(
    user_id: UserId,
    kind: EntityKind,
    id: &str,
    data: Value,
    is_pending: bool,
    connection: &Connection,
) -> Result<MirrorEntity, Error> {
    connection
        .prepare(&format!(
            "INSERT INTO {} (id, user_id, category_id, data, is_pending, is_deleted)
             VALUES (?1, ?2, ?3, ?4, ?5, 0)
             ON CONFLICT(id) DO UPDATE SET
                category_id = excluded.category_id,
                data = excluded.data,
                is_pending = excluded.is_pending,
                is_deleted = 0
             RETURNING id, user_id, data, is_pending, is_deleted",
            kind.mirror_table()
        ))?
        .query_row(
            (id, user_id, category_of(kind, &data), data.to_string(), is_pending),
            map_entity_row,
        )
        .map_err(Error::from)
}

fn category_of(kind: EntityKind, data: &Value) -> Option<String> {
    if kind.has_category() {
        reference(data, "categoryId")
    } else {
        None
    }
}

fn map_entity_row(row: &Row) -> Result<MirrorEntity, rusqlite::Error> {
    let data: String = row.get(2)?;
    let data = serde_json::from_str(&data).map_err(|error| {
        rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(error))
    })?;

    Ok(MirrorEntity {
        id: row.get(0)?,
        user_id: row.get(1)?,
        data,
        is_pending: row.get(3)?,
        is_deleted: row.get(4)?,
    })
}

#[cfg(test)]
mod tests {
    use rusqlite::Connection;
    use serde_json::json;

    use crate::{
        Error,
        sync::{
            EntityKind,
            db::initialize_client_db,
            mirror::{
                apply_pending_update, get, insert_pending, list, mark_deleted, normalize_ids,
                remove, upsert_confirmed,
            },
        },
    };

    fn get_test_connection() -> Connection {
        let connection = Connection::open_in_memory().unwrap();
        initialize_client_db(&connection).unwrap();
        connection
    }

    #[test]
    fn normalize_ids_converts_numbers() {
        let data = normalize_ids(json!({"id": 3, "categoryId": 7, "amount": 1.5}));

        assert_eq!(data, json!({"id": "3", "categoryId": "7", "amount": 1.5}));
    }

    #[test]
    fn confirmed_entity_is_not_pending() {
        let connection = get_test_connection();

        let entity = upsert_confirmed(
            1,
            EntityKind::Category,
            &json!({"id": 3, "name": "Food"}),
            &connection,
        )
        .unwrap();

        assert_eq!(entity.id, "3");
        assert!(!entity.is_pending);
        assert_eq!(entity.data["name"], "Food");
    }

    #[test]
    fn confirming_replaces_local_changes() {
        let connection = get_test_connection();
        upsert_confirmed(1, EntityKind::Category, &json!({"id": 3, "name": "Food"}), &connection)
            .unwrap();
        apply_pending_update(
            EntityKind::Category,
            "3",
            &json!({"name": "Groceries"}),
            &connection,
        )
        .unwrap();

        let entity = upsert_confirmed(
            1,
            EntityKind::Category,
            &json!({"id": 3, "name": "Groceries"}),
            &connection,
        )
        .unwrap();

        assert!(!entity.is_pending);
        assert_eq!(entity.data, json!({"id": "3", "name": "Groceries"}));
    }

    #[test]
    fn pending_entity_is_keyed_by_temp_id() {
        let connection = get_test_connection();

        let entity = insert_pending(
            1,
            EntityKind::Transaction,
            "txn_temp_1",
            &json!({"title": "Lunch", "categoryId": "cat_temp_1"}),
            &connection,
        )
        .unwrap();

        assert_eq!(entity.id, "txn_temp_1");
        assert_eq!(entity.data["id"], "txn_temp_1");
        assert!(entity.is_pending);
        let category_id: Option<String> = connection
            .query_row(
                "SELECT category_id FROM mirror_transaction WHERE id = 'txn_temp_1'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(category_id.as_deref(), Some("cat_temp_1"));
    }

    #[test]
    fn deleted_entities_are_hidden_from_list() {
        let connection = get_test_connection();
        upsert_confirmed(1, EntityKind::Category, &json!({"id": 1, "name": "Food"}), &connection)
            .unwrap();
        upsert_confirmed(1, EntityKind::Category, &json!({"id": 2, "name": "Rent"}), &connection)
            .unwrap();

        mark_deleted(EntityKind::Category, "1", &connection).unwrap();

        let ids: Vec<_> = list(1, EntityKind::Category, &connection)
            .unwrap()
            .into_iter()
            .map(|entity| entity.id)
            .collect();
        assert_eq!(ids, vec!["2"]);
        assert!(get(EntityKind::Category, "1", &connection).unwrap().unwrap().is_deleted);
    }

    #[test]
    fn update_missing_entity_is_not_found() {
        let connection = get_test_connection();

        let result = apply_pending_update(EntityKind::Category, "9", &json!({}), &connection);

        assert_eq!(result, Err(Error::NotFound));
    }

    #[test]
    fn remove_deletes_entity() {
        let connection = get_test_connection();
        upsert_confirmed(1, EntityKind::Category, &json!({"id": 1, "name": "Food"}), &connection)
            .unwrap();

        remove(EntityKind::Category, "1", &connection).unwrap();

        assert_eq!(get(EntityKind::Category, "1", &connection), Ok(None));
    }
}
