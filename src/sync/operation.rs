//! The mutations a client queues while it cannot reach the server.

use std::{fmt::Display, str::FromStr};

use rusqlite::{
    ToSql,
    types::{FromSql, FromSqlResult, ToSqlOutput, ValueRef},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
    db::{UnknownVariant, parse_text_column},
    user::UserId,
};

/// Marks an identifier as generated by the client rather than the server.
pub const TEMP_ID_MARKER: &str = "_temp_";

/// Whether `id` was generated by the client and has not been replaced by a server ID.
pub fn is_temp_id(id: &str) -> bool {
    id.contains(TEMP_ID_MARKER)
}

/// Generate a temporary ID for a `kind` entity created on the client.
pub fn new_temp_id(kind: EntityKind) -> String {
    format!("{}{TEMP_ID_MARKER}{}", kind.temp_prefix(), Uuid::new_v4().simple())
}

/// The kinds of entity the client can change.
///
/// The declaration order is the order a drain sends them in: categories go
/// first because transactions and rules may refer to them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EntityKind {
    /// A transaction category.
    Category,
    /// A single transaction.
    Transaction,
    /// A recurring transaction rule.
    RecurringRule,
}

impl EntityKind {
    /// Every kind, in drain order.
    pub const ALL: [EntityKind; 3] = [
        EntityKind::Category,
        EntityKind::Transaction,
        EntityKind::RecurringRule,
    ];

    /// The name used for this kind in the database.
    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::Category => "category",
            EntityKind::Transaction => "transaction",
            EntityKind::RecurringRule => "recurringRule",
        }
    }

    fn temp_prefix(self) -> &'static str {
        match self {
            EntityKind::Category => "cat",
            EntityKind::Transaction => "txn",
            EntityKind::RecurringRule => "rule",
        }
    }

    /// The local mirror table holding entities of this kind.
    pub(crate) fn mirror_table(self) -> &'static str {
        match self {
            EntityKind::Category => "mirror_category",
            EntityKind::Transaction => "mirror_transaction",
            EntityKind::RecurringRule => "mirror_recurring_rule",
        }
    }

    /// Whether entities of this kind may refer to a category.
    pub fn has_category(self) -> bool {
        self != EntityKind::Category
    }
}

impl Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "category" => Ok(EntityKind::Category),
            "transaction" => Ok(EntityKind::Transaction),
            "recurringRule" => Ok(EntityKind::RecurringRule),
            other => Err(UnknownVariant(other.to_owned())),
        }
    }
}

impl ToSql for EntityKind {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for EntityKind {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        parse_text_column(value)
    }
}

/// The change an operation makes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
#[allow(missing_docs)]
pub enum Action {
    Create,
    Update,
    Delete,
}

impl Action {
    /// The name used for this action in the database.
    pub fn as_str(self) -> &'static str {
        match self {
            Action::Create => "CREATE",
            Action::Update => "UPDATE",
            Action::Delete => "DELETE",
        }
    }
}

impl FromStr for Action {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CREATE" => Ok(Action::Create),
            "UPDATE" => Ok(Action::Update),
            "DELETE" => Ok(Action::Delete),
            other => Err(UnknownVariant(other.to_owned())),
        }
    }
}

impl ToSql for Action {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for Action {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        parse_text_column(value)
    }
}

/// Where an operation is in its journey to the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationStatus {
    /// Waiting to be sent.
    Pending,
    /// Being sent by a drain.
    Syncing,
    /// Confirmed by the server, waiting to be purged.
    Synced,
    /// The last attempt failed.
    Error,
}

impl OperationStatus {
    /// The name used for this status in the database.
    pub fn as_str(self) -> &'static str {
        match self {
            OperationStatus::Pending => "pending",
            OperationStatus::Syncing => "syncing",
            OperationStatus::Synced => "synced",
            OperationStatus::Error => "error",
        }
    }
}

impl FromStr for OperationStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(OperationStatus::Pending),
            "syncing" => Ok(OperationStatus::Syncing),
            "synced" => Ok(OperationStatus::Synced),
            "error" => Ok(OperationStatus::Error),
            other => Err(UnknownVariant(other.to_owned())),
        }
    }
}

impl ToSql for OperationStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for OperationStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        parse_text_column(value)
    }
}

/// An operation that has not been enqueued yet.
///
/// A CREATE operation's `local_id` doubles as the temporary ID of the entity
/// it creates, and is the key of that entity in the local mirror.
#[derive(Debug, Clone, PartialEq)]
pub struct NewOperation {
    /// Unique within the queue.
    pub local_id: String,
    /// The user the operation is made on behalf of.
    pub user_id: UserId,
    /// The kind of entity the operation changes.
    pub entity_kind: EntityKind,
    /// The change to make.
    pub action: Action,
    /// The ID of the entity to change, `None` for CREATE.
    pub target_id: Option<String>,
    /// The entity's fields, in the server's JSON format.
    pub payload: Value,
}

impl NewOperation {
    /// An operation that creates a `kind` entity with a fresh temporary ID.
    pub fn create(user_id: UserId, kind: EntityKind, payload: Value) -> Self {
        Self {
            local_id: new_temp_id(kind),
            user_id,
            entity_kind: kind,
            action: Action::Create,
            target_id: None,
            payload,
        }
    }

    /// An operation that overwrites the `kind` entity `target_id`.
    pub fn update(user_id: UserId, kind: EntityKind, target_id: &str, payload: Value) -> Self {
        Self {
            local_id: new_operation_id(),
            user_id,
            entity_kind: kind,
            action: Action::Update,
            target_id: Some(target_id.to_owned()),
            payload,
        }
    }

    /// An operation that deletes the `kind` entity `target_id`.
    pub fn delete(user_id: UserId, kind: EntityKind, target_id: &str) -> Self {
        Self {
            local_id: new_operation_id(),
            user_id,
            entity_kind: kind,
            action: Action::Delete,
            target_id: Some(target_id.to_owned()),
            payload: Value::Object(Default::default()),
        }
    }
}

fn new_operation_id() -> String {
    format!("op_{}", Uuid::new_v4().simple())
}

/// An operation stored in the queue.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingOperation {
    /// Unique within the queue.
    pub local_id: String,
    /// The user the operation is made on behalf of.
    pub user_id: UserId,
    /// The kind of entity the operation changes.
    pub entity_kind: EntityKind,
    /// The change to make.
    pub action: Action,
    /// The ID of the entity to change, `None` for CREATE.
    pub target_id: Option<String>,
    /// The entity's fields, in the server's JSON format.
    pub payload: Value,
    /// Where the operation is in its journey to the server.
    pub status: OperationStatus,
    /// The number of failed attempts.
    pub retry_count: u32,
    /// The error from the last failed attempt.
    pub last_error: Option<String>,
    /// The server ID of the entity, once the server has confirmed the operation.
    pub remote_id: Option<String>,
    /// The earliest time a failed operation is retried. `None` on a failed
    /// operation means it is only retried after the user changes it.
    #[serde(with = "time::serde::rfc3339::option")]
    pub next_attempt_at: Option<OffsetDateTime>,
    /// When the operation was enqueued.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    /// The position of the operation in the queue.
    pub seq: i64,
}

impl PendingOperation {
    /// Whether a drain at `now` should attempt the operation.
    pub fn is_ready(&self, now: OffsetDateTime) -> bool {
        match self.status {
            OperationStatus::Pending => true,
            OperationStatus::Error => self.next_attempt_at.is_some_and(|retry_at| retry_at <= now),
            OperationStatus::Syncing | OperationStatus::Synced => false,
        }
    }

    /// The category ID the payload refers to, if any.
    pub fn category_reference(&self) -> Option<String> {
        reference(&self.payload, "categoryId")
    }
}

/// Read the ID stored under `field` in `payload`, accepting numbers and strings.
pub(crate) fn reference(payload: &Value, field: &str) -> Option<String> {
    match payload.get(field)? {
        Value::String(id) if !id.is_empty() => Some(id.clone()),
        Value::Number(id) => Some(id.to_string()),
        _ => None,
    }
}
