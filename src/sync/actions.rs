//! The client's entry point for changing the ledger, online or offline.
//!
//! While online, changes go straight to the server. While offline, or when a
//! change refers to something the server has not confirmed yet, the change is
//! applied to the local mirror and queued for the next drain.

use std::sync::{Arc, Mutex};

use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;
use tokio::sync::watch;

use crate::{
    Error,
    recurring::FrequencyUnit,
    sync::{
        EntityKind, NewOperation, OperationStatus, RemoteApi, RemoteError, is_temp_id,
        mirror::{self, MirrorEntity},
        operation::reference,
        queue::{self, PendingCount},
        reconcile,
    },
    transaction::TransactionType,
    user::UserId,
};

/// The fields of an entity as the client sends them to the server.
pub trait EntityDraft: Serialize {
    /// The kind of entity the draft describes.
    const KIND: EntityKind;
}

/// The fields of a category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryDraft {
    /// Unique among the user's categories.
    pub name: String,
    /// Defaults to grey on the server.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    /// Defaults to a tag on the server.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
}

impl CategoryDraft {
    /// A category called `name` with the default color and icon.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            color: None,
            icon: None,
        }
    }
}

impl EntityDraft for CategoryDraft {
    const KIND: EntityKind = EntityKind::Category;
}

/// The fields of a transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct TransactionDraft {
    pub title: String,
    #[serde(rename = "type")]
    pub transaction_type: TransactionType,
    pub amount: f64,
    #[serde(with = "time::serde::rfc3339")]
    pub date: OffsetDateTime,
    pub description: String,
    /// A server ID or the temporary ID of a category created offline.
    pub category_id: Option<String>,
}

impl EntityDraft for TransactionDraft {
    const KIND: EntityKind = EntityKind::Transaction;
}

/// The fields of a recurring rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct RecurringRuleDraft {
    pub title: String,
    #[serde(rename = "type")]
    pub transaction_type: TransactionType,
    pub amount: f64,
    /// A server ID or the temporary ID of a category created offline.
    pub category_id: Option<String>,
    pub frequency_value: u32,
    pub frequency_unit: FrequencyUnit,
    #[serde(with = "time::serde::rfc3339")]
    pub start_date: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub end_date: Option<OffsetDateTime>,
    pub notify_on_run: bool,
    pub is_active: bool,
    pub description: Option<String>,
}

impl EntityDraft for RecurringRuleDraft {
    const KIND: EntityKind = EntityKind::RecurringRule;
}

/// Changes the ledger of one user through the server when it can, and
/// through the operation queue when it cannot.
pub struct LedgerClient {
    db_connection: Arc<Mutex<Connection>>,
    remote: Arc<dyn RemoteApi>,
    online: watch::Receiver<bool>,
    user_id: UserId,
}

impl std::fmt::Debug for LedgerClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LedgerClient")
            .field("user_id", &self.user_id)
            .field("online", &*self.online.borrow())
            .finish_non_exhaustive()
    }
}

impl LedgerClient {
    /// Create a client for `user_id`. `online` tells the client whether to
    /// try the server first, see [crate::sync::ConnectivityMonitor].
    pub fn new(
        db_connection: Arc<Mutex<Connection>>,
        remote: Arc<dyn RemoteApi>,
        online: watch::Receiver<bool>,
        user_id: UserId,
    ) -> Self {
        Self {
            db_connection,
            remote,
            online,
            user_id,
        }
    }

    /// Create an entity and return it as the user should now see it.
    ///
    /// The returned entity has a temporary ID if the change was queued.
    ///
    /// # Errors
    /// Returns an [Error::Validation] if the draft is invalid, or an
    /// [Error::Remote] if the server rejected it.
    pub async fn create<D: EntityDraft>(&self, draft: &D) -> Result<MirrorEntity, Error> {
        let payload = self.prepare_payload(D::KIND, draft)?;

        if self.can_send(&payload) {
            let result = match self.remote.create(D::KIND, &payload).await {
                Err(RemoteError::Conflict(message)) if D::KIND == EntityKind::Category => {
                    self.find_category(&payload, message).await
                }
                result => result,
            };

            match result {
                Ok(entity) => {
                    return self.with_connection(|connection| {
                        mirror::upsert_confirmed(self.user_id, D::KIND, &entity, connection)
                    });
                }
                Err(error) if error.is_retryable() => {
                    tracing::warn!("Could not create {}, queueing it: {error}", D::KIND);
                }
                Err(error) => return Err(error.into()),
            }
        }

        self.with_connection(|connection| {
            let transaction = connection.unchecked_transaction()?;
            let operation = queue::enqueue(
                NewOperation::create(self.user_id, D::KIND, payload),
                OffsetDateTime::now_utc(),
                &transaction,
            )?;
            let entity = mirror::insert_pending(
                self.user_id,
                D::KIND,
                &operation.local_id,
                &operation.payload,
                &transaction,
            )?;
            transaction.commit()?;

            Ok(entity)
        })
    }

    /// Replace the fields of entity `id`.
    ///
    /// Updating an entity that only exists locally changes its queued CREATE
    /// instead of queueing another operation.
    ///
    /// # Errors
    /// Returns an [Error::Validation] if the draft is invalid, an
    /// [Error::NotFound] if the entity does not exist, or an [Error::Remote]
    /// if the server rejected the change.
    pub async fn update<D: EntityDraft>(&self, id: &str, draft: &D) -> Result<MirrorEntity, Error> {
        let payload = self.prepare_payload(D::KIND, draft)?;

        let (id, direct) = match self.local_target(id)? {
            Target::Local(temp_id) => {
                return self.with_connection(|connection| {
                    let transaction = connection.unchecked_transaction()?;
                    queue::replace_payload(&temp_id, &payload, &transaction)?;
                    let entity =
                        mirror::apply_pending_update(D::KIND, &temp_id, &payload, &transaction)?;
                    transaction.commit()?;

                    Ok(entity)
                });
            }
            Target::Sending(temp_id) => (temp_id, false),
            Target::Remote(id) => (id, true),
        };

        if direct && self.can_send(&payload) {
            match self.remote.update(D::KIND, &id, &payload).await {
                Ok(entity) => {
                    return self.with_connection(|connection| {
                        mirror::upsert_confirmed(self.user_id, D::KIND, &entity, connection)
                    });
                }
                Err(RemoteError::NotFound) => return Err(Error::NotFound),
                Err(error) if error.is_retryable() => {
                    tracing::warn!("Could not update {} {id}, queueing it: {error}", D::KIND);
                }
                Err(error) => return Err(error.into()),
            }
        }

        self.with_connection(|connection| {
            let id = current_id(&id, connection)?;
            let transaction = connection.unchecked_transaction()?;
            queue::enqueue(
                NewOperation::update(self.user_id, D::KIND, &id, payload.clone()),
                OffsetDateTime::now_utc(),
                &transaction,
            )?;
            let entity = match mirror::apply_pending_update(D::KIND, &id, &payload, &transaction) {
                Err(Error::NotFound) => {
                    mirror::insert_pending(self.user_id, D::KIND, &id, &payload, &transaction)?
                }
                result => result?,
            };
            transaction.commit()?;

            Ok(entity)
        })
    }

    /// Delete the `kind` entity `id`.
    ///
    /// Deleting an entity that only exists locally drops its queued CREATE and
    /// anything queued for it since.
    pub async fn delete(&self, kind: EntityKind, id: &str) -> Result<(), Error> {
        let (id, direct) = match self.local_target(id)? {
            Target::Local(temp_id) => {
                return self.with_connection(|connection| {
                    queue::discard(&temp_id, connection).map(|_| ())
                });
            }
            Target::Sending(temp_id) => (temp_id, false),
            Target::Remote(id) => (id, true),
        };

        if direct && self.is_online() {
            match self.remote.delete(kind, &id).await {
                Ok(()) | Err(RemoteError::NotFound) => {
                    return self.with_connection(|connection| mirror::remove(kind, &id, connection));
                }
                Err(error) if error.is_retryable() => {
                    tracing::warn!("Could not delete {kind} {id}, queueing it: {error}");
                }
                Err(error) => return Err(error.into()),
            }
        }

        self.with_connection(|connection| {
            let id = current_id(&id, connection)?;
            let transaction = connection.unchecked_transaction()?;
            queue::enqueue(
                NewOperation::delete(self.user_id, kind, &id),
                OffsetDateTime::now_utc(),
                &transaction,
            )?;
            match mirror::mark_deleted(kind, &id, &transaction) {
                Ok(()) | Err(Error::NotFound) => {}
                Err(error) => return Err(error),
            }
            transaction.commit()?;

            Ok(())
        })
    }

    /// Replace the confirmed `kind` entities in the mirror with the server's.
    ///
    /// Entities with unsent local changes are left alone.
    pub async fn refresh(&self, kind: EntityKind) -> Result<Vec<MirrorEntity>, Error> {
        let entities = self.remote.list(kind).await?;

        self.with_connection(|connection| {
            let transaction = connection.unchecked_transaction()?;
            let pending: Vec<String> = mirror::list(self.user_id, kind, &transaction)?
                .into_iter()
                .filter(|entity| entity.is_pending)
                .map(|entity| entity.id)
                .collect();

            transaction.execute(
                &format!(
                    "DELETE FROM {} WHERE user_id = ?1 AND is_pending = 0",
                    kind.mirror_table()
                ),
                [self.user_id],
            )?;

            for entity in &entities {
                let is_pending = mirror::entity_id(entity).is_some_and(|id| pending.contains(&id));
                if !is_pending {
                    mirror::upsert_confirmed(self.user_id, kind, entity, &transaction)?;
                }
            }

            let refreshed = mirror::list(self.user_id, kind, &transaction)?;
            transaction.commit()?;

            Ok(refreshed)
        })
    }

    /// The `kind` entities the user should see, including unsent local changes.
    pub fn list(&self, kind: EntityKind) -> Result<Vec<MirrorEntity>, Error> {
        self.with_connection(|connection| mirror::list(self.user_id, kind, connection))
    }

    /// Count the changes that have not reached the server.
    pub fn pending_count(&self) -> Result<PendingCount, Error> {
        self.with_connection(|connection| queue::pending_count(self.user_id, connection))
    }

    /// Drop a queued change and undo it locally, see [queue::discard].
    pub fn discard(&self, local_id: &str) -> Result<(), Error> {
        self.with_connection(|connection| queue::discard(local_id, connection).map(|_| ()))
    }

    fn is_online(&self) -> bool {
        *self.online.borrow()
    }

    /// Whether a change with `payload` can go straight to the server.
    fn can_send(&self, payload: &Value) -> bool {
        self.is_online()
            && !reference(payload, "categoryId").is_some_and(|id| is_temp_id(&id))
    }

    /// Serialize and check `draft`, replacing a confirmed temporary category ID.
    fn prepare_payload<D: EntityDraft>(&self, kind: EntityKind, draft: &D) -> Result<Value, Error> {
        let mut payload = serde_json::to_value(draft)?;
        queue::validate_payload(kind, &payload)?;

        if let Some(category_id) = reference(&payload, "categoryId")
            && is_temp_id(&category_id)
        {
            let resolved = self.with_connection(|connection| {
                if let Some(remote_id) = reconcile::resolve(&category_id, connection)? {
                    return Ok(Some(remote_id));
                }

                match mirror::get(EntityKind::Category, &category_id, connection)? {
                    Some(category) if !category.is_deleted => Ok(None),
                    _ => Err(Error::Validation(format!(
                        "the category {category_id} does not exist"
                    ))),
                }
            })?;

            if let (Some(remote_id), Some(object)) = (resolved, payload.as_object_mut()) {
                object.insert("categoryId".to_owned(), Value::String(remote_id));
            }
        }

        Ok(payload)
    }

    /// Find out whether `id` still only exists locally.
    fn local_target(&self, id: &str) -> Result<Target, Error> {
        if !is_temp_id(id) {
            return Ok(Target::Remote(id.to_owned()));
        }

        self.with_connection(|connection| {
            if let Some(create) = queue::find_pending_create(id, connection)? {
                return Ok(match create.status {
                    OperationStatus::Syncing => Target::Sending(id.to_owned()),
                    _ => Target::Local(id.to_owned()),
                });
            }

            reconcile::resolve(id, connection)?
                .map(Target::Remote)
                .ok_or(Error::NotFound)
        })
    }

    async fn find_category(&self, payload: &Value, conflict: String) -> Result<Value, RemoteError> {
        let name = payload.get("name").and_then(Value::as_str).unwrap_or_default();

        self.remote
            .find_category_by_name(name)
            .await?
            .ok_or(RemoteError::Conflict(conflict))
    }

    fn with_connection<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, Error>,
    ) -> Result<T, Error> {
        let connection = self
            .db_connection
            .lock()
            .map_err(|_| Error::DatabaseLockError)?;

        f(&connection)
    }
}

/// The server ID of `id` if the server has confirmed it since it was looked up.
fn current_id(id: &str, connection: &Connection) -> Result<String, Error> {
    if !is_temp_id(id) {
        return Ok(id.to_owned());
    }

    Ok(reconcile::resolve(id, connection)?.unwrap_or_else(|| id.to_owned()))
}

enum Target {
    /// Only exists in the mirror, under this temporary ID.
    Local(String),
    /// A drain is sending the CREATE for this temporary ID. Changes are queued
    /// behind it and sent once the server confirms the entity.
    Sending(String),
    Remote(String),
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use rusqlite::Connection;
    use serde_json::json;
    use time::macros::datetime;

    use crate::{
        Error, SyncConfig,
        sync::{
            Action, ConnectivityMonitor, EntityKind, RemoteError, SyncEventBus, SyncOrchestrator,
            db::initialize_client_db,
            is_temp_id,
            queue::{PendingCount, list_pending},
            test_utils::{FakeRemote, Gate},
        },
        transaction::TransactionType,
    };

    use super::{CategoryDraft, LedgerClient, TransactionDraft};

    struct Fixture {
        connection: Arc<Mutex<Connection>>,
        remote: Arc<FakeRemote>,
        monitor: ConnectivityMonitor,
        client: LedgerClient,
    }

    fn fixture(online: bool) -> Fixture {
        fixture_with(online, FakeRemote::new())
    }

    fn fixture_with(online: bool, remote: FakeRemote) -> Fixture {
        let connection = Connection::open_in_memory().unwrap();
        initialize_client_db(&connection).unwrap();
        let connection = Arc::new(Mutex::new(connection));
        let remote = Arc::new(remote);
        let monitor = ConnectivityMonitor::new(online);
        let client = LedgerClient::new(connection.clone(), remote.clone(), monitor.subscribe(), 1);

        Fixture {
            connection,
            remote,
            monitor,
            client,
        }
    }

    fn lunch(category_id: Option<&str>) -> TransactionDraft {
        TransactionDraft {
            title: "Lunch".to_owned(),
            transaction_type: TransactionType::Expense,
            amount: 12.5,
            date: datetime!(2024-01-02 12:00 UTC),
            description: String::new(),
            category_id: category_id.map(str::to_owned),
        }
    }

    #[tokio::test]
    async fn online_create_goes_straight_to_the_server() {
        let fixture = fixture(true);

        let category = fixture.client.create(&CategoryDraft::new("Food")).await.unwrap();

        assert_eq!(category.id, "1");
        assert!(!category.is_pending);
        assert_eq!(fixture.client.pending_count(), Ok(PendingCount::default()));
    }

    #[tokio::test]
    async fn offline_create_is_queued_with_a_temp_id() {
        let fixture = fixture(false);

        let category = fixture.client.create(&CategoryDraft::new("Food")).await.unwrap();

        assert!(is_temp_id(&category.id));
        assert!(category.is_pending);
        assert!(fixture.remote.calls().is_empty());
        assert_eq!(
            fixture.client.pending_count(),
            Ok(PendingCount {
                pending: 1,
                error: 0
            })
        );
    }

    #[tokio::test]
    async fn invalid_draft_is_rejected_before_queueing() {
        let fixture = fixture(false);

        let result = fixture.client.create(&CategoryDraft::new("  ")).await;

        assert!(matches!(result, Err(Error::Validation(_))));
        assert_eq!(fixture.client.pending_count(), Ok(PendingCount::default()));
    }

    #[tokio::test]
    async fn reference_to_unknown_temp_category_is_rejected() {
        let fixture = fixture(false);

        let result = fixture.client.create(&lunch(Some("cat_temp_missing"))).await;

        assert!(matches!(result, Err(Error::Validation(_))));
    }

    #[tokio::test]
    async fn online_create_referring_to_offline_category_is_queued() {
        let fixture = fixture(false);
        let category = fixture.client.create(&CategoryDraft::new("Food")).await.unwrap();
        fixture.monitor.set_online(true);

        let transaction = fixture.client.create(&lunch(Some(&category.id))).await.unwrap();

        assert!(is_temp_id(&transaction.id));
        assert!(fixture.remote.calls().is_empty());
    }

    #[tokio::test]
    async fn transient_failure_falls_back_to_the_queue() {
        let fixture = fixture(true);
        fixture
            .remote
            .fail_next(RemoteError::Transient("timed out".to_owned()));

        let category = fixture.client.create(&CategoryDraft::new("Food")).await.unwrap();

        assert!(is_temp_id(&category.id));
        assert_eq!(fixture.client.pending_count().unwrap().pending, 1);
    }

    #[tokio::test]
    async fn rejected_create_is_an_error() {
        let fixture = fixture(true);
        fixture
            .remote
            .fail_next(RemoteError::Validation("name is too long".to_owned()));

        let result = fixture.client.create(&CategoryDraft::new("Food")).await;

        assert_eq!(
            result,
            Err(Error::Remote(RemoteError::Validation(
                "name is too long".to_owned()
            )))
        );
        assert_eq!(fixture.client.pending_count(), Ok(PendingCount::default()));
    }

    #[tokio::test]
    async fn online_duplicate_category_reuses_existing() {
        let fixture = fixture(true);
        fixture
            .remote
            .seed(EntityKind::Category, json!({"name": "Food"}));

        let category = fixture.client.create(&CategoryDraft::new("Food")).await.unwrap();

        assert_eq!(category.id, "1");
    }

    #[tokio::test]
    async fn updating_an_offline_entity_rewrites_its_create() {
        let fixture = fixture(false);
        let category = fixture.client.create(&CategoryDraft::new("Food")).await.unwrap();

        let renamed = fixture
            .client
            .update(&category.id, &CategoryDraft::new("Groceries"))
            .await
            .unwrap();

        assert_eq!(renamed.data["name"], "Groceries");
        let connection = fixture.connection.lock().unwrap();
        let queued = list_pending(1, &connection).unwrap();
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].action, Action::Create);
        assert_eq!(queued[0].payload["name"], "Groceries");
    }

    #[tokio::test]
    async fn deleting_an_offline_entity_drops_its_operations() {
        let fixture = fixture(false);
        let category = fixture.client.create(&CategoryDraft::new("Food")).await.unwrap();

        fixture
            .client
            .delete(EntityKind::Category, &category.id)
            .await
            .unwrap();

        assert_eq!(fixture.client.pending_count(), Ok(PendingCount::default()));
        assert_eq!(fixture.client.list(EntityKind::Category), Ok(vec![]));
    }

    #[tokio::test]
    async fn deleting_an_offline_category_keeps_its_transactions() {
        let fixture = fixture(false);
        let category = fixture.client.create(&CategoryDraft::new("Food")).await.unwrap();
        let transaction = fixture.client.create(&lunch(Some(&category.id))).await.unwrap();

        fixture
            .client
            .delete(EntityKind::Category, &category.id)
            .await
            .unwrap();

        let transactions = fixture.client.list(EntityKind::Transaction).unwrap();
        assert_eq!(transactions[0].id, transaction.id);
        assert_eq!(transactions[0].data["categoryId"], serde_json::Value::Null);

        let orchestrator = SyncOrchestrator::new(
            fixture.connection.clone(),
            fixture.remote.clone(),
            SyncEventBus::default(),
            SyncConfig::default(),
        );
        let report = orchestrator.drain(1).await.unwrap().report().unwrap();

        assert_eq!(report.synced, 1);
        assert_eq!(fixture.client.pending_count(), Ok(PendingCount::default()));
        assert_eq!(fixture.remote.entities(EntityKind::Transaction).len(), 1);
        assert!(fixture.remote.entities(EntityKind::Category).is_empty());
    }

    #[tokio::test]
    async fn editing_an_entity_while_it_is_sent_queues_the_edit() {
        let gate = Arc::new(Gate::default());
        let fixture = fixture_with(false, FakeRemote::gated(gate.clone()));
        let category = fixture.client.create(&CategoryDraft::new("Food")).await.unwrap();
        let orchestrator = Arc::new(SyncOrchestrator::new(
            fixture.connection.clone(),
            fixture.remote.clone(),
            SyncEventBus::default(),
            SyncConfig::default(),
        ));
        let draining = orchestrator.clone();
        let drain = tokio::spawn(async move { draining.drain(1).await });
        gate.entered.notified().await;

        let renamed = fixture
            .client
            .update(&category.id, &CategoryDraft::new("Groceries"))
            .await
            .unwrap();

        assert_eq!(renamed.id, category.id);
        assert_eq!(renamed.data["name"], "Groceries");
        gate.release.notify_one();
        gate.entered.notified().await;
        gate.release.notify_one();
        let report = drain.await.unwrap().unwrap().report().unwrap();

        assert_eq!(report.synced, 2);
        assert_eq!(fixture.remote.entities(EntityKind::Category)[0]["name"], "Groceries");
        let categories = fixture.client.list(EntityKind::Category).unwrap();
        assert_eq!(categories.len(), 1);
        assert_eq!(categories[0].id, "1");
        assert_eq!(categories[0].data["name"], "Groceries");
        assert!(!categories[0].is_pending);
    }

    #[tokio::test]
    async fn offline_delete_hides_entity_until_synced() {
        let fixture = fixture(true);
        let category = fixture.client.create(&CategoryDraft::new("Food")).await.unwrap();
        fixture.monitor.set_online(false);

        fixture
            .client
            .delete(EntityKind::Category, &category.id)
            .await
            .unwrap();

        assert_eq!(fixture.client.list(EntityKind::Category), Ok(vec![]));
        assert_eq!(fixture.remote.entities(EntityKind::Category).len(), 1);
        assert_eq!(fixture.client.pending_count().unwrap().pending, 1);
    }

    #[tokio::test]
    async fn offline_changes_reach_the_server_after_a_drain() {
        let fixture = fixture(false);
        let category = fixture.client.create(&CategoryDraft::new("Food")).await.unwrap();
        fixture.client.create(&lunch(Some(&category.id))).await.unwrap();
        let orchestrator = SyncOrchestrator::new(
            fixture.connection.clone(),
            fixture.remote.clone(),
            SyncEventBus::default(),
            SyncConfig::default(),
        );

        let report = orchestrator.drain(1).await.unwrap().report().unwrap();

        assert_eq!(report.synced, 2);
        let transactions = fixture.client.list(EntityKind::Transaction).unwrap();
        assert_eq!(transactions[0].data["categoryId"], "1");
        // Later edits use the temporary ID the user still holds.
        let renamed = fixture
            .client
            .update(&category.id, &CategoryDraft::new("Groceries"))
            .await
            .unwrap();
        assert_eq!(renamed.id, "1");
    }

    #[tokio::test]
    async fn refresh_replaces_confirmed_entities() {
        let fixture = fixture(true);
        fixture.client.create(&CategoryDraft::new("Food")).await.unwrap();
        fixture
            .remote
            .seed(EntityKind::Category, json!({"name": "Rent"}));

        let refreshed = fixture.client.refresh(EntityKind::Category).await.unwrap();

        let names: Vec<_> = refreshed
            .iter()
            .map(|category| category.data["name"].clone())
            .collect();
        assert_eq!(names, vec![json!("Food"), json!("Rent")]);
    }
}
