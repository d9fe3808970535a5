//! Replays the operation queue against the server.
//!
//! A drain sends categories before anything else, because transactions and
//! rules may refer to categories created offline. Operations that still refer
//! to an unconfirmed temporary ID are deferred. When a pass confirms an entity
//! that other operations were waiting on, another pass sends them, even if
//! the drain was asked for other kinds of entity.

use std::{
    collections::{HashMap, HashSet},
    sync::{
        Arc, Mutex,
        atomic::{AtomicU8, Ordering},
    },
};

use rusqlite::Connection;
use serde::Serialize;
use serde_json::Value;
use time::OffsetDateTime;

use crate::{
    Error, SyncConfig,
    sync::{
        Action, EntityKind, OperationStatus, PendingOperation, RemoteApi, RemoteError,
        SyncEvent, SyncEventBus, SyncSubscription,
        queue::{self, PendingCount, StatusChange},
        reconcile,
    },
    user::UserId,
};

const IDLE: u8 = 0;
const DRAINING: u8 = 1;

/// What a drain did with the operations in the queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    /// Operations the server confirmed.
    pub synced: usize,
    /// Operations that failed and are waiting for a retry or a change from the user.
    pub errors: usize,
    /// Operations left for a later drain, either waiting on an unconfirmed
    /// temporary ID or backing off after a failure.
    pub deferred: usize,
}

/// The result of asking for a drain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// The drain ran to the end.
    Completed(DrainReport),
    /// Another drain was already running, so nothing was done.
    InProgress,
}

impl DrainOutcome {
    /// Whether the drain ran.
    pub fn success(&self) -> bool {
        matches!(self, DrainOutcome::Completed(_))
    }

    /// Why the drain did not run.
    pub fn reason(&self) -> Option<&'static str> {
        match self {
            DrainOutcome::Completed(_) => None,
            DrainOutcome::InProgress => Some("in-progress"),
        }
    }

    /// The report of a drain that ran.
    pub fn report(&self) -> Option<DrainReport> {
        match self {
            DrainOutcome::Completed(report) => Some(*report),
            DrainOutcome::InProgress => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Synced,
    Failed,
    Deferred,
}

enum Prepared {
    Gone,
    /// Rejected by the server and only sendable again once the user changes it.
    AwaitingUser,
    BackingOff,
    /// Refers to a temporary ID the server has not confirmed.
    Waiting,
    Ready(PendingOperation),
}

#[derive(Debug, Default)]
struct Pass {
    outcomes: HashMap<String, Outcome>,
    /// Operations that were waiting on an entity this pass confirmed.
    released: Vec<String>,
}

impl Pass {
    /// Whether some released operation has not been sent yet.
    fn has_unsent_releases(&self) -> bool {
        self.released.iter().any(|local_id| {
            !matches!(
                self.outcomes.get(local_id),
                Some(Outcome::Synced | Outcome::Failed)
            )
        })
    }
}

/// Resets the drain state when a drain ends, however it ends.
struct DrainGuard<'a>(&'a AtomicU8);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(IDLE, Ordering::Release);
    }
}

/// Drains the operation queue of the client database against a [RemoteApi].
///
/// Only one drain runs at a time. Requests are sent one after another and the
/// database lock is released while waiting for the server.
pub struct SyncOrchestrator {
    db_connection: Arc<Mutex<Connection>>,
    remote: Arc<dyn RemoteApi>,
    state: AtomicU8,
    events: SyncEventBus,
    config: SyncConfig,
}

impl std::fmt::Debug for SyncOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncOrchestrator")
            .field("state", &self.state)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl SyncOrchestrator {
    /// Create an orchestrator for the client database behind `db_connection`.
    pub fn new(
        db_connection: Arc<Mutex<Connection>>,
        remote: Arc<dyn RemoteApi>,
        events: SyncEventBus,
        config: SyncConfig,
    ) -> Self {
        Self {
            db_connection,
            remote,
            state: AtomicU8::new(IDLE),
            events,
            config,
        }
    }

    /// Receive the lifecycle events of future drains.
    pub fn subscribe(&self) -> SyncSubscription {
        self.events.subscribe()
    }

    /// Whether a drain is running.
    pub fn is_draining(&self) -> bool {
        self.state.load(Ordering::Acquire) == DRAINING
    }

    /// Count the unsent operations of `user_id`.
    pub fn pending_count(&self, user_id: UserId) -> Result<PendingCount, Error> {
        self.with_connection(|connection| queue::pending_count(user_id, connection))
    }

    /// Send every queued operation of `user_id` to the server.
    pub async fn drain(&self, user_id: UserId) -> Result<DrainOutcome, Error> {
        self.drain_at(user_id, OffsetDateTime::now_utc()).await
    }

    /// Send the queued operations of `user_id`, treating `now` as the current time.
    pub async fn drain_at(&self, user_id: UserId, now: OffsetDateTime) -> Result<DrainOutcome, Error> {
        self.drain_kinds(user_id, &EntityKind::ALL, now).await
    }

    /// Send the queued operations of `user_id` that change entities of the given `kinds`.
    ///
    /// # Errors
    /// Returns an error if the client database fails. Failures from the server
    /// are recorded on the operations instead.
    pub async fn drain_kinds(
        &self,
        user_id: UserId,
        kinds: &[EntityKind],
        now: OffsetDateTime,
    ) -> Result<DrainOutcome, Error> {
        if self
            .state
            .compare_exchange(IDLE, DRAINING, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!("Skipping drain for user {user_id}, a drain is already running");
            return Ok(DrainOutcome::InProgress);
        }
        let _guard = DrainGuard(&self.state);

        self.events.publish(SyncEvent::Started { user_id });

        match self.run_drain(user_id, kinds, now).await {
            Ok(report) => {
                tracing::info!(
                    "Drained queue for user {user_id}: {} synced, {} errors, {} deferred",
                    report.synced,
                    report.errors,
                    report.deferred
                );
                self.events.publish(SyncEvent::Completed { user_id, report });
                Ok(DrainOutcome::Completed(report))
            }
            Err(error) => {
                tracing::error!("Drain for user {user_id} failed: {error}");
                self.events.publish(SyncEvent::Failed {
                    user_id,
                    message: error.to_string(),
                });
                Err(error)
            }
        }
    }

    async fn run_drain(
        &self,
        user_id: UserId,
        kinds: &[EntityKind],
        now: OffsetDateTime,
    ) -> Result<DrainReport, Error> {
        self.with_connection(queue::resume_interrupted)?;

        let mut outcomes = HashMap::new();
        let mut released = HashSet::new();

        for pass_number in 0..=self.config.max_dependent_passes {
            let pass = self.run_pass(user_id, kinds, &released, now).await?;
            let needs_dependent_pass = pass.has_unsent_releases();

            released.extend(pass.released);
            outcomes.extend(pass.outcomes);

            if !needs_dependent_pass {
                break;
            }

            tracing::debug!("Starting dependent pass {} for user {user_id}", pass_number + 1);
        }

        self.with_connection(queue::purge_synced)?;

        let count = |outcome: Outcome| outcomes.values().filter(|&&other| other == outcome).count();

        Ok(DrainReport {
            synced: count(Outcome::Synced),
            errors: count(Outcome::Failed),
            deferred: count(Outcome::Deferred),
        })
    }

    /// Send the queued operations of the given `kinds`, plus the `released`
    /// operations whatever their kind.
    async fn run_pass(
        &self,
        user_id: UserId,
        kinds: &[EntityKind],
        released: &HashSet<String>,
        now: OffsetDateTime,
    ) -> Result<Pass, Error> {
        let mut queued = self.with_connection(|connection| queue::list_pending(user_id, connection))?;
        queued.retain(|operation| {
            kinds.contains(&operation.entity_kind) || released.contains(&operation.local_id)
        });
        // Stable, so operations of one kind keep their queue order.
        queued.sort_by_key(|operation| operation.entity_kind);

        let mut pass = Pass::default();

        for queued_operation in queued {
            let local_id = queued_operation.local_id;
            let Some(outcome) = self.process(&local_id, now, &mut pass).await? else {
                continue;
            };

            pass.outcomes.insert(local_id, outcome);
        }

        Ok(pass)
    }

    /// Send one operation. Returns `None` if the operation left the queue
    /// since the pass started.
    async fn process(
        &self,
        local_id: &str,
        now: OffsetDateTime,
        pass: &mut Pass,
    ) -> Result<Option<Outcome>, Error> {
        let prepared = self.with_connection(|connection| prepare(local_id, now, connection))?;

        let operation = match prepared {
            Prepared::Gone => return Ok(None),
            Prepared::AwaitingUser => return Ok(Some(Outcome::Failed)),
            Prepared::BackingOff | Prepared::Waiting => return Ok(Some(Outcome::Deferred)),
            Prepared::Ready(operation) => operation,
        };

        match self.transmit(&operation).await {
            Ok(remote_entity) => {
                let released = self.with_connection(|connection| {
                    confirm(&operation, remote_entity.as_ref(), now, connection)
                })?;
                pass.released.extend(released);

                Ok(Some(Outcome::Synced))
            }
            Err(error) => {
                self.with_connection(|connection| {
                    self.record_failure(&operation, &error, now, connection)
                })?;

                Ok(Some(Outcome::Failed))
            }
        }
    }

    /// Send `operation` to the server. Returns the entity as stored by the
    /// server, or `None` if the operation deleted it.
    async fn transmit(&self, operation: &PendingOperation) -> Result<Option<Value>, RemoteError> {
        let kind = operation.entity_kind;
        let target_id = || operation.target_id.as_deref().ok_or(RemoteError::NotFound);

        match operation.action {
            Action::Create => match self.remote.create(kind, &operation.payload).await {
                Ok(entity) => Ok(Some(entity)),
                Err(RemoteError::Conflict(message)) if kind == EntityKind::Category => {
                    self.find_existing_category(operation, message).await.map(Some)
                }
                Err(error) => Err(error),
            },
            Action::Update => self
                .remote
                .update(kind, target_id()?, &operation.payload)
                .await
                .map(Some),
            Action::Delete => match self.remote.delete(kind, target_id()?).await {
                Ok(()) | Err(RemoteError::NotFound) => Ok(None),
                Err(error) => Err(error),
            },
        }
    }

    /// Resolve a duplicate name by adopting the category that already exists on the server.
    async fn find_existing_category(
        &self,
        operation: &PendingOperation,
        conflict: String,
    ) -> Result<Value, RemoteError> {
        let name = operation
            .payload
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or_default();

        match self.remote.find_category_by_name(name).await? {
            Some(existing) => {
                tracing::info!(
                    "Category \"{name}\" already exists on the server, reusing it for {}",
                    operation.local_id
                );
                Ok(existing)
            }
            None => Err(RemoteError::Conflict(conflict)),
        }
    }

    fn record_failure(
        &self,
        operation: &PendingOperation,
        error: &RemoteError,
        now: OffsetDateTime,
        connection: &Connection,
    ) -> Result<(), Error> {
        let retry_at = error
            .is_retryable()
            .then(|| now + self.config.backoff_delay(operation.retry_count + 1));

        match retry_at {
            Some(retry_at) => tracing::warn!(
                "{} {} {} failed, retrying after {retry_at}: {error}",
                operation.action.as_str(),
                operation.entity_kind,
                operation.local_id
            ),
            None => tracing::warn!(
                "{} {} {} was rejected: {error}",
                operation.action.as_str(),
                operation.entity_kind,
                operation.local_id
            ),
        }

        queue::mark_status(
            &operation.local_id,
            StatusChange::Failed {
                error: error.to_string(),
                retry_at,
            },
            connection,
        )
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

/// Record the server's answer to `operation`. Returns the operations that
/// were waiting on the entity it created.
fn confirm(
    operation: &PendingOperation,
    remote_entity: Option<&Value>,
    now: OffsetDateTime,
    connection: &Connection,
) -> Result<Vec<String>, Error> {
    match (operation.action, remote_entity) {
        (Action::Create, Some(entity)) => {
            let dependents = reconcile::dependents(&operation.local_id, connection)?;
            reconcile::confirm_create(operation, entity, now, connection)?;
            Ok(dependents)
        }
        (Action::Update, Some(entity)) => {
            reconcile::confirm_update(operation, entity, connection).map(|_| Vec::new())
        }
        (Action::Delete, _) => {
            reconcile::confirm_delete(operation, connection).map(|_| Vec::new())
        }
        (action, None) => Err(Error::Validation(format!(
            "the server returned no {} for {}",
            operation.entity_kind,
            action.as_str()
        ))),
    }
}

/// Reload an operation and decide whether it can be sent now.
fn prepare(local_id: &str, now: OffsetDateTime, connection: &Connection) -> Result<Prepared, Error> {
    // Reloaded because an earlier operation may have rewritten its references.
    let Some(mut operation) = queue::get_operation(local_id, connection)? else {
        return Ok(Prepared::Gone);
    };

    match operation.status {
        OperationStatus::Syncing | OperationStatus::Synced => return Ok(Prepared::Gone),
        OperationStatus::Error if operation.next_attempt_at.is_none() => {
            return Ok(Prepared::AwaitingUser);
        }
        _ if !operation.is_ready(now) => return Ok(Prepared::BackingOff),
        _ => {}
    }

    if let Some(temp_id) = reconcile::resolve_references(&mut operation, connection)? {
        tracing::debug!("Deferring {local_id}, waiting for {temp_id}");
        return Ok(Prepared::Waiting);
    }

    queue::mark_status(local_id, StatusChange::Syncing, connection)?;

    Ok(Prepared::Ready(operation))
}
