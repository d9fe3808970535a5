//! The client side: a local mirror of server state, a durable queue of
//! changes made offline, and the orchestrator that replays the queue once the
//! server can be reached.
//!
//! Entities created offline get a temporary ID (see [is_temp_id]) until the
//! server confirms them, at which point every reference to the temporary ID
//! is rewritten to the server ID.

mod actions;
pub mod db;
mod event_bus;
mod http_remote;
pub mod mirror;
mod operation;
mod orchestrator;
pub mod queue;
pub mod reconcile;
mod remote;
mod trigger;

#[cfg(test)]
mod test_utils;

pub use actions::{CategoryDraft, EntityDraft, LedgerClient, RecurringRuleDraft, TransactionDraft};
pub use db::initialize_client_db;
pub use event_bus::{SyncEvent, SyncEventBus, SyncSubscription};
pub use http_remote::HttpRemote;
pub use mirror::MirrorEntity;
pub use operation::{
    Action, EntityKind, NewOperation, OperationStatus, PendingOperation, TEMP_ID_MARKER,
    is_temp_id, new_temp_id,
};
pub use orchestrator::{DrainOutcome, DrainReport, SyncOrchestrator};
pub use queue::{PendingCount, StatusChange};
pub use remote::{RemoteApi, RemoteError};
pub use trigger::{ConnectivityMonitor, TriggerTag, pending_tags, run_sync_triggers};
