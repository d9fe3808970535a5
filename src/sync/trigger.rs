//! Requests for a drain, from the host platform or from connectivity changes.
//!
//! A host that can wake the client in the background (e.g. once the network
//! returns) registers the [TriggerTag]s returned by [pending_tags], and hands
//! them back through the request channel of [run_sync_triggers] when it fires.

use std::{fmt::Display, str::FromStr, sync::Arc, time::Duration};

use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};

use crate::{
    Error,
    db::UnknownVariant,
    sync::{EntityKind, SyncOrchestrator, queue},
    user::UserId,
};

const EVERY_KIND: &[EntityKind] = &EntityKind::ALL;

/// The names a client registers with its host to be woken up for a replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TriggerTag {
    /// Replay queued transactions.
    SyncTransactions,
    /// Replay queued categories.
    SyncCategories,
    /// Replay queued recurring rules, which may need a premium plan.
    SyncPremiumUpgrade,
}

impl TriggerTag {
    /// The tag name registered with the host.
    pub fn as_str(self) -> &'static str {
        match self {
            TriggerTag::SyncTransactions => "sync-transactions",
            TriggerTag::SyncCategories => "sync-categories",
            TriggerTag::SyncPremiumUpgrade => "sync-premium-upgrade",
        }
    }

    /// The entity kinds a drain for this tag sends.
    pub fn kinds(self) -> &'static [EntityKind] {
        match self {
            TriggerTag::SyncTransactions => &[EntityKind::Transaction],
            TriggerTag::SyncCategories => &[EntityKind::Category],
            TriggerTag::SyncPremiumUpgrade => &[EntityKind::RecurringRule],
        }
    }

    /// The tag that replays operations on `kind`.
    pub fn for_kind(kind: EntityKind) -> Self {
        match kind {
            EntityKind::Category => TriggerTag::SyncCategories,
            EntityKind::Transaction => TriggerTag::SyncTransactions,
            EntityKind::RecurringRule => TriggerTag::SyncPremiumUpgrade,
        }
    }
}

impl Display for TriggerTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for TriggerTag {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sync-transactions" => Ok(TriggerTag::SyncTransactions),
            "sync-categories" => Ok(TriggerTag::SyncCategories),
            "sync-premium-upgrade" => Ok(TriggerTag::SyncPremiumUpgrade),
            other => Err(UnknownVariant(other.to_owned())),
        }
    }
}

/// The tags to register for the unsent operations of `user_id`.
pub fn pending_tags(user_id: UserId, connection: &Connection) -> Result<Vec<TriggerTag>, Error> {
    let mut tags: Vec<TriggerTag> = queue::list_pending(user_id, connection)?
        .into_iter()
        .map(|operation| TriggerTag::for_kind(operation.entity_kind))
        .collect();

    tags.sort();
    tags.dedup();

    Ok(tags)
}

/// Tracks whether the client can reach the server.
#[derive(Debug)]
pub struct ConnectivityMonitor {
    sender: watch::Sender<bool>,
}

impl ConnectivityMonitor {
    /// Create a monitor that starts `online` or offline.
    pub fn new(online: bool) -> Self {
        let (sender, _) = watch::channel(online);
        Self { sender }
    }

    /// Record a change in connectivity. Subscribers are only woken by actual changes.
    pub fn set_online(&self, online: bool) {
        let changed = self.sender.send_if_modified(|current| {
            let changed = *current != online;
            *current = online;
            changed
        });

        if changed {
            tracing::info!("Connectivity changed, online: {online}");
        }
    }

    /// Whether the client can currently reach the server.
    pub fn is_online(&self) -> bool {
        *self.sender.borrow()
    }

    /// Receive connectivity changes.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.sender.subscribe()
    }
}

/// Drain the queue of `user_id` whenever the client comes back online, the
/// host fires a tag on `requests`, or `period` passes while online.
///
/// Runs until the connectivity monitor or the request sender is dropped.
pub async fn run_sync_triggers(
    orchestrator: Arc<SyncOrchestrator>,
    user_id: UserId,
    mut online: watch::Receiver<bool>,
    mut requests: mpsc::Receiver<TriggerTag>,
    period: Duration,
) {
    let mut tick = tokio::time::interval(period);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        let kinds: &[EntityKind] = tokio::select! {
            changed = online.changed() => {
                if changed.is_err() {
                    break;
                }

                if !*online.borrow_and_update() {
                    continue;
                }

                EVERY_KIND
            }
            request = requests.recv() => {
                let Some(tag) = request else {
                    break;
                };

                tracing::debug!("Host requested {tag}");
                tag.kinds()
            }
            _ = tick.tick() => EVERY_KIND,
        };

        if !*online.borrow() {
            continue;
        }

        let now = time::OffsetDateTime::now_utc();
        if let Err(error) = orchestrator.drain_kinds(user_id, kinds, now).await {
            tracing::error!("Triggered drain for user {user_id} failed: {error}");
        }
    }

    tracing::debug!("Stopped sync triggers for user {user_id}");
}
