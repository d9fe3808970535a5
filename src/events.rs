//! Pushes named events to the connected clients of a user.
//!
//! Each open `GET /api/events` stream registers a connection with the
//! [EventRegistry]. Publishing to a user fans the event out to all of that
//! user's connections. Connections are removed when their stream is dropped,
//! or lazily when a send finds the receiving end closed.

use std::{
    collections::HashMap,
    convert::Infallible,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use axum::{
    extract::{FromRef, State},
    response::sse::{Event, KeepAlive, Sse},
};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tokio_stream::{Stream, StreamExt, wrappers::UnboundedReceiverStream};

use crate::{AppState, user::CurrentUser, user::UserId};

/// The name of the event published when a transaction is created by a recurring rule.
pub const TRANSACTION_CREATED: &str = "transaction_created";

/// Identifies one open event stream.
pub type ConnectionId = u64;

/// A named event with a JSON payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServerEvent {
    /// The event name, sent as the SSE `event` field.
    pub name: String,
    /// The event data.
    pub payload: Value,
}

#[derive(Debug, Default)]
struct Registry {
    next_id: ConnectionId,
    connections: HashMap<ConnectionId, (UserId, UnboundedSender<ServerEvent>)>,
}

/// The set of open event streams, grouped by user.
///
/// Cloning the registry gives another handle to the same set of connections.
#[derive(Debug, Clone, Default)]
pub struct EventRegistry {
    inner: Arc<Mutex<Registry>>,
}

impl EventRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a connection for `user_id` and get the receiving end of its events.
    pub fn subscribe(&self, user_id: UserId) -> (ConnectionId, UnboundedReceiver<ServerEvent>) {
        let (sender, receiver) = unbounded_channel();
        let mut registry = self.lock();

        let id = registry.next_id;
        registry.next_id += 1;
        registry.connections.insert(id, (user_id, sender));

        tracing::debug!("Opened event connection {id} for user {user_id}");

        (id, receiver)
    }

    /// Close a connection. Closing an unknown connection does nothing.
    pub fn unsubscribe(&self, id: ConnectionId) {
        if self.lock().connections.remove(&id).is_some() {
            tracing::debug!("Closed event connection {id}");
        }
    }

    /// Send an event to every open connection of `user_id`.
    ///
    /// Returns the number of connections the event was delivered to.
    pub fn publish_to_user(&self, user_id: UserId, name: &str, payload: Value) -> usize {
        let mut registry = self.lock();
        let mut delivered = 0;

        registry.connections.retain(|id, (owner, sender)| {
            if *owner != user_id {
                return true;
            }

            let event = ServerEvent {
                name: name.to_owned(),
                payload: payload.clone(),
            };

            match sender.send(event) {
                Ok(()) => {
                    delivered += 1;
                    true
                }
                Err(_) => {
                    tracing::debug!("Dropping closed event connection {id}");
                    false
                }
            }
        });

        delivered
    }

    /// The number of open connections of `user_id`.
    pub fn connection_count(&self, user_id: UserId) -> usize {
        self.lock()
            .connections
            .values()
            .filter(|(owner, _)| *owner == user_id)
            .count()
    }

    fn lock(&self) -> MutexGuard<'_, Registry> {
        // The registry holds no invariants that a panic could break.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl FromRef<AppState> for EventRegistry {
    fn from_ref(state: &AppState) -> Self {
        state.events.clone()
    }
}

/// Unsubscribes a connection when the stream holding it is dropped.
struct ConnectionGuard {
    registry: EventRegistry,
    id: ConnectionId,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.registry.unsubscribe(self.id);
    }
}

/// A route handler that streams the current user's events as Server-Sent Events.
pub async fn get_events_endpoint(
    State(registry): State<EventRegistry>,
    CurrentUser(user_id): CurrentUser,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let (id, receiver) = registry.subscribe(user_id);
    let guard = ConnectionGuard { registry, id };

    let stream = UnboundedReceiverStream::new(receiver).map(move |event| {
        tracing::trace!("Sending {} on event connection {}", event.name, guard.id);

        let sse_event = Event::default().event(&event.name);

        Ok(match sse_event.json_data(&event.payload) {
            Ok(sse_event) => sse_event,
            Err(error) => {
                tracing::error!("Could not encode {} event: {error}", event.name);
                Event::default().comment("dropped event")
            }
        })
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}
