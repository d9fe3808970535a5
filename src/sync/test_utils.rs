//! An in-memory [RemoteApi] for testing the sync client without a server.

use std::{
    collections::{BTreeMap, VecDeque},
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::sync::Notify;

use crate::sync::{Action, EntityKind, RemoteApi, RemoteError, is_temp_id};

/// A request received by [FakeRemote].
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteCall {
    pub action: Action,
    pub kind: EntityKind,
    pub id: Option<String>,
    pub payload: Value,
}

#[derive(Debug, Default)]
struct FakeState {
    next_id: i64,
    entities: BTreeMap<(EntityKind, String), Value>,
    calls: Vec<RemoteCall>,
    failures: VecDeque<RemoteError>,
}

/// Holds a request until the test releases it.
#[derive(Debug, Default)]
pub struct Gate {
    pub entered: Notify,
    pub release: Notify,
}

/// Stores entities in memory and assigns sequential IDs like the server does.
///
/// Category names are unique and a payload that refers to a temporary ID is
/// rejected, as the server would.
#[derive(Debug, Default)]
pub struct FakeRemote {
    state: Mutex<FakeState>,
    gate: Option<Arc<Gate>>,
}

impl FakeRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// A remote whose requests wait for `gate` to be released.
    pub fn gated(gate: Arc<Gate>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::default()
        }
    }

    /// Make the next request fail with `error`.
    pub fn fail_next(&self, error: RemoteError) {
        self.state.lock().unwrap().failures.push_back(error);
    }

    /// Store an entity as though another client had created it.
    pub fn seed(&self, kind: EntityKind, mut entity: Value) -> Value {
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let id = state.next_id;
        entity["id"] = json!(id);
        state.entities.insert((kind, id.to_string()), entity.clone());
        entity
    }

    pub fn calls(&self) -> Vec<RemoteCall> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn entities(&self, kind: EntityKind) -> Vec<Value> {
        self.state
            .lock()
            .unwrap()
            .entities
            .iter()
            .filter(|((entity_kind, _), _)| *entity_kind == kind)
            .map(|(_, entity)| entity.clone())
            .collect()
    }

    async fn enter(&self, call: RemoteCall) -> Result<(), RemoteError> {
        if let Some(gate) = &self.gate {
            gate.entered.notify_one();
            gate.release.notified().await;
        }

        let mut state = self.state.lock().unwrap();
        state.calls.push(call);

        match state.failures.pop_front() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn check(&self, kind: EntityKind, id: Option<&str>, payload: &Value) -> Result<(), RemoteError> {
        let state = self.state.lock().unwrap();

        if payload
            .get("categoryId")
            .and_then(Value::as_str)
            .is_some_and(is_temp_id)
        {
            return Err(RemoteError::Validation("invalid category ID".to_owned()));
        }

        if kind == EntityKind::Category {
            let name = payload.get("name").and_then(Value::as_str);
            let taken = state.entities.iter().any(|((entity_kind, entity_id), entity)| {
                *entity_kind == EntityKind::Category
                    && Some(entity_id.as_str()) != id
                    && entity.get("name").and_then(Value::as_str) == name
            });

            if taken {
                return Err(RemoteError::Conflict(format!("{name:?} already exists")));
            }
        }

        Ok(())
    }
}

#[async_trait]
impl RemoteApi for FakeRemote {
    async fn create(&self, kind: EntityKind, payload: &Value) -> Result<Value, RemoteError> {
        self.enter(RemoteCall {
            action: Action::Create,
            kind,
            id: None,
            payload: payload.clone(),
        })
        .await?;
        self.check(kind, None, payload)?;

        Ok(self.seed(kind, payload.clone()))
    }

    async fn update(
        &self,
        kind: EntityKind,
        id: &str,
        payload: &Value,
    ) -> Result<Value, RemoteError> {
        self.enter(RemoteCall {
            action: Action::Update,
            kind,
            id: Some(id.to_owned()),
            payload: payload.clone(),
        })
        .await?;
        self.check(kind, Some(id), payload)?;

        let mut state = self.state.lock().unwrap();
        let key = (kind, id.to_owned());
        if !state.entities.contains_key(&key) {
            return Err(RemoteError::NotFound);
        }

        let mut entity = payload.clone();
        entity["id"] = id.parse::<i64>().map_or_else(|_| json!(id), |id| json!(id));
        state.entities.insert(key, entity.clone());

        Ok(entity)
    }

    async fn delete(&self, kind: EntityKind, id: &str) -> Result<(), RemoteError> {
        self.enter(RemoteCall {
            action: Action::Delete,
            kind,
            id: Some(id.to_owned()),
            payload: Value::Null,
        })
        .await?;

        self.state
            .lock()
            .unwrap()
            .entities
            .remove(&(kind, id.to_owned()))
            .map(|_| ())
            .ok_or(RemoteError::NotFound)
    }

    async fn list(&self, kind: EntityKind) -> Result<Vec<Value>, RemoteError> {
        Ok(self.entities(kind))
    }

    async fn find_category_by_name(&self, name: &str) -> Result<Option<Value>, RemoteError> {
        Ok(self
            .entities(EntityKind::Category)
            .into_iter()
            .find(|category| category.get("name").and_then(Value::as_str) == Some(name)))
    }
}
