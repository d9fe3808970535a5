//! The seam between the sync client and the server.

use async_trait::async_trait;
use serde_json::Value;

use crate::sync::EntityKind;

/// Why the server did not accept a request from the sync client.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RemoteError {
    /// The server rejected the request as invalid. Retrying will not help
    /// until the request changes.
    #[error("rejected by the server: {0}")]
    Validation(String),

    /// The request conflicts with existing server state, e.g. a duplicate category name.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The entity does not exist on the server.
    #[error("not found on the server")]
    NotFound,

    /// The server could not be reached.
    #[error("network error: {0}")]
    Transient(String),

    /// The server failed to handle the request.
    #[error("server error {status}: {message}")]
    Server {
        /// The HTTP status code of the response.
        status: u16,
        /// The error message from the response body.
        message: String,
    },
}

impl RemoteError {
    /// Whether the same request may succeed if it is sent again later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RemoteError::Transient(_) | RemoteError::Server { .. })
    }
}

/// The server operations the sync client needs.
///
/// Entities are exchanged in the server's JSON format.
#[async_trait]
pub trait RemoteApi: Send + Sync {
    /// Create a `kind` entity and return it as stored by the server.
    async fn create(&self, kind: EntityKind, payload: &Value) -> Result<Value, RemoteError>;

    /// Overwrite the `kind` entity `id` and return it as stored by the server.
    async fn update(&self, kind: EntityKind, id: &str, payload: &Value)
    -> Result<Value, RemoteError>;

    /// Delete the `kind` entity `id`.
    async fn delete(&self, kind: EntityKind, id: &str) -> Result<(), RemoteError>;

    /// Get every `kind` entity the user has on the server.
    async fn list(&self, kind: EntityKind) -> Result<Vec<Value>, RemoteError>;

    /// Find the user's category called `name`.
    async fn find_category_by_name(&self, name: &str) -> Result<Option<Value>, RemoteError>;
}
