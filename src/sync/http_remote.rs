//! A [RemoteApi] that talks to the server's JSON API over HTTP.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::Value;

use crate::{
    endpoints::{self, format_endpoint},
    sync::{EntityKind, RemoteApi, RemoteError},
    user::{USER_ID_HEADER, UserId},
};

/// The body of an error response from the server.
#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: String,
}

/// An HTTP client for the server's API, acting on behalf of one user.
#[derive(Debug, Clone)]
pub struct HttpRemote {
    http: Client,
    base_url: String,
    user_id: UserId,
}

impl HttpRemote {
    /// Create a client for the server at `base_url`, e.g. "http://localhost:3000".
    pub fn new(base_url: impl Into<String>, user_id: UserId) -> Self {
        Self::with_client(Client::new(), base_url, user_id)
    }

    /// Create a client that sends requests with `http`.
    pub fn with_client(http: Client, base_url: impl Into<String>, user_id: UserId) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            user_id,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn collection_path(kind: EntityKind) -> &'static str {
        match kind {
            EntityKind::Category => endpoints::CATEGORIES,
            EntityKind::Transaction => endpoints::TRANSACTIONS,
            EntityKind::RecurringRule => endpoints::RECURRING_RULES,
        }
    }

    fn item_path(kind: EntityKind, id: &str) -> String {
        let path = match kind {
            EntityKind::Category => endpoints::CATEGORY,
            EntityKind::Transaction => endpoints::TRANSACTION,
            EntityKind::RecurringRule => endpoints::RECURRING_RULE,
        };

        format_endpoint(path, id)
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, RemoteError> {
        let response = request
            .header(USER_ID_HEADER, self.user_id.to_string())
            .send()
            .await
            .map_err(|error| RemoteError::Transient(error.to_string()))?;

        if response.status().is_success() {
            return Ok(response);
        }

        Err(error_from_response(response).await)
    }

    async fn send_for_json(&self, request: RequestBuilder) -> Result<Value, RemoteError> {
        self.send(request)
            .await?
            .json::<Value>()
            .await
            .map_err(|error| RemoteError::Transient(format!("unreadable response: {error}")))
    }
}

async fn error_from_response(response: Response) -> RemoteError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorResponse>(&body)
        .map(|response| response.error)
        .unwrap_or(body);

    classify(status, message)
}

/// Sort an error response into the kinds of failure the sync client handles differently.
fn classify(status: StatusCode, message: String) -> RemoteError {
    match status {
        StatusCode::NOT_FOUND => RemoteError::NotFound,
        StatusCode::CONFLICT => RemoteError::Conflict(message),
        status if status.is_client_error() => RemoteError::Validation(message),
        status => RemoteError::Server {
            status: status.as_u16(),
            message,
        },
    }
}

#[async_trait]
impl RemoteApi for HttpRemote {
    async fn create(&self, kind: EntityKind, payload: &Value) -> Result<Value, RemoteError> {
        let url = self.url(Self::collection_path(kind));

        self.send_for_json(self.http.post(url).json(payload)).await
    }

    async fn update(
        &self,
        kind: EntityKind,
        id: &str,
        payload: &Value,
    ) -> Result<Value, RemoteError> {
        let url = self.url(&Self::item_path(kind, id));

        self.send_for_json(self.http.put(url).json(payload)).await
    }

    async fn delete(&self, kind: EntityKind, id: &str) -> Result<(), RemoteError> {
        let url = self.url(&Self::item_path(kind, id));

        self.send(self.http.delete(url)).await.map(|_| ())
    }

    async fn list(&self, kind: EntityKind) -> Result<Vec<Value>, RemoteError> {
        let url = self.url(Self::collection_path(kind));

        match self.send_for_json(self.http.get(url)).await? {
            Value::Array(entities) => Ok(entities),
            other => Err(RemoteError::Server {
                status: 200,
                message: format!("expected a list of {kind}, got {other}"),
            }),
        }
    }

    async fn find_category_by_name(&self, name: &str) -> Result<Option<Value>, RemoteError> {
        let url = self.url(endpoints::CATEGORIES);
        let categories = self
            .send_for_json(self.http.get(url).query(&[("name", name)]))
            .await?;

        Ok(categories
            .as_array()
            .and_then(|categories| categories.first())
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use reqwest::StatusCode;
    use rusqlite::Connection;
    use serde_json::json;

    use crate::{
        AppState, RecurrenceConfig, build_router,
        notification::LogNotifier,
        sync::{EntityKind, RemoteApi, RemoteError},
    };

    use super::{HttpRemote, classify};

    async fn spawn_server() -> String {
        let connection = Connection::open_in_memory().unwrap();
        let state = AppState::new(
            connection,
            RecurrenceConfig::default(),
            Arc::new(LogNotifier),
        )
        .unwrap();
        let app = build_router(state);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();

        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        format!("http://{address}")
    }

    #[test]
    fn statuses_are_classified() {
        assert_eq!(
            classify(StatusCode::UNPROCESSABLE_ENTITY, "bad".to_owned()),
            RemoteError::Validation("bad".to_owned())
        );
        assert_eq!(
            classify(StatusCode::BAD_REQUEST, "bad".to_owned()),
            RemoteError::Validation("bad".to_owned())
        );
        assert_eq!(
            classify(StatusCode::CONFLICT, "taken".to_owned()),
            RemoteError::Conflict("taken".to_owned())
        );
        assert_eq!(classify(StatusCode::NOT_FOUND, String::new()), RemoteError::NotFound);
        assert_eq!(
            classify(StatusCode::BAD_GATEWAY, "down".to_owned()),
            RemoteError::Server {
                status: 502,
                message: "down".to_owned()
            }
        );
    }

    #[tokio::test]
    async fn create_update_and_delete_category() {
        let remote = HttpRemote::new(spawn_server().await, 1);

        let created = remote
            .create(EntityKind::Category, &json!({"name": "Food"}))
            .await
            .unwrap();
        let id = created["id"].to_string();
        let updated = remote
            .update(EntityKind::Category, &id, &json!({"name": "Groceries"}))
            .await
            .unwrap();
        let listed = remote.list(EntityKind::Category).await.unwrap();
        remote.delete(EntityKind::Category, &id).await.unwrap();

        assert_eq!(created["name"], "Food");
        assert_eq!(updated["name"], "Groceries");
        assert_eq!(listed, vec![updated.clone()]);
        assert_eq!(
            remote.delete(EntityKind::Category, &id).await,
            Err(RemoteError::NotFound)
        );
    }

    #[tokio::test]
    async fn duplicate_category_is_a_conflict_found_by_name() {
        let remote = HttpRemote::new(spawn_server().await, 1);
        let created = remote
            .create(EntityKind::Category, &json!({"name": "Food"}))
            .await
            .unwrap();

        let duplicate = remote
            .create(EntityKind::Category, &json!({"name": "Food"}))
            .await;
        let found = remote.find_category_by_name("Food").await.unwrap();

        assert!(matches!(duplicate, Err(RemoteError::Conflict(_))));
        assert_eq!(found.map(|category| category["id"].clone()), Some(created["id"].clone()));
        assert_eq!(remote.find_category_by_name("Rent").await, Ok(None));
    }

    #[tokio::test]
    async fn invalid_transaction_is_a_validation_error() {
        let remote = HttpRemote::new(spawn_server().await, 1);

        let result = remote
            .create(
                EntityKind::Transaction,
                &json!({
                    "title": "Lunch",
                    "type": "EXPENSE",
                    "amount": -1,
                    "date": "2024-01-02T12:00:00Z",
                }),
            )
            .await;

        assert!(matches!(result, Err(RemoteError::Validation(_))));
    }

    #[tokio::test]
    async fn unreachable_server_is_transient() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap();
        drop(listener);
        let remote = HttpRemote::new(format!("http://{address}"), 1);

        let result = remote.find_category_by_name("Food").await;

        assert!(matches!(result, Err(RemoteError::Transient(_))));
    }

    #[test]
    fn trailing_slash_is_trimmed() {
        let remote = HttpRemote::new("http://localhost:3000/", 1);

        assert_eq!(remote.url("/api/categories"), "http://localhost:3000/api/categories");
    }
}
