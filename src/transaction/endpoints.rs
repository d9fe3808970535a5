//! JSON route handlers for transactions.

use std::sync::{Arc, Mutex};

use axum::{
    Json,
    extract::{FromRef, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use rusqlite::Connection;
use serde::Deserialize;
use time::OffsetDateTime;

use crate::{
    AppState, Error,
    category::CategoryId,
    database_id::deserialize_optional_id,
    transaction::{
        Transaction, TransactionBuilder, TransactionId, TransactionQuery, TransactionType,
        create_transaction, delete_transaction, get_transaction, query_transactions,
        update_transaction,
    },
    user::CurrentUser,
};

/// The state needed to manage transactions.
#[derive(Debug, Clone)]
pub struct TransactionState {
    /// The database connection for managing transactions.
    pub db_connection: Arc<Mutex<Connection>>,
}

impl FromRef<AppState> for TransactionState {
    fn from_ref(state: &AppState) -> Self {
        Self {
            db_connection: state.db_connection.clone(),
        }
    }
}

/// The request body for creating or replacing a transaction.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRequest {
    pub title: String,
    #[serde(rename = "type")]
    pub transaction_type: TransactionType,
    pub amount: f64,
    #[serde(with = "time::serde::rfc3339")]
    pub date: OffsetDateTime,
    #[serde(default)]
    pub description: String,
    #[serde(default, deserialize_with = "deserialize_optional_id")]
    pub category_id: Option<CategoryId>,
}

impl From<TransactionRequest> for TransactionBuilder {
    fn from(request: TransactionRequest) -> Self {
        Transaction::build(
            &request.title,
            request.transaction_type,
            request.amount,
            request.date,
        )
        .description(&request.description)
        .category_id(request.category_id)
    }
}

/// A route handler for creating a transaction.
pub async fn create_transaction_endpoint(
    State(state): State<TransactionState>,
    CurrentUser(user_id): CurrentUser,
    Json(request): Json<TransactionRequest>,
) -> Result<impl IntoResponse, Error> {
    let connection = state
        .db_connection
        .lock()
        .map_err(|_| Error::DatabaseLockError)?;
    let transaction = create_transaction(user_id, request.into(), &connection)?;

    Ok((StatusCode::CREATED, Json(transaction)))
}

/// A route handler for listing the user's transactions with optional filters.
pub async fn get_transactions_endpoint(
    State(state): State<TransactionState>,
    CurrentUser(user_id): CurrentUser,
    Query(query): Query<TransactionQuery>,
) -> Result<Json<Vec<Transaction>>, Error> {
    let connection = state
        .db_connection
        .lock()
        .map_err(|_| Error::DatabaseLockError)?;

    Ok(Json(query_transactions(user_id, &query, &connection)?))
}

/// A route handler for getting a single transaction.
pub async fn get_transaction_endpoint(
    State(state): State<TransactionState>,
    CurrentUser(user_id): CurrentUser,
    Path(transaction_id): Path<TransactionId>,
) -> Result<Json<Transaction>, Error> {
    let connection = state
        .db_connection
        .lock()
        .map_err(|_| Error::DatabaseLockError)?;

    Ok(Json(get_transaction(user_id, transaction_id, &connection)?))
}

/// A route handler for replacing a transaction.
pub async fn update_transaction_endpoint(
    State(state): State<TransactionState>,
    CurrentUser(user_id): CurrentUser,
    Path(transaction_id): Path<TransactionId>,
    Json(request): Json<TransactionRequest>,
) -> Result<Json<Transaction>, Error> {
    let connection = state
        .db_connection
        .lock()
        .map_err(|_| Error::DatabaseLockError)?;
    let transaction = update_transaction(user_id, transaction_id, request.into(), &connection)?;

    Ok(Json(transaction))
}

/// A route handler for deleting a transaction.
pub async fn delete_transaction_endpoint(
    State(state): State<TransactionState>,
    CurrentUser(user_id): CurrentUser,
    Path(transaction_id): Path<TransactionId>,
) -> Result<StatusCode, Error> {
    let connection = state
        .db_connection
        .lock()
        .map_err(|_| Error::DatabaseLockError)?;
    delete_transaction(user_id, transaction_id, &connection)?;

    Ok(StatusCode::NO_CONTENT)
}
