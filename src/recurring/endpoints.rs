//! JSON route handlers for recurring rules.

use std::sync::{Arc, Mutex};

use axum::{
    Json,
    extract::{FromRef, Path, State},
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
    recurring::{
        FrequencyUnit, RecurrenceProcessor, RuleDraft, RuleId, create_recurring_rule,
        delete_recurring_rule, get_recurring_rule, get_recurring_rules, update_recurring_rule,
    },
    transaction::TransactionType,
    user::CurrentUser,
};

/// The state needed to manage and run recurring rules.
#[derive(Debug, Clone)]
pub struct RecurringState {
    /// The database connection for managing rules.
    pub db_connection: Arc<Mutex<Connection>>,
    /// Runs rules on demand.
    pub processor: Arc<RecurrenceProcessor>,
}

impl FromRef<AppState> for RecurringState {
    fn from_ref(state: &AppState) -> Self {
        Self {
            db_connection: state.db_connection.clone(),
            processor: state.processor.clone(),
        }
    }
}

/// The request body for creating or replacing a recurring rule.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct RecurringRuleRequest {
    pub title: String,
    #[serde(rename = "type")]
    pub transaction_type: TransactionType,
    pub amount: f64,
    #[serde(default, deserialize_with = "deserialize_optional_id")]
    pub category_id: Option<CategoryId>,
    pub frequency_value: u32,
    pub frequency_unit: FrequencyUnit,
    #[serde(with = "time::serde::rfc3339")]
    pub start_date: OffsetDateTime,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub end_date: Option<OffsetDateTime>,
    /// Defaults to true. Setting it on an inactive rule re-activates the rule.
    #[serde(default)]
    pub is_active: Option<bool>,
    #[serde(default)]
    pub notify_on_run: bool,
    #[serde(default)]
    pub description: Option<String>,
}

impl From<RecurringRuleRequest> for RuleDraft {
    fn from(request: RecurringRuleRequest) -> Self {
        RuleDraft::new(
            &request.title,
            request.transaction_type,
            request.amount,
            request.frequency_value,
            request.frequency_unit,
            request.start_date,
        )
        .category_id(request.category_id)
        .end_date(request.end_date)
        .is_active(request.is_active.unwrap_or(true))
        .notify_on_run(request.notify_on_run)
        .description(request.description.as_deref().unwrap_or_default())
    }
}

/// A route handler for creating a recurring rule.
pub async fn create_rule_endpoint(
    State(state): State<RecurringState>,
    CurrentUser(user_id): CurrentUser,
    Json(request): Json<RecurringRuleRequest>,
) -> Result<impl IntoResponse, Error> {
    let connection = state
        .db_connection
        .lock()
        .map_err(|_| Error::DatabaseLockError)?;

    let rule = create_recurring_rule(
        user_id,
        request.into(),
        OffsetDateTime::now_utc(),
        state.processor.config(),
        &connection,
    )?;

    Ok((StatusCode::CREATED, Json(rule)))
}

/// A route handler for listing the current user's recurring rules.
pub async fn get_rules_endpoint(
    State(state): State<RecurringState>,
    CurrentUser(user_id): CurrentUser,
) -> Result<impl IntoResponse, Error> {
    let connection = state
        .db_connection
        .lock()
        .map_err(|_| Error::DatabaseLockError)?;

    get_recurring_rules(user_id, &connection).map(Json)
}

/// A route handler for getting a single recurring rule.
pub async fn get_rule_endpoint(
    State(state): State<RecurringState>,
    CurrentUser(user_id): CurrentUser,
    Path(rule_id): Path<RuleId>,
) -> Result<impl IntoResponse, Error> {
    let connection = state
        .db_connection
        .lock()
        .map_err(|_| Error::DatabaseLockError)?;

    get_recurring_rule(user_id, rule_id, &connection).map(Json)
}

/// A route handler for replacing a recurring rule.
pub async fn update_rule_endpoint(
    State(state): State<RecurringState>,
    CurrentUser(user_id): CurrentUser,
    Path(rule_id): Path<RuleId>,
    Json(request): Json<RecurringRuleRequest>,
) -> Result<impl IntoResponse, Error> {
    let connection = state
        .db_connection
        .lock()
        .map_err(|_| Error::DatabaseLockError)?;

    update_recurring_rule(
        user_id,
        rule_id,
        request.into(),
        OffsetDateTime::now_utc(),
        state.processor.config(),
        &connection,
    )
    .map(Json)
}

/// A route handler for deleting a recurring rule.
pub async fn delete_rule_endpoint(
    State(state): State<RecurringState>,
    CurrentUser(user_id): CurrentUser,
    Path(rule_id): Path<RuleId>,
) -> Result<impl IntoResponse, Error> {
    let connection = state
        .db_connection
        .lock()
        .map_err(|_| Error::DatabaseLockError)?;

    delete_recurring_rule(user_id, rule_id, &connection)?;

    Ok(StatusCode::NO_CONTENT)
}

/// A route handler that runs a recurring rule immediately.
///
/// Responds with 201 if a transaction was created, or 200 with the existing
/// transaction if today's occurrence was already materialized.
pub async fn run_rule_endpoint(
    State(state): State<RecurringState>,
    CurrentUser(user_id): CurrentUser,
    Path(rule_id): Path<RuleId>,
) -> Result<impl IntoResponse, Error> {
    let outcome = state
        .processor
        .run_now(user_id, rule_id, OffsetDateTime::now_utc())
        .await?;

    let status = if outcome.created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };

    Ok((status, Json(outcome)))
}

/// A route handler that runs every due rule now instead of waiting for the next sweep.
pub async fn process_due_endpoint(
    State(state): State<RecurringState>,
    CurrentUser(user_id): CurrentUser,
) -> Result<impl IntoResponse, Error> {
    tracing::info!("User {user_id} requested a sweep of due recurring rules");

    let summary = state
        .processor
        .process_due(OffsetDateTime::now_utc())
        .await?;

    Ok(Json(summary))
}
