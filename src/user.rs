//! Users, their plans, and the extractor that identifies who a request is for.
//!
//! Credentials are handled by an upstream layer which sets the
//! [USER_ID_HEADER] on every request it lets through.

use std::{
    fmt::Display,
    str::FromStr,
    sync::{Arc, Mutex},
};

use axum::{
    Json,
    extract::{FromRef, FromRequestParts, Path, State},
    http::{StatusCode, request::Parts},
    response::IntoResponse,
};
use rusqlite::{
    Connection, Row, ToSql,
    types::{FromSql, FromSqlResult, ToSqlOutput, ValueRef},
};
use serde::{Deserialize, Serialize};

use crate::{
    AppState, DatabaseId, Error,
    db::{UnknownVariant, parse_text_column},
};

/// Database identifier for a user.
pub type UserId = DatabaseId;

/// The header carrying the ID of the authenticated user.
pub const USER_ID_HEADER: &str = "x-user-id";

/// The number of active recurring rules a user on the free plan may have.
pub const FREE_PLAN_ACTIVE_RULE_LIMIT: usize = 5;

/// The subscription plan of a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum Plan {
    /// Limited to [FREE_PLAN_ACTIVE_RULE_LIMIT] active recurring rules.
    #[default]
    Free,
    /// No limit on active recurring rules.
    Premium,
}

impl Plan {
    /// The most active recurring rules a user on this plan may have, `None` if unlimited.
    pub fn max_active_rules(self) -> Option<usize> {
        match self {
            Plan::Free => Some(FREE_PLAN_ACTIVE_RULE_LIMIT),
            Plan::Premium => None,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Plan::Free => "FREE",
            Plan::Premium => "PREMIUM",
        }
    }
}

impl Display for Plan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Plan {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "FREE" => Ok(Plan::Free),
            "PREMIUM" => Ok(Plan::Premium),
            other => Err(UnknownVariant(other.to_owned())),
        }
    }
}

impl ToSql for Plan {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for Plan {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        parse_text_column(value)
    }
}

/// A user of the application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    /// The ID of the user.
    pub id: UserId,
    /// The email address the user registered with.
    pub email: String,
    /// The user's subscription plan.
    pub plan: Plan,
}

/// The user a request is made on behalf of.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CurrentUser(pub UserId);

impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse().ok())
            .map(CurrentUser)
            .ok_or(Error::Unauthenticated)
    }
}

/// Create a user and return it with its generated ID.
///
/// # Errors
/// Returns an [Error::Validation] if `email` is empty, or an [Error::SqlError]
/// if the email is already registered or there is some other SQL error.
pub fn create_user(email: &str, plan: Plan, connection: &Connection) -> Result<User, Error> {
    let email = email.trim();

    if email.is_empty() {
        return Err(Error::Validation("email cannot be empty".to_owned()));
    }

    connection
        .prepare("INSERT INTO user (email, plan) VALUES (?1, ?2) RETURNING id, email, plan")?
        .query_row((email, plan), map_user_row)
        .map_err(Error::from)
}

/// Retrieve a user by `user_id`.
///
/// # Errors
/// Returns an [Error::NotFound] if the user does not exist.
pub fn get_user(user_id: UserId, connection: &Connection) -> Result<User, Error> {
    connection
        .prepare("SELECT id, email, plan FROM user WHERE id = :id")?
        .query_row(&[(":id", &user_id)], map_user_row)
        .map_err(Error::from)
}

/// Get the plan for `user_id`.
///
/// Users that have not been registered with this server are treated as being
/// on the free plan.
pub fn get_plan(user_id: UserId, connection: &Connection) -> Result<Plan, Error> {
    match get_user(user_id, connection) {
        Ok(user) => Ok(user.plan),
        Err(Error::NotFound) => Ok(Plan::Free),
        Err(error) => Err(error),
    }
}

/// Change the plan of `user_id`.
///
/// # Errors
/// Returns an [Error::NotFound] if the user does not exist.
pub fn set_plan(user_id: UserId, plan: Plan, connection: &Connection) -> Result<User, Error> {
    connection
        .prepare("UPDATE user SET plan = ?1 WHERE id = ?2 RETURNING id, email, plan")?
        .query_row((plan, user_id), map_user_row)
        .map_err(Error::from)
}

/// Create the user table in the database.
pub fn create_user_table(connection: &Connection) -> Result<(), rusqlite::Error> {
    connection.execute(
        "CREATE TABLE IF NOT EXISTS user (
                id INTEGER PRIMARY KEY,
                email TEXT NOT NULL UNIQUE,
                plan TEXT NOT NULL DEFAULT 'FREE'
            )",
        (),
    )?;

    Ok(())
}

fn map_user_row(row: &Row) -> Result<User, rusqlite::Error> {
    Ok(User {
        id: row.get(0)?,
        email: row.get(1)?,
        plan: row.get(2)?,
    })
}

/// The state needed for user management.
#[derive(Debug, Clone)]
pub struct UserState {
    /// The database connection for managing users.
    pub db_connection: Arc<Mutex<Connection>>,
}

impl FromRef<AppState> for UserState {
    fn from_ref(state: &AppState) -> Self {
        Self {
            db_connection: state.db_connection.clone(),
        }
    }
}

/// The request body for registering a user.
#[derive(Debug, Deserialize)]
pub struct NewUserRequest {
    /// The user's email address.
    pub email: String,
    /// The user's plan, defaults to the free plan.
    #[serde(default)]
    pub plan: Plan,
}

/// The request body for changing a user's plan.
#[derive(Debug, Deserialize)]
pub struct PlanRequest {
    /// The new plan.
    pub plan: Plan,
}

/// A route handler for registering a user.
pub async fn create_user_endpoint(
    State(state): State<UserState>,
    Json(request): Json<NewUserRequest>,
) -> Result<impl IntoResponse, Error> {
    let connection = state
        .db_connection
        .lock()
        .map_err(|_| Error::DatabaseLockError)?;

    let user = create_user(&request.email, request.plan, &connection)?;
    tracing::info!("Registered user {} on the {} plan", user.id, user.plan);

    Ok((StatusCode::CREATED, Json(user)))
}

/// A route handler for changing a user's plan, e.g. after an upgrade to premium.
pub async fn update_plan_endpoint(
    State(state): State<UserState>,
    Path(user_id): Path<UserId>,
    Json(request): Json<PlanRequest>,
) -> Result<Json<User>, Error> {
    let connection = state
        .db_connection
        .lock()
        .map_err(|_| Error::DatabaseLockError)?;

    let user = set_plan(user_id, request.plan, &connection)?;
    tracing::info!("User {} is now on the {} plan", user.id, user.plan);

    Ok(Json(user))
}

#[cfg(test)]
mod tests {
    use rusqlite::Connection;

    use crate::{
        Error,
        user::{Plan, create_user, create_user_table, get_plan, get_user, set_plan},
    };

    fn get_test_connection() -> Connection {
        let connection = Connection::open_in_memory().unwrap();
        create_user_table(&connection).expect("Could not create user table");
        connection
    }

    #[test]
    fn create_user_succeeds() {
        let connection = get_test_connection();

        let user = create_user("foo@bar.baz", Plan::Premium, &connection)
            .expect("Could not create user");

        assert!(user.id > 0);
        assert_eq!(user.plan, Plan::Premium);
        assert_eq!(get_user(user.id, &connection), Ok(user));
    }

    #[test]
    fn create_user_fails_on_empty_email() {
        let connection = get_test_connection();

        let result = create_user("  ", Plan::Free, &connection);

        assert!(matches!(result, Err(Error::Validation(_))));
    }

    #[test]
    fn unknown_users_are_on_the_free_plan() {
        let connection = get_test_connection();

        assert_eq!(get_plan(42, &connection), Ok(Plan::Free));
    }

    #[test]
    fn set_plan_upgrades_user() {
        let connection = get_test_connection();
        let user = create_user("foo@bar.baz", Plan::Free, &connection).unwrap();

        let upgraded = set_plan(user.id, Plan::Premium, &connection).unwrap();

        assert_eq!(upgraded.plan, Plan::Premium);
        assert_eq!(get_plan(user.id, &connection), Ok(Plan::Premium));
    }

    #[test]
    fn set_plan_on_missing_user_returns_not_found() {
        let connection = get_test_connection();

        assert_eq!(set_plan(42, Plan::Premium, &connection), Err(Error::NotFound));
    }

    #[test]
    fn plan_limits() {
        assert_eq!(Plan::Free.max_active_rules(), Some(5));
        assert_eq!(Plan::Premium.max_active_rules(), None);
    }
}
