//! JSON route handlers for categories.

use std::sync::{Arc, Mutex};

use axum::{
    Json,
    extract::{FromRef, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use rusqlite::Connection;
use serde::Deserialize;

use crate::{
    AppState, Error,
    category::{
        Category, CategoryId, CategoryName, DEFAULT_COLOR, DEFAULT_ICON, NewCategory,
        create_category, delete_category, get_categories, get_category_by_name, update_category,
    },
    user::CurrentUser,
};

/// The state needed to manage categories.
#[derive(Debug, Clone)]
pub struct CategoryState {
    /// The database connection for managing categories.
    pub db_connection: Arc<Mutex<Connection>>,
}

impl FromRef<AppState> for CategoryState {
    fn from_ref(state: &AppState) -> Self {
        Self {
            db_connection: state.db_connection.clone(),
        }
    }
}

/// The request body for creating or replacing a category.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryRequest {
    pub name: String,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub is_default: bool,
}

impl TryFrom<CategoryRequest> for NewCategory {
    type Error = Error;

    fn try_from(request: CategoryRequest) -> Result<Self, Self::Error> {
        Ok(NewCategory {
            name: CategoryName::new(&request.name)?,
            color: request.color.unwrap_or_else(|| DEFAULT_COLOR.to_owned()),
            icon: request.icon.unwrap_or_else(|| DEFAULT_ICON.to_owned()),
            is_default: request.is_default,
        })
    }
}

/// Query parameters for listing categories.
#[derive(Debug, Default, Deserialize)]
pub struct CategoryQuery {
    /// Only return the category with exactly this name.
    pub name: Option<String>,
}

/// A route handler for creating a category.
///
/// Responds with `409 Conflict` if the user already has a category with the same name.
pub async fn create_category_endpoint(
    State(state): State<CategoryState>,
    CurrentUser(user_id): CurrentUser,
    Json(request): Json<CategoryRequest>,
) -> Result<impl IntoResponse, Error> {
    let new_category = NewCategory::try_from(request)?;

    let connection = state
        .db_connection
        .lock()
        .map_err(|_| Error::DatabaseLockError)?;
    let category = create_category(user_id, new_category, &connection)?;

    Ok((StatusCode::CREATED, Json(category)))
}

/// A route handler for listing the user's categories.
pub async fn get_categories_endpoint(
    State(state): State<CategoryState>,
    CurrentUser(user_id): CurrentUser,
    Query(query): Query<CategoryQuery>,
) -> Result<Json<Vec<Category>>, Error> {
    let connection = state
        .db_connection
        .lock()
        .map_err(|_| Error::DatabaseLockError)?;

    let categories = match query.name {
        Some(name) => get_category_by_name(user_id, &name, &connection)?
            .into_iter()
            .collect(),
        None => get_categories(user_id, &connection)?,
    };

    Ok(Json(categories))
}

/// A route handler for replacing a category.
pub async fn update_category_endpoint(
    State(state): State<CategoryState>,
    CurrentUser(user_id): CurrentUser,
    Path(category_id): Path<CategoryId>,
    Json(request): Json<CategoryRequest>,
) -> Result<Json<Category>, Error> {
    let new_category = NewCategory::try_from(request)?;

    let connection = state
        .db_connection
        .lock()
        .map_err(|_| Error::DatabaseLockError)?;
    let category = update_category(user_id, category_id, new_category, &connection)?;

    Ok(Json(category))
}

/// A route handler for deleting a category.
pub async fn delete_category_endpoint(
    State(state): State<CategoryState>,
    CurrentUser(user_id): CurrentUser,
    Path(category_id): Path<CategoryId>,
) -> Result<StatusCode, Error> {
    let connection = state
        .db_connection
        .lock()
        .map_err(|_| Error::DatabaseLockError)?;
    delete_category(user_id, category_id, &connection)?;

    Ok(StatusCode::NO_CONTENT)
}
