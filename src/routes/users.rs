use axum::extract::{Path, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};

use crate::auth::handlers::normalize_email;
use crate::auth::password::hash_password;
use crate::auth::session::clear_session_cookie;
use crate::db::models::{PublicUser, UserPatch};
use crate::error::{AppError, AppResult};
use crate::extractors::{CurrentUser, JsonBody};
use crate::listing::input::text_at;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/users", get(list))
        .route("/api/users/{id}", get(show).put(update).delete(remove))
}

#[derive(Debug, Default, PartialEq)]
pub struct UpdateUserRequest {
    pub name: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
}

impl UpdateUserRequest {
    pub fn from_json(body: &Value) -> Self {
        Self {
            name: text_at(body, "name"),
            email: text_at(body, "email"),
            password: text_at(body, "password"),
        }
    }
}

fn not_found() -> AppError {
    AppError::NotFound("User not found".into())
}

/// GET /api/users
async fn list(State(state): State<AppState>) -> AppResult<Json<Vec<PublicUser>>> {
    let users = state.store.list_users().await?;
    Ok(Json(users.iter().map(PublicUser::from).collect()))
}

/// GET /api/users/{id}
async fn show(State(state): State<AppState>, Path(id): Path<String>) -> AppResult<Json<PublicUser>> {
    let user = state.store.get_user(&id).await?.ok_or_else(not_found)?;
    Ok(Json(PublicUser::from(&user)))
}

/// PUT /api/users/{id}. Own profile only; blank fields are left unchanged.
async fn update(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(id): Path<String>,
    JsonBody(body): JsonBody,
) -> AppResult<Json<PublicUser>> {
    let req = UpdateUserRequest::from_json(&body);
    if current.id != id {
        return Err(AppError::Forbidden(
            "Forbidden: can only update own profile".into(),
        ));
    }

    let mut patch = UserPatch {
        name: req
            .name
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty()),
        email: req
            .email
            .map(|e| normalize_email(&e))
            .filter(|e| !e.is_empty()),
        password_hash: None,
    };
    if let Some(password) = req.password.filter(|p| !p.is_empty()) {
        patch.password_hash = Some(hash_password(&password).await?);
    }

    let user = state
        .store
        .update_user(&id, patch)
        .await?
        .ok_or_else(not_found)?;
    tracing::info!("User {} updated their profile", user.id);
    Ok(Json(PublicUser::from(&user)))
}

/// DELETE /api/users/{id}. Removes the user's listings (with their offers)
/// and sessions before the user record itself.
async fn remove(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(id): Path<String>,
) -> AppResult<Response> {
    if current.id != id {
        return Err(AppError::Forbidden(
            "Forbidden: can only delete own profile".into(),
        ));
    }

    let listings = state.listings().delete_owned_by(&id).await?;
    let sessions = state.store.delete_sessions_for_user(&id).await?;
    state.store.delete_user(&id).await?.ok_or_else(not_found)?;
    tracing::info!(
        "User {} deleted with {} listings and {} sessions",
        id,
        listings,
        sessions
    );

    Ok((
        [(
            header::SET_COOKIE,
            clear_session_cookie(&state.config.auth.cookie_name),
        )],
        Json(json!({ "ok": true, "message": "User deleted successfully" })),
    )
        .into_response())
}
