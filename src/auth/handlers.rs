use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};

use crate::auth::password::{hash_password, verify_password};
use crate::auth::session;
use crate::db::models::User;
use crate::error::{AppError, AppResult};
use crate::extractors::{extract_session_token, CurrentUser, JsonBody, MaybeUser};
use crate::listing::input::text_at;
use crate::state::AppState;
use crate::store::{now_timestamp, EMAIL_IN_USE};

// -- Request types --

#[derive(Debug, Default, PartialEq)]
pub struct SignupRequest {
    pub name: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
}

impl SignupRequest {
    /// Scalar fields are taken as text, so `"name": 5` reads as `"5"`.
    pub fn from_json(body: &Value) -> Self {
        Self {
            name: text_at(body, "name"),
            email: text_at(body, "email"),
            password: text_at(body, "password"),
        }
    }
}

#[derive(Debug, Default, PartialEq)]
pub struct LoginRequest {
    pub email: Option<String>,
    pub password: Option<String>,
}

impl LoginRequest {
    pub fn from_json(body: &Value) -> Self {
        Self {
            email: text_at(body, "email"),
            password: text_at(body, "password"),
        }
    }
}

/// Emails are compared trimmed and lower-cased everywhere.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn session_user(user: &CurrentUser) -> serde_json::Value {
    json!({ "user": { "id": user.id, "name": user.name, "email": user.email } })
}

async fn start_session(state: &AppState, user: &User, status: StatusCode) -> AppResult<Response> {
    let hours = state.config.auth.session_hours;
    let token = session::create_session(state.store.as_ref(), &user.id, hours).await?;
    let cookie = session::session_cookie(&state.config.auth.cookie_name, &token, hours);

    let current = CurrentUser {
        id: user.id.clone(),
        name: user.name.clone(),
        email: user.email.clone(),
    };
    Ok((
        status,
        [(header::SET_COOKIE, cookie)],
        Json(session_user(&current)),
    )
        .into_response())
}

/// POST /api/auth/signup
pub async fn signup(
    State(state): State<AppState>,
    JsonBody(body): JsonBody,
) -> AppResult<Response> {
    let req = SignupRequest::from_json(&body);
    let (Some(name), Some(email), Some(password)) = (
        non_empty(req.name),
        non_empty(req.email),
        non_empty(req.password),
    ) else {
        return Err(AppError::Validation(
            "Name, email, and password are required".into(),
        ));
    };
    let email = normalize_email(&email);

    if state.store.find_user_by_email(&email).await?.is_some() {
        return Err(AppError::Conflict(EMAIL_IN_USE.into()));
    }

    let user = User {
        id: String::new(),
        name: name.trim().to_string(),
        email,
        password_hash: hash_password(&password).await?,
        created_at: now_timestamp(),
    };
    // The store re-checks uniqueness, which covers two racing signups.
    let user = state.store.insert_user(user).await?;
    tracing::info!("User {} signed up", user.id);

    start_session(&state, &user, StatusCode::CREATED).await
}

/// POST /api/auth/login
pub async fn login(
    State(state): State<AppState>,
    JsonBody(body): JsonBody,
) -> AppResult<Response> {
    let req = LoginRequest::from_json(&body);
    let (Some(email), Some(password)) = (non_empty(req.email), non_empty(req.password)) else {
        return Err(AppError::Validation("Email and password required".into()));
    };

    let user = state
        .store
        .find_user_by_email(&normalize_email(&email))
        .await?
        .ok_or(AppError::InvalidCredentials)?;

    if !verify_password(&password, &user.password_hash).await? {
        return Err(AppError::InvalidCredentials);
    }

    start_session(&state, &user, StatusCode::OK).await
}

/// POST /api/auth/logout
pub async fn logout(
    State(state): State<AppState>,
    request: axum::http::Request<axum::body::Body>,
) -> AppResult<Response> {
    let (parts, _) = request.into_parts();
    let cookie_name = &state.config.auth.cookie_name;

    if let Some(token) = extract_session_token(&parts, cookie_name) {
        state.store.delete_session(token).await?;
    }

    Ok((
        [(header::SET_COOKIE, session::clear_session_cookie(cookie_name))],
        Json(json!({ "ok": true })),
    )
        .into_response())
}

/// GET /api/auth/me
pub async fn me(MaybeUser(user): MaybeUser) -> Json<serde_json::Value> {
    match user {
        Some(user) => Json(session_user(&user)),
        None => Json(json!({ "user": null })),
    }
}
