use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};

use crate::db::models::{Listing, Offer};
use crate::error::AppResult;
use crate::extractors::{CurrentUser, JsonBody, MaybeUser};
use crate::listing::query::ListingQuery;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/listings", get(search).post(create))
        .route(
            "/api/listings/{id}",
            get(show).patch(update).delete(remove),
        )
        .route(
            "/api/listings/{id}/offers",
            get(list_offers).post(create_offer),
        )
}

/// GET /api/listings
async fn search(
    State(state): State<AppState>,
    Query(query): Query<ListingQuery>,
) -> AppResult<Json<Vec<Listing>>> {
    Ok(Json(state.listings().search(&query).await?))
}

/// POST /api/listings
async fn create(
    State(state): State<AppState>,
    user: CurrentUser,
    JsonBody(body): JsonBody,
) -> AppResult<impl IntoResponse> {
    let listing = state.listings().create(&user, &body).await?;
    Ok((StatusCode::CREATED, Json(listing)))
}

/// GET /api/listings/{id}
async fn show(State(state): State<AppState>, Path(id): Path<String>) -> AppResult<Json<Listing>> {
    Ok(Json(state.listings().get(&id).await?))
}

/// PATCH /api/listings/{id}
async fn update(
    State(state): State<AppState>,
    MaybeUser(user): MaybeUser,
    Path(id): Path<String>,
    JsonBody(body): JsonBody,
) -> AppResult<Json<Listing>> {
    let listing = state.listings().update(user.as_ref(), &id, &body).await?;
    Ok(Json(listing))
}

/// DELETE /api/listings/{id}
async fn remove(
    State(state): State<AppState>,
    MaybeUser(user): MaybeUser,
    Path(id): Path<String>,
) -> AppResult<Json<Value>> {
    state.listings().delete(user.as_ref(), &id).await?;
    Ok(Json(json!({ "ok": true })))
}

/// POST /api/listings/{id}/offers
async fn create_offer(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
    JsonBody(body): JsonBody,
) -> AppResult<impl IntoResponse> {
    let offer = state.listings().create_offer(&user, &id, &body).await?;
    Ok((StatusCode::CREATED, Json(offer)))
}

/// GET /api/listings/{id}/offers
async fn list_offers(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<Vec<Offer>>> {
    Ok(Json(state.listings().offers(&id).await?))
}
