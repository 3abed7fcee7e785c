pub mod auth;
pub mod health;
pub mod listings;
pub mod uploads;
pub mod users;

use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// The full HTTP surface: JSON API under `/api`, stored images under `/uploads`.
pub fn app(state: AppState) -> Router {
    let uploads = ServeDir::new(state.config.uploads_path());

    Router::new()
        .merge(health::router())
        .merge(auth::router())
        .merge(listings::router())
        .merge(users::router())
        .merge(uploads::router(&state.config.storage))
        .nest_service("/uploads", uploads)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
