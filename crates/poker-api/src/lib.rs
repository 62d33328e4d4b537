//! Request/response surface.
//!
//! Every mutating handler goes through [`poker_gateway::SyncGateway`], so a
//! REST call reaches the session room exactly like the equivalent push event.

pub mod auth;
pub mod error;
pub mod extract;
pub mod middleware;
pub mod sessions;
pub mod stories;

use axum::{
    Json, Router,
    middleware::from_fn_with_state,
    routing::{get, post},
};

use poker_types::api::OkResponse;

pub use auth::{AppState, AppStateInner};
pub use error::ApiError;

/// All REST routes. `/health` and `/auth/*` are public, the rest require a
/// bearer identity token.
pub fn router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/health", get(health))
        .route("/auth/magic-link", post(auth::magic_link))
        .route("/auth/verify", get(auth::verify))
        .with_state(state.clone());

    let protected_routes = Router::new()
        .route("/sessions", post(sessions::create_session))
        .route("/sessions/{session_id}", get(sessions::get_session))
        .route("/sessions/{session_id}/stories", post(stories::add_story))
        .route("/stories/{story_id}/votes", post(stories::cast_vote))
        .route("/stories/{story_id}/reveal", post(stories::reveal_votes))
        .route("/stories/{story_id}/finalize", post(stories::finalize_story))
        .layer(from_fn_with_state(state.clone(), middleware::require_auth))
        .with_state(state);

    Router::new().merge(public_routes).merge(protected_routes)
}

async fn health() -> Json<OkResponse> {
    Json(OkResponse::ok())
}
