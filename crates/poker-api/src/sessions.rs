use axum::{Extension, Json, extract::State};

use poker_types::api::{Claims, CreateSessionRequest};
use poker_types::models::{Session, SessionView};

use crate::auth::AppState;
use crate::error::ApiError;
use crate::extract::{JsonBody, SessionId};

/// POST /sessions: the caller becomes the host. The body is optional.
pub async fn create_session(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    JsonBody(req): JsonBody<CreateSessionRequest>,
) -> Result<Json<Session>, ApiError> {
    let session = state
        .gateway
        .machine()
        .create_session(claims.sub, req.name)
        .await?;

    Ok(Json(session))
}

/// GET /sessions/{id}: stories with votes redacted for this caller.
pub async fn get_session(
    State(state): State<AppState>,
    SessionId(session_id): SessionId,
    Extension(claims): Extension<Claims>,
) -> Result<Json<SessionView>, ApiError> {
    let view = state
        .gateway
        .machine()
        .session_view(session_id, claims.sub)
        .await?;

    Ok(Json(view))
}
