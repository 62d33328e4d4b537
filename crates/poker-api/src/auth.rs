use std::sync::Arc;

use axum::{
    Json,
    extract::{Query, State},
};

use poker_gateway::SyncGateway;
use poker_session::CredentialService;
use poker_types::api::{MagicLinkRequest, MagicLinkResponse, VerifyQuery, VerifyResponse};

use crate::error::ApiError;
use crate::extract::JsonBody;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub gateway: SyncGateway,
    pub credentials: CredentialService,
}

impl AppStateInner {
    pub fn new(gateway: SyncGateway, credentials: CredentialService) -> AppState {
        Arc::new(Self {
            gateway,
            credentials,
        })
    }
}

/// POST /auth/magic-link: issues a verification token. The link is returned
/// directly as a development convenience.
pub async fn magic_link(
    State(state): State<AppState>,
    JsonBody(req): JsonBody<MagicLinkRequest>,
) -> Result<Json<MagicLinkResponse>, ApiError> {
    let link = state
        .credentials
        .request_magic_link(req.email.as_deref())
        .await?;

    Ok(Json(MagicLinkResponse {
        ok: true,
        magic_url: link.url,
    }))
}

/// GET /auth/verify?token=: single-use exchange for an identity token.
pub async fn verify(
    State(state): State<AppState>,
    Query(query): Query<VerifyQuery>,
) -> Result<Json<VerifyResponse>, ApiError> {
    let identity = state.credentials.verify(query.token.as_deref()).await?;

    Ok(Json(VerifyResponse {
        token: identity.token,
        user: identity.user,
    }))
}
