use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};

use poker_session::PokerError;

use crate::auth::AppState;
use crate::error::ApiError;

/// Extract and validate the identity token from the Authorization header.
/// On success the decoded `Claims` are available as a request extension.
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or(PokerError::Unauthorized)?;

    let claims = state.credentials.authenticate(token.trim())?;

    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}
