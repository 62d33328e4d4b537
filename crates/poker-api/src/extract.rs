//! Extractors whose failures come back as `ApiError` JSON instead of axum's
//! plain-text rejections.

use axum::{
    body::Bytes,
    extract::{FromRequest, FromRequestParts, Path, Request},
    http::request::Parts,
};
use serde::de::DeserializeOwned;
use uuid::Uuid;

use poker_session::PokerError;

use crate::error::ApiError;

/// JSON request body. Content type is not checked; an empty or blank body
/// reads as `{}` so that missing fields surface as validation errors.
pub struct JsonBody<T>(pub T);

impl<S, T> FromRequest<S> for JsonBody<T>
where
    S: Send + Sync,
    T: DeserializeOwned,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let body = Bytes::from_request(req, state)
            .await
            .map_err(|e| PokerError::invalid(format!("unreadable body: {}", e)))?;

        let raw: &[u8] = if body.iter().all(u8::is_ascii_whitespace) {
            b"{}"
        } else {
            &body
        };

        serde_json::from_slice(raw)
            .map(Self)
            .map_err(|e| PokerError::invalid(format!("malformed body: {}", e)).into())
    }
}

/// `{session_id}` path segment. Anything that is not a UUID names no
/// session, so it is a 404.
pub struct SessionId(pub Uuid);

/// `{story_id}` path segment.
pub struct StoryId(pub Uuid);

impl<S> FromRequestParts<S> for SessionId
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        path_id(parts, state, "session").await.map(Self)
    }
}

impl<S> FromRequestParts<S> for StoryId
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        path_id(parts, state, "story").await.map(Self)
    }
}

async fn path_id<S>(parts: &mut Parts, state: &S, resource: &'static str) -> Result<Uuid, ApiError>
where
    S: Send + Sync,
{
    let Path(raw) = Path::<String>::from_request_parts(parts, state)
        .await
        .map_err(|_| PokerError::NotFound(resource))?;
    raw.parse()
        .map_err(|_| ApiError(PokerError::NotFound(resource)))
}
