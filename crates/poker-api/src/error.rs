use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use tracing::error;

use poker_session::PokerError;
use poker_types::api::ErrorResponse;

/// HTTP face of [`PokerError`]. Storage details are logged, never returned.
#[derive(Debug)]
pub struct ApiError(pub PokerError);

impl From<PokerError> for ApiError {
    fn from(e: PokerError) -> Self {
        Self(e)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            PokerError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            PokerError::NotFound(_) => StatusCode::NOT_FOUND,
            PokerError::Forbidden => StatusCode::FORBIDDEN,
            PokerError::Unauthorized => StatusCode::UNAUTHORIZED,
            PokerError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self.0 {
            PokerError::Storage(e) => {
                error!("Request failed: {:#}", e);
                "internal error".to_string()
            }
            other => other.to_string(),
        };

        (status, Json(ErrorResponse { error: message })).into_response()
    }
}
