use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::User;

// -- JWT Claims --

/// Claims carried by the durable identity token. Shared by the REST
/// middleware and the WebSocket handshake.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub email: String,
    pub exp: usize,
}

// -- Point values --

/// A vote value or final point. Clients send either a string ("13", "?")
/// or a bare number (13); both are stored as text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PointValue {
    Text(String),
    Number(serde_json::Number),
}

impl PointValue {
    pub fn into_text(self) -> String {
        match self {
            PointValue::Text(s) => s,
            PointValue::Number(n) => n.to_string(),
        }
    }
}

impl From<&str> for PointValue {
    fn from(value: &str) -> Self {
        PointValue::Text(value.to_string())
    }
}

// -- Auth --

// Required fields are optional at the serde level so that a missing field
// surfaces as a 400 from validation instead of a body rejection.

#[derive(Debug, Deserialize)]
pub struct MagicLinkRequest {
    pub email: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MagicLinkResponse {
    pub ok: bool,
    pub magic_url: String,
}

#[derive(Debug, Deserialize)]
pub struct VerifyQuery {
    pub token: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct VerifyResponse {
    pub token: String,
    pub user: User,
}

// -- Sessions --

#[derive(Debug, Deserialize)]
pub struct CreateSessionRequest {
    pub name: Option<String>,
}

// -- Stories --

#[derive(Debug, Deserialize)]
pub struct AddStoryRequest {
    pub title: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CastVoteRequest {
    pub value: Option<PointValue>,
    pub anon_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalizeRequest {
    pub final_point: Option<PointValue>,
}

// -- Generic bodies --

#[derive(Debug, Serialize, Deserialize)]
pub struct OkResponse {
    pub ok: bool,
}

impl OkResponse {
    pub fn ok() -> Self {
        Self { ok: true }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}
