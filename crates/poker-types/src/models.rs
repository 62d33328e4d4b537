use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Session name used when the host does not supply one.
pub const DEFAULT_SESSION_NAME: &str = "Untitled session";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub email: String,
}

/// Single-use verification token handed out by the magic-link flow.
/// `used` flips to true exactly once; rows are never deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthToken {
    pub token: String,
    pub email: String,
    pub expires_at: DateTime<Utc>,
    pub used: bool,
}

impl AuthToken {
    pub fn is_redeemable(&self, now: DateTime<Utc>) -> bool {
        !self.used && self.expires_at > now
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: Uuid,
    pub name: String,
    pub host_user_id: Uuid,
    pub created_at: DateTime<Utc>,
}

impl Session {
    pub fn is_host(&self, user_id: Uuid) -> bool {
        self.host_user_id == user_id
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Story {
    pub id: Uuid,
    pub session_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub final_point: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Story {
    /// Once a final point is recorded, vote values are public.
    pub fn is_finalized(&self) -> bool {
        self.final_point.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Vote {
    pub id: Uuid,
    pub story_id: Uuid,
    pub user_id: Uuid,
    pub anon_id: Option<String>,
    pub value: String,
}

// -- Views --

/// A vote as shown to a particular caller. A full view is the whole vote
/// row; a redacted one omits `storyId` and `value` from the JSON entirely.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteView {
    pub id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub story_id: Option<Uuid>,
    pub user_id: Uuid,
    pub anon_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

impl VoteView {
    pub fn full(vote: Vote) -> Self {
        Self {
            id: vote.id,
            story_id: Some(vote.story_id),
            user_id: vote.user_id,
            anon_id: vote.anon_id,
            value: Some(vote.value),
        }
    }

    pub fn redacted(vote: Vote) -> Self {
        Self {
            id: vote.id,
            story_id: None,
            user_id: vote.user_id,
            anon_id: vote.anon_id,
            value: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoryView {
    pub id: Uuid,
    pub session_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub final_point: Option<String>,
    pub created_at: DateTime<Utc>,
    pub votes: Vec<VoteView>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    pub id: Uuid,
    pub name: String,
    pub host_user_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub stories: Vec<StoryView>,
}
