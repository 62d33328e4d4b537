use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::PointValue;
use crate::models::{Story, Vote};

/// Events sent over the WebSocket gateway.
///
/// Wire shape is `{"event": "<snake_case name>", "data": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum GatewayEvent {
    /// Server confirms successful authentication (sent to that connection only)
    Ready(Ready),

    /// A participant joined or left a session room
    ParticipantUpdate(ParticipantUpdate),

    /// A story was added to the session
    StoryAdded(Story),

    /// Vote count for a story changed. Never carries values.
    VoteSummary(VoteSummary),

    /// The host revealed every vote on a story
    VotesRevealed(VotesRevealed),

    /// The host recorded (or corrected) the final point of a story
    StoryFinalized(Story),

    /// A command from this connection was rejected (sent to that connection only)
    Error(CommandError),
}

impl GatewayEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Ready(_) => "ready",
            Self::ParticipantUpdate(_) => "participant_update",
            Self::StoryAdded(_) => "story_added",
            Self::VoteSummary(_) => "vote_summary",
            Self::VotesRevealed(_) => "votes_revealed",
            Self::StoryFinalized(_) => "story_finalized",
            Self::Error(_) => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ready {
    pub user_id: Uuid,
    pub email: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantChange {
    Join,
    Leave,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantUpdate {
    pub user_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub change: ParticipantChange,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteSummary {
    pub story_id: Uuid,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VotesRevealed {
    pub story_id: Uuid,
    pub votes: Vec<Vote>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    InvalidInput,
    NotFound,
    Forbidden,
    Unauthorized,
    Internal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandError {
    /// Name of the inbound event that failed.
    pub event: String,
    pub code: ErrorCode,
    pub message: String,
}

/// Commands sent FROM client TO server over WebSocket.
///
/// `userId` fields are accepted for compatibility with older clients but the
/// server always acts as the connection's authenticated user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum GatewayCommand {
    /// Authenticate the WebSocket connection
    Identify { token: String },

    JoinSession(JoinSession),

    LeaveSession(LeaveSession),

    AddStory(AddStory),

    CastVote(CastVote),

    RevealVotes(RevealVotes),

    FinalizeStory(FinalizeStory),
}

impl GatewayCommand {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Identify { .. } => "identify",
            Self::JoinSession(_) => "join_session",
            Self::LeaveSession(_) => "leave_session",
            Self::AddStory(_) => "add_story",
            Self::CastVote(_) => "cast_vote",
            Self::RevealVotes(_) => "reveal_votes",
            Self::FinalizeStory(_) => "finalize_story",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinSession {
    pub session_id: Uuid,
    #[serde(default)]
    pub user_id: Option<Uuid>,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaveSession {
    pub session_id: Uuid,
    #[serde(default)]
    pub user_id: Option<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddStory {
    pub session_id: Uuid,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CastVote {
    pub session_id: Uuid,
    pub story_id: Uuid,
    #[serde(default)]
    pub user_id: Option<Uuid>,
    #[serde(default)]
    pub value: Option<PointValue>,
    #[serde(default)]
    pub anon_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevealVotes {
    pub session_id: Uuid,
    pub story_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalizeStory {
    pub session_id: Uuid,
    pub story_id: Uuid,
    #[serde(default)]
    pub final_point: Option<PointValue>,
}
