use axum::{Extension, Json, extract::State};
use tracing::error;

use poker_gateway::{Applied, Command};
use poker_session::{PokerError, StoryRef};
use poker_types::api::{AddStoryRequest, CastVoteRequest, Claims, FinalizeRequest, OkResponse};
use poker_types::models::{Story, Vote};

use crate::auth::AppState;
use crate::error::ApiError;
use crate::extract::{JsonBody, SessionId, StoryId};

/// The gateway answered a command with the wrong kind of result.
fn unexpected(applied: Applied) -> ApiError {
    error!("Unexpected gateway result: {:?}", applied);
    ApiError(PokerError::Storage(anyhow::anyhow!("unexpected gateway result")))
}

/// POST /sessions/{id}/stories
pub async fn add_story(
    State(state): State<AppState>,
    SessionId(session_id): SessionId,
    Extension(claims): Extension<Claims>,
    JsonBody(req): JsonBody<AddStoryRequest>,
) -> Result<Json<Story>, ApiError> {
    let command = Command::AddStory {
        session_id,
        title: req.title.unwrap_or_default(),
        description: req.description,
    };

    match state.gateway.apply(claims.sub, command).await? {
        Applied::StoryAdded(story) => Ok(Json(story)),
        other => Err(unexpected(other)),
    }
}

/// POST /stories/{id}/votes: create or overwrite the caller's vote.
pub async fn cast_vote(
    State(state): State<AppState>,
    StoryId(story_id): StoryId,
    Extension(claims): Extension<Claims>,
    JsonBody(req): JsonBody<CastVoteRequest>,
) -> Result<Json<Vote>, ApiError> {
    let command = Command::CastVote {
        story: StoryRef::story(story_id),
        value: req.value.map(|v| v.into_text()).unwrap_or_default(),
        anon_id: req.anon_id,
    };

    match state.gateway.apply(claims.sub, command).await? {
        Applied::VoteCast(vote) => Ok(Json(vote)),
        other => Err(unexpected(other)),
    }
}

/// POST /stories/{id}/reveal: host only. Values go to the session room;
/// the caller just gets an acknowledgement.
pub async fn reveal_votes(
    State(state): State<AppState>,
    StoryId(story_id): StoryId,
    Extension(claims): Extension<Claims>,
) -> Result<Json<OkResponse>, ApiError> {
    let command = Command::RevealVotes {
        story: StoryRef::story(story_id),
    };

    match state.gateway.apply(claims.sub, command).await? {
        Applied::VotesRevealed(_) => Ok(Json(OkResponse::ok())),
        other => Err(unexpected(other)),
    }
}

/// POST /stories/{id}/finalize: host only.
pub async fn finalize_story(
    State(state): State<AppState>,
    StoryId(story_id): StoryId,
    Extension(claims): Extension<Claims>,
    JsonBody(req): JsonBody<FinalizeRequest>,
) -> Result<Json<Story>, ApiError> {
    let command = Command::FinalizeStory {
        story: StoryRef::story(story_id),
        final_point: req.final_point.map(|v| v.into_text()).unwrap_or_default(),
    };

    match state.gateway.apply(claims.sub, command).await? {
        Applied::StoryFinalized(story) => Ok(Json(story)),
        other => Err(unexpected(other)),
    }
}
