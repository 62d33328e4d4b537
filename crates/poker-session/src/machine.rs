use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info};
use uuid::Uuid;

use poker_db::Store;
use poker_types::models::{
    DEFAULT_SESSION_NAME, Session, SessionView, Story, StoryView, Vote, VoteView,
};

use crate::error::{PokerError, Result};
use crate::locks::KeyedLocks;

/// Addresses a story, optionally as seen from a session. A story that does
/// not belong to the given session is treated as absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoryRef {
    pub story_id: Uuid,
    pub session_id: Option<Uuid>,
}

impl StoryRef {
    pub fn story(story_id: Uuid) -> Self {
        Self {
            story_id,
            session_id: None,
        }
    }

    pub fn in_session(session_id: Uuid, story_id: Uuid) -> Self {
        Self {
            story_id,
            session_id: Some(session_id),
        }
    }
}

/// Result of a vote upsert.
#[derive(Debug, Clone)]
pub struct VoteReceipt {
    pub vote: Vote,
    /// Session owning the story, taken from storage rather than the caller.
    pub session_id: Uuid,
    /// Votes on the story after this write.
    pub count: usize,
}

#[derive(Debug, Clone)]
pub struct Revealed {
    pub session_id: Uuid,
    pub story_id: Uuid,
    pub votes: Vec<Vote>,
}

/// Session state machine. Cheap to clone; all clones share one store and
/// one set of vote locks.
///
/// Story lifecycle: OPEN (no final point, values hidden) -> REVEALED (values
/// pushed once to the room, nothing persisted) -> FINALIZED (final point
/// set). Finalize may repeat; nothing ever clears a final point or removes a
/// vote.
#[derive(Clone)]
pub struct SessionMachine {
    inner: Arc<MachineInner>,
}

struct MachineInner {
    store: Arc<dyn Store>,
    /// Serializes the find-then-write vote upsert per (story, user).
    vote_locks: KeyedLocks<(Uuid, Uuid)>,
}

impl SessionMachine {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            inner: Arc::new(MachineInner {
                store,
                vote_locks: KeyedLocks::new(),
            }),
        }
    }

    pub fn store(&self) -> Arc<dyn Store> {
        self.inner.store.clone()
    }

    /// Run blocking store work off the async runtime.
    async fn blocking<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&dyn Store) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let store = self.inner.store.clone();
        tokio::task::spawn_blocking(move || f(store.as_ref())).await?
    }

    pub async fn create_session(&self, host_user_id: Uuid, name: Option<String>) -> Result<Session> {
        let name = name
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| DEFAULT_SESSION_NAME.to_string());

        let session = Session {
            id: Uuid::new_v4(),
            name,
            host_user_id,
            created_at: Utc::now(),
        };

        let row = session.clone();
        self.blocking(move |store| Ok(store.insert_session(&row)?))
            .await?;

        info!("Session {} created by host {}", session.id, host_user_id);
        Ok(session)
    }

    pub async fn add_story(
        &self,
        session_id: Uuid,
        title: &str,
        description: Option<String>,
    ) -> Result<Story> {
        let title = title.trim();
        if title.is_empty() {
            return Err(PokerError::invalid("title required"));
        }

        let story = Story {
            id: Uuid::new_v4(),
            session_id,
            title: title.to_string(),
            description: description.filter(|d| !d.trim().is_empty()),
            final_point: None,
            created_at: Utc::now(),
        };

        let row = story.clone();
        self.blocking(move |store| {
            store
                .find_session(session_id)?
                .ok_or(PokerError::NotFound("session"))?;
            store.insert_story(&row)?;
            Ok(())
        })
        .await?;

        debug!("Story {} added to session {}", story.id, session_id);
        Ok(story)
    }

    /// Upsert the caller's vote. Allowed in every story state; the last write
    /// wins and the story state is left alone.
    pub async fn cast_vote(
        &self,
        story: StoryRef,
        user_id: Uuid,
        value: &str,
        anon_id: Option<String>,
    ) -> Result<VoteReceipt> {
        let value = value.trim().to_string();
        if value.is_empty() {
            return Err(PokerError::invalid("value required"));
        }

        let guard = self.inner.vote_locks.lock((story.story_id, user_id)).await;

        // The guard moves into the blocking closure: if this future is
        // dropped, the write still finishes before the key is released.
        let receipt = self
            .blocking(move |store| {
                let _guard = guard;
                let found = load_story(store, story)?;

                let vote = match store.find_vote(found.id, user_id)? {
                    Some(mut existing) => {
                        store.update_vote_value(existing.id, &value)?;
                        existing.value = value;
                        existing
                    }
                    None => {
                        let vote = Vote {
                            id: Uuid::new_v4(),
                            story_id: found.id,
                            user_id,
                            anon_id,
                            value,
                        };
                        store.insert_vote(&vote)?;
                        vote
                    }
                };

                let count = store.count_votes(found.id)?;
                Ok(VoteReceipt {
                    vote,
                    session_id: found.session_id,
                    count,
                })
            })
            .await?;

        debug!(
            "Vote by {} on story {} ({} votes)",
            user_id, receipt.vote.story_id, receipt.count
        );
        Ok(receipt)
    }

    /// Host-only. Returns every vote with its value; the caller decides who
    /// sees them. Nothing is persisted.
    pub async fn reveal_votes(&self, story: StoryRef, requester_id: Uuid) -> Result<Revealed> {
        let revealed = self
            .blocking(move |store| {
                let found = load_story(store, story)?;
                require_host(store, found.session_id, requester_id)?;
                let votes = store.list_votes(found.id)?;
                Ok(Revealed {
                    session_id: found.session_id,
                    story_id: found.id,
                    votes,
                })
            })
            .await?;

        info!(
            "Host {} revealed {} votes on story {}",
            requester_id,
            revealed.votes.len(),
            revealed.story_id
        );
        Ok(revealed)
    }

    /// Host-only. Sets or overwrites the final point.
    pub async fn finalize_story(
        &self,
        story: StoryRef,
        requester_id: Uuid,
        final_point: &str,
    ) -> Result<Story> {
        let final_point = final_point.trim().to_string();
        if final_point.is_empty() {
            return Err(PokerError::invalid("finalPoint required"));
        }

        let updated = self
            .blocking(move |store| {
                let mut found = load_story(store, story)?;
                require_host(store, found.session_id, requester_id)?;
                store.set_final_point(found.id, &final_point)?;
                found.final_point = Some(final_point);
                Ok(found)
            })
            .await?;

        info!("Host {} finalized story {}", requester_id, updated.id);
        Ok(updated)
    }

    /// Session with its stories and votes as `requester_id` may see them.
    ///
    /// Values of a finalized story are public. Otherwise only the requester's
    /// own vote keeps its value; a past reveal does not change this.
    pub async fn session_view(&self, session_id: Uuid, requester_id: Uuid) -> Result<SessionView> {
        self.blocking(move |store| {
            let session = store
                .find_session(session_id)?
                .ok_or(PokerError::NotFound("session"))?;
            let stories = store.list_stories(session_id)?;

            let mut votes_by_story: HashMap<Uuid, Vec<Vote>> = HashMap::new();
            for vote in store.list_session_votes(session_id)? {
                votes_by_story.entry(vote.story_id).or_default().push(vote);
            }

            let stories = stories
                .into_iter()
                .map(|story| {
                    let public = story.is_finalized();
                    let votes = votes_by_story
                        .remove(&story.id)
                        .unwrap_or_default()
                        .into_iter()
                        .map(|vote| {
                            if public || vote.user_id == requester_id {
                                VoteView::full(vote)
                            } else {
                                VoteView::redacted(vote)
                            }
                        })
                        .collect();

                    StoryView {
                        id: story.id,
                        session_id: story.session_id,
                        title: story.title,
                        description: story.description,
                        final_point: story.final_point,
                        created_at: story.created_at,
                        votes,
                    }
                })
                .collect();

            Ok(SessionView {
                id: session.id,
                name: session.name,
                host_user_id: session.host_user_id,
                created_at: session.created_at,
                stories,
            })
        })
        .await
    }

    pub async fn session_exists(&self, session_id: Uuid) -> Result<bool> {
        self.blocking(move |store| Ok(store.find_session(session_id)?.is_some()))
            .await
    }
}

fn load_story(store: &dyn Store, story: StoryRef) -> Result<Story> {
    let found = store
        .find_story(story.story_id)?
        .ok_or(PokerError::NotFound("story"))?;
    match story.session_id {
        Some(session_id) if session_id != found.session_id => Err(PokerError::NotFound("story")),
        _ => Ok(found),
    }
}

fn require_host(store: &dyn Store, session_id: Uuid, requester_id: Uuid) -> Result<Session> {
    let session = store
        .find_session(session_id)?
        .ok_or(PokerError::NotFound("session"))?;
    if !session.is_host(requester_id) {
        return Err(PokerError::Forbidden);
    }
    Ok(session)
}
