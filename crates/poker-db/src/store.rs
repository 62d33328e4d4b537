use anyhow::Result;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use poker_types::models::{AuthToken, Session, Story, User, Vote};

/// Persistence interface consumed by the session state machine and the
/// credential service. Plain CRUD plus the filtered reads the core needs;
/// no business rules live behind it.
///
/// Every method is blocking. Async callers must hop onto a blocking thread.
pub trait Store: Send + Sync + 'static {
    // -- Users --

    fn insert_user(&self, user: &User) -> Result<()>;

    fn find_user_by_email(&self, email: &str) -> Result<Option<User>>;

    // -- Auth tokens --

    fn insert_auth_token(&self, token: &AuthToken) -> Result<()>;

    fn find_auth_token(&self, token: &str) -> Result<Option<AuthToken>>;

    /// Flip `used` to true if the token is unused and unexpired at `now`.
    /// Returns whether this call consumed it.
    fn consume_auth_token(&self, token: &str, now: DateTime<Utc>) -> Result<bool>;

    // -- Sessions --

    fn insert_session(&self, session: &Session) -> Result<()>;

    fn find_session(&self, id: Uuid) -> Result<Option<Session>>;

    // -- Stories --

    fn insert_story(&self, story: &Story) -> Result<()>;

    fn find_story(&self, id: Uuid) -> Result<Option<Story>>;

    /// Stories of a session in creation order.
    fn list_stories(&self, session_id: Uuid) -> Result<Vec<Story>>;

    fn set_final_point(&self, story_id: Uuid, final_point: &str) -> Result<()>;

    // -- Votes --

    fn insert_vote(&self, vote: &Vote) -> Result<()>;

    fn find_vote(&self, story_id: Uuid, user_id: Uuid) -> Result<Option<Vote>>;

    fn update_vote_value(&self, vote_id: Uuid, value: &str) -> Result<()>;

    fn list_votes(&self, story_id: Uuid) -> Result<Vec<Vote>>;

    /// Every vote on every story of a session.
    fn list_session_votes(&self, session_id: Uuid) -> Result<Vec<Vote>>;

    fn count_votes(&self, story_id: Uuid) -> Result<usize>;
}
