use anyhow::Result;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{OptionalExtension, Row};
use uuid::Uuid;

use poker_types::models::{AuthToken, Session, Story, User, Vote};

use crate::Database;
use crate::store::Store;

const STORY_COLUMNS: &str = "id, session_id, title, description, final_point, created_at";
const VOTE_COLUMNS: &str = "id, story_id, user_id, anon_id, value";

impl Store for Database {
    // -- Users --

    fn insert_user(&self, user: &User) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, email) VALUES (?1, ?2)",
                (user.id.to_string(), &user.email),
            )?;
            Ok(())
        })
    }

    fn find_user_by_email(&self, email: &str) -> Result<Option<User>> {
        self.with_conn(|conn| {
            let user = conn
                .query_row(
                    "SELECT id, email FROM users WHERE email = ?1",
                    [email],
                    user_from_row,
                )
                .optional()?;
            Ok(user)
        })
    }

    // -- Auth tokens --

    fn insert_auth_token(&self, token: &AuthToken) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO auth_tokens (token, email, expires_at, used) VALUES (?1, ?2, ?3, ?4)",
                (
                    &token.token,
                    &token.email,
                    fmt_time(token.expires_at),
                    token.used,
                ),
            )?;
            Ok(())
        })
    }

    fn find_auth_token(&self, token: &str) -> Result<Option<AuthToken>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT token, email, expires_at, used FROM auth_tokens WHERE token = ?1",
                    [token],
                    |row| {
                        Ok(AuthToken {
                            token: row.get(0)?,
                            email: row.get(1)?,
                            expires_at: time_col(row, 2)?,
                            used: row.get(3)?,
                        })
                    },
                )
                .optional()?;
            Ok(row)
        })
    }

    fn consume_auth_token(&self, token: &str, now: DateTime<Utc>) -> Result<bool> {
        // Single conditional UPDATE: concurrent exchanges race on the row, not on a read.
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE auth_tokens SET used = 1
                 WHERE token = ?1 AND used = 0 AND expires_at > ?2",
                (token, fmt_time(now)),
            )?;
            Ok(changed == 1)
        })
    }

    // -- Sessions --

    fn insert_session(&self, session: &Session) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO sessions (id, name, host_user_id, created_at) VALUES (?1, ?2, ?3, ?4)",
                (
                    session.id.to_string(),
                    &session.name,
                    session.host_user_id.to_string(),
                    fmt_time(session.created_at),
                ),
            )?;
            Ok(())
        })
    }

    fn find_session(&self, id: Uuid) -> Result<Option<Session>> {
        self.with_conn(|conn| {
            let session = conn
                .query_row(
                    "SELECT id, name, host_user_id, created_at FROM sessions WHERE id = ?1",
                    [id.to_string()],
                    |row| {
                        Ok(Session {
                            id: uuid_col(row, 0)?,
                            name: row.get(1)?,
                            host_user_id: uuid_col(row, 2)?,
                            created_at: time_col(row, 3)?,
                        })
                    },
                )
                .optional()?;
            Ok(session)
        })
    }

    // -- Stories --

    fn insert_story(&self, story: &Story) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO stories (id, session_id, title, description, final_point, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                (
                    story.id.to_string(),
                    story.session_id.to_string(),
                    &story.title,
                    &story.description,
                    &story.final_point,
                    fmt_time(story.created_at),
                ),
            )?;
            Ok(())
        })
    }

    fn find_story(&self, id: Uuid) -> Result<Option<Story>> {
        self.with_conn(|conn| {
            let story = conn
                .query_row(
                    &format!("SELECT {STORY_COLUMNS} FROM stories WHERE id = ?1"),
                    [id.to_string()],
                    story_from_row,
                )
                .optional()?;
            Ok(story)
        })
    }

    fn list_stories(&self, session_id: Uuid) -> Result<Vec<Story>> {
        self.with_conn(|conn| {
            // rowid follows insertion order
            let mut stmt = conn.prepare(&format!(
                "SELECT {STORY_COLUMNS} FROM stories WHERE session_id = ?1 ORDER BY rowid"
            ))?;
            let rows = stmt
                .query_map([session_id.to_string()], story_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    fn set_final_point(&self, story_id: Uuid, final_point: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE stories SET final_point = ?1 WHERE id = ?2",
                (final_point, story_id.to_string()),
            )?;
            Ok(())
        })
    }

    // -- Votes --

    fn insert_vote(&self, vote: &Vote) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO votes (id, story_id, user_id, anon_id, value) VALUES (?1, ?2, ?3, ?4, ?5)",
                (
                    vote.id.to_string(),
                    vote.story_id.to_string(),
                    vote.user_id.to_string(),
                    &vote.anon_id,
                    &vote.value,
                ),
            )?;
            Ok(())
        })
    }

    fn find_vote(&self, story_id: Uuid, user_id: Uuid) -> Result<Option<Vote>> {
        self.with_conn(|conn| {
            let vote = conn
                .query_row(
                    &format!(
                        "SELECT {VOTE_COLUMNS} FROM votes WHERE story_id = ?1 AND user_id = ?2 ORDER BY rowid LIMIT 1"
                    ),
                    [story_id.to_string(), user_id.to_string()],
                    vote_from_row,
                )
                .optional()?;
            Ok(vote)
        })
    }

    fn update_vote_value(&self, vote_id: Uuid, value: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE votes SET value = ?1 WHERE id = ?2",
                (value, vote_id.to_string()),
            )?;
            Ok(())
        })
    }

    fn list_votes(&self, story_id: Uuid) -> Result<Vec<Vote>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {VOTE_COLUMNS} FROM votes WHERE story_id = ?1 ORDER BY rowid"
            ))?;
            let rows = stmt
                .query_map([story_id.to_string()], vote_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    fn list_session_votes(&self, session_id: Uuid) -> Result<Vec<Vote>> {
        self.with_conn(|conn| {
            // Single JOIN instead of one query per story
            let mut stmt = conn.prepare(
                "SELECT v.id, v.story_id, v.user_id, v.anon_id, v.value
                 FROM votes v
                 JOIN stories s ON v.story_id = s.id
                 WHERE s.session_id = ?1
                 ORDER BY v.rowid",
            )?;
            let rows = stmt
                .query_map([session_id.to_string()], vote_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    fn count_votes(&self, story_id: Uuid) -> Result<usize> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM votes WHERE story_id = ?1",
                [story_id.to_string()],
                |row| row.get(0),
            )?;
            Ok(count as usize)
        })
    }
}

/// Fixed-width UTC timestamps so that text comparison in SQL matches time order.
fn fmt_time(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn uuid_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let raw: String = row.get(idx)?;
    raw.parse()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn time_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: uuid_col(row, 0)?,
        email: row.get(1)?,
    })
}

fn story_from_row(row: &Row<'_>) -> rusqlite::Result<Story> {
    Ok(Story {
        id: uuid_col(row, 0)?,
        session_id: uuid_col(row, 1)?,
        title: row.get(2)?,
        description: row.get(3)?,
        final_point: row.get(4)?,
        created_at: time_col(row, 5)?,
    })
}

fn vote_from_row(row: &Row<'_>) -> rusqlite::Result<Vote> {
    Ok(Vote {
        id: uuid_col(row, 0)?,
        story_id: uuid_col(row, 1)?,
        user_id: uuid_col(row, 2)?,
        anon_id: row.get(3)?,
        value: row.get(4)?,
    })
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    fn session(db: &Database) -> Session {
        let session = Session {
            id: Uuid::new_v4(),
            name: "Sprint 12".into(),
            host_user_id: Uuid::new_v4(),
            created_at: Utc::now(),
        };
        db.insert_session(&session).unwrap();
        session
    }

    fn story(db: &Database, session_id: Uuid, title: &str) -> Story {
        let story = Story {
            id: Uuid::new_v4(),
            session_id,
            title: title.into(),
            description: None,
            final_point: None,
            created_at: Utc::now(),
        };
        db.insert_story(&story).unwrap();
        story
    }

    #[test]
    fn session_roundtrip() {
        let db = Database::open_in_memory().unwrap();
        let session = session(&db);

        let found = db.find_session(session.id).unwrap().unwrap();
        assert_eq!(found.id, session.id);
        assert_eq!(found.host_user_id, session.host_user_id);
        assert_eq!(found.name, "Sprint 12");
        assert!(db.find_session(Uuid::new_v4()).unwrap().is_none());
    }

    #[test]
    fn stories_list_in_insertion_order() {
        let db = Database::open_in_memory().unwrap();
        let session = session(&db);
        let titles = ["Login page", "Checkout", "Avatar upload"];
        for title in titles {
            story(&db, session.id, title);
        }
        // A story in another session must not leak in
        let other = self::session(&db);
        story(&db, other.id, "Elsewhere");

        let listed: Vec<String> = db
            .list_stories(session.id)
            .unwrap()
            .into_iter()
            .map(|s| s.title)
            .collect();
        assert_eq!(listed, titles);
    }

    #[test]
    fn final_point_update() {
        let db = Database::open_in_memory().unwrap();
        let session = session(&db);
        let story = story(&db, session.id, "Login page");

        db.set_final_point(story.id, "5").unwrap();
        assert_eq!(
            db.find_story(story.id).unwrap().unwrap().final_point.as_deref(),
            Some("5")
        );
    }

    #[test]
    fn vote_find_update_and_count() {
        let db = Database::open_in_memory().unwrap();
        let session = session(&db);
        let story = story(&db, session.id, "Login page");
        let user_id = Uuid::new_v4();

        assert!(db.find_vote(story.id, user_id).unwrap().is_none());

        let vote = Vote {
            id: Uuid::new_v4(),
            story_id: story.id,
            user_id,
            anon_id: Some("anon".into()),
            value: "3".into(),
        };
        db.insert_vote(&vote).unwrap();
        db.update_vote_value(vote.id, "8").unwrap();

        let found = db.find_vote(story.id, user_id).unwrap().unwrap();
        assert_eq!(found.id, vote.id);
        assert_eq!(found.value, "8");
        assert_eq!(db.count_votes(story.id).unwrap(), 1);
        assert_eq!(db.list_session_votes(session.id).unwrap(), vec![found]);
    }

    #[test]
    fn auth_token_is_consumed_once() {
        let db = Database::open_in_memory().unwrap();
        let now = Utc::now();
        let token = AuthToken {
            token: Uuid::new_v4().to_string(),
            email: "dev@example.com".into(),
            expires_at: now + Duration::minutes(15),
            used: false,
        };
        db.insert_auth_token(&token).unwrap();

        assert!(db.consume_auth_token(&token.token, now).unwrap());
        assert!(!db.consume_auth_token(&token.token, now).unwrap());
        assert!(db.find_auth_token(&token.token).unwrap().unwrap().used);
    }

    #[test]
    fn expired_auth_token_is_not_consumed() {
        let db = Database::open_in_memory().unwrap();
        let now = Utc::now();
        let token = AuthToken {
            token: Uuid::new_v4().to_string(),
            email: "dev@example.com".into(),
            expires_at: now - Duration::seconds(1),
            used: false,
        };
        db.insert_auth_token(&token).unwrap();

        assert!(!db.consume_auth_token(&token.token, now).unwrap());
        assert!(!db.find_auth_token(&token.token).unwrap().unwrap().used);
    }

    #[test]
    fn users_are_unique_by_email() {
        let db = Database::open_in_memory().unwrap();
        let user = User {
            id: Uuid::new_v4(),
            email: "dev@example.com".into(),
        };
        db.insert_user(&user).unwrap();

        let dup = User {
            id: Uuid::new_v4(),
            email: "dev@example.com".into(),
        };
        assert!(db.insert_user(&dup).is_err());
        assert_eq!(db.find_user_by_email("dev@example.com").unwrap(), Some(user));
    }
}
