use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id          TEXT PRIMARY KEY,
            email       TEXT NOT NULL UNIQUE
        );

        CREATE TABLE IF NOT EXISTS auth_tokens (
            token       TEXT PRIMARY KEY,
            email       TEXT NOT NULL,
            expires_at  TEXT NOT NULL,
            used        INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS sessions (
            id              TEXT PRIMARY KEY,
            name            TEXT NOT NULL,
            host_user_id    TEXT NOT NULL,
            created_at      TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS stories (
            id              TEXT PRIMARY KEY,
            session_id      TEXT NOT NULL REFERENCES sessions(id),
            title           TEXT NOT NULL,
            description     TEXT,
            final_point     TEXT,
            created_at      TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_stories_session
            ON stories(session_id);

        -- One vote per (story, user) is enforced by the writer, not here.
        CREATE TABLE IF NOT EXISTS votes (
            id          TEXT PRIMARY KEY,
            story_id    TEXT NOT NULL REFERENCES stories(id),
            user_id     TEXT NOT NULL,
            anon_id     TEXT,
            value       TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_votes_story_user
            ON votes(story_id, user_id);
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
