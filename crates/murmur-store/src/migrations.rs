//! Schema setup. Every statement is idempotent so it runs on each open.

use rusqlite::Connection;
use tracing::info;

use crate::error::Result;

/// Create all tables and indexes that do not exist yet.
///
/// # Errors
///
/// Returns an error if any statement fails.
pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id          INTEGER PRIMARY KEY,
            username    TEXT NOT NULL UNIQUE,
            nickname    TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS posts (
            id          INTEGER PRIMARY KEY,
            owner_id    INTEGER NOT NULL,
            title       TEXT NOT NULL,
            content     TEXT NOT NULL,
            media_url   TEXT,
            media_type  TEXT,
            created_at  TEXT NOT NULL
        );

        -- Identities are authenticated elsewhere, so sender and receiver are
        -- not constrained to rows in users.
        CREATE TABLE IF NOT EXISTS messages (
            id                      INTEGER PRIMARY KEY,
            sender_id               INTEGER NOT NULL,
            receiver_id             INTEGER NOT NULL,
            content                 TEXT,
            media_url               TEXT,
            media_type              TEXT,
            created_at              TEXT NOT NULL,
            is_read                 INTEGER NOT NULL DEFAULT 0,
            read_at                 TEXT,
            is_edited               INTEGER NOT NULL DEFAULT 0,
            edited_at               TEXT,
            is_deleted_for_everyone INTEGER NOT NULL DEFAULT 0,
            reaction_count          INTEGER NOT NULL DEFAULT 0,
            CHECK (content IS NOT NULL OR media_url IS NOT NULL)
        );

        CREATE INDEX IF NOT EXISTS idx_messages_inbox
            ON messages(receiver_id, is_read, created_at);

        CREATE INDEX IF NOT EXISTS idx_messages_conversation
            ON messages(sender_id, receiver_id, created_at);

        CREATE TABLE IF NOT EXISTS shared_posts (
            id                      INTEGER PRIMARY KEY,
            post_id                 INTEGER NOT NULL REFERENCES posts(id) ON DELETE CASCADE,
            sender_id               INTEGER NOT NULL,
            receiver_id             INTEGER NOT NULL,
            caption                 TEXT,
            created_at              TEXT NOT NULL,
            is_read                 INTEGER NOT NULL DEFAULT 0,
            read_at                 TEXT,
            is_deleted_for_everyone INTEGER NOT NULL DEFAULT 0,
            reaction_count          INTEGER NOT NULL DEFAULT 0
        );

        CREATE INDEX IF NOT EXISTS idx_shared_posts_inbox
            ON shared_posts(receiver_id, is_read, created_at);

        CREATE TABLE IF NOT EXISTS reply_links (
            reply_id            INTEGER PRIMARY KEY REFERENCES messages(id) ON DELETE CASCADE,
            original_message_id INTEGER REFERENCES messages(id),
            shared_post_id      INTEGER REFERENCES shared_posts(id),
            CHECK ((original_message_id IS NULL) <> (shared_post_id IS NULL))
        );

        CREATE TABLE IF NOT EXISTS message_reactions (
            message_id  INTEGER NOT NULL REFERENCES messages(id) ON DELETE CASCADE,
            user_id     INTEGER NOT NULL,
            reaction    TEXT NOT NULL,
            created_at  TEXT NOT NULL,
            PRIMARY KEY (message_id, user_id)
        );

        CREATE TABLE IF NOT EXISTS shared_post_reactions (
            shared_post_id  INTEGER NOT NULL REFERENCES shared_posts(id) ON DELETE CASCADE,
            user_id         INTEGER NOT NULL,
            reaction        TEXT NOT NULL,
            created_at      TEXT NOT NULL,
            PRIMARY KEY (shared_post_id, user_id)
        );

        CREATE TABLE IF NOT EXISTS deleted_messages (
            user_id     INTEGER NOT NULL,
            message_id  INTEGER NOT NULL REFERENCES messages(id) ON DELETE CASCADE,
            created_at  TEXT NOT NULL,
            PRIMARY KEY (user_id, message_id)
        );

        CREATE TABLE IF NOT EXISTS deleted_shared_posts (
            user_id         INTEGER NOT NULL,
            shared_post_id  INTEGER NOT NULL REFERENCES shared_posts(id) ON DELETE CASCADE,
            created_at      TEXT NOT NULL,
            PRIMARY KEY (user_id, shared_post_id)
        );
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_are_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        run(&conn).unwrap();
        run(&conn).unwrap();

        let tables: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(tables, 9);
    }

    #[test]
    fn test_reply_link_is_exclusive() {
        let conn = Connection::open_in_memory().unwrap();
        run(&conn).unwrap();
        conn.execute(
            "INSERT INTO messages (id, sender_id, receiver_id, content, created_at)
             VALUES (1, 1, 2, 'a', '2025-01-01T00:00:00.000000Z')",
            [],
        )
        .unwrap();

        let both = conn.execute(
            "INSERT INTO reply_links (reply_id, original_message_id, shared_post_id)
             VALUES (1, 1, 1)",
            [],
        );
        assert!(both.is_err());

        let neither = conn.execute("INSERT INTO reply_links (reply_id) VALUES (1)", []);
        assert!(neither.is_err());
    }
}
