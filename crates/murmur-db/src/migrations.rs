use rusqlite::Connection;
use tracing::info;

use crate::Result;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            username        TEXT NOT NULL UNIQUE,
            password_hash   TEXT NOT NULL,
            email           TEXT NOT NULL UNIQUE,
            created_at      INTEGER NOT NULL
        );

        -- Timestamps are unix milliseconds. expires_at NULL means no expiry.
        CREATE TABLE IF NOT EXISTS access_keys (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id     INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            key_value   TEXT NOT NULL UNIQUE,
            is_active   INTEGER NOT NULL DEFAULT 1,
            created_at  INTEGER NOT NULL,
            expires_at  INTEGER
        );

        CREATE INDEX IF NOT EXISTS idx_access_keys_user
            ON access_keys(user_id, is_active);

        CREATE TABLE IF NOT EXISTS channels (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            last_seq    INTEGER NOT NULL DEFAULT 0,
            created_at  INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS channel_members (
            channel_id  INTEGER NOT NULL REFERENCES channels(id) ON DELETE CASCADE,
            user_id     INTEGER NOT NULL REFERENCES users(id),
            position    INTEGER NOT NULL,
            PRIMARY KEY (channel_id, user_id)
        );

        CREATE INDEX IF NOT EXISTS idx_channel_members_user
            ON channel_members(user_id);

        CREATE TABLE IF NOT EXISTS messages (
            channel_id  INTEGER NOT NULL REFERENCES channels(id) ON DELETE CASCADE,
            seq         INTEGER NOT NULL,
            sender_id   INTEGER NOT NULL REFERENCES users(id),
            body        TEXT NOT NULL,
            created_at  INTEGER NOT NULL,
            PRIMARY KEY (channel_id, seq)
        );
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
