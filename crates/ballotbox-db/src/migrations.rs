use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id          TEXT PRIMARY KEY,
            username    TEXT NOT NULL UNIQUE,
            email       TEXT NOT NULL UNIQUE,
            password    TEXT NOT NULL,
            role        TEXT NOT NULL DEFAULT 'user',
            created_at  TEXT NOT NULL
        );

        -- seq is the listing order: descending seq == most recently created
        -- first. AUTOINCREMENT so deleted polls never give their slot back.
        -- created_by is not a foreign key: polls outlive their creator's
        -- account, the display name just stops resolving.
        CREATE TABLE IF NOT EXISTS polls (
            seq              INTEGER PRIMARY KEY AUTOINCREMENT,
            id               TEXT NOT NULL UNIQUE,
            title            TEXT NOT NULL,
            created_by       TEXT NOT NULL,
            duration_minutes INTEGER NOT NULL,
            expires_at       TEXT NOT NULL,
            is_private       INTEGER NOT NULL DEFAULT 0,
            created_at       TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS poll_options (
            poll_id     TEXT NOT NULL REFERENCES polls(id) ON DELETE CASCADE,
            idx         INTEGER NOT NULL,
            text        TEXT NOT NULL,
            votes       INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (poll_id, idx)
        );

        -- The voter set. The primary key is the duplicate-vote atomicity
        -- boundary: a second insert for the same (poll, user) fails the
        -- constraint instead of double counting. user_id is not a foreign
        -- key — cast votes are history and must keep the counter sum equal
        -- to the voter count even after the account is deleted.
        CREATE TABLE IF NOT EXISTS poll_voters (
            poll_id     TEXT NOT NULL REFERENCES polls(id) ON DELETE CASCADE,
            user_id     TEXT NOT NULL,
            PRIMARY KEY (poll_id, user_id)
        );

        -- Reverse index of poll_voters, per user. Cascades on poll delete
        -- so a hard-deleted poll vanishes from voting histories.
        CREATE TABLE IF NOT EXISTS voted_polls (
            user_id     TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            poll_id     TEXT NOT NULL REFERENCES polls(id) ON DELETE CASCADE,
            PRIMARY KEY (user_id, poll_id)
        );

        -- Allow-list entries are free-form identifiers: a user id, email,
        -- or username, whatever the creating admin supplied.
        CREATE TABLE IF NOT EXISTS poll_allowed_users (
            poll_id     TEXT NOT NULL REFERENCES polls(id) ON DELETE CASCADE,
            ident       TEXT NOT NULL,
            PRIMARY KEY (poll_id, ident)
        );

        CREATE INDEX IF NOT EXISTS idx_allowed_ident
            ON poll_allowed_users(ident);
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
