use rusqlite::{Connection, Result};

/// Initialise all tables. Safe to call on every startup (idempotent);
/// schema changes are additive only.
pub fn init_db(conn: &Connection) -> Result<()> {
    create_users_table(conn)?;
    create_souls_table(conn)?;
    create_bindings_table(conn)?;
    create_sessions_table(conn)?;
    create_messages_table(conn)?;
    create_episodes_table(conn)?;
    create_jobs_table(conn)?;
    create_relations_table(conn)?;
    Ok(())
}

fn create_users_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS users (
            user_id      TEXT PRIMARY KEY,
            user_uuid    TEXT NOT NULL UNIQUE,
            display_name TEXT NOT NULL,
            description  TEXT NOT NULL DEFAULT '',
            created_at   TEXT NOT NULL,
            updated_at   TEXT NOT NULL
        );",
    )
}

fn create_souls_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS souls (
            soul_id       TEXT PRIMARY KEY,
            user_id       TEXT NOT NULL,
            name          TEXT NOT NULL,
            mbti_type     TEXT NOT NULL,
            personality   TEXT NOT NULL,
            emotion_state TEXT NOT NULL,
            model_version TEXT NOT NULL DEFAULT '',
            created_at    TEXT NOT NULL,
            updated_at    TEXT NOT NULL,
            UNIQUE(user_id, name)
        );
        CREATE INDEX IF NOT EXISTS idx_souls_user
            ON souls(user_id);",
    )
}

fn create_bindings_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS terminal_bindings (
            user_id        TEXT NOT NULL,
            terminal_id    TEXT NOT NULL,
            soul_id        TEXT NOT NULL,
            first_bound_at TEXT NOT NULL,
            last_seen_at   TEXT NOT NULL,
            PRIMARY KEY (user_id, terminal_id)
        );",
    )
}

fn create_sessions_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS sessions (
            session_id                TEXT PRIMARY KEY,
            user_id                   TEXT NOT NULL,
            terminal_id               TEXT NOT NULL,
            soul_id                   TEXT NOT NULL,
            created_at                TEXT NOT NULL,
            summary                   TEXT NOT NULL DEFAULT '',
            summary_updated_at        TEXT,
            last_compacted_message_id INTEGER NOT NULL DEFAULT 0,
            last_user_active_at       TEXT,
            idle_processed_at         TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_sessions_idle
            ON sessions(last_user_active_at);",
    )
}

fn create_messages_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS messages (
            id           INTEGER PRIMARY KEY AUTOINCREMENT,
            session_id   TEXT NOT NULL,
            user_id      TEXT NOT NULL,
            terminal_id  TEXT NOT NULL,
            soul_id      TEXT NOT NULL,
            role         TEXT NOT NULL,
            name         TEXT,
            tool_call_id TEXT,
            content      TEXT NOT NULL,
            created_at   TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_messages_session
            ON messages(session_id, id);",
    )
}

fn create_episodes_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS memory_episodes (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            session_id  TEXT NOT NULL,
            user_id     TEXT NOT NULL,
            terminal_id TEXT NOT NULL,
            soul_id     TEXT NOT NULL,
            summary     TEXT NOT NULL,
            created_at  TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_episodes_session
            ON memory_episodes(session_id, created_at);",
    )
}

fn create_jobs_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS memory_jobs (
            id             INTEGER PRIMARY KEY AUTOINCREMENT,
            session_id     TEXT NOT NULL,
            user_id        TEXT NOT NULL,
            terminal_id    TEXT NOT NULL,
            soul_id        TEXT NOT NULL,
            summary        TEXT NOT NULL,
            trigger_source TEXT NOT NULL,
            status         TEXT NOT NULL DEFAULT 'pending',
            created_at     TEXT NOT NULL,
            updated_at     TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_jobs_status
            ON memory_jobs(status, created_at);",
    )
}

fn create_relations_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS soul_relations (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            soul_id     TEXT NOT NULL,
            target_name TEXT NOT NULL,
            target_mbti TEXT,
            guidance    TEXT NOT NULL,
            created_at  TEXT NOT NULL,
            updated_at  TEXT NOT NULL,
            UNIQUE(soul_id, target_name)
        );",
    )
}
