use std::sync::Mutex;

use animus_core::types::MessageRole;
use animus_persona::vector::{is_valid_mbti, mbti_vector};
use animus_persona::AffectState;
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{Result, StoreError};
use crate::types::*;

/// Thread-safe store over a single SQLite connection.
///
/// All orchestrator-facing persistence goes through here. A `Mutex` is
/// sufficient for the single-node target; message ordering within a
/// session comes from the AUTOINCREMENT id, not from locking.
pub struct Store {
    db: Mutex<Connection>,
}

impl Store {
    /// Wrap an already-open connection and initialise the schema.
    pub fn new(conn: Connection) -> Result<Self> {
        crate::db::init_db(&conn)?;
        Ok(Self { db: Mutex::new(conn) })
    }

    pub fn open(path: &str) -> Result<Self> {
        if let Some(dir) = std::path::Path::new(path).parent() {
            let _ = std::fs::create_dir_all(dir);
        }
        Self::new(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::new(Connection::open_in_memory()?)
    }

    // ── users ────────────────────────────────────────────────────────────

    /// Fetch a user, creating a placeholder row on first reference.
    pub fn ensure_user(&self, user_id: &str) -> Result<User> {
        if user_id.trim().is_empty() {
            return Err(StoreError::Validation("user_id cannot be empty".into()));
        }
        if let Some(user) = self.get_user(user_id)? {
            return Ok(user);
        }
        info!(user_id, "auto-creating placeholder user");
        self.create_user(user_id, user_id, "")
    }

    pub fn create_user(&self, user_id: &str, display_name: &str, description: &str) -> Result<User> {
        if user_id.trim().is_empty() {
            return Err(StoreError::Validation("user_id cannot be empty".into()));
        }
        let now = Utc::now().to_rfc3339();
        let user_uuid = Uuid::new_v4().to_string();
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT OR IGNORE INTO users
             (user_id, user_uuid, display_name, description, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
            rusqlite::params![user_id, user_uuid, display_name, description, now],
        )?;
        // Read back — covers the race where two callers insert at once.
        db.query_row(
            "SELECT user_id, user_uuid, display_name, description, created_at, updated_at
             FROM users WHERE user_id = ?1",
            [user_id],
            row_to_user,
        )
        .map_err(StoreError::from)
    }

    pub fn get_user(&self, user_id: &str) -> Result<Option<User>> {
        let db = self.db.lock().unwrap();
        db.query_row(
            "SELECT user_id, user_uuid, display_name, description, created_at, updated_at
             FROM users WHERE user_id = ?1",
            [user_id],
            row_to_user,
        )
        .optional()
        .map_err(StoreError::from)
    }

    pub fn list_users(&self) -> Result<Vec<User>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT user_id, user_uuid, display_name, description, created_at, updated_at
             FROM users ORDER BY created_at",
        )?;
        let rows = stmt.query_map([], row_to_user)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    // ── souls ────────────────────────────────────────────────────────────

    /// Create a soul for an existing (or auto-ensured) user. The
    /// personality vector is derived from the MBTI type; the affect
    /// state starts neutral.
    pub fn create_soul(
        &self,
        user_id: &str,
        name: &str,
        mbti_type: &str,
        model_version: &str,
    ) -> Result<Soul> {
        if name.trim().is_empty() {
            return Err(StoreError::Validation("soul name cannot be empty".into()));
        }
        if !is_valid_mbti(mbti_type) {
            return Err(StoreError::InvalidMbti(mbti_type.to_string()));
        }
        self.ensure_user(user_id)?;

        let now = Utc::now();
        let now_str = now.to_rfc3339();
        let soul_id = Uuid::new_v4().to_string();
        let personality = mbti_vector(mbti_type);
        let state = AffectState::initial(now);
        let personality_json = serde_json::to_string(&personality)?;
        let state_json = serde_json::to_string(&state)?;

        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO souls
             (soul_id, user_id, name, mbti_type, personality, emotion_state,
              model_version, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
            rusqlite::params![
                soul_id,
                user_id,
                name,
                mbti_type,
                personality_json,
                state_json,
                model_version,
                now_str
            ],
        )?;
        info!(soul_id = %soul_id, user_id, name, mbti_type, "soul created");

        Ok(Soul {
            soul_id,
            user_id: user_id.to_string(),
            name: name.to_string(),
            mbti_type: mbti_type.to_string(),
            personality,
            emotion_state: state,
            model_version: model_version.to_string(),
            created_at: now_str.clone(),
            updated_at: now_str,
        })
    }

    pub fn get_soul(&self, soul_id: &str) -> Result<Option<Soul>> {
        let db = self.db.lock().unwrap();
        db.query_row(
            "SELECT soul_id, user_id, name, mbti_type, personality, emotion_state,
                    model_version, created_at, updated_at
             FROM souls WHERE soul_id = ?1",
            [soul_id],
            row_to_soul,
        )
        .optional()
        .map_err(StoreError::from)
    }

    pub fn list_souls(&self, user_id: &str) -> Result<Vec<Soul>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT soul_id, user_id, name, mbti_type, personality, emotion_state,
                    model_version, created_at, updated_at
             FROM souls WHERE user_id = ?1 ORDER BY created_at",
        )?;
        let rows = stmt.query_map([user_id], row_to_soul)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Match a soul owned by `user_id` where the id or the name equals
    /// `hint`.
    pub fn find_soul_by_hint(&self, user_id: &str, hint: &str) -> Result<Option<Soul>> {
        let db = self.db.lock().unwrap();
        db.query_row(
            "SELECT soul_id, user_id, name, mbti_type, personality, emotion_state,
                    model_version, created_at, updated_at
             FROM souls WHERE user_id = ?1 AND (soul_id = ?2 OR name = ?2)",
            rusqlite::params![user_id, hint],
            row_to_soul,
        )
        .optional()
        .map_err(StoreError::from)
    }

    /// Persist a freshly computed affect state. The state is a value —
    /// callers hold the per-soul lock across reload → update → write.
    pub fn update_soul_emotion(&self, soul_id: &str, state: &AffectState) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let state_json = serde_json::to_string(state)?;
        let db = self.db.lock().unwrap();
        let rows = db.execute(
            "UPDATE souls SET emotion_state = ?1, updated_at = ?2 WHERE soul_id = ?3",
            rusqlite::params![state_json, now, soul_id],
        )?;
        if rows == 0 {
            return Err(StoreError::SoulNotFound(soul_id.to_string()));
        }
        Ok(())
    }

    // ── terminal bindings ────────────────────────────────────────────────

    pub fn get_binding(&self, user_id: &str, terminal_id: &str) -> Result<Option<TerminalSoulBinding>> {
        let db = self.db.lock().unwrap();
        db.query_row(
            "SELECT user_id, terminal_id, soul_id, first_bound_at, last_seen_at
             FROM terminal_bindings WHERE user_id = ?1 AND terminal_id = ?2",
            rusqlite::params![user_id, terminal_id],
            row_to_binding,
        )
        .optional()
        .map_err(StoreError::from)
    }

    /// Bind a terminal to a soul, verifying ownership first. Re-binding
    /// an existing pair replaces the soul and refreshes `last_seen_at`.
    pub fn bind_terminal(&self, user_id: &str, terminal_id: &str, soul_id: &str) -> Result<()> {
        let soul = self
            .get_soul(soul_id)?
            .ok_or_else(|| StoreError::SoulNotFound(soul_id.to_string()))?;
        if soul.user_id != user_id {
            return Err(StoreError::SoulOwnershipMismatch {
                soul_id: soul_id.to_string(),
                user_id: user_id.to_string(),
            });
        }

        let now = Utc::now().to_rfc3339();
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO terminal_bindings
             (user_id, terminal_id, soul_id, first_bound_at, last_seen_at)
             VALUES (?1, ?2, ?3, ?4, ?4)
             ON CONFLICT(user_id, terminal_id)
             DO UPDATE SET soul_id = ?3, last_seen_at = ?4",
            rusqlite::params![user_id, terminal_id, soul_id, now],
        )?;
        debug!(user_id, terminal_id, soul_id, "terminal bound");
        Ok(())
    }

    pub fn touch_binding(&self, user_id: &str, terminal_id: &str) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let db = self.db.lock().unwrap();
        db.execute(
            "UPDATE terminal_bindings SET last_seen_at = ?1
             WHERE user_id = ?2 AND terminal_id = ?3",
            rusqlite::params![now, user_id, terminal_id],
        )?;
        Ok(())
    }

    // ── sessions & messages ──────────────────────────────────────────────

    /// Create the session row if it does not exist yet. Sessions are born
    /// on first message persistence, never by an explicit endpoint.
    pub fn ensure_session(
        &self,
        session_id: &str,
        user_id: &str,
        terminal_id: &str,
        soul_id: &str,
    ) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT OR IGNORE INTO sessions
             (session_id, user_id, terminal_id, soul_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![session_id, user_id, terminal_id, soul_id, now],
        )?;
        Ok(())
    }

    pub fn get_session(&self, session_id: &str) -> Result<Option<Session>> {
        let db = self.db.lock().unwrap();
        db.query_row(
            "SELECT session_id, user_id, terminal_id, soul_id, created_at, summary,
                    summary_updated_at, last_compacted_message_id,
                    last_user_active_at, idle_processed_at
             FROM sessions WHERE session_id = ?1",
            [session_id],
            row_to_session,
        )
        .optional()
        .map_err(StoreError::from)
    }

    /// Append one message. A `user` turn also marks the session active
    /// and clears `idle_processed_at` so the idle worker re-arms.
    #[allow(clippy::too_many_arguments)]
    pub fn append_message(
        &self,
        session_id: &str,
        user_id: &str,
        terminal_id: &str,
        soul_id: &str,
        role: MessageRole,
        name: Option<&str>,
        tool_call_id: Option<&str>,
        content: &str,
    ) -> Result<i64> {
        self.ensure_session(session_id, user_id, terminal_id, soul_id)?;
        let now = Utc::now().to_rfc3339();
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO messages
             (session_id, user_id, terminal_id, soul_id, role, name, tool_call_id,
              content, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            rusqlite::params![
                session_id,
                user_id,
                terminal_id,
                soul_id,
                role.as_str(),
                name,
                tool_call_id,
                content,
                now
            ],
        )?;
        let id = db.last_insert_rowid();

        if role == MessageRole::User {
            db.execute(
                "UPDATE sessions SET last_user_active_at = ?1, idle_processed_at = NULL
                 WHERE session_id = ?2",
                rusqlite::params![now, session_id],
            )?;
        }
        Ok(id)
    }

    /// Last `limit` conversational messages (user/assistant/tool),
    /// returned oldest-first.
    pub fn recent_messages(&self, session_id: &str, limit: usize) -> Result<Vec<StoredMessage>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT id, session_id, user_id, terminal_id, soul_id, role, name,
                    tool_call_id, content, created_at
             FROM messages
             WHERE session_id = ?1 AND role IN ('user', 'assistant', 'tool')
             ORDER BY id DESC
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(rusqlite::params![session_id, limit as i64], row_to_message)?;
        let mut msgs: Vec<_> = rows.filter_map(|r| r.ok()).collect();
        msgs.reverse();
        Ok(msgs)
    }

    /// `(summary, last_compacted_message_id)` for the compaction check.
    pub fn summary_state(&self, session_id: &str) -> Result<(String, i64)> {
        let db = self.db.lock().unwrap();
        db.query_row(
            "SELECT summary, last_compacted_message_id FROM sessions WHERE session_id = ?1",
            [session_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?
        .ok_or_else(|| StoreError::SessionNotFound(session_id.to_string()))
    }

    /// Count and total characters of messages newer than the compaction
    /// cursor, across every persisted role.
    pub fn fresh_stats(&self, session_id: &str, after_id: i64) -> Result<(i64, i64)> {
        let db = self.db.lock().unwrap();
        db.query_row(
            "SELECT COUNT(*), COALESCE(SUM(LENGTH(content)), 0)
             FROM messages
             WHERE session_id = ?1 AND id > ?2
               AND role IN ('user', 'assistant', 'tool', 'observation')",
            rusqlite::params![session_id, after_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .map_err(StoreError::from)
    }

    /// Oldest-first messages past the cursor, capped at `limit`.
    pub fn fresh_messages(
        &self,
        session_id: &str,
        after_id: i64,
        limit: usize,
    ) -> Result<Vec<StoredMessage>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT id, session_id, user_id, terminal_id, soul_id, role, name,
                    tool_call_id, content, created_at
             FROM messages
             WHERE session_id = ?1 AND id > ?2
               AND role IN ('user', 'assistant', 'tool', 'observation')
             ORDER BY id
             LIMIT ?3",
        )?;
        let rows = stmt.query_map(
            rusqlite::params![session_id, after_id, limit as i64],
            row_to_message,
        )?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Atomically install a new summary and advance the cursor. The
    /// cursor only moves forward; a stale writer loses silently.
    pub fn update_summary(&self, session_id: &str, summary: &str, up_to_id: i64) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let db = self.db.lock().unwrap();
        db.execute(
            "UPDATE sessions
             SET summary = ?1, summary_updated_at = ?2, last_compacted_message_id = ?3
             WHERE session_id = ?4 AND last_compacted_message_id <= ?3",
            rusqlite::params![summary, now, up_to_id, session_id],
        )?;
        Ok(())
    }

    // ── idle scan ────────────────────────────────────────────────────────

    /// Sessions idle since `cutoff_rfc3339` that have not been processed
    /// since their last activity.
    pub fn idle_sessions(&self, cutoff_rfc3339: &str, batch: usize) -> Result<Vec<Session>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT session_id, user_id, terminal_id, soul_id, created_at, summary,
                    summary_updated_at, last_compacted_message_id,
                    last_user_active_at, idle_processed_at
             FROM sessions
             WHERE last_user_active_at IS NOT NULL
               AND last_user_active_at <= ?1
               AND (idle_processed_at IS NULL OR idle_processed_at < last_user_active_at)
             ORDER BY last_user_active_at
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(rusqlite::params![cutoff_rfc3339, batch as i64], row_to_session)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    pub fn mark_idle_processed(&self, session_id: &str) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let db = self.db.lock().unwrap();
        db.execute(
            "UPDATE sessions SET idle_processed_at = ?1 WHERE session_id = ?2",
            rusqlite::params![now, session_id],
        )?;
        Ok(())
    }

    // ── episodes & jobs ──────────────────────────────────────────────────

    pub fn insert_episode(
        &self,
        session_id: &str,
        user_id: &str,
        terminal_id: &str,
        soul_id: &str,
        summary: &str,
    ) -> Result<i64> {
        let now = Utc::now().to_rfc3339();
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO memory_episodes
             (session_id, user_id, terminal_id, soul_id, summary, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![session_id, user_id, terminal_id, soul_id, summary, now],
        )?;
        Ok(db.last_insert_rowid())
    }

    pub fn list_episodes(&self, session_id: &str) -> Result<Vec<MemoryEpisode>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT id, session_id, user_id, terminal_id, soul_id, summary, created_at
             FROM memory_episodes WHERE session_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map([session_id], |row| {
            Ok(MemoryEpisode {
                id: row.get(0)?,
                session_id: row.get(1)?,
                user_id: row.get(2)?,
                terminal_id: row.get(3)?,
                soul_id: row.get(4)?,
                summary: row.get(5)?,
                created_at: row.get(6)?,
            })
        })?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    pub fn enqueue_memory_job(
        &self,
        session_id: &str,
        user_id: &str,
        terminal_id: &str,
        soul_id: &str,
        summary: &str,
        trigger_source: &str,
    ) -> Result<i64> {
        let now = Utc::now().to_rfc3339();
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO memory_jobs
             (session_id, user_id, terminal_id, soul_id, summary, trigger_source,
              status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'pending', ?7, ?7)",
            rusqlite::params![session_id, user_id, terminal_id, soul_id, summary, trigger_source, now],
        )?;
        Ok(db.last_insert_rowid())
    }

    pub fn set_job_status(&self, job_id: i64, status: JobStatus) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let db = self.db.lock().unwrap();
        db.execute(
            "UPDATE memory_jobs SET status = ?1, updated_at = ?2 WHERE id = ?3",
            rusqlite::params![status.as_str(), now, job_id],
        )?;
        Ok(())
    }

    pub fn pending_memory_jobs(&self, limit: usize) -> Result<Vec<MemoryJob>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT id, session_id, user_id, terminal_id, soul_id, summary,
                    trigger_source, status, created_at, updated_at
             FROM memory_jobs WHERE status = 'pending' ORDER BY id LIMIT ?1",
        )?;
        let rows = stmt.query_map([limit as i64], row_to_job)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    // ── soul relations ───────────────────────────────────────────────────

    pub fn upsert_relation(
        &self,
        soul_id: &str,
        target_name: &str,
        target_mbti: Option<&str>,
        guidance: &str,
    ) -> Result<()> {
        if target_name.trim().is_empty() {
            return Err(StoreError::Validation("target_name cannot be empty".into()));
        }
        if let Some(mbti) = target_mbti {
            if !is_valid_mbti(mbti) {
                return Err(StoreError::InvalidMbti(mbti.to_string()));
            }
        }
        let now = Utc::now().to_rfc3339();
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO soul_relations
             (soul_id, target_name, target_mbti, guidance, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)
             ON CONFLICT(soul_id, target_name)
             DO UPDATE SET target_mbti = ?3, guidance = ?4, updated_at = ?5",
            rusqlite::params![soul_id, target_name, target_mbti, guidance, now],
        )?;
        Ok(())
    }

    pub fn list_relations(&self, soul_id: &str) -> Result<Vec<SoulRelation>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT id, soul_id, target_name, target_mbti, guidance, created_at, updated_at
             FROM soul_relations WHERE soul_id = ?1 ORDER BY target_name",
        )?;
        let rows = stmt.query_map([soul_id], |row| {
            Ok(SoulRelation {
                id: row.get(0)?,
                soul_id: row.get(1)?,
                target_name: row.get(2)?,
                target_mbti: row.get(3)?,
                guidance: row.get(4)?,
                created_at: row.get(5)?,
                updated_at: row.get(6)?,
            })
        })?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }
}

// ── row mappers ─────────────────────────────────────────────────────────

fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        user_id: row.get(0)?,
        user_uuid: row.get(1)?,
        display_name: row.get(2)?,
        description: row.get(3)?,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
    })
}

fn row_to_soul(row: &rusqlite::Row<'_>) -> rusqlite::Result<Soul> {
    let personality_json: String = row.get(4)?;
    let state_json: String = row.get(5)?;
    // A soul row with corrupt JSON still loads: neutral vector, fresh state.
    let personality = serde_json::from_str(&personality_json)
        .unwrap_or_else(|_| animus_persona::PersonalityVector::neutral());
    let mut emotion_state: AffectState = serde_json::from_str(&state_json)
        .unwrap_or_else(|_| AffectState::initial(Utc::now()));
    emotion_state.sanitize();

    Ok(Soul {
        soul_id: row.get(0)?,
        user_id: row.get(1)?,
        name: row.get(2)?,
        mbti_type: row.get(3)?,
        personality,
        emotion_state,
        model_version: row.get(6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

fn row_to_binding(row: &rusqlite::Row<'_>) -> rusqlite::Result<TerminalSoulBinding> {
    Ok(TerminalSoulBinding {
        user_id: row.get(0)?,
        terminal_id: row.get(1)?,
        soul_id: row.get(2)?,
        first_bound_at: row.get(3)?,
        last_seen_at: row.get(4)?,
    })
}

fn row_to_session(row: &rusqlite::Row<'_>) -> rusqlite::Result<Session> {
    Ok(Session {
        session_id: row.get(0)?,
        user_id: row.get(1)?,
        terminal_id: row.get(2)?,
        soul_id: row.get(3)?,
        created_at: row.get(4)?,
        summary: row.get(5)?,
        summary_updated_at: row.get(6)?,
        last_compacted_message_id: row.get(7)?,
        last_user_active_at: row.get(8)?,
        idle_processed_at: row.get(9)?,
    })
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredMessage> {
    let role_str: String = row.get(5)?;
    Ok(StoredMessage {
        id: row.get(0)?,
        session_id: row.get(1)?,
        user_id: row.get(2)?,
        terminal_id: row.get(3)?,
        soul_id: row.get(4)?,
        role: role_str.parse().unwrap_or(MessageRole::Observation),
        name: row.get(6)?,
        tool_call_id: row.get(7)?,
        content: row.get(8)?,
        created_at: row.get(9)?,
    })
}

fn row_to_job(row: &rusqlite::Row<'_>) -> rusqlite::Result<MemoryJob> {
    let status_str: String = row.get(7)?;
    Ok(MemoryJob {
        id: row.get(0)?,
        session_id: row.get(1)?,
        user_id: row.get(2)?,
        terminal_id: row.get(3)?,
        soul_id: row.get(4)?,
        summary: row.get(5)?,
        trigger_source: row.get(6)?,
        status: status_str.parse().unwrap_or(JobStatus::Pending),
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> Store {
        Store::open_in_memory().unwrap()
    }

    fn seed_soul(s: &Store) -> Soul {
        s.create_soul("u1", "Nova", "INTJ", "v1").unwrap()
    }

    #[test]
    fn ensure_user_is_idempotent() {
        let s = store();
        let a = s.ensure_user("u1").unwrap();
        let b = s.ensure_user("u1").unwrap();
        assert_eq!(a.user_uuid, b.user_uuid);
        assert_eq!(s.list_users().unwrap().len(), 1);
    }

    #[test]
    fn empty_user_id_is_rejected() {
        let s = store();
        assert!(matches!(s.ensure_user("  "), Err(StoreError::Validation(_))));
    }

    #[test]
    fn create_soul_validates_mbti() {
        let s = store();
        let err = s.create_soul("u1", "Nova", "XXXX", "").unwrap_err();
        assert!(matches!(err, StoreError::InvalidMbti(_)));
    }

    #[test]
    fn soul_round_trips_personality_and_state() {
        let s = store();
        let soul = seed_soul(&s);
        let loaded = s.get_soul(&soul.soul_id).unwrap().unwrap();
        assert_eq!(loaded.personality, soul.personality);
        assert_eq!(loaded.mbti_type, "INTJ");
        assert_eq!(loaded.emotion_state.p, 0.0);
    }

    #[test]
    fn find_soul_by_hint_matches_id_and_name() {
        let s = store();
        let soul = seed_soul(&s);
        assert!(s.find_soul_by_hint("u1", &soul.soul_id).unwrap().is_some());
        assert!(s.find_soul_by_hint("u1", "Nova").unwrap().is_some());
        assert!(s.find_soul_by_hint("u1", "Nobody").unwrap().is_none());
        // A different user cannot reach it by hint.
        assert!(s.find_soul_by_hint("u2", "Nova").unwrap().is_none());
    }

    #[test]
    fn bind_terminal_enforces_ownership() {
        let s = store();
        let soul = seed_soul(&s);
        s.ensure_user("u2").unwrap();
        let err = s.bind_terminal("u2", "t1", &soul.soul_id).unwrap_err();
        assert!(matches!(err, StoreError::SoulOwnershipMismatch { .. }));

        s.bind_terminal("u1", "t1", &soul.soul_id).unwrap();
        let binding = s.get_binding("u1", "t1").unwrap().unwrap();
        assert_eq!(binding.soul_id, soul.soul_id);
    }

    #[test]
    fn message_ids_are_monotone_within_a_session() {
        let s = store();
        let soul = seed_soul(&s);
        let mut last = 0;
        for i in 0..10 {
            let id = s
                .append_message(
                    "s1",
                    "u1",
                    "t1",
                    &soul.soul_id,
                    MessageRole::User,
                    None,
                    None,
                    &format!("msg {i}"),
                )
                .unwrap();
            assert!(id > last);
            last = id;
        }
    }

    #[test]
    fn user_message_marks_session_active_and_rearms_idle() {
        let s = store();
        let soul = seed_soul(&s);
        s.append_message("s1", "u1", "t1", &soul.soul_id, MessageRole::User, None, None, "hi")
            .unwrap();
        s.mark_idle_processed("s1").unwrap();
        assert!(s.get_session("s1").unwrap().unwrap().idle_processed_at.is_some());

        s.append_message("s1", "u1", "t1", &soul.soul_id, MessageRole::User, None, None, "again")
            .unwrap();
        let session = s.get_session("s1").unwrap().unwrap();
        assert!(session.idle_processed_at.is_none());
        assert!(session.last_user_active_at.is_some());
    }

    #[test]
    fn recent_messages_excludes_observations_and_orders_oldest_first() {
        let s = store();
        let soul = seed_soul(&s);
        for (role, content) in [
            (MessageRole::User, "one"),
            (MessageRole::Observation, "camera: a cat"),
            (MessageRole::Assistant, "two"),
            (MessageRole::Tool, "three"),
        ] {
            s.append_message("s1", "u1", "t1", &soul.soul_id, role, None, None, content)
                .unwrap();
        }
        let msgs = s.recent_messages("s1", 10).unwrap();
        let contents: Vec<_> = msgs.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["one", "two", "three"]);
    }

    #[test]
    fn fresh_stats_respects_the_cursor_and_counts_observations() {
        let s = store();
        let soul = seed_soul(&s);
        let mut ids = Vec::new();
        for role in [MessageRole::User, MessageRole::Observation, MessageRole::Assistant] {
            ids.push(
                s.append_message("s1", "u1", "t1", &soul.soul_id, role, None, None, "abcd")
                    .unwrap(),
            );
        }
        let (count, chars) = s.fresh_stats("s1", 0).unwrap();
        assert_eq!(count, 3);
        assert_eq!(chars, 12);

        let (count, _) = s.fresh_stats("s1", ids[1]).unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn summary_cursor_only_moves_forward() {
        let s = store();
        let soul = seed_soul(&s);
        s.append_message("s1", "u1", "t1", &soul.soul_id, MessageRole::User, None, None, "hi")
            .unwrap();

        s.update_summary("s1", "first", 10).unwrap();
        let (summary, cursor) = s.summary_state("s1").unwrap();
        assert_eq!((summary.as_str(), cursor), ("first", 10));

        // A stale writer with a lower cursor must not regress anything.
        s.update_summary("s1", "stale", 5).unwrap();
        let (summary, cursor) = s.summary_state("s1").unwrap();
        assert_eq!((summary.as_str(), cursor), ("first", 10));

        s.update_summary("s1", "second", 20).unwrap();
        let (_, cursor) = s.summary_state("s1").unwrap();
        assert_eq!(cursor, 20);
    }

    #[test]
    fn idle_scan_finds_only_unprocessed_sessions() {
        let s = store();
        let soul = seed_soul(&s);
        s.append_message("s1", "u1", "t1", &soul.soul_id, MessageRole::User, None, None, "hi")
            .unwrap();
        s.append_message("s2", "u1", "t1", &soul.soul_id, MessageRole::User, None, None, "hi")
            .unwrap();

        let future = (Utc::now() + chrono::Duration::seconds(10)).to_rfc3339();
        let idle = s.idle_sessions(&future, 50).unwrap();
        assert_eq!(idle.len(), 2);

        s.mark_idle_processed("s1").unwrap();
        let idle = s.idle_sessions(&future, 50).unwrap();
        assert_eq!(idle.len(), 1);
        assert_eq!(idle[0].session_id, "s2");
    }

    #[test]
    fn episodes_and_jobs_insert() {
        let s = store();
        let soul = seed_soul(&s);
        s.insert_episode("s1", "u1", "t1", &soul.soul_id, "a summary").unwrap();
        assert_eq!(s.list_episodes("s1").unwrap().len(), 1);

        let job_id = s
            .enqueue_memory_job("s1", "u1", "t1", &soul.soul_id, "a summary", "idle_timeout")
            .unwrap();
        assert_eq!(s.pending_memory_jobs(10).unwrap().len(), 1);
        s.set_job_status(job_id, JobStatus::Done).unwrap();
        assert!(s.pending_memory_jobs(10).unwrap().is_empty());
    }

    #[test]
    fn relations_upsert_and_list() {
        let s = store();
        let soul = seed_soul(&s);
        s.upsert_relation(&soul.soul_id, "Alice", Some("ENFP"), "be gentle").unwrap();
        s.upsert_relation(&soul.soul_id, "Alice", Some("ENFP"), "be direct").unwrap();
        let relations = s.list_relations(&soul.soul_id).unwrap();
        assert_eq!(relations.len(), 1);
        assert_eq!(relations[0].guidance, "be direct");
    }
}
