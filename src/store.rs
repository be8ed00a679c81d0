//! Durable session records.
//!
//! `SqliteStore` backs both the prep ledger and the session history, so a
//! debit and the session row it pays for commit in the same transaction.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::{LedgerError, StoreError};
use crate::ledger::BalanceLedger;
use crate::model::{CompletionRecord, EndReason, SessionId, SessionStatus, UserBalance, UserId};
use crate::policy::AbandonPolicy;

#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Records a finished session. Delivering the same session twice has no
    /// further effect.
    async fn persist_completion(&self, record: &CompletionRecord) -> Result<(), StoreError>;

    async fn mark_abandoned(
        &self,
        record: &CompletionRecord,
        credit_refunded: bool,
    ) -> Result<(), StoreError>;

    async fn sessions_for(&self, user: &UserId) -> Result<Vec<SessionSummary>, StoreError>;
}

/// One row of session history.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub started_at: DateTime<Utc>,
    pub status: SessionStatus,
    pub end_reason: Option<EndReason>,
    pub questions_answered: usize,
    pub questions_total: usize,
    pub elapsed_secs: u64,
    pub credit_refunded: bool,
}

impl From<tokio::task::JoinError> for StoreError {
    fn from(err: tokio::task::JoinError) -> Self {
        StoreError::Persistence(err.to_string())
    }
}

impl From<tokio::task::JoinError> for LedgerError {
    fn from(err: tokio::task::JoinError) -> Self {
        LedgerError::Persistence(err.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Opens (creating if needed) the database at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> rusqlite::Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                rusqlite::Error::SqliteFailure(
                    rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_CANTOPEN),
                    Some(format!("Failed to create directory: {}", e)),
                )
            })?;
        }
        let conn = Connection::open(path)?;
        Self::init(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_in_memory() -> rusqlite::Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Closes `active` sessions for `user` that started more than
    /// `max_age_secs` ago. A live session ends on its own once its clock runs
    /// out, so anything older was left behind by a process that exited.
    /// Returns how many sessions were closed.
    pub async fn abandon_stale(
        &self,
        user: &UserId,
        max_age_secs: u64,
        policy: AbandonPolicy,
    ) -> Result<usize, StoreError> {
        let user = user.clone();
        self.run(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let cutoff = Utc::now() - chrono::Duration::seconds(max_age_secs.min(u32::MAX as u64) as i64);

            let stale: Vec<String> = {
                let mut stmt =
                    tx.prepare("SELECT session_id, started_at FROM sessions WHERE user_id = ?1 AND status = ?2")?;
                let rows = stmt.query_map(params![user.as_str(), SessionStatus::Active.as_str()], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                })?;
                let mut stale = Vec::new();
                for row in rows {
                    let (session, started_at) = row?;
                    let started = DateTime::parse_from_rfc3339(&started_at).map(|t| t.with_timezone(&Utc));
                    if started.map_or(true, |t| t <= cutoff) {
                        stale.push(session);
                    }
                }
                stale
            };

            let refund = policy == AbandonPolicy::Refund;
            let now = Utc::now().to_rfc3339();
            for session in &stale {
                tx.execute(
                    r#"
                    UPDATE sessions
                    SET status = ?2, ended_at = ?3, end_reason = ?4, credit_refunded = ?5
                    WHERE session_id = ?1
                    "#,
                    params![
                        session,
                        SessionStatus::Abandoned.as_str(),
                        now,
                        EndReason::Abandoned.as_str(),
                        refund,
                    ],
                )?;
                if refund {
                    let changed = tx.execute(
                        "UPDATE debits SET refunded = 1 WHERE session_id = ?1 AND refunded = 0",
                        [session],
                    )?;
                    if changed > 0 {
                        tx.execute(
                            "UPDATE accounts SET remaining = remaining + 1 WHERE user_id = ?1",
                            [user.as_str()],
                        )?;
                    }
                }
                warn!(%user, %session, refunded = refund, "closed a stale session");
            }
            tx.commit()?;
            Ok(stale.len())
        })
        .await
    }

    fn init(conn: &Connection) -> rusqlite::Result<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS accounts (
                user_id TEXT PRIMARY KEY,
                remaining INTEGER NOT NULL CHECK (remaining >= 0),
                total_purchased INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS debits (
                session_id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                remaining_after INTEGER NOT NULL,
                refunded BOOLEAN NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS sessions (
                session_id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                started_at TEXT NOT NULL,
                status TEXT NOT NULL,
                ended_at TEXT,
                end_reason TEXT,
                questions_total INTEGER NOT NULL DEFAULT 0,
                elapsed_secs INTEGER NOT NULL DEFAULT 0,
                credit_refunded BOOLEAN NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS answers (
                session_id TEXT NOT NULL,
                question_index INTEGER NOT NULL,
                transcript TEXT NOT NULL,
                code_buffer TEXT,
                recorded_duration_secs INTEGER NOT NULL,
                PRIMARY KEY (session_id, question_index)
            );

            CREATE INDEX IF NOT EXISTS idx_sessions_user ON sessions(user_id);
            "#,
        )
    }

    /// Runs blocking SQLite work off the async executor.
    async fn run<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut Connection) -> Result<T, E> + Send + 'static,
        T: Send + 'static,
        E: From<tokio::task::JoinError> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock();
            f(&mut conn)
        })
        .await?
    }

    fn write_record(
        tx: &rusqlite::Transaction<'_>,
        record: &CompletionRecord,
        status: SessionStatus,
        credit_refunded: bool,
    ) -> rusqlite::Result<()> {
        tx.execute(
            r#"
            INSERT INTO sessions
            (session_id, user_id, started_at, status, ended_at, end_reason,
             questions_total, elapsed_secs, credit_refunded)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ON CONFLICT(session_id) DO UPDATE SET
                status = excluded.status,
                ended_at = excluded.ended_at,
                end_reason = excluded.end_reason,
                questions_total = excluded.questions_total,
                elapsed_secs = excluded.elapsed_secs,
                credit_refunded = excluded.credit_refunded
            "#,
            params![
                record.session_id.to_string(),
                record.user_id.as_str(),
                record.started_at.to_rfc3339(),
                status.as_str(),
                record.ended_at.to_rfc3339(),
                record.end_reason.as_str(),
                record.questions_total as i64,
                record.elapsed_secs as i64,
                credit_refunded,
            ],
        )?;

        for answer in &record.answers {
            tx.execute(
                r#"
                INSERT OR REPLACE INTO answers
                (session_id, question_index, transcript, code_buffer, recorded_duration_secs)
                VALUES (?1, ?2, ?3, ?4, ?5)
                "#,
                params![
                    record.session_id.to_string(),
                    answer.question_index as i64,
                    answer.transcript,
                    answer.code_buffer,
                    answer.recorded_duration_secs as i64,
                ],
            )?;
        }
        Ok(())
    }
}

fn read_balance(conn: &Connection, user: &str) -> rusqlite::Result<Option<(u32, u32)>> {
    conn.query_row(
        "SELECT remaining, total_purchased FROM accounts WHERE user_id = ?1",
        [user],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )
    .optional()
}

#[async_trait]
impl BalanceLedger for SqliteStore {
    async fn balance(&self, user: &UserId) -> Result<UserBalance, LedgerError> {
        let user = user.clone();
        self.run(move |conn| {
            Ok(match read_balance(conn, user.as_str())? {
                Some((remaining, total_purchased)) => UserBalance {
                    user_id: user,
                    remaining,
                    total_purchased,
                },
                None => UserBalance::empty(user),
            })
        })
        .await
    }

    async fn debit(&self, user: &UserId, session: &SessionId) -> Result<u32, LedgerError> {
        let user = user.clone();
        let session = session.to_string();
        self.run(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            let previous: Option<u32> = tx
                .query_row(
                    "SELECT remaining_after FROM debits WHERE session_id = ?1",
                    [&session],
                    |row| row.get(0),
                )
                .optional()?;
            if let Some(remaining_after) = previous {
                debug!(%user, %session, "repeated debit, returning recorded balance");
                return Ok(remaining_after);
            }

            let changed = tx.execute(
                "UPDATE accounts SET remaining = remaining - 1 WHERE user_id = ?1 AND remaining > 0",
                [user.as_str()],
            )?;
            if changed == 0 {
                return Err(LedgerError::InsufficientBalance);
            }
            // Another process may hold a live session on the same database.
            // Returning early drops the transaction and rolls back the decrement.
            let live: Option<String> = tx
                .query_row(
                    "SELECT session_id FROM sessions WHERE user_id = ?1 AND status = ?2 LIMIT 1",
                    params![user.as_str(), SessionStatus::Active.as_str()],
                    |row| row.get(0),
                )
                .optional()?;
            if let Some(live) = live {
                info!(%user, %session, %live, "debit refused, a session is already live");
                return Err(LedgerError::SessionAlreadyActive);
            }
            let remaining: u32 = tx.query_row(
                "SELECT remaining FROM accounts WHERE user_id = ?1",
                [user.as_str()],
                |row| row.get(0),
            )?;

            let now = Utc::now().to_rfc3339();
            tx.execute(
                "INSERT INTO debits (session_id, user_id, remaining_after, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![session, user.as_str(), remaining, now],
            )?;
            tx.execute(
                "INSERT INTO sessions (session_id, user_id, started_at, status) VALUES (?1, ?2, ?3, ?4)",
                params![session, user.as_str(), now, SessionStatus::Active.as_str()],
            )?;
            tx.commit()?;

            info!(%user, %session, remaining, "debited prep");
            Ok(remaining)
        })
        .await
    }

    async fn refund(&self, user: &UserId, session: &SessionId) -> Result<u32, LedgerError> {
        let user = user.clone();
        let session = session.to_string();
        self.run(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let changed = tx.execute(
                "UPDATE debits SET refunded = 1 WHERE session_id = ?1 AND user_id = ?2 AND refunded = 0",
                params![session, user.as_str()],
            )?;
            if changed > 0 {
                tx.execute(
                    "UPDATE accounts SET remaining = remaining + 1 WHERE user_id = ?1",
                    [user.as_str()],
                )?;
                // a session that never went past the debit leaves no history
                tx.execute(
                    "DELETE FROM sessions WHERE session_id = ?1 AND status = ?2",
                    params![session, SessionStatus::Active.as_str()],
                )?;
            }
            let remaining = read_balance(&tx, user.as_str())?.map_or(0, |(r, _)| r);
            tx.commit()?;
            if changed > 0 {
                info!(%user, %session, remaining, "refunded prep");
            }
            Ok(remaining)
        })
        .await
    }

    async fn grant(&self, user: &UserId, preps: u32) -> Result<UserBalance, LedgerError> {
        let user = user.clone();
        self.run(move |conn| {
            conn.execute(
                r#"
                INSERT INTO accounts (user_id, remaining, total_purchased) VALUES (?1, ?2, ?2)
                ON CONFLICT(user_id) DO UPDATE SET
                    remaining = remaining + excluded.remaining,
                    total_purchased = total_purchased + excluded.total_purchased
                "#,
                params![user.as_str(), preps],
            )?;
            let (remaining, total_purchased) = read_balance(conn, user.as_str())?.unwrap_or((0, 0));
            Ok(UserBalance {
                user_id: user,
                remaining,
                total_purchased,
            })
        })
        .await
    }
}

#[async_trait]
impl SessionStore for SqliteStore {
    async fn persist_completion(&self, record: &CompletionRecord) -> Result<(), StoreError> {
        let record = record.clone();
        self.run(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let status: Option<String> = tx
                .query_row(
                    "SELECT status FROM sessions WHERE session_id = ?1",
                    [record.session_id.to_string()],
                    |row| row.get(0),
                )
                .optional()?;
            if status.as_deref() == Some(SessionStatus::Ended.as_str()) {
                debug!(session = %record.session_id, "completion already recorded");
                return Ok(());
            }
            Self::write_record(&tx, &record, SessionStatus::Ended, false)?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn mark_abandoned(
        &self,
        record: &CompletionRecord,
        credit_refunded: bool,
    ) -> Result<(), StoreError> {
        let record = record.clone();
        self.run(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            Self::write_record(&tx, &record, SessionStatus::Abandoned, credit_refunded)?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn sessions_for(&self, user: &UserId) -> Result<Vec<SessionSummary>, StoreError> {
        let user = user.clone();
        self.run(move |conn| {
            let mut stmt = conn.prepare(
                r#"
                SELECT s.session_id, s.started_at, s.status, s.end_reason,
                       (SELECT COUNT(*) FROM answers a WHERE a.session_id = s.session_id),
                       s.questions_total, s.elapsed_secs, s.credit_refunded
                FROM sessions s
                WHERE s.user_id = ?1
                ORDER BY s.started_at DESC
                "#,
            )?;

            let rows = stmt.query_map([user.as_str()], |row| {
                let started_at: String = row.get(1)?;
                let started_at = DateTime::parse_from_rfc3339(&started_at)
                    .map_err(|_| {
                        rusqlite::Error::InvalidColumnType(
                            1,
                            "started_at".to_string(),
                            rusqlite::types::Type::Text,
                        )
                    })?
                    .with_timezone(&Utc);
                let status: String = row.get(2)?;
                let end_reason: Option<String> = row.get(3)?;

                Ok(SessionSummary {
                    session_id: row.get(0)?,
                    started_at,
                    status: SessionStatus::parse(&status).unwrap_or(SessionStatus::Pending),
                    end_reason: end_reason.as_deref().and_then(EndReason::parse),
                    questions_answered: row.get::<_, i64>(4)? as usize,
                    questions_total: row.get::<_, i64>(5)? as usize,
                    elapsed_secs: row.get::<_, i64>(6)? as u64,
                    credit_refunded: row.get(7)?,
                })
            })?;

            let mut summaries = Vec::new();
            for summary in rows {
                summaries.push(summary?);
            }
            Ok(summaries)
        })
        .await
    }
}

#[derive(Debug, Clone)]
struct StoredSession {
    record: CompletionRecord,
    status: SessionStatus,
    credit_refunded: bool,
}

/// In-process store. Counts every delivery, duplicates included.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    sessions: Mutex<HashMap<SessionId, StoredSession>>,
    deliveries: AtomicUsize,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn deliveries(&self) -> usize {
        self.deliveries.load(Ordering::SeqCst)
    }

    pub fn completed(&self) -> Vec<CompletionRecord> {
        self.sessions
            .lock()
            .values()
            .filter(|s| s.status == SessionStatus::Ended)
            .map(|s| s.record.clone())
            .collect()
    }

    pub fn status_of(&self, session: &SessionId) -> Option<SessionStatus> {
        self.sessions.lock().get(session).map(|s| s.status)
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn persist_completion(&self, record: &CompletionRecord) -> Result<(), StoreError> {
        self.deliveries.fetch_add(1, Ordering::SeqCst);
        self.sessions
            .lock()
            .entry(record.session_id)
            .or_insert_with(|| StoredSession {
                record: record.clone(),
                status: SessionStatus::Ended,
                credit_refunded: false,
            });
        Ok(())
    }

    async fn mark_abandoned(
        &self,
        record: &CompletionRecord,
        credit_refunded: bool,
    ) -> Result<(), StoreError> {
        self.deliveries.fetch_add(1, Ordering::SeqCst);
        self.sessions.lock().insert(
            record.session_id,
            StoredSession {
                record: record.clone(),
                status: SessionStatus::Abandoned,
                credit_refunded,
            },
        );
        Ok(())
    }

    async fn sessions_for(&self, user: &UserId) -> Result<Vec<SessionSummary>, StoreError> {
        let mut rows: Vec<SessionSummary> = self
            .sessions
            .lock()
            .values()
            .filter(|s| &s.record.user_id == user)
            .map(|s| SessionSummary {
                session_id: s.record.session_id.to_string(),
                started_at: s.record.started_at,
                status: s.status,
                end_reason: Some(s.record.end_reason),
                questions_answered: s.record.answers.len(),
                questions_total: s.record.questions_total,
                elapsed_secs: s.record.elapsed_secs,
                credit_refunded: s.credit_refunded,
            })
            .collect();
        rows.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(rows)
    }
}
