//! SQLite persistence for temporary rules and audit history
//!
//! [`Store`] wraps a cloneable [`SqlitePool`]; construct it once and hand
//! clones to the service and the scheduler. Both tables are created on open
//! if missing.
//!
//! Timestamps are stored as Unix milliseconds so that due-rule scans compare
//! integers rather than formatted text.

use crate::audit::{ActionKind, HistoryRecord};
use crate::core::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use tracing::debug;
use uuid::Uuid;

const SCHEMA: [&str; 4] = [
    "CREATE TABLE IF NOT EXISTS temp_rules (
        id            TEXT PRIMARY KEY,
        table_name    TEXT NOT NULL,
        chain         TEXT NOT NULL,
        rule_spec     TEXT NOT NULL,
        expires_at_ms INTEGER NOT NULL,
        created_at_ms INTEGER NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_temp_rules_expires ON temp_rules (expires_at_ms)",
    "CREATE TABLE IF NOT EXISTS history (
        id            INTEGER PRIMARY KEY AUTOINCREMENT,
        action        TEXT NOT NULL,
        table_name    TEXT NOT NULL,
        chain         TEXT NOT NULL,
        rule_details  TEXT NOT NULL,
        actor         TEXT NOT NULL,
        ip_address    TEXT NOT NULL,
        success       INTEGER NOT NULL,
        error_msg     TEXT,
        created_at_ms INTEGER NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_history_created ON history (created_at_ms)",
];

/// A rule registered for automatic deletion
///
/// Holds the canonical spec, never a line number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TemporaryRule {
    pub id: Uuid,
    pub table: String,
    pub chain: String,
    pub rule_spec: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl TemporaryRule {
    /// New tracking row expiring `ttl_seconds` from now
    pub fn new(
        table: impl Into<String>,
        chain: impl Into<String>,
        rule_spec: impl Into<String>,
        ttl_seconds: u64,
    ) -> Self {
        let created_at = Utc::now();
        let expires_at = i64::try_from(ttl_seconds)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .and_then(|ttl| created_at.checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        Self {
            id: Uuid::new_v4(),
            table: table.into(),
            chain: chain.into(),
            rule_spec: rule_spec.into(),
            expires_at,
            created_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct TempRuleRow {
    id: String,
    table_name: String,
    chain: String,
    rule_spec: String,
    expires_at_ms: i64,
    created_at_ms: i64,
}

#[derive(sqlx::FromRow)]
struct HistoryRow {
    id: i64,
    action: String,
    table_name: String,
    chain: String,
    rule_details: String,
    actor: String,
    ip_address: String,
    success: bool,
    error_msg: Option<String>,
    created_at_ms: i64,
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| Error::Internal(format!("Timestamp out of range: {ms}")))
}

impl TryFrom<TempRuleRow> for TemporaryRule {
    type Error = Error;

    fn try_from(row: TempRuleRow) -> Result<Self> {
        Ok(Self {
            id: Uuid::parse_str(&row.id)
                .map_err(|e| Error::Internal(format!("Corrupt temp rule id {}: {e}", row.id)))?,
            table: row.table_name,
            chain: row.chain,
            rule_spec: row.rule_spec,
            expires_at: from_millis(row.expires_at_ms)?,
            created_at: from_millis(row.created_at_ms)?,
        })
    }
}

impl TryFrom<HistoryRow> for HistoryRecord {
    type Error = Error;

    fn try_from(row: HistoryRow) -> Result<Self> {
        Ok(Self {
            id: row.id,
            action: ActionKind::from_str(&row.action)
                .map_err(|_| Error::Internal(format!("Unknown history action: {}", row.action)))?,
            table: row.table_name,
            chain: row.chain,
            rule_details: row.rule_details,
            actor: row.actor,
            ip_address: row.ip_address,
            success: row.success,
            error_msg: row.error_msg,
            created_at: from_millis(row.created_at_ms)?,
        })
    }
}

/// Handle to the iptkeeper database
#[derive(Debug, Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Opens (creating if needed) the database file at `path`
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        debug!("Opened database at {}", path.display());
        Self::with_pool(pool).await
    }

    /// Opens a private in-memory database
    ///
    /// The pool is pinned to one connection that never expires, since every
    /// new in-memory connection would start with an empty database.
    pub async fn open_in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        Self::with_pool(pool).await
    }

    async fn with_pool(pool: SqlitePool) -> Result<Self> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&pool).await?;
        }
        Ok(Self { pool })
    }

    // ── Temporary rules ──────────────────────────────────────────────

    pub async fn insert_temp_rule(&self, rule: &TemporaryRule) -> Result<()> {
        sqlx::query(
            "INSERT INTO temp_rules (id, table_name, chain, rule_spec, expires_at_ms, created_at_ms)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(rule.id.to_string())
        .bind(&rule.table)
        .bind(&rule.chain)
        .bind(&rule.rule_spec)
        .bind(rule.expires_at.timestamp_millis())
        .bind(rule.created_at.timestamp_millis())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Rows whose expiry is at or before `now`, soonest first
    pub async fn due_temp_rules(&self, now: DateTime<Utc>) -> Result<Vec<TemporaryRule>> {
        sqlx::query_as::<_, TempRuleRow>(
            "SELECT id, table_name, chain, rule_spec, expires_at_ms, created_at_ms
             FROM temp_rules
             WHERE expires_at_ms <= ?
             ORDER BY expires_at_ms, created_at_ms, rowid",
        )
        .bind(now.timestamp_millis())
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(TemporaryRule::try_from)
        .collect()
    }

    /// Removes a tracking row. Returns `false` if it was already gone.
    pub async fn delete_temp_rule(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM temp_rules WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn list_temp_rules(&self) -> Result<Vec<TemporaryRule>> {
        sqlx::query_as::<_, TempRuleRow>(
            "SELECT id, table_name, chain, rule_spec, expires_at_ms, created_at_ms
             FROM temp_rules
             ORDER BY expires_at_ms, created_at_ms, rowid",
        )
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(TemporaryRule::try_from)
        .collect()
    }

    // ── History ──────────────────────────────────────────────────────

    /// Appends a record and returns its id
    pub async fn append_history(&self, record: &HistoryRecord) -> Result<i64> {
        let result = sqlx::query(
            "INSERT INTO history
                 (action, table_name, chain, rule_details, actor, ip_address, success, error_msg, created_at_ms)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(record.action.as_ref())
        .bind(&record.table)
        .bind(&record.chain)
        .bind(&record.rule_details)
        .bind(&record.actor)
        .bind(&record.ip_address)
        .bind(record.success)
        .bind(&record.error_msg)
        .bind(record.created_at.timestamp_millis())
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    /// Newest-first page of history
    pub async fn history_page(&self, limit: u32, offset: u32) -> Result<Vec<HistoryRecord>> {
        sqlx::query_as::<_, HistoryRow>(
            "SELECT id, action, table_name, chain, rule_details, actor, ip_address, success, error_msg, created_at_ms
             FROM history
             ORDER BY created_at_ms DESC, id DESC
             LIMIT ? OFFSET ?",
        )
        .bind(i64::from(limit))
        .bind(i64::from(offset))
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(HistoryRecord::try_from)
        .collect()
    }

    pub async fn history_entry(&self, id: i64) -> Result<Option<HistoryRecord>> {
        sqlx::query_as::<_, HistoryRow>(
            "SELECT id, action, table_name, chain, rule_details, actor, ip_address, success, error_msg, created_at_ms
             FROM history
             WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .map(HistoryRecord::try_from)
        .transpose()
    }

    pub async fn history_count(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM history")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Closes the pool, waiting for checked-out connections
    pub async fn close(&self) {
        self.pool.close().await;
    }
}
