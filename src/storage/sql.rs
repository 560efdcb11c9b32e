// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! SQLite-backed local durable store.
//!
//! Three tables, one file:
//! ```sql
//! CREATE TABLE events (
//!   id TEXT PRIMARY KEY,
//!   name TEXT NOT NULL,
//!   type TEXT NOT NULL,          -- Partido | Concierto | Fira
//!   start_date TEXT NOT NULL,    -- YYYY-MM-DD
//!   end_date TEXT NOT NULL,
//!   start_time TEXT,             -- HH:MM, NULL when unset
//!   end_time TEXT,
//!   hours_worked REAL NOT NULL,
//!   payment_expected REAL NOT NULL,
//!   payment_real REAL NOT NULL,
//!   is_paid INTEGER NOT NULL,
//!   username TEXT,               -- NULL or '' for orphans
//!   created_at TEXT NOT NULL,    -- RFC 3339
//!   updated_at TEXT NOT NULL,
//!   sync_status TEXT NOT NULL    -- pending | synced
//! );
//! CREATE TABLE user_profiles (username TEXT PRIMARY KEY, password TEXT NOT NULL);
//! CREATE TABLE sync_queue (
//!   seq INTEGER PRIMARY KEY AUTOINCREMENT,
//!   kind TEXT NOT NULL,
//!   event_id TEXT NOT NULL,
//!   payload TEXT,                -- JSON
//!   enqueued_at TEXT NOT NULL
//! );
//! ```
//!
//! `AUTOINCREMENT` keeps sequence numbers monotonic even after the queue is
//! emptied, so replay order never depends on rowid reuse.
//!
//! ## sqlx Any Driver Quirks
//!
//! Everything is stored as TEXT/REAL/INTEGER and converted in Rust. Rows that
//! no longer parse are skipped with a warning (events) or surfaced as
//! [`QueueEntry::Malformed`] (queue) so one bad row never blocks the rest.

use std::sync::Once;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value;
use sqlx::any::{AnyArguments, AnyPoolOptions, AnyRow};
use sqlx::query::Query;
use sqlx::{Any, AnyPool, Row};
use tracing::warn;

use super::traits::{stamped, LocalStore, StorageError, UserCredential};
use crate::event::{parse_clock_time, Event, EventType, SyncStatus};
use crate::queue::{OpKind, PendingOperation, QueueEntry};
use crate::resilience::retry::{retry, RetryConfig};

// SQLx `Any` driver requires runtime installation
static INSTALL_DRIVERS: Once = Once::new();

fn install_drivers() {
    INSTALL_DRIVERS.call_once(|| {
        sqlx::any::install_default_drivers();
    });
}

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS events (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        type TEXT NOT NULL,
        start_date TEXT NOT NULL,
        end_date TEXT NOT NULL,
        start_time TEXT,
        end_time TEXT,
        hours_worked REAL NOT NULL DEFAULT 0,
        payment_expected REAL NOT NULL DEFAULT 0,
        payment_real REAL NOT NULL DEFAULT 0,
        is_paid INTEGER NOT NULL DEFAULT 0,
        username TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        sync_status TEXT NOT NULL DEFAULT 'pending'
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_events_username ON events (username)",
    r#"
    CREATE TABLE IF NOT EXISTS user_profiles (
        username TEXT PRIMARY KEY,
        password TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS sync_queue (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        kind TEXT NOT NULL,
        event_id TEXT NOT NULL,
        payload TEXT,
        enqueued_at TEXT NOT NULL
    )
    "#,
];

const UPSERT_EVENT: &str = "INSERT INTO events (id, name, type, start_date, end_date, start_time, end_time, hours_worked, payment_expected, payment_real, is_paid, username, created_at, updated_at, sync_status)
     VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
     ON CONFLICT(id) DO UPDATE SET
        name = excluded.name,
        type = excluded.type,
        start_date = excluded.start_date,
        end_date = excluded.end_date,
        start_time = excluded.start_time,
        end_time = excluded.end_time,
        hours_worked = excluded.hours_worked,
        payment_expected = excluded.payment_expected,
        payment_real = excluded.payment_real,
        is_paid = excluded.is_paid,
        username = excluded.username,
        created_at = excluded.created_at,
        updated_at = excluded.updated_at,
        sync_status = excluded.sync_status";

const INSERT_OP: &str = "INSERT INTO sync_queue (kind, event_id, payload, enqueued_at) VALUES (?, ?, ?, ?) RETURNING seq";

const EVENT_COLUMNS: &str = "id, name, type, start_date, end_date, start_time, end_time, hours_worked, payment_expected, payment_real, is_paid, username, created_at, updated_at, sync_status";

fn backend(e: sqlx::Error) -> StorageError {
    StorageError::Backend(e.to_string())
}

pub struct SqlLocalStore {
    pool: AnyPool,
}

impl SqlLocalStore {
    /// Open (creating if needed) the database file at `path`.
    pub async fn open(path: &str) -> Result<Self, StorageError> {
        Self::new(&format!("sqlite://{}?mode=rwc", path)).await
    }

    /// Connect with startup-mode retry (fails fast if the path is wrong).
    pub async fn new(connection_string: &str) -> Result<Self, StorageError> {
        if !connection_string.starts_with("sqlite:") {
            return Err(StorageError::Backend(format!(
                "Unsupported local store URL '{}': only sqlite is supported",
                connection_string
            )));
        }
        install_drivers();

        let pool = retry("sql_connect", &RetryConfig::startup(), || async {
            AnyPoolOptions::new()
                .max_connections(4)
                .acquire_timeout(Duration::from_secs(10))
                .idle_timeout(Duration::from_secs(300))
                .connect(connection_string)
                .await
                .map_err(backend)
        })
        .await?;

        let store = Self { pool };
        store.enable_wal_mode().await?;
        store.init_schema().await?;
        Ok(store)
    }

    /// Get a clone of the connection pool.
    pub fn pool(&self) -> AnyPool {
        self.pool.clone()
    }

    async fn enable_wal_mode(&self) -> Result<(), StorageError> {
        sqlx::query("PRAGMA journal_mode = WAL")
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(format!("Failed to enable WAL mode: {}", e)))?;

        sqlx::query("PRAGMA synchronous = NORMAL")
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(format!("Failed to set synchronous mode: {}", e)))?;

        Ok(())
    }

    async fn init_schema(&self) -> Result<(), StorageError> {
        for statement in SCHEMA {
            retry("sql_init_schema", &RetryConfig::startup(), || async {
                sqlx::query(statement).execute(&self.pool).await.map_err(backend)
            })
            .await?;
        }
        Ok(())
    }

    fn bind_event<'q>(query: Query<'q, Any, AnyArguments<'q>>, event: &Event) -> Query<'q, Any, AnyArguments<'q>> {
        query
            .bind(event.id.clone())
            .bind(event.name.clone())
            .bind(event.event_type.as_str().to_string())
            .bind(event.start_date.to_string())
            .bind(event.end_date.to_string())
            .bind(event.start_time.map(|t| t.format("%H:%M").to_string()))
            .bind(event.end_time.map(|t| t.format("%H:%M").to_string()))
            .bind(event.hours_worked)
            .bind(event.payment_expected)
            .bind(event.payment_real)
            .bind(i64::from(event.is_paid))
            .bind(event.owner.clone())
            .bind(event.created_at.to_rfc3339())
            .bind(event.updated_at.to_rfc3339())
            .bind(event.sync_status.as_str().to_string())
    }

    fn row_to_event(row: &AnyRow) -> Result<Event, String> {
        let text = |col: &str| row.try_get::<String, _>(col).map_err(|e| format!("{}: {}", col, e));
        let opt_text = |col: &str| row.try_get::<Option<String>, _>(col).map_err(|e| format!("{}: {}", col, e));
        let real = |col: &str| row.try_get::<f64, _>(col).map_err(|e| format!("{}: {}", col, e));
        let date = |col: &str| {
            text(col).and_then(|s| NaiveDate::parse_from_str(&s, "%Y-%m-%d").map_err(|e| format!("{}: {}", col, e)))
        };
        let clock = |col: &str| {
            opt_text(col).and_then(|s| match s.filter(|s| !s.is_empty()) {
                None => Ok(None),
                Some(s) => parse_clock_time(&s).map(Some).ok_or_else(|| format!("{}: invalid time '{}'", col, s)),
            })
        };
        let timestamp = |col: &str| {
            text(col).and_then(|s| {
                DateTime::parse_from_rfc3339(&s)
                    .map(|t| t.with_timezone(&Utc))
                    .map_err(|e| format!("{}: {}", col, e))
            })
        };

        Ok(Event {
            id: text("id")?,
            name: text("name")?,
            event_type: text("type")?.parse::<EventType>().map_err(|e| e.to_string())?,
            start_date: date("start_date")?,
            end_date: date("end_date")?,
            start_time: clock("start_time")?,
            end_time: clock("end_time")?,
            hours_worked: real("hours_worked")?,
            payment_expected: real("payment_expected")?,
            payment_real: real("payment_real")?,
            is_paid: row.try_get::<i64, _>("is_paid").map_err(|e| e.to_string())? != 0,
            owner: opt_text("username")?,
            created_at: timestamp("created_at")?,
            updated_at: timestamp("updated_at")?,
            sync_status: text("sync_status")?.parse::<SyncStatus>().map_err(|e| e.to_string())?,
        })
    }

    fn row_to_entry(row: &AnyRow) -> Result<QueueEntry, StorageError> {
        let seq: i64 = row.try_get("seq").map_err(backend)?;
        let parsed = (|| -> Result<PendingOperation, String> {
            let kind: String = row.try_get("kind").map_err(|e| e.to_string())?;
            let event_id: String = row.try_get("event_id").map_err(|e| e.to_string())?;
            let payload: Option<String> = row.try_get("payload").map_err(|e| e.to_string())?;
            let enqueued_at: String = row.try_get("enqueued_at").map_err(|e| e.to_string())?;
            Ok(PendingOperation {
                seq,
                kind: kind.parse::<OpKind>()?,
                event_id,
                payload: payload
                    .map(|p| serde_json::from_str::<Value>(&p))
                    .transpose()
                    .map_err(|e| format!("payload: {}", e))?,
                enqueued_at: DateTime::parse_from_rfc3339(&enqueued_at)
                    .map(|t| t.with_timezone(&Utc))
                    .map_err(|e| format!("enqueued_at: {}", e))?,
            })
        })();

        Ok(match parsed {
            Ok(op) => QueueEntry::Valid(op),
            Err(reason) => QueueEntry::Malformed { seq, reason },
        })
    }

    fn payload_text(payload: &Option<Value>) -> Option<String> {
        payload.as_ref().map(Value::to_string)
    }
}

#[async_trait]
impl LocalStore for SqlLocalStore {
    async fn put_event(&self, event: &Event, status: SyncStatus) -> Result<Event, StorageError> {
        let stored = stamped(event, status, Utc::now());
        retry("sql_put_event", &RetryConfig::query(), || async {
            Self::bind_event(sqlx::query(UPSERT_EVENT), &stored)
                .execute(&self.pool)
                .await
                .map_err(backend)?;
            Ok(())
        })
        .await?;
        Ok(stored)
    }

    async fn get_event(&self, id: &str) -> Result<Option<Event>, StorageError> {
        let sql = format!("SELECT {} FROM events WHERE id = ?", EVENT_COLUMNS);
        let row = retry("sql_get_event", &RetryConfig::query(), || async {
            sqlx::query(&sql).bind(id.to_string()).fetch_optional(&self.pool).await.map_err(backend)
        })
        .await?;

        match row {
            Some(row) => Self::row_to_event(&row)
                .map(Some)
                .map_err(|reason| StorageError::Malformed { id: id.to_string(), reason }),
            None => Ok(None),
        }
    }

    async fn list_events(&self, owner: &str) -> Result<Vec<Event>, StorageError> {
        let sql = format!(
            "SELECT {} FROM events WHERE username = ? OR username IS NULL OR username = ''",
            EVENT_COLUMNS
        );
        let rows = retry("sql_list_events", &RetryConfig::query(), || async {
            sqlx::query(&sql).bind(owner.to_string()).fetch_all(&self.pool).await.map_err(backend)
        })
        .await?;

        let mut events = Vec::with_capacity(rows.len());
        for row in &rows {
            match Self::row_to_event(row) {
                Ok(event) => events.push(event),
                Err(reason) => {
                    let id: String = row.try_get("id").unwrap_or_default();
                    warn!(id = %id, reason = %reason, "Skipping malformed local event row");
                }
            }
        }
        Ok(events)
    }

    async fn delete_event(&self, id: &str) -> Result<(), StorageError> {
        retry("sql_delete_event", &RetryConfig::query(), || async {
            sqlx::query("DELETE FROM events WHERE id = ?")
                .bind(id.to_string())
                .execute(&self.pool)
                .await
                .map_err(backend)?;
            Ok(())
        })
        .await
    }

    async fn enqueue(&self, kind: OpKind, event_id: &str, payload: Option<Value>) -> Result<i64, StorageError> {
        let payload = Self::payload_text(&payload);
        let enqueued_at = Utc::now().to_rfc3339();
        retry("sql_enqueue", &RetryConfig::query(), || async {
            let row = sqlx::query(INSERT_OP)
                .bind(kind.as_str().to_string())
                .bind(event_id.to_string())
                .bind(payload.clone())
                .bind(enqueued_at.clone())
                .fetch_one(&self.pool)
                .await
                .map_err(backend)?;
            row.try_get::<i64, _>("seq").map_err(backend)
        })
        .await
    }

    /// Event upsert and queue append in a single transaction.
    async fn put_event_and_enqueue(
        &self,
        event: &Event,
        kind: OpKind,
        payload: Option<Value>,
    ) -> Result<(Event, i64), StorageError> {
        let stored = stamped(event, SyncStatus::Pending, Utc::now());
        let payload = Self::payload_text(&payload);
        let enqueued_at = stored.updated_at.to_rfc3339();

        let seq = retry("sql_put_and_enqueue", &RetryConfig::query(), || async {
            let mut tx = self.pool.begin().await.map_err(backend)?;
            Self::bind_event(sqlx::query(UPSERT_EVENT), &stored)
                .execute(&mut *tx)
                .await
                .map_err(backend)?;
            let row = sqlx::query(INSERT_OP)
                .bind(kind.as_str().to_string())
                .bind(stored.id.clone())
                .bind(payload.clone())
                .bind(enqueued_at.clone())
                .fetch_one(&mut *tx)
                .await
                .map_err(backend)?;
            let seq: i64 = row.try_get("seq").map_err(backend)?;
            tx.commit().await.map_err(backend)?;
            Ok(seq)
        })
        .await?;

        Ok((stored, seq))
    }

    async fn drain_queue(&self) -> Result<Vec<QueueEntry>, StorageError> {
        let rows = retry("sql_drain_queue", &RetryConfig::query(), || async {
            sqlx::query("SELECT seq, kind, event_id, payload, enqueued_at FROM sync_queue ORDER BY seq")
                .fetch_all(&self.pool)
                .await
                .map_err(backend)
        })
        .await?;

        rows.iter().map(Self::row_to_entry).collect()
    }

    async fn queue_len(&self) -> Result<usize, StorageError> {
        let row = retry("sql_queue_len", &RetryConfig::query(), || async {
            sqlx::query("SELECT COUNT(*) as cnt FROM sync_queue")
                .fetch_one(&self.pool)
                .await
                .map_err(backend)
        })
        .await?;
        let count: i64 = row.try_get("cnt").map_err(backend)?;
        Ok(count as usize)
    }

    async fn remove_ops(&self, seqs: &[i64]) -> Result<(), StorageError> {
        if seqs.is_empty() {
            return Ok(());
        }
        // Stay well under SQLite's bound-parameter limit
        const CHUNK_SIZE: usize = 500;

        retry("sql_remove_ops", &RetryConfig::query(), || async {
            let mut tx = self.pool.begin().await.map_err(backend)?;
            for chunk in seqs.chunks(CHUNK_SIZE) {
                let placeholders = vec!["?"; chunk.len()].join(", ");
                let sql = format!("DELETE FROM sync_queue WHERE seq IN ({})", placeholders);
                let mut query = sqlx::query(&sql);
                for seq in chunk {
                    query = query.bind(*seq);
                }
                query.execute(&mut *tx).await.map_err(backend)?;
            }
            tx.commit().await.map_err(backend)
        })
        .await
    }

    async fn clear_queue(&self) -> Result<(), StorageError> {
        retry("sql_clear_queue", &RetryConfig::query(), || async {
            sqlx::query("DELETE FROM sync_queue").execute(&self.pool).await.map_err(backend)?;
            Ok(())
        })
        .await
    }

    async fn get_credential(&self, username: &str) -> Result<Option<UserCredential>, StorageError> {
        let row = retry("sql_get_credential", &RetryConfig::query(), || async {
            sqlx::query("SELECT username, password FROM user_profiles WHERE username = ?")
                .bind(username.to_string())
                .fetch_optional(&self.pool)
                .await
                .map_err(backend)
        })
        .await?;

        match row {
            Some(row) => Ok(Some(UserCredential {
                username: row.try_get("username").map_err(backend)?,
                password: row.try_get("password").map_err(backend)?,
            })),
            None => Ok(None),
        }
    }

    async fn put_credential(&self, credential: &UserCredential) -> Result<(), StorageError> {
        retry("sql_put_credential", &RetryConfig::query(), || async {
            sqlx::query(
                "INSERT INTO user_profiles (username, password) VALUES (?, ?)
                 ON CONFLICT(username) DO UPDATE SET password = excluded.password",
            )
            .bind(credential.username.clone())
            .bind(credential.password.clone())
            .execute(&self.pool)
            .await
            .map_err(backend)?;
            Ok(())
        })
        .await
    }
}
