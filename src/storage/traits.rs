//! Local store contract.
//!
//! The local store is the source of truth on the device: every mutation lands
//! here before any remote call, together with its queue entry when offline.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::event::{Event, SyncStatus};
use crate::queue::{OpKind, QueueEntry};

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Item not found")]
    NotFound,
    #[error("Storage backend error: {0}")]
    Backend(String),
    #[error("Malformed local state for '{id}': {reason}")]
    Malformed { id: String, reason: String },
}

/// A username/password pair.
///
/// The password is an opaque shared secret compared as-is. It is not hashed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserCredential {
    pub username: String,
    pub password: String,
}

impl UserCredential {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self { username: username.into(), password: password.into() }
    }
}

/// Device-local durable store: events, credentials and the pending-operation queue.
///
/// Implementations must make `put_event`, `enqueue`, `remove_ops` and
/// `clear_queue` atomic with respect to each other.
#[async_trait]
pub trait LocalStore: Send + Sync {
    /// Upsert by id and return the stored copy.
    ///
    /// With [`SyncStatus::Pending`] the stored `updated_at` is stamped to now;
    /// with [`SyncStatus::Synced`] the caller's timestamp (the remote one) is kept.
    async fn put_event(&self, event: &Event, status: SyncStatus) -> Result<Event, StorageError>;

    async fn get_event(&self, id: &str) -> Result<Option<Event>, StorageError>;

    /// Events owned by `owner` plus every orphan. Unordered.
    async fn list_events(&self, owner: &str) -> Result<Vec<Event>, StorageError>;

    /// Remove by id. Absent ids are not an error.
    async fn delete_event(&self, id: &str) -> Result<(), StorageError>;

    /// Append an operation and return its sequence number.
    async fn enqueue(&self, kind: OpKind, event_id: &str, payload: Option<Value>) -> Result<i64, StorageError>;

    /// Persist an event and queue an operation for it as one unit.
    /// Default implementation runs the two writes back to back.
    async fn put_event_and_enqueue(
        &self,
        event: &Event,
        kind: OpKind,
        payload: Option<Value>,
    ) -> Result<(Event, i64), StorageError> {
        let stored = self.put_event(event, SyncStatus::Pending).await?;
        let seq = self.enqueue(kind, &event.id, payload).await?;
        Ok((stored, seq))
    }

    /// All queued operations in enqueue order. Does not remove them.
    async fn drain_queue(&self) -> Result<Vec<QueueEntry>, StorageError>;

    async fn queue_len(&self) -> Result<usize, StorageError>;

    /// Acknowledge specific operations by sequence number.
    async fn remove_ops(&self, seqs: &[i64]) -> Result<(), StorageError>;

    /// Empty the queue unconditionally.
    async fn clear_queue(&self) -> Result<(), StorageError>;

    async fn get_credential(&self, username: &str) -> Result<Option<UserCredential>, StorageError>;

    async fn put_credential(&self, credential: &UserCredential) -> Result<(), StorageError>;
}

/// Stamp a copy of `event` for storage under `status`.
pub(crate) fn stamped(event: &Event, status: SyncStatus, now: DateTime<Utc>) -> Event {
    let mut stored = event.clone();
    if status == SyncStatus::Pending {
        stored.updated_at = now;
    }
    stored.sync_status = status;
    stored
}
