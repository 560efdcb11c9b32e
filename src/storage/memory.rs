//! In-memory local store.
//!
//! Keeps events, credentials and the pending queue in process memory. Used by
//! tests and as a throwaway store when no database file is wanted.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::Value;

use super::traits::{stamped, LocalStore, StorageError, UserCredential};
use crate::event::{Event, SyncStatus};
use crate::queue::{OpKind, PendingOperation, QueueEntry};

#[derive(Default)]
struct Queue {
    next_seq: i64,
    entries: Vec<QueueEntry>,
}

impl Queue {
    fn push(&mut self, kind: OpKind, event_id: &str, payload: Option<Value>) -> i64 {
        self.next_seq += 1;
        let seq = self.next_seq;
        self.entries.push(QueueEntry::Valid(PendingOperation {
            seq,
            kind,
            event_id: event_id.to_string(),
            payload,
            enqueued_at: Utc::now(),
        }));
        seq
    }
}

/// Ephemeral local store for tests and demos.
pub struct InMemoryLocalStore {
    events: DashMap<String, Event>,
    credentials: DashMap<String, UserCredential>,
    // Event writes that pair with an enqueue also take this lock
    queue: Mutex<Queue>,
}

impl InMemoryLocalStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            events: DashMap::new(),
            credentials: DashMap::new(),
            queue: Mutex::new(Queue::default()),
        }
    }

    /// Number of stored events
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Append an entry that cannot be decoded, as a corrupted row would.
    pub fn push_malformed(&self, reason: impl Into<String>) -> i64 {
        let mut queue = self.queue.lock();
        queue.next_seq += 1;
        let seq = queue.next_seq;
        queue.entries.push(QueueEntry::Malformed { seq, reason: reason.into() });
        seq
    }
}

impl Default for InMemoryLocalStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LocalStore for InMemoryLocalStore {
    async fn put_event(&self, event: &Event, status: SyncStatus) -> Result<Event, StorageError> {
        let stored = stamped(event, status, Utc::now());
        self.events.insert(stored.id.clone(), stored.clone());
        Ok(stored)
    }

    async fn get_event(&self, id: &str) -> Result<Option<Event>, StorageError> {
        Ok(self.events.get(id).map(|r| r.value().clone()))
    }

    async fn list_events(&self, owner: &str) -> Result<Vec<Event>, StorageError> {
        Ok(self
            .events
            .iter()
            .filter(|r| r.is_orphan() || r.owner.as_deref() == Some(owner))
            .map(|r| r.value().clone())
            .collect())
    }

    async fn delete_event(&self, id: &str) -> Result<(), StorageError> {
        self.events.remove(id);
        Ok(())
    }

    async fn enqueue(&self, kind: OpKind, event_id: &str, payload: Option<Value>) -> Result<i64, StorageError> {
        Ok(self.queue.lock().push(kind, event_id, payload))
    }

    async fn put_event_and_enqueue(
        &self,
        event: &Event,
        kind: OpKind,
        payload: Option<Value>,
    ) -> Result<(Event, i64), StorageError> {
        let stored = stamped(event, SyncStatus::Pending, Utc::now());
        let mut queue = self.queue.lock();
        self.events.insert(stored.id.clone(), stored.clone());
        let seq = queue.push(kind, &stored.id, payload);
        Ok((stored, seq))
    }

    async fn drain_queue(&self) -> Result<Vec<QueueEntry>, StorageError> {
        Ok(self.queue.lock().entries.clone())
    }

    async fn queue_len(&self) -> Result<usize, StorageError> {
        Ok(self.queue.lock().entries.len())
    }

    async fn remove_ops(&self, seqs: &[i64]) -> Result<(), StorageError> {
        self.queue.lock().entries.retain(|e| !seqs.contains(&e.seq()));
        Ok(())
    }

    async fn clear_queue(&self) -> Result<(), StorageError> {
        self.queue.lock().entries.clear();
        Ok(())
    }

    async fn get_credential(&self, username: &str) -> Result<Option<UserCredential>, StorageError> {
        Ok(self.credentials.get(username).map(|r| r.value().clone()))
    }

    async fn put_credential(&self, credential: &UserCredential) -> Result<(), StorageError> {
        self.credentials.insert(credential.username.clone(), credential.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{EventDraft, EventType};
    use chrono::NaiveDate;

    fn event(owner: Option<&str>) -> Event {
        let draft = EventDraft::new("Partit", EventType::Match, NaiveDate::from_ymd_opt(2025, 2, 2).unwrap());
        let mut e = Event::from_draft(draft, "tmp", Utc::now()).unwrap();
        e.owner = owner.map(String::from);
        e
    }

    #[tokio::test]
    async fn test_new_store_is_empty() {
        let store = InMemoryLocalStore::new();
        assert!(store.is_empty());
        assert_eq!(store.queue_len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_list_filters_by_owner_and_orphans() {
        let store = InMemoryLocalStore::new();
        store.put_event(&event(Some("anna")), SyncStatus::Pending).await.unwrap();
        store.put_event(&event(Some("pau")), SyncStatus::Pending).await.unwrap();
        store.put_event(&event(None), SyncStatus::Pending).await.unwrap();

        assert_eq!(store.len(), 3);
        assert_eq!(store.list_events("anna").await.unwrap().len(), 2);
        assert_eq!(store.list_events("nobody").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_queue_sequence_and_selective_removal() {
        let store = InMemoryLocalStore::new();
        let a = store.enqueue(OpKind::Create, "a", None).await.unwrap();
        let bad = store.push_malformed("truncated");
        let c = store.enqueue(OpKind::Delete, "c", None).await.unwrap();
        assert!(a < bad && bad < c);

        store.remove_ops(&[a, bad]).await.unwrap();
        let left = store.drain_queue().await.unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].seq(), c);
    }

    #[tokio::test]
    async fn test_put_and_enqueue_marks_pending() {
        let store = InMemoryLocalStore::new();
        let e = event(Some("anna"));
        store.put_event(&e, SyncStatus::Synced).await.unwrap();

        let (stored, seq) = store.put_event_and_enqueue(&e, OpKind::Update, None).await.unwrap();
        assert_eq!(stored.sync_status, SyncStatus::Pending);
        assert_eq!(store.drain_queue().await.unwrap()[0].seq(), seq);
    }
}
