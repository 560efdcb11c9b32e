//! In-process remote store.
//!
//! Mirrors the hosted tables closely enough for engine tests and the demo.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;

use super::traits::{CredentialCheck, RemoteError, RemoteStore, UNIQUE_VIOLATION};
use crate::event::{sort_by_start_date, Event, EventChanges, SyncStatus};

/// In-process stand-in for the hosted backend.
///
/// Behaves like the real tables (unique ids and usernames, 23505 on
/// duplicates) and can be switched unreachable to simulate an outage.
pub struct InMemoryRemoteStore {
    events: DashMap<String, Event>,
    credentials: DashMap<String, String>,
    reachable: AtomicBool,
    calls: AtomicU64,
}

impl InMemoryRemoteStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            events: DashMap::new(),
            credentials: DashMap::new(),
            reachable: AtomicBool::new(true),
            calls: AtomicU64::new(0),
        }
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_reachable(&self) -> bool {
        self.reachable.load(Ordering::SeqCst)
    }

    /// Remote calls attempted, probes excluded
    #[must_use]
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<Event> {
        self.events.get(id).map(|r| r.value().clone())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Seed a record directly, as if written by another device.
    pub fn insert(&self, event: Event) {
        self.events.insert(event.id.clone(), Self::as_stored(event));
    }

    pub fn insert_credential(&self, username: &str, password: &str) {
        self.credentials.insert(username.to_string(), password.to_string());
    }

    fn enter(&self) -> Result<(), RemoteError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.is_reachable() {
            Ok(())
        } else {
            Err(RemoteError::Unreachable("connection refused".to_string()))
        }
    }

    // Remote rows carry no local sync state
    fn as_stored(mut event: Event) -> Event {
        event.sync_status = SyncStatus::default();
        event
    }

    fn duplicate(what: &str) -> RemoteError {
        RemoteError::Rejected {
            code: UNIQUE_VIOLATION.to_string(),
            message: format!("duplicate key value violates unique constraint \"{}\"", what),
        }
    }
}

impl Default for InMemoryRemoteStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteStore for InMemoryRemoteStore {
    async fn verify_credential(&self, username: &str, password: &str) -> Result<CredentialCheck, RemoteError> {
        self.enter()?;
        Ok(match self.credentials.get(username) {
            None => CredentialCheck::NotFound,
            Some(stored) if stored.value() == password => CredentialCheck::Valid,
            Some(_) => CredentialCheck::Invalid,
        })
    }

    async fn create_credential(&self, username: &str, password: &str) -> Result<(), RemoteError> {
        self.enter()?;
        match self.credentials.entry(username.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(Self::duplicate("user_profiles_username_key")),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(password.to_string());
                Ok(())
            }
        }
    }

    async fn list_events_by_owner(&self, owner: &str) -> Result<Vec<Event>, RemoteError> {
        self.enter()?;
        let mut events: Vec<Event> = self
            .events
            .iter()
            .filter(|r| r.owner.as_deref() == Some(owner))
            .map(|r| r.value().clone())
            .collect();
        sort_by_start_date(&mut events);
        Ok(events)
    }

    async fn get_event(&self, id: &str) -> Result<Option<Event>, RemoteError> {
        self.enter()?;
        Ok(self.get(id))
    }

    async fn create_event(&self, event: &Event) -> Result<Event, RemoteError> {
        self.enter()?;
        match self.events.entry(event.id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(Self::duplicate("events_pkey")),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                let stored = Self::as_stored(event.clone());
                slot.insert(stored.clone());
                Ok(stored)
            }
        }
    }

    async fn update_event(&self, id: &str, changes: &EventChanges) -> Result<Event, RemoteError> {
        self.enter()?;
        let mut entry = self.events.get_mut(id).ok_or(RemoteError::NotFound)?;
        entry.merge_changes(changes);
        Ok(entry.value().clone())
    }

    async fn delete_event(&self, id: &str) -> Result<(), RemoteError> {
        self.enter()?;
        self.events.remove(id).map(|_| ()).ok_or(RemoteError::NotFound)
    }

    async fn probe_reachable(&self) -> bool {
        self.is_reachable()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{EventDraft, EventPatch, EventType};
    use chrono::{NaiveDate, Utc};

    fn event(owner: &str, day: u32) -> Event {
        let draft = EventDraft::new("Concert", EventType::Concert, NaiveDate::from_ymd_opt(2025, 8, day).unwrap());
        Event::from_draft(draft, owner, Utc::now()).unwrap()
    }

    #[tokio::test]
    async fn test_duplicate_create_is_rejected_with_unique_violation() {
        let remote = InMemoryRemoteStore::new();
        let e = event("anna", 1);
        remote.create_event(&e).await.unwrap();
        let err = remote.create_event(&e).await.unwrap_err();
        assert!(err.is_duplicate());
    }

    #[tokio::test]
    async fn test_unreachable_fails_every_call() {
        let remote = InMemoryRemoteStore::new();
        remote.set_reachable(false);
        assert!(!remote.probe_reachable().await);
        assert!(remote.list_events_by_owner("anna").await.unwrap_err().is_unreachable());
        assert!(remote.create_event(&event("anna", 1)).await.unwrap_err().is_unreachable());
        assert_eq!(remote.calls(), 2);
    }

    #[tokio::test]
    async fn test_list_is_per_owner_and_sorted() {
        let remote = InMemoryRemoteStore::new();
        remote.insert(event("anna", 20));
        remote.insert(event("anna", 3));
        remote.insert(event("pau", 1));

        let listed = remote.list_events_by_owner("anna").await.unwrap();
        assert_eq!(listed.len(), 2);
        assert!(listed[0].start_date < listed[1].start_date);
    }

    #[tokio::test]
    async fn test_update_and_delete_missing_record() {
        let remote = InMemoryRemoteStore::new();
        let mut e = event("anna", 1);
        let changes = e.apply_patch(EventPatch { name: Some("x".into()), ..Default::default() }, Utc::now()).unwrap();

        assert_eq!(remote.get_event(&e.id).await.unwrap(), None);
        assert_eq!(remote.update_event(&e.id, &changes).await.unwrap_err(), RemoteError::NotFound);
        assert_eq!(remote.delete_event(&e.id).await.unwrap_err(), RemoteError::NotFound);

        remote.insert(e.clone());
        assert_eq!(remote.get_event(&e.id).await.unwrap().map(|r| r.owner), Some(Some("anna".to_string())));
        let updated = remote.update_event(&e.id, &changes).await.unwrap();
        assert_eq!(updated.name, "x");
        remote.delete_event(&e.id).await.unwrap();
        assert!(remote.is_empty());
    }

    #[tokio::test]
    async fn test_credentials() {
        let remote = InMemoryRemoteStore::new();
        remote.create_credential("anna", "pw").await.unwrap();
        assert!(remote.create_credential("anna", "other").await.unwrap_err().is_duplicate());
        assert_eq!(remote.verify_credential("anna", "pw").await.unwrap(), CredentialCheck::Valid);
        assert_eq!(remote.verify_credential("anna", "nope").await.unwrap(), CredentialCheck::Invalid);
        assert_eq!(remote.verify_credential("pau", "pw").await.unwrap(), CredentialCheck::NotFound);
    }
}
