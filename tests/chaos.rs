//! Chaos Testing for Gig Sync
//!
//! This module tests failure scenarios using:
//! 1. **FailingRemoteStore wrapper** - precise error injection at specific write numbers
//! 2. **Slow remote** - drains overlapping with each other
//! 3. **Corrupt queue rows** - garbage entries in the local queue
//! 4. **Ownership** - claims of rows owned elsewhere, replays across users
//!
//! # Running Chaos Tests
//! ```bash
//! cargo test --test chaos -- --nocapture
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};

use gig_sync::queue::{QueueEntry, Replay};
use gig_sync::remote::memory::InMemoryRemoteStore;
use gig_sync::storage::memory::InMemoryLocalStore;
use gig_sync::{
    CredentialCheck, DrainPolicy, Event, EventChanges, EventDraft, EventPatch, EventType, LocalStore, RemoteError, RemoteOutcome,
    RemoteStore, SyncEngine, SyncEngineConfig, SyncStatus,
};

// =============================================================================
// Failing Remote Wrapper - Precise Error Injection
// =============================================================================

#[derive(Debug, Clone, Copy)]
enum Fault {
    Unreachable,
    Rejected,
}

impl Fault {
    fn error(self) -> RemoteError {
        match self {
            Self::Unreachable => RemoteError::Unreachable("injected: connection reset".into()),
            Self::Rejected => RemoteError::Rejected { code: "23514".into(), message: "injected: check violation".into() },
        }
    }
}

/// Wraps the in-memory remote and fails chosen event writes (1-indexed,
/// counting creates, updates and deletes). Reads and probes pass through.
struct FailingRemoteStore {
    inner: InMemoryRemoteStore,
    writes: AtomicU64,
    creates: AtomicU64,
    faults: HashMap<u64, Fault>,
    delay: Duration,
}

impl FailingRemoteStore {
    fn new(faults: &[(u64, Fault)]) -> Self {
        Self {
            inner: InMemoryRemoteStore::new(),
            writes: AtomicU64::new(0),
            creates: AtomicU64::new(0),
            faults: faults.iter().copied().collect(),
            delay: Duration::ZERO,
        }
    }

    fn slow(delay: Duration) -> Self {
        Self { delay, ..Self::new(&[]) }
    }

    async fn write(&self) -> Result<(), RemoteError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let n = self.writes.fetch_add(1, Ordering::SeqCst) + 1;
        match self.faults.get(&n) {
            Some(fault) => Err(fault.error()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl RemoteStore for FailingRemoteStore {
    async fn verify_credential(&self, username: &str, password: &str) -> Result<CredentialCheck, RemoteError> {
        self.inner.verify_credential(username, password).await
    }

    async fn create_credential(&self, username: &str, password: &str) -> Result<(), RemoteError> {
        self.inner.create_credential(username, password).await
    }

    async fn list_events_by_owner(&self, owner: &str) -> Result<Vec<Event>, RemoteError> {
        self.inner.list_events_by_owner(owner).await
    }

    async fn get_event(&self, id: &str) -> Result<Option<Event>, RemoteError> {
        self.inner.get_event(id).await
    }

    async fn create_event(&self, event: &Event) -> Result<Event, RemoteError> {
        self.write().await?;
        self.creates.fetch_add(1, Ordering::SeqCst);
        self.inner.create_event(event).await
    }

    async fn update_event(&self, id: &str, changes: &EventChanges) -> Result<Event, RemoteError> {
        self.write().await?;
        self.inner.update_event(id, changes).await
    }

    async fn delete_event(&self, id: &str) -> Result<(), RemoteError> {
        self.write().await?;
        self.inner.delete_event(id).await
    }

    async fn probe_reachable(&self) -> bool {
        self.inner.probe_reachable().await
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn draft(name: &str, day: u32) -> EventDraft {
    EventDraft::new(name, EventType::Match, NaiveDate::from_ymd_opt(2025, 3, day).unwrap())
}

fn engine(
    remote: &Arc<FailingRemoteStore>,
    policy: DrainPolicy,
) -> (SyncEngine, Arc<InMemoryLocalStore>) {
    let local = Arc::new(InMemoryLocalStore::new());
    let config = SyncEngineConfig { drain_policy: policy, ..Default::default() };
    let engine = SyncEngine::new(
        config,
        local.clone() as Arc<dyn LocalStore>,
        Some(remote.clone() as Arc<dyn RemoteStore>),
    );
    (engine, local)
}

/// Queue three creates while the remote is down, then bring it back.
async fn queue_three(engine: &SyncEngine, remote: &FailingRemoteStore) -> Vec<Event> {
    remote.inner.set_reachable(false);
    engine.start_session("anna").await.unwrap();

    let mut created = Vec::new();
    for (name, day) in [("one", 1), ("two", 2), ("three", 3)] {
        let applied = engine.create_event(draft(name, day)).await.unwrap();
        assert_eq!(applied.outcome, RemoteOutcome::Queued);
        created.push(applied.event);
    }
    assert_eq!(engine.queue_len().await.unwrap(), 3);

    remote.inner.set_reachable(true);
    created
}

// =============================================================================
// Drain under injected faults
// =============================================================================

#[tokio::test]
async fn test_unreachable_item_is_retained_and_retried() {
    let remote = Arc::new(FailingRemoteStore::new(&[(2, Fault::Unreachable)]));
    let (engine, _) = engine(&remote, DrainPolicy::RetainFailed);
    let created = queue_three(&engine, &remote).await;

    let report = engine.drain().await.unwrap().unwrap();
    assert_eq!(report.confirmed, 2);
    assert_eq!(report.retained, 1);
    assert_eq!(engine.queue_len().await.unwrap(), 1);
    assert!(remote.inner.get(&created[1].id).is_none());

    // Still visible locally, still pending
    let two = engine.event(&created[1].id).unwrap();
    assert_eq!(two.sync_status, SyncStatus::Pending);

    let report = engine.drain().await.unwrap().unwrap();
    assert_eq!(report.confirmed, 1);
    assert_eq!(engine.queue_len().await.unwrap(), 0);
    assert!(remote.inner.get(&created[1].id).is_some());
}

#[tokio::test]
async fn test_clear_all_policy_drops_failed_items() {
    let remote = Arc::new(FailingRemoteStore::new(&[(2, Fault::Unreachable)]));
    let (engine, _) = engine(&remote, DrainPolicy::ClearAll);
    let created = queue_three(&engine, &remote).await;

    let report = engine.drain().await.unwrap().unwrap();
    assert_eq!(report.confirmed, 2);
    assert_eq!(report.retained, 1);
    assert_eq!(engine.queue_len().await.unwrap(), 0);
    assert!(remote.inner.get(&created[1].id).is_none());

    // The local copy survives the reload as a local-only record
    assert_eq!(engine.events().len(), 3);
}

#[tokio::test]
async fn test_rejected_item_is_dropped_not_retried() {
    let remote = Arc::new(FailingRemoteStore::new(&[(1, Fault::Rejected)]));
    let (engine, _) = engine(&remote, DrainPolicy::RetainFailed);
    let created = queue_three(&engine, &remote).await;

    let report = engine.drain().await.unwrap().unwrap();
    assert_eq!(report.dropped, 1);
    assert_eq!(report.confirmed, 2);
    assert_eq!(engine.queue_len().await.unwrap(), 0);
    assert!(remote.inner.get(&created[0].id).is_none());
    assert!(remote.inner.get(&created[2].id).is_some());
}

#[tokio::test]
async fn test_malformed_entry_does_not_block_the_queue() {
    let remote = Arc::new(FailingRemoteStore::new(&[]));
    let (engine, local) = engine(&remote, DrainPolicy::RetainFailed);

    remote.inner.set_reachable(false);
    engine.start_session("anna").await.unwrap();
    let first = engine.create_event(draft("first", 1)).await.unwrap().event;
    local.push_malformed("payload is not JSON");
    let second = engine.create_event(draft("second", 2)).await.unwrap().event;
    assert_eq!(engine.queue_len().await.unwrap(), 3);

    remote.inner.set_reachable(true);
    let report = engine.drain().await.unwrap().unwrap();
    assert_eq!(report.malformed, 1);
    assert_eq!(report.confirmed, 2);
    assert_eq!(engine.queue_len().await.unwrap(), 0);
    assert!(remote.inner.get(&first.id).is_some());
    assert!(remote.inner.get(&second.id).is_some());
}

#[tokio::test]
async fn test_replayed_create_of_existing_record_becomes_update() {
    let remote = Arc::new(FailingRemoteStore::new(&[]));
    let (engine, local) = engine(&remote, DrainPolicy::RetainFailed);

    // The same legacy gig exists remotely (pushed by another device) and as
    // an orphan on this device
    let mut legacy = Event::from_draft(draft("Legacy", 9), "anna", Utc::now()).unwrap();
    remote.inner.insert(legacy.clone());
    legacy.owner = None;
    legacy.name = "Legacy (edited here)".into();
    local.put_event(&legacy, SyncStatus::Pending).await.unwrap();

    engine.start_session("anna").await.unwrap();
    assert_eq!(engine.queue_len().await.unwrap(), 0);
    assert_eq!(remote.inner.get(&legacy.id).unwrap().name, "Legacy (edited here)");
    assert_eq!(remote.inner.len(), 1);
}

#[tokio::test]
async fn test_operations_behind_a_retained_one_wait_for_it() {
    let remote = Arc::new(FailingRemoteStore::new(&[(1, Fault::Unreachable)]));
    let (engine, local) = engine(&remote, DrainPolicy::RetainFailed);

    remote.inner.set_reachable(false);
    engine.start_session("anna").await.unwrap();
    let created = engine.create_event(draft("orig", 5)).await.unwrap().event;
    let patch = EventPatch { name: Some("edited".into()), payment_real: Some(50.0), ..Default::default() };
    assert_eq!(engine.update_event(&created.id, patch).await.unwrap().outcome, RemoteOutcome::Queued);
    remote.inner.set_reachable(true);

    // The create fails; the update must not be sent ahead of it
    let report = engine.drain().await.unwrap().unwrap();
    assert_eq!(report.confirmed, 0);
    assert_eq!(report.retained, 2);
    assert_eq!(report.dropped, 0);
    assert_eq!(remote.writes.load(Ordering::SeqCst), 1);
    assert_eq!(engine.queue_len().await.unwrap(), 2);
    assert_eq!(engine.event(&created.id).unwrap().name, "edited");

    let report = engine.drain().await.unwrap().unwrap();
    assert_eq!(report.confirmed, 2);
    assert_eq!(engine.queue_len().await.unwrap(), 0);

    let pushed = remote.inner.get(&created.id).unwrap();
    assert_eq!(pushed.name, "edited");
    assert_eq!(pushed.payment_real, 50.0);
    assert!(pushed.is_paid);

    let stored = local.get_event(&created.id).await.unwrap().unwrap();
    assert_eq!(stored.name, "edited");
    assert_eq!(stored.sync_status, SyncStatus::Synced);
}

#[tokio::test]
async fn test_retained_event_does_not_hold_back_other_events() {
    let remote = Arc::new(FailingRemoteStore::new(&[(1, Fault::Unreachable)]));
    let (engine, _) = engine(&remote, DrainPolicy::RetainFailed);

    remote.inner.set_reachable(false);
    engine.start_session("anna").await.unwrap();
    let first = engine.create_event(draft("first", 1)).await.unwrap().event;
    let second = engine.create_event(draft("second", 2)).await.unwrap().event;
    engine
        .update_event(&second.id, EventPatch { name: Some("second, edited".into()), ..Default::default() })
        .await
        .unwrap();
    remote.inner.set_reachable(true);

    let report = engine.drain().await.unwrap().unwrap();
    assert_eq!(report.retained, 1);
    assert_eq!(report.confirmed, 2);
    assert!(remote.inner.get(&first.id).is_none());
    assert_eq!(remote.inner.get(&second.id).unwrap().name, "second, edited");
}

// =============================================================================
// Ownership
// =============================================================================

#[tokio::test]
async fn test_claim_of_orphan_owned_remotely_by_another_user_is_dropped() {
    let remote = Arc::new(FailingRemoteStore::new(&[]));
    let (engine, local) = engine(&remote, DrainPolicy::RetainFailed);

    // Pau pushed this gig from another device; here it is still unowned
    let theirs = Event::from_draft(draft("Pau's gig", 12), "pau", Utc::now()).unwrap();
    remote.inner.insert(theirs.clone());
    let mut stale = theirs.clone();
    stale.owner = None;
    stale.name = "Stale copy".into();
    local.put_event(&stale, SyncStatus::Pending).await.unwrap();

    engine.start_session("anna").await.unwrap();

    let row = remote.inner.get(&theirs.id).unwrap();
    assert_eq!(row.owner.as_deref(), Some("pau"));
    assert_eq!(row.name, "Pau's gig");
    assert_eq!(engine.queue_len().await.unwrap(), 0);

    // Anna no longer sees it; the local copy is Pau's remote row
    assert!(engine.event(&theirs.id).is_none());
    let stored = local.get_event(&theirs.id).await.unwrap().unwrap();
    assert_eq!(stored.owner.as_deref(), Some("pau"));
    assert_eq!(stored.sync_status, SyncStatus::Synced);
}

#[tokio::test]
async fn test_queue_replayed_under_another_user_keeps_owners() {
    let remote = Arc::new(FailingRemoteStore::new(&[]));
    let (engine, local) = engine(&remote, DrainPolicy::RetainFailed);

    engine.start_session("anna").await.unwrap();
    let gig = engine.create_event(draft("Anna's gig", 8)).await.unwrap();
    assert_eq!(gig.outcome, RemoteOutcome::Confirmed);

    remote.inner.set_reachable(false);
    engine.connectivity().check(remote.as_ref()).await;
    let patch = EventPatch { payment_real: Some(75.0), ..Default::default() };
    assert_eq!(engine.update_event(&gig.event.id, patch).await.unwrap().outcome, RemoteOutcome::Queued);
    engine.end_session();

    remote.inner.set_reachable(true);
    engine.start_session("pau").await.unwrap();
    assert_eq!(engine.queue_len().await.unwrap(), 0);

    let row = remote.inner.get(&gig.event.id).unwrap();
    assert_eq!(row.owner.as_deref(), Some("anna"));
    assert_eq!(row.payment_real, 75.0);
    assert!(engine.event(&gig.event.id).is_none());
    assert!(engine.events().is_empty());

    let stored = local.get_event(&gig.event.id).await.unwrap().unwrap();
    assert_eq!(stored.owner.as_deref(), Some("anna"));
}

#[tokio::test]
async fn test_update_of_local_orphan_claims_it() {
    let remote = Arc::new(FailingRemoteStore::new(&[]));
    let (engine, local) = engine(&remote, DrainPolicy::RetainFailed);

    remote.inner.set_reachable(false);
    engine.start_session("anna").await.unwrap();

    // Arrives after the session's load, so it was not claimed then
    let mut orphan = Event::from_draft(draft("Unowned", 3), "legacy", Utc::now()).unwrap();
    orphan.owner = None;
    local.put_event(&orphan, SyncStatus::Pending).await.unwrap();

    let applied = engine
        .update_event(&orphan.id, EventPatch { name: Some("Mine now".into()), ..Default::default() })
        .await
        .unwrap();
    assert_eq!(applied.event.owner.as_deref(), Some("anna"));

    let queued = local.drain_queue().await.unwrap();
    match queued.as_slice() {
        [QueueEntry::Valid(op)] => match op.decode().unwrap() {
            Replay::Update(changes) => assert_eq!(changes.patch.owner.as_deref(), Some("anna")),
            other => panic!("unexpected replay {:?}", other),
        },
        other => panic!("unexpected queue {:?}", other),
    }
}

// =============================================================================
// Direct writes under injected faults
// =============================================================================

#[tokio::test]
async fn test_direct_write_unreachable_is_queued() {
    let remote = Arc::new(FailingRemoteStore::new(&[(1, Fault::Unreachable)]));
    let (engine, _) = engine(&remote, DrainPolicy::RetainFailed);
    engine.start_session("anna").await.unwrap();
    assert!(engine.is_online());

    let applied = engine.create_event(draft("flaky", 4)).await.unwrap();
    assert_eq!(applied.outcome, RemoteOutcome::Queued);
    assert_eq!(applied.event.sync_status, SyncStatus::Pending);
    assert_eq!(engine.queue_len().await.unwrap(), 1);
    assert_eq!(engine.connectivity().failure_count(), 1);

    engine.drain().await.unwrap().unwrap();
    assert_eq!(engine.queue_len().await.unwrap(), 0);
    assert!(remote.inner.get(&applied.event.id).is_some());
}

#[tokio::test]
async fn test_direct_write_rejected_is_surfaced_not_queued() {
    let remote = Arc::new(FailingRemoteStore::new(&[(1, Fault::Rejected)]));
    let (engine, local) = engine(&remote, DrainPolicy::RetainFailed);
    engine.start_session("anna").await.unwrap();

    let applied = engine.create_event(draft("refused", 4)).await.unwrap();
    assert!(matches!(applied.outcome, RemoteOutcome::Rejected(RemoteError::Rejected { .. })));
    assert_eq!(engine.queue_len().await.unwrap(), 0);

    // Local write stands
    let stored = local.get_event(&applied.event.id).await.unwrap().unwrap();
    assert_eq!(stored.sync_status, SyncStatus::Pending);
    assert_eq!(engine.events().len(), 1);
}

#[tokio::test]
async fn test_repeated_failures_take_engine_offline() {
    let faults: Vec<(u64, Fault)> = (1..=3).map(|n| (n, Fault::Unreachable)).collect();
    let remote = Arc::new(FailingRemoteStore::new(&faults));
    let (engine, _) = engine(&remote, DrainPolicy::RetainFailed);
    engine.start_session("anna").await.unwrap();

    for day in 1..=3 {
        engine.create_event(draft("x", day)).await.unwrap();
    }
    assert!(!engine.is_online());

    // Offline now: no remote call attempted
    let before = remote.writes.load(Ordering::SeqCst);
    let applied = engine.create_event(draft("y", 4)).await.unwrap();
    assert_eq!(applied.outcome, RemoteOutcome::Queued);
    assert_eq!(remote.writes.load(Ordering::SeqCst), before);
    assert_eq!(engine.queue_len().await.unwrap(), 4);
}

// =============================================================================
// Concurrency
// =============================================================================

#[tokio::test]
async fn test_overlapping_drains_are_coalesced() {
    let remote = Arc::new(FailingRemoteStore::slow(Duration::from_millis(30)));
    let (engine, _) = engine(&remote, DrainPolicy::RetainFailed);
    queue_three(&engine, &remote).await;

    let (a, b) = tokio::join!(engine.drain(), engine.drain());
    let (a, b) = (a.unwrap(), b.unwrap());
    assert!(a.is_some() ^ b.is_some(), "exactly one drain runs");

    let report = a.or(b).unwrap();
    assert_eq!(report.passes, 2);
    assert_eq!(report.confirmed, 3);

    // Every queued create replayed exactly once
    assert_eq!(remote.creates.load(Ordering::SeqCst), 3);
    assert_eq!(engine.queue_len().await.unwrap(), 0);
}

#[tokio::test]
async fn test_mutation_during_drain_is_not_lost() {
    let remote = Arc::new(FailingRemoteStore::slow(Duration::from_millis(30)));
    let (engine, _) = engine(&remote, DrainPolicy::RetainFailed);
    queue_three(&engine, &remote).await;
    let engine = Arc::new(engine);

    let drain = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move { engine.drain().await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    remote.inner.set_reachable(false);
    engine.connectivity().set_network_online(false);
    let late = engine.create_event(draft("late", 20)).await.unwrap().event;
    engine.connectivity().set_network_online(true);
    remote.inner.set_reachable(true);

    drain.await.unwrap().unwrap();
    // The late create was either replayed by the running drain or is still queued
    let pushed = remote.inner.get(&late.id).is_some();
    let queued = engine.queue_len().await.unwrap() == 1;
    assert!(pushed ^ queued);
    assert!(engine.event(&late.id).is_some());
}
