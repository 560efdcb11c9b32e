//! Queue drain.
//!
//! Replays pending operations in enqueue order, then reloads. Passes are
//! serialized: a drain requested while another runs is folded into the running
//! one, which does one more pass before releasing the lock.
//!
//! Per-entry outcome:
//!
//! | Replay result        | Entry                         |
//! |----------------------|-------------------------------|
//! | success              | acknowledged                  |
//! | unreachable          | retained (`RetainFailed`)     |
//! | rejected / not found | acknowledged, logged          |
//! | owned by another user| acknowledged, remote adopted  |
//! | undecodable          | acknowledged, logged          |
//!
//! Once an entry is retained, later entries for the same event are retained
//! too without being sent, so they replay after it on the next pass.
//!
//! Under [`DrainPolicy::ClearAll`] the queue is emptied after every pass.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::Ordering;
use std::time::Instant;

use tracing::{debug, info, warn};

use super::types::{DrainReport, EngineState, SyncError};
use super::SyncEngine;
use crate::config::DrainPolicy;
use crate::event::{Event, EventChanges, SyncStatus};
use crate::queue::{QueueEntry, Replay};
use crate::remote::traits::{RemoteError, RemoteStore};

impl SyncEngine {
    /// Replay the pending queue against the remote store, then reload.
    ///
    /// Returns `None` when another drain was already running; that drain
    /// performs the requested pass.
    #[tracing::instrument(skip(self))]
    pub async fn drain(&self) -> Result<Option<DrainReport>, SyncError> {
        self.require_user()?;
        self.drain_requested.store(true, Ordering::Release);

        let mut report = DrainReport::default();
        loop {
            let Ok(guard) = self.drain_lock.try_lock() else {
                debug!("Drain already in flight; request coalesced");
                return Ok(None);
            };
            while self.drain_requested.swap(false, Ordering::AcqRel) {
                let pass = self.drain_pass().await?;
                let skipped = pass.skipped;
                report.absorb(pass);
                if skipped {
                    break;
                }
            }
            drop(guard);

            if report.skipped || !self.drain_requested.load(Ordering::Acquire) {
                break;
            }
        }

        if !report.skipped {
            report.reload = Some(self.load().await?);
        }
        Ok(Some(report))
    }

    async fn drain_pass(&self) -> Result<DrainReport, SyncError> {
        let user = self.require_user()?;
        let mut report = DrainReport { passes: 1, ..Default::default() };

        let Some(remote) = self.remote.clone() else {
            debug!("Remote not configured; queue stays local");
            report.skipped = true;
            return Ok(report);
        };
        // Never trust a stale probe for a drain
        if !self.connectivity.check(remote.as_ref()).await {
            info!("Remote unreachable; drain skipped");
            report.skipped = true;
            return Ok(report);
        }

        let _state = self.enter_state(EngineState::Draining);
        let start = Instant::now();
        let entries = self.local.drain_queue().await?;

        // Only the newest op for an event may overwrite its local copy
        let last_seq: HashMap<String, i64> = entries
            .iter()
            .filter_map(|e| match e {
                QueueEntry::Valid(op) => Some((op.event_id.clone(), op.seq)),
                QueueEntry::Malformed { .. } => None,
            })
            .collect();

        let mut acknowledged = Vec::with_capacity(entries.len());
        let mut held: HashSet<String> = HashSet::new();
        for entry in entries {
            let op = match entry {
                QueueEntry::Valid(op) => op,
                QueueEntry::Malformed { seq, reason } => {
                    warn!(seq, reason = %reason, "Skipping malformed queue entry");
                    crate::metrics::record_drain_item("unknown", "malformed");
                    report.malformed += 1;
                    acknowledged.push(seq);
                    continue;
                }
            };

            if held.contains(&op.event_id) {
                debug!(seq = op.seq, id = %op.event_id, kind = %op.kind, "Earlier operation retained; holding");
                crate::metrics::record_drain_item(op.kind.as_str(), "retained");
                report.retained += 1;
                continue;
            }

            let replay = match op.decode() {
                Ok(replay) => with_owner(replay, &user),
                Err(reason) => {
                    warn!(seq = op.seq, id = %op.event_id, kind = %op.kind, reason = %reason, "Skipping undecodable queue entry");
                    crate::metrics::record_drain_item(op.kind.as_str(), "malformed");
                    report.malformed += 1;
                    acknowledged.push(op.seq);
                    continue;
                }
            };

            match self.replay(remote.as_ref(), &op.event_id, replay).await {
                Ok(confirmed) => {
                    report.confirmed += 1;
                    acknowledged.push(op.seq);
                    crate::metrics::record_drain_item(op.kind.as_str(), "confirmed");
                    if let Some(event) = confirmed {
                        if last_seq.get(&op.event_id) == Some(&op.seq) {
                            self.mark_synced(event).await?;
                        }
                    }
                }
                Err(e) if e.is_unreachable() => {
                    warn!(seq = op.seq, id = %op.event_id, kind = %op.kind, error = %e, "Replay failed; keeping for retry");
                    crate::metrics::record_drain_item(op.kind.as_str(), "retained");
                    report.retained += 1;
                    held.insert(op.event_id.clone());
                }
                Err(RemoteError::OwnedElsewhere(existing)) => {
                    warn!(seq = op.seq, id = %op.event_id, owner = ?existing.owner, "Event already owned remotely; dropping claim");
                    crate::metrics::record_drain_item(op.kind.as_str(), "rejected");
                    report.dropped += 1;
                    acknowledged.push(op.seq);
                    self.adopt_remote(*existing).await?;
                }
                Err(e) => {
                    warn!(seq = op.seq, id = %op.event_id, kind = %op.kind, error = %e, "Replay rejected; dropping");
                    crate::metrics::record_drain_item(op.kind.as_str(), "rejected");
                    report.dropped += 1;
                    acknowledged.push(op.seq);
                }
            }
        }

        match self.config.drain_policy {
            DrainPolicy::RetainFailed => self.local.remove_ops(&acknowledged).await?,
            DrainPolicy::ClearAll => self.local.clear_queue().await?,
        }
        self.refresh_queue_depth().await;

        crate::metrics::record_drain(start.elapsed(), report.processed());
        info!(
            confirmed = report.confirmed,
            retained = report.retained,
            dropped = report.dropped,
            malformed = report.malformed,
            "Drain pass complete"
        );
        Ok(report)
    }

    /// Send one operation to the remote store and fold the outcome into the
    /// connectivity oracle. Returns the remote copy for creates and updates.
    ///
    /// A create the remote already has is sent again as a full update, unless
    /// the remote row belongs to someone else. A delete of a record the remote
    /// does not have counts as done.
    pub(super) async fn replay(
        &self,
        remote: &dyn RemoteStore,
        id: &str,
        replay: Replay,
    ) -> Result<Option<Event>, RemoteError> {
        let result = match replay {
            Replay::Create(event) => match remote.create_event(&event).await {
                Err(e) if e.is_duplicate() => overwrite_existing(remote, event).await,
                other => other.map(Some),
            },
            Replay::Update(changes) => remote.update_event(id, &changes).await.map(Some),
            Replay::Delete => match remote.delete_event(id).await {
                Ok(()) | Err(RemoteError::NotFound) => Ok(None),
                Err(e) => Err(e),
            },
        };

        match &result {
            Ok(_) => self.connectivity.record_success(),
            Err(e) if e.is_unreachable() => self.connectivity.record_failure(),
            Err(_) => {}
        }
        result
    }

    /// Take the remote copy of an event owned by another user and drop it from
    /// the view.
    async fn adopt_remote(&self, event: Event) -> Result<(), SyncError> {
        let id = event.id.clone();
        let stored = self.local.put_event(&event, SyncStatus::Synced).await?;
        if self.current_user().as_deref() != stored.owner.as_deref() {
            self.remove_from_view(&id);
        }
        Ok(())
    }

    /// Store a remote-confirmed copy as synced, unless the event was deleted
    /// locally in the meantime.
    async fn mark_synced(&self, event: Event) -> Result<(), SyncError> {
        if self.local.get_event(&event.id).await?.is_none() {
            return Ok(());
        }
        let stored = self.local.put_event(&event, SyncStatus::Synced).await?;
        if self.current_user().as_deref() == stored.owner.as_deref() {
            self.upsert_view(stored);
        }
        Ok(())
    }
}

/// Resolve a create the remote already has a row for.
///
/// The row is overwritten only if it is ours or unowned. A row owned by
/// someone else is left alone and reported as [`RemoteError::OwnedElsewhere`].
async fn overwrite_existing(remote: &dyn RemoteStore, event: Event) -> Result<Option<Event>, RemoteError> {
    match remote.get_event(&event.id).await? {
        None => {
            debug!(id = %event.id, "Duplicate row is gone; creating again");
            remote.create_event(&event).await.map(Some)
        }
        Some(existing) if !existing.is_orphan() && existing.owner != event.owner => {
            Err(RemoteError::OwnedElsewhere(Box::new(existing)))
        }
        Some(_) => {
            debug!(id = %event.id, "Create already applied remotely; overwriting");
            remote.update_event(&event.id, &EventChanges::full(&event)).await.map(Some)
        }
    }
}

/// Fill in the active user on created records that have no owner.
///
/// Updates are left as queued: they never change the owner.
fn with_owner(replay: Replay, user: &str) -> Replay {
    match replay {
        Replay::Create(mut event) => {
            if event.is_orphan() {
                event.owner = Some(user.to_string());
            }
            Replay::Create(event)
        }
        other => other,
    }
}
