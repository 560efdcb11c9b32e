//! Mutation API: create, update, delete.
//!
//! Every mutation lands in the local store and the view first. The remote
//! write happens afterwards and its failure is classified:
//!
//! - unreachable: the operation is queued for the next drain
//! - rejected: surfaced as [`RemoteOutcome::Rejected`], not queued
//!
//! While an event still has queued operations, later mutations of that event
//! are queued behind them instead of going straight to the remote store, so
//! replay order matches the order the user made the changes in.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tracing::{debug, warn};

use super::types::{Applied, RemoteOutcome, SyncError};
use super::SyncEngine;
use crate::event::{Event, EventDraft, EventPatch, SyncStatus};
use crate::queue::{OpKind, QueueEntry, Replay};
use crate::remote::traits::RemoteStore;
use crate::storage::traits::StorageError;

impl SyncEngine {
    /// Look up an event in the current view.
    #[must_use]
    pub fn event(&self, id: &str) -> Option<Event> {
        self.view.read().iter().find(|e| e.id == id).cloned()
    }

    /// Create an event owned by the active user.
    #[tracing::instrument(skip(self, draft), fields(name = %draft.name))]
    pub async fn create_event(&self, draft: EventDraft) -> Result<Applied, SyncError> {
        let user = self.require_user()?;
        let event = Event::from_draft(draft, &user, Utc::now())?;
        debug!(id = %event.id, "Creating event");

        let replay = Replay::Create(event.clone());
        self.commit(&event, replay).await
    }

    /// Apply a partial update.
    ///
    /// The event must be owned by the active user (or be an orphan); anything
    /// else is reported as [`SyncError::NotFound`].
    #[tracing::instrument(skip(self, patch))]
    pub async fn update_event(&self, id: &str, patch: EventPatch) -> Result<Applied, SyncError> {
        let user = self.require_user()?;
        let mut event = self.owned_event(&user, id).await?;

        if patch.is_empty() {
            debug!("Empty patch; nothing to do");
            let outcome = match event.sync_status {
                SyncStatus::Synced => RemoteOutcome::Confirmed,
                SyncStatus::Pending => RemoteOutcome::Queued,
            };
            return Ok(Applied { event, outcome });
        }

        // An orphan is claimed by the update that touches it
        let mut patch = patch;
        if event.is_orphan() {
            patch.owner = Some(user);
        }
        let changes = event.apply_patch(patch, Utc::now())?;
        self.commit(&event, Replay::Update(changes)).await
    }

    /// Delete an event locally and remotely.
    #[tracing::instrument(skip(self))]
    pub async fn delete_event(&self, id: &str) -> Result<RemoteOutcome, SyncError> {
        let user = self.require_user()?;
        self.owned_event(&user, id).await?;

        self.local.delete_event(id).await?;
        self.remove_from_view(id);

        let outcome = match self.writable_remote(id).await? {
            None => {
                let seq = self.local.enqueue(OpKind::Delete, id, None).await?;
                debug!(seq, "Delete queued");
                RemoteOutcome::Queued
            }
            Some(remote) => match self.replay(remote.as_ref(), id, Replay::Delete).await {
                Ok(_) => RemoteOutcome::Confirmed,
                Err(e) if e.is_unreachable() => {
                    let seq = self.local.enqueue(OpKind::Delete, id, None).await?;
                    warn!(seq, error = %e, "Remote delete failed; queued");
                    RemoteOutcome::Queued
                }
                Err(e) => {
                    warn!(error = %e, "Remote rejected delete");
                    RemoteOutcome::Rejected(e)
                }
            },
        };

        crate::metrics::record_mutation(OpKind::Delete.as_str(), outcome.label());
        self.refresh_queue_depth().await;
        Ok(outcome)
    }

    /// Persist locally, then push or queue.
    async fn commit(&self, event: &Event, replay: Replay) -> Result<Applied, SyncError> {
        let kind = replay.kind();

        let Some(remote) = self.writable_remote(&event.id).await? else {
            let payload = payload_of(&event.id, &replay)?;
            let (stored, seq) = self.local.put_event_and_enqueue(event, kind, payload).await?;
            debug!(id = %stored.id, seq, kind = %kind, "Mutation queued");
            self.upsert_view(stored.clone());
            return Ok(self.finish(kind, stored, RemoteOutcome::Queued).await);
        };

        let stored = self.local.put_event(event, SyncStatus::Pending).await?;
        self.upsert_view(stored.clone());

        let payload = payload_of(&event.id, &replay)?;
        match self.replay(remote.as_ref(), &stored.id, replay).await {
            Ok(Some(confirmed)) => {
                let synced = self.local.put_event(&confirmed, SyncStatus::Synced).await?;
                self.upsert_view(synced.clone());
                Ok(self.finish(kind, synced, RemoteOutcome::Confirmed).await)
            }
            Ok(None) => Ok(self.finish(kind, stored, RemoteOutcome::Confirmed).await),
            Err(e) if e.is_unreachable() => {
                let seq = self.local.enqueue(kind, &stored.id, payload).await?;
                warn!(id = %stored.id, seq, kind = %kind, error = %e, "Remote write failed; queued");
                Ok(self.finish(kind, stored, RemoteOutcome::Queued).await)
            }
            Err(e) => {
                warn!(id = %stored.id, kind = %kind, error = %e, "Remote rejected write");
                Ok(self.finish(kind, stored, RemoteOutcome::Rejected(e)).await)
            }
        }
    }

    async fn finish(&self, kind: OpKind, event: Event, outcome: RemoteOutcome) -> Applied {
        crate::metrics::record_mutation(kind.as_str(), outcome.label());
        if outcome == RemoteOutcome::Queued {
            self.refresh_queue_depth().await;
        }
        Applied { event, outcome }
    }

    /// The remote store, if a write for `id` may go to it directly.
    async fn writable_remote(&self, id: &str) -> Result<Option<Arc<dyn RemoteStore>>, SyncError> {
        let Some(remote) = self.online_remote() else {
            return Ok(None);
        };

        let behind = self
            .local
            .drain_queue()
            .await?
            .iter()
            .any(|entry| matches!(entry, QueueEntry::Valid(op) if op.event_id == id));
        if behind {
            debug!(id, "Earlier operations still queued; queueing behind them");
            self.drain_requested.store(true, Ordering::Release);
            return Ok(None);
        }
        Ok(Some(remote))
    }

    async fn owned_event(&self, user: &str, id: &str) -> Result<Event, SyncError> {
        match self.local.get_event(id).await? {
            Some(event) if event.is_orphan() || event.owner.as_deref() == Some(user) => Ok(event),
            _ => Err(SyncError::NotFound(id.to_string())),
        }
    }
}

/// Queue payload for `replay`.
pub(super) fn payload_of(id: &str, replay: &Replay) -> Result<Option<Value>, StorageError> {
    replay
        .payload()
        .map_err(|e| StorageError::Malformed { id: id.to_string(), reason: e.to_string() })
}
