//! Load & orphan claim.
//!
//! ```text
//! list_events(user) ──► claim orphans ──► online? ──no──► sort local ──► view
//!   (owned + orphans)   (put + enqueue     │
//!                        create, atomic)   yes
//!                                          ▼
//!                            list_events_by_owner(user)
//!                                          │
//!                    cache remote as synced, merge remote-wins ──► sort ──► view
//! ```

use std::collections::HashSet;

use chrono::Utc;
use tracing::{debug, info, warn};

use super::api::payload_of;
use super::types::{LoadReport, LoadSource, SyncError};
use super::SyncEngine;
use crate::event::{sort_by_start_date, Event, SyncStatus};
use crate::queue::{OpKind, Replay};

/// Union of `remote` and the `local` events whose id is not in `remote`,
/// sorted by start date. For shared ids the remote copy wins.
#[must_use]
pub fn merge_remote_wins(remote: Vec<Event>, local: Vec<Event>) -> Vec<Event> {
    let remote_ids: HashSet<&str> = remote.iter().map(|e| e.id.as_str()).collect();
    let local_only: Vec<Event> = local.into_iter().filter(|e| !remote_ids.contains(e.id.as_str())).collect();

    let mut merged = remote;
    merged.extend(local_only);
    sort_by_start_date(&mut merged);
    merged
}

impl SyncEngine {
    /// Rebuild the view for the active user.
    ///
    /// Never fails because of the remote: if it is offline or errors, the
    /// local cache is served and the error is reported in the [`LoadReport`].
    #[tracing::instrument(skip(self), fields(user = tracing::field::Empty))]
    pub async fn load(&self) -> Result<LoadReport, SyncError> {
        let user = self.require_user()?;
        tracing::Span::current().record("user", user.as_str());
        let _state = self.enter_state(super::EngineState::Loading);
        let _timer = crate::metrics::LatencyTimer::new("load");

        let mut local = self.local.list_events(&user).await?;
        let orphans_claimed = self.claim_orphans(&user, &mut local).await?;

        let (view, source, remote_error) = match self.online_remote() {
            None => {
                debug!("Remote not available; serving local cache");
                (local, LoadSource::LocalOnly, None)
            }
            Some(remote) => match remote.list_events_by_owner(&user).await {
                Ok(remote_events) => {
                    self.connectivity.record_success();
                    let mut cached = Vec::with_capacity(remote_events.len());
                    for event in &remote_events {
                        cached.push(self.local.put_event(event, SyncStatus::Synced).await?);
                    }
                    (merge_remote_wins(cached, local), LoadSource::Merged, None)
                }
                Err(e) => {
                    if e.is_unreachable() {
                        self.connectivity.record_failure();
                    }
                    warn!(error = %e, "Remote fetch failed; serving local cache");
                    (local, LoadSource::LocalOnly, Some(e))
                }
            },
        };

        let events = view.len();
        self.set_view(view);
        crate::metrics::record_load(
            match source {
                LoadSource::LocalOnly => "local",
                LoadSource::Merged => "merged",
            },
            events,
        );
        info!(events, orphans_claimed, source = ?source, "Load complete");

        Ok(LoadReport { source, events, orphans_claimed, remote_error })
    }

    /// Give every orphan in `events` to `user` and queue the claim.
    async fn claim_orphans(&self, user: &str, events: &mut [Event]) -> Result<usize, SyncError> {
        let now = Utc::now();
        let mut claimed = 0;

        for event in events.iter_mut() {
            if !event.claim(user, now) {
                continue;
            }
            let payload = payload_of(&event.id, &Replay::Create(event.clone()))?;
            let (stored, seq) = self.local.put_event_and_enqueue(event, OpKind::Create, payload).await?;
            debug!(id = %stored.id, seq, "Claimed orphan");
            *event = stored;
            claimed += 1;
        }

        if claimed > 0 {
            info!(claimed, user, "Claimed orphan events");
            crate::metrics::record_orphans_claimed(claimed);
            self.refresh_queue_depth().await;
        }
        Ok(claimed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{EventDraft, EventType};
    use chrono::NaiveDate;

    fn event(name: &str, day: u32) -> Event {
        let draft = EventDraft::new(name, EventType::Match, NaiveDate::from_ymd_opt(2025, 9, day).unwrap());
        Event::from_draft(draft, "anna", Utc::now()).unwrap()
    }

    #[test]
    fn test_merge_keeps_local_only_and_adds_remote() {
        let a = event("A", 15);
        let b = event("B", 1);
        let c = event("C", 30);

        let merged = merge_remote_wins(vec![c.clone(), b.clone()], vec![a.clone()]);
        let names: Vec<&str> = merged.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["B", "A", "C"]);
    }

    #[test]
    fn test_merge_remote_copy_wins() {
        let local = event("A", 15);
        let mut remote = local.clone();
        remote.name = "A (remote)".into();
        remote.payment_real = 80.0;

        let merged = merge_remote_wins(vec![remote.clone()], vec![local]);
        assert_eq!(merged, vec![remote]);
    }

    #[test]
    fn test_merge_of_empty_sets() {
        assert!(merge_remote_wins(Vec::new(), Vec::new()).is_empty());
        let a = event("A", 1);
        assert_eq!(merge_remote_wins(Vec::new(), vec![a.clone()]), vec![a]);
    }
}
