//! Public types for the sync engine coordinator.

use thiserror::Error;

use crate::event::{Event, EventError};
use crate::remote::traits::RemoteError;
use crate::storage::traits::StorageError;

/// Engine lifecycle state.
///
/// Use [`super::SyncEngine::state()`] to check current state or
/// [`super::SyncEngine::state_receiver()`] to watch for changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Just created, not yet started
    Created,
    /// Ready, nothing in flight
    Idle,
    /// Load & orphan claim in progress
    Loading,
    /// Replaying the pending queue
    Draining,
    /// Graceful shutdown in progress
    ShuttingDown,
}

impl EngineState {
    /// Whether a load or drain is in flight (the "syncing" indicator).
    #[must_use]
    pub fn is_syncing(&self) -> bool {
        matches!(self, Self::Loading | Self::Draining)
    }
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "Created"),
            Self::Idle => write!(f, "Idle"),
            Self::Loading => write!(f, "Loading"),
            Self::Draining => write!(f, "Draining"),
            Self::ShuttingDown => write!(f, "ShuttingDown"),
        }
    }
}

/// Errors surfaced by the engine API.
///
/// Connectivity problems never show up here for mutations: those degrade to
/// [`RemoteOutcome::Queued`].
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("No active session")]
    NoSession,
    #[error("Event not found: {0}")]
    NotFound(String),
    #[error("Invalid event: {0}")]
    Invalid(#[from] EventError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Remote(#[from] RemoteError),
}

/// What happened to the remote half of a mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteOutcome {
    /// The remote store accepted it; the local record is synced
    Confirmed,
    /// Offline, unconfigured, unreachable, or behind earlier queued
    /// operations for the same event; will be replayed by a drain
    Queued,
    /// The remote store refused it. Not queued, not retried.
    Rejected(RemoteError),
}

impl RemoteOutcome {
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Confirmed => "confirmed",
            Self::Queued => "queued",
            Self::Rejected(_) => "rejected",
        }
    }
}

/// Result of a create or update: the event as now stored locally.
#[derive(Debug, Clone, PartialEq)]
pub struct Applied {
    pub event: Event,
    pub outcome: RemoteOutcome,
}

/// Which data a load served.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadSource {
    /// Remote skipped (offline, unconfigured) or failed; local cache only
    LocalOnly,
    /// Remote fetched and merged, remote wins
    Merged,
}

/// Summary of one load.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadReport {
    pub source: LoadSource,
    /// Events in the resulting view
    pub events: usize,
    pub orphans_claimed: usize,
    /// Why the remote was not used, if it was tried
    pub remote_error: Option<RemoteError>,
}

/// Summary of a drain call (possibly several coalesced passes).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DrainReport {
    pub passes: usize,
    /// Replayed and acknowledged
    pub confirmed: usize,
    /// Failed as unreachable and kept for the next drain
    pub retained: usize,
    /// Rejected by the remote and dropped
    pub dropped: usize,
    /// Undecodable entries skipped and dropped
    pub malformed: usize,
    /// Pass skipped because the remote was unavailable
    pub skipped: bool,
    /// The load run after draining
    pub reload: Option<LoadReport>,
}

impl DrainReport {
    pub(super) fn absorb(&mut self, pass: DrainReport) {
        self.passes += pass.passes;
        self.confirmed += pass.confirmed;
        self.retained += pass.retained;
        self.dropped += pass.dropped;
        self.malformed += pass.malformed;
        self.skipped |= pass.skipped;
    }

    /// Number of queue entries looked at
    #[must_use]
    pub fn processed(&self) -> usize {
        self.confirmed + self.retained + self.dropped + self.malformed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_state_display() {
        assert_eq!(format!("{}", EngineState::Created), "Created");
        assert_eq!(format!("{}", EngineState::Draining), "Draining");
        assert_eq!(format!("{}", EngineState::ShuttingDown), "ShuttingDown");
    }

    #[test]
    fn test_syncing_states() {
        assert!(EngineState::Loading.is_syncing());
        assert!(EngineState::Draining.is_syncing());
        assert!(!EngineState::Idle.is_syncing());
        assert!(!EngineState::Created.is_syncing());
    }

    #[test]
    fn test_drain_report_absorb() {
        let mut total = DrainReport::default();
        total.absorb(DrainReport { passes: 1, confirmed: 2, retained: 1, ..Default::default() });
        total.absorb(DrainReport { passes: 1, dropped: 1, malformed: 1, ..Default::default() });
        assert_eq!(total.passes, 2);
        assert_eq!(total.processed(), 5);
        assert!(!total.skipped);
    }

    #[test]
    fn test_outcome_labels() {
        assert_eq!(RemoteOutcome::Queued.label(), "queued");
        assert_eq!(RemoteOutcome::Rejected(RemoteError::NotFound).label(), "rejected");
    }
}
