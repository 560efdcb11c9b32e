//! Remote store contract and error taxonomy.
//!
//! Callers branch on [`RemoteError`]: unreachable failures go to the queue,
//! everything else is final.

use async_trait::async_trait;
use thiserror::Error;

use crate::event::{Event, EventChanges};

/// Postgres unique-violation SQLSTATE, as relayed by PostgREST.
pub const UNIQUE_VIOLATION: &str = "23505";

/// Remote failures, classified so callers can tell "try later" from "never".
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RemoteError {
    /// Network failure, timeout, 5xx, or an open circuit. Retry via the queue.
    #[error("Remote store unreachable: {0}")]
    Unreachable(String),
    /// The server refused the request. Not retried.
    #[error("Remote store rejected request ({code}): {message}")]
    Rejected { code: String, message: String },
    #[error("Record not found on remote store")]
    NotFound,
    /// The server answered with something we could not decode
    #[error("Invalid response from remote store: {0}")]
    InvalidResponse(String),
    /// The record exists remotely under another owner. Carries the remote copy.
    #[error("Record '{}' is owned by another user", .0.id)]
    OwnedElsewhere(Box<Event>),
}

impl RemoteError {
    #[must_use]
    pub fn is_unreachable(&self) -> bool {
        matches!(self, Self::Unreachable(_))
    }

    /// Whether the server refused the write because the key already exists.
    #[must_use]
    pub fn is_duplicate(&self) -> bool {
        matches!(self, Self::Rejected { code, .. } if code == UNIQUE_VIOLATION)
    }
}

/// Outcome of a remote credential check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialCheck {
    Valid,
    Invalid,
    NotFound,
}

/// Hosted relational backend holding `events` and `user_profiles`.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn verify_credential(&self, username: &str, password: &str) -> Result<CredentialCheck, RemoteError>;

    /// Fails with [`RemoteError::Rejected`] (code 23505) if the username exists.
    async fn create_credential(&self, username: &str, password: &str) -> Result<(), RemoteError>;

    async fn list_events_by_owner(&self, owner: &str) -> Result<Vec<Event>, RemoteError>;

    /// Fetch one record by id, whoever owns it.
    async fn get_event(&self, id: &str) -> Result<Option<Event>, RemoteError>;

    /// Insert a new record and return the stored copy.
    async fn create_event(&self, event: &Event) -> Result<Event, RemoteError>;

    /// Apply partial changes and return the stored copy.
    async fn update_event(&self, id: &str, changes: &EventChanges) -> Result<Event, RemoteError>;

    /// Fails with [`RemoteError::NotFound`] if no record has this id.
    async fn delete_event(&self, id: &str) -> Result<(), RemoteError>;

    /// Cheap liveness check. Never errors.
    async fn probe_reachable(&self) -> bool;
}
