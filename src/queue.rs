// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Pending-operation queue entries.
//!
//! Every local mutation that the remote store has not confirmed is recorded as
//! a [`PendingOperation`] in the local store's queue, in order of enqueue. The
//! queue is append-only from the mutation path and drained by the coordinator:
//!
//! ```text
//!   create/update/delete ──► enqueue(seq=N) ──► sync_queue table
//!                                                  │
//!                           drain (seq order) ◄────┘
//!                                │
//!             ┌──────────────────┼───────────────────┐
//!          success          unreachable         rejected/malformed
//!          ack (remove)     retain              ack + warn
//! ```
//!
//! Payloads are stored as JSON so a queue row survives schema drift; a row
//! that no longer decodes surfaces as [`QueueEntry::Malformed`] instead of
//! aborting the drain.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::event::{Event, EventChanges};

/// Kind of mutation recorded in the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpKind {
    Create,
    Update,
    Delete,
}

impl OpKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OpKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(Self::Create),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            other => Err(format!("unknown operation kind '{}'", other)),
        }
    }
}

/// One queued mutation.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingOperation {
    /// Monotonic sequence assigned by the local store
    pub seq: i64,
    pub kind: OpKind,
    pub event_id: String,
    /// Full event for create, changes for update, none for delete
    pub payload: Option<Value>,
    pub enqueued_at: DateTime<Utc>,
}

impl PendingOperation {
    /// Decode the payload into the replay it stands for.
    pub fn decode(&self) -> Result<Replay, String> {
        match self.kind {
            OpKind::Create => {
                let value = self.payload.clone().ok_or("create without payload")?;
                let event: Event = serde_json::from_value(value).map_err(|e| e.to_string())?;
                Ok(Replay::Create(event))
            }
            OpKind::Update => {
                let value = self.payload.clone().ok_or("update without payload")?;
                let changes: EventChanges = serde_json::from_value(value).map_err(|e| e.to_string())?;
                Ok(Replay::Update(changes))
            }
            OpKind::Delete => Ok(Replay::Delete),
        }
    }
}

/// A queue row as read back from the store.
#[derive(Debug, Clone, PartialEq)]
pub enum QueueEntry {
    Valid(PendingOperation),
    /// Row exists but cannot be interpreted; acknowledged and skipped on drain
    Malformed { seq: i64, reason: String },
}

impl QueueEntry {
    #[must_use]
    pub fn seq(&self) -> i64 {
        match self {
            Self::Valid(op) => op.seq,
            Self::Malformed { seq, .. } => *seq,
        }
    }
}

/// Decoded queue payload, ready to replay against the remote store.
#[derive(Debug, Clone, PartialEq)]
pub enum Replay {
    Create(Event),
    Update(EventChanges),
    Delete,
}

impl Replay {
    #[must_use]
    pub fn kind(&self) -> OpKind {
        match self {
            Self::Create(_) => OpKind::Create,
            Self::Update(_) => OpKind::Update,
            Self::Delete => OpKind::Delete,
        }
    }

    /// JSON payload to persist alongside the operation.
    pub fn payload(&self) -> Result<Option<Value>, serde_json::Error> {
        match self {
            Self::Create(event) => serde_json::to_value(event).map(Some),
            Self::Update(changes) => serde_json::to_value(changes).map(Some),
            Self::Delete => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{EventDraft, EventPatch, EventType};
    use chrono::NaiveDate;

    fn event() -> Event {
        let draft = EventDraft::new("Concert", EventType::Concert, NaiveDate::from_ymd_opt(2025, 4, 1).unwrap());
        Event::from_draft(draft, "anna", Utc::now()).unwrap()
    }

    fn op(kind: OpKind, payload: Option<Value>) -> PendingOperation {
        PendingOperation { seq: 1, kind, event_id: "e1".into(), payload, enqueued_at: Utc::now() }
    }

    #[test]
    fn test_kind_round_trip() {
        for kind in [OpKind::Create, OpKind::Update, OpKind::Delete] {
            assert_eq!(kind.as_str().parse::<OpKind>().unwrap(), kind);
        }
        assert!("upsert".parse::<OpKind>().is_err());
    }

    #[test]
    fn test_decode_create() {
        let e = event();
        let replay = Replay::Create(e.clone());
        let decoded = op(OpKind::Create, replay.payload().unwrap()).decode().unwrap();
        assert_eq!(decoded, Replay::Create(Event { sync_status: Default::default(), ..e }));
    }

    #[test]
    fn test_decode_update() {
        let mut e = event();
        let changes = e.apply_patch(EventPatch { payment_real: Some(30.0), ..Default::default() }, Utc::now()).unwrap();
        let payload = Replay::Update(changes.clone()).payload().unwrap();
        assert_eq!(op(OpKind::Update, payload).decode().unwrap(), Replay::Update(changes));
    }

    #[test]
    fn test_delete_needs_no_payload() {
        assert_eq!(Replay::Delete.payload().unwrap(), None);
        assert_eq!(op(OpKind::Delete, None).decode().unwrap(), Replay::Delete);
    }

    #[test]
    fn test_decode_rejects_missing_or_garbled_payload() {
        assert!(op(OpKind::Create, None).decode().is_err());
        assert!(op(OpKind::Update, Some(serde_json::json!({"name": 5}))).decode().is_err());
    }
}
