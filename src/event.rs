// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Event data model.
//!
//! An [`Event`] is the unit that flows through the sync engine: a gig, market
//! or concert with the hours worked and what it paid. Three shapes describe
//! changes to it:
//!
//! - [`EventDraft`]: what the user fills in to create an event
//! - [`EventPatch`]: a field-level partial update the user asks for
//! - [`EventChanges`]: the normalized patch replayed against the remote store,
//!   carrying the derived fields (`hours_worked`, `updated_at`)
//!
//! Derived fields are never set directly. `hours_worked` follows the start and
//! end times, and `is_paid` is forced on whenever `payment_real` is positive.
//!
//! # Example
//!
//! ```
//! use gig_sync::{Event, EventDraft, EventType};
//! use chrono::{NaiveDate, NaiveTime, Utc};
//!
//! let draft = EventDraft::new("Final de copa", EventType::Match, NaiveDate::from_ymd_opt(2025, 5, 3).unwrap())
//!     .with_times(NaiveTime::from_hms_opt(22, 0, 0).unwrap(), NaiveTime::from_hms_opt(2, 0, 0).unwrap());
//!
//! let event = Event::from_draft(draft, "marta", Utc::now()).unwrap();
//! assert_eq!(event.hours_worked, 4.0);
//! assert_eq!(event.end_date, event.start_date);
//! assert_eq!(event.owner.as_deref(), Some("marta"));
//! ```

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Validation failures when building or patching an event.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EventError {
    #[error("Event name must not be empty")]
    EmptyName,
    #[error("End date {end} is before start date {start}")]
    EndBeforeStart { start: NaiveDate, end: NaiveDate },
    #[error("Invalid amount for {field}: {value} (must be a non-negative number)")]
    InvalidAmount { field: &'static str, value: f64 },
    #[error("Event is owned by '{owner}' and cannot be reassigned")]
    OwnerImmutable { owner: String },
    #[error("Unknown event type: {0}")]
    UnknownType(String),
    #[error("Unknown sync status: {0}")]
    UnknownSyncStatus(String),
}

/// Kind of engagement. Serialized with the names the shared backend uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    #[serde(rename = "Partido", alias = "Match")]
    Match,
    #[serde(rename = "Concierto", alias = "Concert")]
    Concert,
    #[serde(rename = "Fira", alias = "Fair")]
    Fair,
}

impl EventType {
    /// Wire name of the type.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Match => "Partido",
            Self::Concert => "Concierto",
            Self::Fair => "Fira",
        }
    }

    /// Only fairs span more than one day.
    #[must_use]
    pub fn allows_multi_day(&self) -> bool {
        matches!(self, Self::Fair)
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = EventError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Partido" | "Match" => Ok(Self::Match),
            "Concierto" | "Concert" => Ok(Self::Concert),
            "Fira" | "Fair" => Ok(Self::Fair),
            other => Err(EventError::UnknownType(other.to_string())),
        }
    }
}

/// Local-only replication state of an event.
///
/// `Pending → Synced` on a confirmed remote write, `Synced → Pending` on any
/// local mutation not yet confirmed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    #[default]
    Pending,
    Synced,
}

impl SyncStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Synced => "synced",
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncStatus {
    type Err = EventError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "synced" => Ok(Self::Synced),
            other => Err(EventError::UnknownSyncStatus(other.to_string())),
        }
    }
}

/// A calendar event with payment and hours tracking.
///
/// `sync_status` is local-only and never serialized, so the same value can be
/// sent to the remote store as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Client-assigned UUID, immutable once created
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    #[serde(default, with = "clock_time")]
    pub start_time: Option<NaiveTime>,
    #[serde(default, with = "clock_time")]
    pub end_time: Option<NaiveTime>,
    /// Derived from `start_time`/`end_time`, wraps past midnight
    #[serde(default, deserialize_with = "zero_if_null")]
    pub hours_worked: f64,
    #[serde(default, deserialize_with = "zero_if_null")]
    pub payment_expected: f64,
    #[serde(default, deserialize_with = "zero_if_null")]
    pub payment_real: f64,
    #[serde(default, deserialize_with = "false_if_null")]
    pub is_paid: bool,
    /// Owning username; unset for legacy orphans
    #[serde(default, rename = "username")]
    pub owner: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing)]
    pub sync_status: SyncStatus,
}

impl Event {
    /// Build a new event from a draft, attributed to `owner`.
    pub fn from_draft(draft: EventDraft, owner: &str, now: DateTime<Utc>) -> Result<Self, EventError> {
        if draft.name.trim().is_empty() {
            return Err(EventError::EmptyName);
        }
        check_amount("payment_expected", draft.payment_expected)?;
        check_amount("payment_real", draft.payment_real)?;

        let end_date = match draft.end_date {
            Some(end) if draft.event_type.allows_multi_day() => end,
            _ => draft.start_date,
        };
        if end_date < draft.start_date {
            return Err(EventError::EndBeforeStart { start: draft.start_date, end: end_date });
        }

        Ok(Self {
            id: Uuid::new_v4().to_string(),
            name: draft.name,
            event_type: draft.event_type,
            start_date: draft.start_date,
            end_date,
            start_time: draft.start_time,
            end_time: draft.end_time,
            hours_worked: hours_for(draft.start_time, draft.end_time),
            payment_expected: draft.payment_expected,
            payment_real: draft.payment_real,
            is_paid: draft.is_paid || draft.payment_real > 0.0,
            owner: Some(owner.to_string()),
            created_at: now,
            updated_at: now,
            sync_status: SyncStatus::Pending,
        })
    }

    /// Whether this event has no owner yet.
    #[must_use]
    pub fn is_orphan(&self) -> bool {
        self.owner.as_deref().map_or(true, str::is_empty)
    }

    /// Assign an orphan to `owner`. Returns `false` (and changes nothing) if the
    /// event already has an owner.
    pub fn claim(&mut self, owner: &str, now: DateTime<Utc>) -> bool {
        if !self.is_orphan() {
            return false;
        }
        self.owner = Some(owner.to_string());
        self.updated_at = now;
        self.sync_status = SyncStatus::Pending;
        true
    }

    /// Apply a user patch, enforcing the model invariants.
    ///
    /// Returns the normalized changes to replay remotely. On error the event is
    /// left untouched.
    pub fn apply_patch(&mut self, patch: EventPatch, now: DateTime<Utc>) -> Result<EventChanges, EventError> {
        if let Some(name) = &patch.name {
            if name.trim().is_empty() {
                return Err(EventError::EmptyName);
            }
        }
        if let Some(value) = patch.payment_expected {
            check_amount("payment_expected", value)?;
        }
        if let Some(value) = patch.payment_real {
            check_amount("payment_real", value)?;
        }
        if let (Some(current), Some(requested)) = (self.owner.as_deref(), patch.owner.as_deref()) {
            if !current.is_empty() && current != requested {
                return Err(EventError::OwnerImmutable { owner: current.to_string() });
            }
        }

        let mut next = self.clone();
        let mut normalized = patch.clone();

        if let Some(name) = patch.name {
            next.name = name;
        }
        if let Some(event_type) = patch.event_type {
            next.event_type = event_type;
        }
        if let Some(start) = patch.start_date {
            next.start_date = start;
        }
        if let Some(end) = patch.end_date {
            next.end_date = end;
        }
        if !next.event_type.allows_multi_day() && next.end_date != next.start_date {
            next.end_date = next.start_date;
            normalized.end_date = Some(next.start_date);
        }
        if next.end_date < next.start_date {
            return Err(EventError::EndBeforeStart { start: next.start_date, end: next.end_date });
        }

        let times_changed = patch.start_time.is_some() || patch.end_time.is_some();
        if let Some(start) = patch.start_time {
            next.start_time = Some(start);
        }
        if let Some(end) = patch.end_time {
            next.end_time = Some(end);
        }
        if let Some(value) = patch.payment_expected {
            next.payment_expected = value;
        }
        if let Some(paid) = patch.is_paid {
            next.is_paid = paid;
        }
        if let Some(value) = patch.payment_real {
            next.payment_real = value;
            if value > 0.0 {
                next.is_paid = true;
                normalized.is_paid = Some(true);
            }
        }
        if let Some(owner) = patch.owner {
            next.owner = Some(owner);
        }

        let hours_worked = if times_changed {
            next.hours_worked = hours_for(next.start_time, next.end_time);
            Some(next.hours_worked)
        } else {
            None
        };

        next.updated_at = now;
        next.sync_status = SyncStatus::Pending;
        *self = next;

        Ok(EventChanges { patch: normalized, hours_worked, updated_at: now })
    }

    /// Apply already-normalized changes as received from a replay, without
    /// re-running validation.
    pub fn merge_changes(&mut self, changes: &EventChanges) {
        let patch = &changes.patch;
        if let Some(name) = &patch.name {
            self.name = name.clone();
        }
        if let Some(event_type) = patch.event_type {
            self.event_type = event_type;
        }
        if let Some(start) = patch.start_date {
            self.start_date = start;
        }
        if let Some(end) = patch.end_date {
            self.end_date = end;
        }
        if let Some(start) = patch.start_time {
            self.start_time = Some(start);
        }
        if let Some(end) = patch.end_time {
            self.end_time = Some(end);
        }
        if let Some(value) = patch.payment_expected {
            self.payment_expected = value;
        }
        if let Some(value) = patch.payment_real {
            self.payment_real = value;
        }
        if let Some(paid) = patch.is_paid {
            self.is_paid = paid;
        }
        if let Some(owner) = &patch.owner {
            self.owner = Some(owner.clone());
        }
        if let Some(hours) = changes.hours_worked {
            self.hours_worked = hours;
        }
        self.updated_at = changes.updated_at;
    }
}

/// User input for a new event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventDraft {
    pub name: String,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub start_date: NaiveDate,
    /// Only honoured for fairs; every other type is single-day
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
    #[serde(default, with = "clock_time")]
    pub start_time: Option<NaiveTime>,
    #[serde(default, with = "clock_time")]
    pub end_time: Option<NaiveTime>,
    #[serde(default)]
    pub payment_expected: f64,
    #[serde(default)]
    pub payment_real: f64,
    #[serde(default)]
    pub is_paid: bool,
}

impl EventDraft {
    pub fn new(name: impl Into<String>, event_type: EventType, start_date: NaiveDate) -> Self {
        Self {
            name: name.into(),
            event_type,
            start_date,
            end_date: None,
            start_time: None,
            end_time: None,
            payment_expected: 0.0,
            payment_real: 0.0,
            is_paid: false,
        }
    }

    #[must_use]
    pub fn with_end_date(mut self, end_date: NaiveDate) -> Self {
        self.end_date = Some(end_date);
        self
    }

    #[must_use]
    pub fn with_times(mut self, start: NaiveTime, end: NaiveTime) -> Self {
        self.start_time = Some(start);
        self.end_time = Some(end);
        self
    }

    #[must_use]
    pub fn with_payment_expected(mut self, amount: f64) -> Self {
        self.payment_expected = amount;
        self
    }
}

/// Field-level partial update. `None` leaves a field untouched.
///
/// No `hours_worked` field: it is derived from the times.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub event_type: Option<EventType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<NaiveDate>,
    #[serde(default, with = "clock_time", skip_serializing_if = "Option::is_none")]
    pub start_time: Option<NaiveTime>,
    #[serde(default, with = "clock_time", skip_serializing_if = "Option::is_none")]
    pub end_time: Option<NaiveTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_expected: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_real: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_paid: Option<bool>,
    #[serde(default, rename = "username", skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
}

impl EventPatch {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Normalized update payload sent to the remote store and kept in the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventChanges {
    #[serde(flatten)]
    pub patch: EventPatch,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hours_worked: Option<f64>,
    pub updated_at: DateTime<Utc>,
}

impl EventChanges {
    /// Every mutable column of `event`, used to overwrite a remote row wholesale.
    #[must_use]
    pub fn full(event: &Event) -> Self {
        Self {
            patch: EventPatch {
                name: Some(event.name.clone()),
                event_type: Some(event.event_type),
                start_date: Some(event.start_date),
                end_date: Some(event.end_date),
                start_time: event.start_time,
                end_time: event.end_time,
                payment_expected: Some(event.payment_expected),
                payment_real: Some(event.payment_real),
                is_paid: Some(event.is_paid),
                owner: event.owner.clone(),
            },
            hours_worked: Some(event.hours_worked),
            updated_at: event.updated_at,
        }
    }
}

/// Hours between two clock times, wrapping past midnight, rounded to 2 decimals.
///
/// ```
/// use gig_sync::event::hours_between;
/// use chrono::NaiveTime;
///
/// let t = |h, m| NaiveTime::from_hms_opt(h, m, 0).unwrap();
/// assert_eq!(hours_between(t(9, 0), t(17, 30)), 8.5);
/// assert_eq!(hours_between(t(22, 0), t(2, 0)), 4.0);
/// ```
#[must_use]
pub fn hours_between(start: NaiveTime, end: NaiveTime) -> f64 {
    let mut minutes = end.signed_duration_since(start).num_minutes();
    if minutes < 0 {
        minutes += 24 * 60;
    }
    (minutes as f64 / 60.0 * 100.0).round() / 100.0
}

fn hours_for(start: Option<NaiveTime>, end: Option<NaiveTime>) -> f64 {
    match (start, end) {
        (Some(start), Some(end)) => hours_between(start, end),
        _ => 0.0,
    }
}

fn check_amount(field: &'static str, value: f64) -> Result<(), EventError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(EventError::InvalidAmount { field, value })
    }
}

/// Parse a clock time written as `HH:MM` or `HH:MM:SS`.
#[must_use]
pub fn parse_clock_time(s: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(s, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M:%S"))
        .ok()
}

/// Sort events by start date, keeping the existing order among ties.
pub fn sort_by_start_date(events: &mut [Event]) {
    events.sort_by_key(|e| e.start_date);
}

fn zero_if_null<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(0.0))
}

fn false_if_null<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    Ok(Option::<bool>::deserialize(deserializer)?.unwrap_or(false))
}

/// Optional clock times as `HH:MM`; empty strings and nulls mean unset.
mod clock_time {
    use chrono::NaiveTime;
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<NaiveTime>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(time) => serializer.serialize_str(&time.format("%H:%M").to_string()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<NaiveTime>, D::Error> {
        match Option::<String>::deserialize(deserializer)? {
            None => Ok(None),
            Some(s) if s.trim().is_empty() => Ok(None),
            Some(s) => super::parse_clock_time(s.trim())
                .map(Some)
                .ok_or_else(|| D::Error::custom(format!("invalid clock time '{}'", s))),
        }
    }
}
