//! # Gig Sync
//!
//! Offline-first sync engine for a personal gig ledger: matches, concerts and
//! fairs a user worked, with hours and payments.
//!
//! ## Architecture
//!
//! Every write lands on the device first; the hosted backend is brought up to
//! date whenever it can be reached.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      View / UI (host app)                   │
//! │  • create / update / delete intents                         │
//! │  • sorted event list, syncing indicator                     │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         SyncEngine                          │
//! │  • Load & orphan claim, remote-wins merge                   │
//! │  • Optimistic mutations, queued when offline                │
//! │  • Serialized drain on reconnect, then reload               │
//! └─────────────────────────────────────────────────────────────┘
//!            │                                     │
//!            ▼                                     ▼
//! ┌──────────────────────────┐      ┌──────────────────────────┐
//! │   Local durable store    │      │      Remote store        │
//! │  • SQLite (events,       │      │  • PostgREST over HTTP   │
//! │    credentials, queue)   │      │  • circuit breaker       │
//! └──────────────────────────┘      └──────────────────────────┘
//!                                                  ▲
//!                                   ┌──────────────────────────┐
//!                                   │   Connectivity oracle    │
//!                                   │  • network flag + probe  │
//!                                   └──────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use gig_sync::{EventDraft, EventType, SyncEngine, SyncEngineConfig};
//! use chrono::NaiveDate;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = SyncEngineConfig {
//!         remote_url: Some("https://project.supabase.co".into()),
//!         remote_api_key: Some("anon-key".into()),
//!         ..Default::default()
//!     };
//!
//!     let engine = SyncEngine::open(config).await.expect("Failed to open");
//!     engine.start();
//!     engine.start_session("marta").await.expect("Failed to load");
//!
//!     let draft = EventDraft::new("Barça - Girona", EventType::Match, NaiveDate::from_ymd_opt(2025, 10, 5).unwrap());
//!     let applied = engine.create_event(draft).await.expect("Failed to create");
//!     println!("{} ({})", applied.event.name, applied.outcome.label());
//!
//!     engine.shutdown().await;
//! }
//! ```
//!
//! ## Modules
//!
//! - [`coordinator`]: The main [`SyncEngine`]
//! - [`event`]: Event model and derived-field rules
//! - [`queue`]: Pending-operation queue entries
//! - [`storage`]: Local durable stores (SQLite, memory)
//! - [`remote`]: Remote stores (REST, memory)
//! - [`connectivity`]: Online/offline oracle and probe task
//! - [`auth`]: Login and registration with offline fallback
//! - [`resilience`]: Circuit breaker, retry logic

pub mod auth;
pub mod config;
pub mod connectivity;
pub mod coordinator;
pub mod event;
pub mod metrics;
pub mod queue;
pub mod remote;
pub mod resilience;
pub mod storage;

// Note: We don't expose a `tracing` module to avoid conflict with the tracing crate

pub use auth::{AuthError, CredentialService, CredentialSource};
pub use config::{DrainPolicy, SyncEngineConfig};
pub use connectivity::{ConnectivityOracle, ProbeHandle};
pub use coordinator::{
    merge_remote_wins, Applied, DrainReport, EngineState, LoadReport, LoadSource, RemoteOutcome, SyncEngine, SyncError,
};
pub use event::{Event, EventChanges, EventDraft, EventError, EventPatch, EventType, SyncStatus};
pub use queue::{OpKind, PendingOperation, QueueEntry};
pub use remote::traits::{CredentialCheck, RemoteError, RemoteStore};
pub use resilience::circuit_breaker::{CircuitBreaker, CircuitConfig, CircuitError, CircuitState};
pub use resilience::retry::RetryConfig;
pub use storage::traits::{LocalStore, StorageError, UserCredential};
pub use metrics::LatencyTimer;
