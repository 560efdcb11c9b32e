// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Sync engine coordinator.
//!
//! The [`SyncEngine`] ties the local durable store, the remote store and the
//! connectivity oracle together and owns the in-memory view handed to the UI.
//! Three protocols:
//!
//! - **Load** ([`SyncEngine::load`]): read local events, claim orphans, merge
//!   with the remote copy (remote wins), cache, sort
//! - **Mutate** ([`SyncEngine::create_event`], [`SyncEngine::update_event`],
//!   [`SyncEngine::delete_event`]): apply locally, then push or queue
//! - **Drain** ([`SyncEngine::drain`]): replay the queue, then reload
//!
//! # Lifecycle
//!
//! ```text
//! Created → Idle ⇄ Loading
//!             ⇅
//!          Draining        → ShuttingDown
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use gig_sync::{EngineState, EventDraft, EventType, SyncEngine, SyncEngineConfig};
//! use gig_sync::storage::memory::InMemoryLocalStore;
//! use chrono::NaiveDate;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let engine = SyncEngine::new(SyncEngineConfig::default(), Arc::new(InMemoryLocalStore::new()), None);
//! assert_eq!(engine.state(), EngineState::Created);
//!
//! engine.start_session("marta").await.unwrap();
//! let draft = EventDraft::new("Fira de Sant Jordi", EventType::Fair, NaiveDate::from_ymd_opt(2025, 4, 23).unwrap());
//! let applied = engine.create_event(draft).await.unwrap();
//! assert_eq!(engine.events().len(), 1);
//! # let _ = applied;
//! # }
//! ```

mod api;
mod drain;
mod lifecycle;
mod load;
mod types;

pub use load::merge_remote_wins;
pub use types::{Applied, DrainReport, EngineState, LoadReport, LoadSource, RemoteOutcome, SyncError};

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::{watch, Mutex as AsyncMutex};
use tracing::debug;

use crate::config::SyncEngineConfig;
use crate::connectivity::{ConnectivityOracle, ProbeHandle};
use crate::event::{sort_by_start_date, Event};
use crate::remote::rest::RestRemoteStore;
use crate::remote::traits::RemoteStore;
use crate::storage::sql::SqlLocalStore;
use crate::storage::traits::LocalStore;

/// Offline-first sync engine.
///
/// # Thread Safety
///
/// The engine is `Send + Sync`; share it behind an `Arc`. Drain passes are
/// serialized internally, everything else may run concurrently.
pub struct SyncEngine {
    pub(super) config: SyncEngineConfig,

    /// Local durable store (always written first)
    pub(super) local: Arc<dyn LocalStore>,

    /// Remote store; `None` when not configured
    pub(super) remote: Option<Arc<dyn RemoteStore>>,

    pub(super) connectivity: Arc<ConnectivityOracle>,

    /// Active user, the partition key for everything
    pub(super) session: RwLock<Option<String>>,

    /// Sorted by start date
    pub(super) view: RwLock<Vec<Event>>,

    /// Engine state (broadcast to watchers)
    pub(super) state: watch::Sender<EngineState>,

    /// Engine state receiver (for internal use)
    pub(super) state_rx: watch::Receiver<EngineState>,

    pub(super) activity: Mutex<Activity>,

    /// At most one drain pass in flight
    pub(super) drain_lock: AsyncMutex<()>,

    /// Set by every drain request; the running drain re-checks it
    pub(super) drain_requested: AtomicBool,

    pub(super) shutdown: watch::Sender<bool>,

    pub(super) probe: Mutex<Option<ProbeHandle>>,
}

impl SyncEngine {
    /// Create an engine over explicit store instances.
    pub fn new(config: SyncEngineConfig, local: Arc<dyn LocalStore>, remote: Option<Arc<dyn RemoteStore>>) -> Self {
        let (state, state_rx) = watch::channel(EngineState::Created);
        let (shutdown, _) = watch::channel(false);
        let connectivity = Arc::new(ConnectivityOracle::new(config.probe_staleness(), config.failure_threshold));

        Self {
            config,
            local,
            remote,
            connectivity,
            session: RwLock::new(None),
            view: RwLock::new(Vec::new()),
            state,
            state_rx,
            activity: Mutex::new(Activity { base: EngineState::Created, loading: 0, draining: 0 }),
            drain_lock: AsyncMutex::new(()),
            drain_requested: AtomicBool::new(false),
            shutdown,
            probe: Mutex::new(None),
        }
    }

    /// Open the SQLite store at `config.local_db_path` and, if configured,
    /// the REST remote.
    pub async fn open(config: SyncEngineConfig) -> Result<Self, SyncError> {
        let local = SqlLocalStore::open(&config.local_db_path).await?;
        let remote = RestRemoteStore::from_config(&config)?.map(|r| Arc::new(r) as Arc<dyn RemoteStore>);
        if remote.is_none() {
            debug!("Remote store not configured; running local-only");
        }
        Ok(Self::new(config, Arc::new(local), remote))
    }

    #[must_use]
    pub fn config(&self) -> &SyncEngineConfig {
        &self.config
    }

    #[must_use]
    pub fn state(&self) -> EngineState {
        *self.state_rx.borrow()
    }

    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<EngineState> {
        self.state_rx.clone()
    }

    /// Whether a load or drain is in flight.
    #[must_use]
    pub fn is_syncing(&self) -> bool {
        self.state().is_syncing()
    }

    #[must_use]
    pub fn connectivity(&self) -> &Arc<ConnectivityOracle> {
        &self.connectivity
    }

    #[must_use]
    pub fn is_online(&self) -> bool {
        self.remote.is_some() && self.connectivity.is_online()
    }

    #[must_use]
    pub fn remote_configured(&self) -> bool {
        self.remote.is_some()
    }

    #[must_use]
    pub fn local_store(&self) -> &Arc<dyn LocalStore> {
        &self.local
    }

    #[must_use]
    pub fn current_user(&self) -> Option<String> {
        self.session.read().clone()
    }

    /// Snapshot of the in-memory view, sorted by start date.
    #[must_use]
    pub fn events(&self) -> Vec<Event> {
        self.view.read().clone()
    }

    pub async fn queue_len(&self) -> Result<usize, SyncError> {
        Ok(self.local.queue_len().await?)
    }

    pub(super) fn require_user(&self) -> Result<String, SyncError> {
        self.session.read().clone().ok_or(SyncError::NoSession)
    }

    /// Remote store if configured and currently online.
    pub(super) fn online_remote(&self) -> Option<Arc<dyn RemoteStore>> {
        self.remote.as_ref().filter(|_| self.connectivity.is_online()).cloned()
    }

    pub(super) fn set_view(&self, mut events: Vec<Event>) {
        sort_by_start_date(&mut events);
        *self.view.write() = events;
    }

    pub(super) fn upsert_view(&self, event: Event) {
        let mut view = self.view.write();
        match view.iter_mut().find(|e| e.id == event.id) {
            Some(slot) => *slot = event,
            None => view.push(event),
        }
        sort_by_start_date(&mut view);
    }

    pub(super) fn remove_from_view(&self, id: &str) {
        self.view.write().retain(|e| e.id != id);
    }

    pub(super) async fn refresh_queue_depth(&self) {
        if let Ok(depth) = self.local.queue_len().await {
            crate::metrics::set_queue_depth(depth);
        }
    }

    /// Mark a load or drain as in flight until the guard drops.
    pub(super) fn enter_state(&self, state: EngineState) -> StateGuard<'_> {
        {
            let mut activity = self.activity.lock();
            match state {
                EngineState::Loading => activity.loading += 1,
                EngineState::Draining => activity.draining += 1,
                other => activity.base = other,
            }
        }
        self.publish_state();
        StateGuard { engine: self, state }
    }

    /// Set the resting state (Idle, ShuttingDown).
    pub(super) fn set_base_state(&self, state: EngineState) {
        self.activity.lock().base = state;
        self.publish_state();
    }

    fn publish_state(&self) {
        let next = self.activity.lock().effective();
        let changed = self.state.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
        if changed {
            crate::metrics::set_engine_state(&next.to_string());
        }
    }
}

/// Resting state plus in-flight protocol counts.
pub(super) struct Activity {
    base: EngineState,
    loading: usize,
    draining: usize,
}

impl Activity {
    fn effective(&self) -> EngineState {
        if self.base == EngineState::ShuttingDown {
            EngineState::ShuttingDown
        } else if self.draining > 0 {
            EngineState::Draining
        } else if self.loading > 0 {
            EngineState::Loading
        } else {
            self.base
        }
    }
}

pub(super) struct StateGuard<'a> {
    engine: &'a SyncEngine,
    state: EngineState,
}

impl Drop for StateGuard<'_> {
    fn drop(&mut self) {
        {
            let mut activity = self.engine.activity.lock();
            match self.state {
                EngineState::Loading => activity.loading = activity.loading.saturating_sub(1),
                EngineState::Draining => activity.draining = activity.draining.saturating_sub(1),
                _ => {}
            }
        }
        self.engine.publish_state();
    }
}
