// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Connectivity oracle.
//!
//! "Online" means all of:
//! - the host reports the network as up ([`ConnectivityOracle::set_network_online`])
//! - the remote is considered reachable (last probe succeeded, and fewer than
//!   `failure_threshold` consecutive calls failed as unreachable since)
//! - the last success is younger than the staleness window
//!
//! The oracle starts offline and only goes online after a successful probe.
//!
//! ```text
//!   network flag ──┐
//!   probe task  ───┼──► is_online() ──► watch::Receiver<bool> ──► SyncEngine::run
//!   call outcomes ─┘                                                (drain on rise)
//! ```
//!
//! The periodic probe is a task owned by a [`ProbeHandle`]; stopping or
//! dropping the handle ends it.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::{watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::remote::traits::RemoteStore;

pub struct ConnectivityOracle {
    network_online: AtomicBool,
    reachable: AtomicBool,
    /// Consecutive unreachable outcomes
    failures: AtomicU32,
    failure_threshold: u32,
    last_success: Mutex<Option<Instant>>,
    staleness: Duration,
    /// Serializes probes
    checking: AsyncMutex<()>,
    online_tx: watch::Sender<bool>,
}

impl ConnectivityOracle {
    pub fn new(staleness: Duration, failure_threshold: u32) -> Self {
        let (online_tx, _) = watch::channel(false);
        Self {
            network_online: AtomicBool::new(true),
            reachable: AtomicBool::new(false),
            failures: AtomicU32::new(0),
            failure_threshold: failure_threshold.max(1),
            last_success: Mutex::new(None),
            staleness,
            checking: AsyncMutex::new(()),
            online_tx,
        }
    }

    /// Host-level network state (e.g. from an OS reachability callback).
    pub fn set_network_online(&self, online: bool) {
        self.network_online.store(online, Ordering::Release);
        debug!(online, "Network state changed");
        self.publish();
    }

    #[must_use]
    pub fn network_online(&self) -> bool {
        self.network_online.load(Ordering::Acquire)
    }

    /// A remote call or probe succeeded.
    pub fn record_success(&self) {
        self.failures.store(0, Ordering::Release);
        self.reachable.store(true, Ordering::Release);
        *self.last_success.lock() = Some(Instant::now());
        self.publish();
    }

    /// A remote call failed as unreachable.
    pub fn record_failure(&self) {
        let failures = self.failures.fetch_add(1, Ordering::AcqRel) + 1;
        if failures >= self.failure_threshold {
            self.reachable.store(false, Ordering::Release);
        }
        self.publish();
    }

    #[must_use]
    pub fn failure_count(&self) -> u32 {
        self.failures.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn is_online(&self) -> bool {
        if !self.network_online() || !self.reachable.load(Ordering::Acquire) {
            return false;
        }
        let last_success = *self.last_success.lock();
        last_success.is_some_and(|at| at.elapsed() <= self.staleness)
    }

    /// Watch online/offline transitions.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.online_tx.subscribe()
    }

    /// Probe the remote now and fold the result in. Returns the new online state.
    pub async fn check(&self, remote: &dyn RemoteStore) -> bool {
        let _guard = self.checking.lock().await;

        if !self.network_online() {
            self.publish();
            return false;
        }

        let ok = remote.probe_reachable().await;
        crate::metrics::record_probe(ok);
        if ok {
            self.record_success();
        } else {
            // A failed probe is conclusive
            self.failures.fetch_add(1, Ordering::AcqRel);
            self.reachable.store(false, Ordering::Release);
            self.publish();
        }
        self.is_online()
    }

    /// Probe every `interval` until the handle is stopped or dropped.
    pub fn spawn_probe(self: &Arc<Self>, remote: Arc<dyn RemoteStore>, interval: Duration) -> ProbeHandle {
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let oracle = Arc::clone(self);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        oracle.check(remote.as_ref()).await;
                    }
                    changed = stop_rx.changed() => {
                        if changed.is_err() || *stop_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!("Connectivity probe stopped");
        });

        ProbeHandle { stop_tx, task }
    }

    fn publish(&self) {
        let online = self.is_online();
        crate::metrics::set_online(online);
        let changed = self.online_tx.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });
        if changed {
            info!(online, "Connectivity changed");
        }
    }
}

/// Owner of the periodic probe task.
pub struct ProbeHandle {
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ProbeHandle {
    /// Stop the probe and wait for the task to exit.
    pub async fn stop(self) {
        let _ = self.stop_tx.send(true);
        let _ = self.task.await;
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}
