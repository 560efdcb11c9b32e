//! Engine lifecycle management: start, sessions, run loop, shutdown.

use std::time::Duration;

use tracing::{debug, info, warn};

use super::types::{EngineState, LoadReport, SyncError};
use super::SyncEngine;

impl SyncEngine {
    /// Start the engine: spawn the connectivity probe if a remote store is
    /// configured. Idempotent.
    #[tracing::instrument(skip(self))]
    pub fn start(&self) {
        if let Some(remote) = &self.remote {
            let mut probe = self.probe.lock();
            if probe.is_none() {
                let interval = self.config.probe_interval();
                *probe = Some(self.connectivity.spawn_probe(remote.clone(), interval));
                info!(interval_secs = interval.as_secs(), "Connectivity probe started");
            }
        } else {
            info!("No remote store configured; running local-only");
        }
        self.set_base_state(EngineState::Idle);
    }

    /// Make `user` the active user, load their events and, if online with
    /// work queued, drain.
    ///
    /// Returns the report of the last load performed.
    #[tracing::instrument(skip(self))]
    pub async fn start_session(&self, user: &str) -> Result<LoadReport, SyncError> {
        let user = user.trim();
        if user.is_empty() {
            return Err(SyncError::NoSession);
        }

        let previous = self.session.write().replace(user.to_string());
        if previous.as_deref() != Some(user) {
            self.view.write().clear();
        }
        if self.state() == EngineState::Created {
            self.set_base_state(EngineState::Idle);
        }
        info!("Session started");

        if let Some(remote) = &self.remote {
            if !self.connectivity.is_online() {
                self.connectivity.check(remote.as_ref()).await;
            }
        }

        let report = self.load().await?;
        if self.is_online() && self.local.queue_len().await? > 0 {
            if let Some(drained) = self.drain().await? {
                if let Some(reload) = drained.reload {
                    return Ok(reload);
                }
            }
        }
        Ok(report)
    }

    /// Forget the active user and clear the view. Queued work stays on disk.
    pub fn end_session(&self) {
        if let Some(user) = self.session.write().take() {
            info!(user = %user, "Session ended");
        }
        self.view.write().clear();
    }

    /// Drive automatic drains until [`SyncEngine::shutdown`] is called.
    ///
    /// - connectivity turns online: drain (and reload)
    /// - every `drain_interval_secs`: drain if anything is queued
    #[tracing::instrument(skip(self))]
    pub async fn run(&self) {
        let mut online_rx = self.connectivity.subscribe();
        let mut shutdown_rx = self.shutdown.subscribe();

        let drain_every = self.config.drain_interval_secs;
        let mut drain_interval = tokio::time::interval(Duration::from_secs(drain_every.max(1)));
        drain_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // First tick fires immediately
        drain_interval.tick().await;

        info!("Sync engine running");
        while !*shutdown_rx.borrow() {
            tokio::select! {
                changed = online_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let online = *online_rx.borrow_and_update();
                    if online {
                        self.auto_drain("reconnect", false).await;
                    }
                }

                _ = drain_interval.tick(), if drain_every > 0 => {
                    self.auto_drain("periodic", true).await;
                }

                changed = shutdown_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        debug!("Run loop exited");
    }

    async fn auto_drain(&self, trigger: &'static str, only_if_queued: bool) {
        if self.current_user().is_none() || !self.is_online() {
            return;
        }
        if only_if_queued {
            match self.local.queue_len().await {
                Ok(0) => return,
                Ok(_) => {}
                Err(e) => {
                    warn!(trigger, error = %e, "Could not read queue length");
                    return;
                }
            }
        }

        match self.drain().await {
            Ok(Some(report)) => debug!(
                trigger,
                passes = report.passes,
                confirmed = report.confirmed,
                retained = report.retained,
                "Automatic drain finished"
            ),
            Ok(None) => {}
            Err(e) => warn!(trigger, error = %e, "Automatic drain failed"),
        }
    }

    /// Initiate graceful shutdown: stop the run loop and the probe.
    #[tracing::instrument(skip(self))]
    pub async fn shutdown(&self) {
        info!("Initiating sync engine shutdown...");
        self.set_base_state(EngineState::ShuttingDown);
        self.shutdown.send_replace(true);

        let probe = self.probe.lock().take();
        if let Some(probe) = probe {
            probe.stop().await;
        }
        info!("Sync engine shutdown complete");
    }
}
