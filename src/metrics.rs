// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics instrumentation for gig-sync.
//!
//! Uses the `metrics` crate for backend-agnostic metrics collection.
//! The host application is responsible for choosing the exporter.
//!
//! # Metric Naming Convention
//! - `gig_sync_` prefix for all metrics
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Labels
//! - `kind`: create, update, delete
//! - `operation`: remote call name (create_event, list_events, ...)
//! - `outcome`: confirmed, queued, rejected, success, unreachable, ...

use metrics::{counter, gauge, histogram};
use std::time::{Duration, Instant};

/// Record a user mutation and where it ended up
pub fn record_mutation(kind: &str, outcome: &str) {
    counter!(
        "gig_sync_mutations_total",
        "kind" => kind.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Set pending-operation queue depth
pub fn set_queue_depth(depth: usize) {
    gauge!("gig_sync_queue_depth").set(depth as f64);
}

/// Record the outcome of replaying one queued operation
pub fn record_drain_item(kind: &str, outcome: &str) {
    counter!(
        "gig_sync_drain_items_total",
        "kind" => kind.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Record a completed drain pass
pub fn record_drain(duration: Duration, replayed: usize) {
    counter!("gig_sync_drains_total").increment(1);
    histogram!("gig_sync_drain_seconds").record(duration.as_secs_f64());
    histogram!("gig_sync_drain_batch_size").record(replayed as f64);
}

/// Record a remote call outcome and latency
pub fn record_remote_call(operation: &str, outcome: &str, duration: Duration) {
    counter!(
        "gig_sync_remote_calls_total",
        "operation" => operation.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
    histogram!(
        "gig_sync_remote_call_seconds",
        "operation" => operation.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Set connectivity (1 = online, 0 = offline)
pub fn set_online(online: bool) {
    gauge!("gig_sync_online").set(if online { 1.0 } else { 0.0 });
}

/// Record a liveness probe result
pub fn record_probe(success: bool) {
    let outcome = if success { "success" } else { "failure" };
    counter!("gig_sync_probes_total", "outcome" => outcome).increment(1);
}

/// Record orphans claimed during a load
pub fn record_orphans_claimed(count: usize) {
    counter!("gig_sync_orphans_claimed_total").increment(count as u64);
}

/// Record a load and which source served it
pub fn record_load(source: &str, events: usize) {
    counter!("gig_sync_loads_total", "source" => source.to_string()).increment(1);
    gauge!("gig_sync_view_events").set(events as f64);
}

/// Record circuit breaker call outcome
pub fn record_circuit_breaker_call(circuit: &str, outcome: &str) {
    counter!(
        "gig_sync_circuit_breaker_calls_total",
        "circuit" => circuit.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Set engine state (for monitoring state machine transitions)
pub fn set_engine_state(state: &str) {
    counter!(
        "gig_sync_state_transitions_total",
        "state" => state.to_string()
    )
    .increment(1);
}

/// Record how long a protocol took
pub fn record_latency(operation: &str, duration: Duration) {
    histogram!(
        "gig_sync_operation_seconds",
        "operation" => operation.to_string()
    )
    .record(duration.as_secs_f64());
}

/// A timing guard that records latency on drop
pub struct LatencyTimer {
    operation: &'static str,
    start: Instant,
}

impl LatencyTimer {
    pub fn new(operation: &'static str) -> Self {
        Self { operation, start: Instant::now() }
    }
}

impl Drop for LatencyTimer {
    fn drop(&mut self) {
        record_latency(self.operation, self.start.elapsed());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use metrics_util::debugging::{DebugValue, DebuggingRecorder};

    #[test]
    fn test_functions_do_not_panic_without_recorder() {
        record_mutation("create", "queued");
        set_queue_depth(3);
        record_drain_item("update", "unreachable");
        record_drain(Duration::from_millis(12), 4);
        record_remote_call("create_event", "success", Duration::from_millis(30));
        set_online(true);
        record_probe(false);
        record_orphans_claimed(2);
        record_load("merged", 10);
        record_circuit_breaker_call("remote", "rejected");
        set_engine_state("draining");
        let _timer = LatencyTimer::new("load");
    }

    #[test]
    fn test_counters_reach_recorder() {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();

        metrics::with_local_recorder(&recorder, || {
            record_mutation("create", "queued");
            record_mutation("create", "queued");
            set_queue_depth(7);
        });

        let snapshot = snapshotter.snapshot().into_vec();
        let mutations = snapshot
            .iter()
            .find(|(key, ..)| key.key().name() == "gig_sync_mutations_total")
            .map(|(.., value)| value.clone());
        assert_eq!(mutations, Some(DebugValue::Counter(2)).as_ref());

        let depth = snapshot
            .iter()
            .find(|(key, ..)| key.key().name() == "gig_sync_queue_depth")
            .map(|(.., value)| value.clone());
        assert!(matches!(depth, Some(DebugValue::Gauge(v)) if v.into_inner() == 7.0));
    }
}
