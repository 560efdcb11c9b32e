// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Basic gig-sync usage example.
//!
//! Demonstrates:
//! 1. Opening a SQLite local store and an (in-process) remote store
//! 2. Registering and logging in
//! 3. Recording gigs while the remote is down
//! 4. Reconnecting: the queue drains and the view reloads
//! 5. Displaying metrics
//! 6. Clean shutdown
//!
//! # Run
//!
//! ```bash
//! RUST_LOG=gig_sync=debug cargo run --example basic_usage
//! ```

use std::sync::Arc;

use chrono::{NaiveDate, NaiveTime};
use gig_sync::remote::memory::InMemoryRemoteStore;
use gig_sync::storage::sql::SqlLocalStore;
use gig_sync::{
    CredentialService, EventDraft, EventPatch, EventType, LocalStore, RemoteStore, SyncEngine, SyncEngineConfig,
};
use metrics_util::debugging::{DebugValue, DebuggingRecorder, Snapshotter};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Install metrics recorder
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder.install().expect("failed to install metrics recorder");

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("gig_sync=info")))
        .with_target(false)
        .compact()
        .init();

    println!("\n╔═══════════════════════════════════════════════════════════════╗");
    println!("║              gig-sync: Basic Usage Example                    ║");
    println!("╚═══════════════════════════════════════════════════════════════╝\n");

    // ─────────────────────────────────────────────────────────────────────────
    // 1. Stores and engine
    // ─────────────────────────────────────────────────────────────────────────
    let dir = tempfile::tempdir()?;
    let db_path = dir.path().join("gig_sync.db").to_string_lossy().into_owned();
    println!("📦 Local store: {}", db_path);

    let local: Arc<dyn LocalStore> = Arc::new(SqlLocalStore::open(&db_path).await?);
    let backend = Arc::new(InMemoryRemoteStore::new());
    let remote: Arc<dyn RemoteStore> = backend.clone();

    let config = SyncEngineConfig { local_db_path: db_path.clone(), probe_interval_secs: 1, ..Default::default() };
    let engine = Arc::new(SyncEngine::new(config, local.clone(), Some(remote.clone())));
    engine.start();

    let runner = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move { engine.run().await })
    };

    // ─────────────────────────────────────────────────────────────────────────
    // 2. Register and log in
    // ─────────────────────────────────────────────────────────────────────────
    let auth = CredentialService::new(local.clone(), Some(remote.clone()));
    auth.register("marta", "s3cret").await?;
    let source = auth.login("marta", "s3cret").await?;
    println!("🔑 Logged in as marta ({:?})", source);

    engine.start_session("marta").await?;

    // ─────────────────────────────────────────────────────────────────────────
    // 3. Offline writes
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n📴 Remote goes down...");
    backend.set_reachable(false);
    engine.connectivity().check(remote.as_ref()).await;

    let t = |h, m| NaiveTime::from_hms_opt(h, m, 0).expect("valid time");
    let drafts = [
        EventDraft::new("Barça - Girona", EventType::Match, NaiveDate::from_ymd_opt(2025, 10, 5).expect("valid date"))
            .with_times(t(18, 30), t(23, 0))
            .with_payment_expected(90.0),
        EventDraft::new("Sala Apolo", EventType::Concert, NaiveDate::from_ymd_opt(2025, 10, 11).expect("valid date"))
            .with_times(t(22, 0), t(2, 0))
            .with_payment_expected(120.0),
        EventDraft::new("Fira de Sant Ponç", EventType::Fair, NaiveDate::from_ymd_opt(2025, 5, 10).expect("valid date"))
            .with_end_date(NaiveDate::from_ymd_opt(2025, 5, 12).expect("valid date")),
    ];

    let mut ids = Vec::new();
    for draft in drafts {
        let applied = engine.create_event(draft).await?;
        println!(
            "   ✏️  {} on {} ({:.2} h) → {}",
            applied.event.name,
            applied.event.start_date,
            applied.event.hours_worked,
            applied.outcome.label()
        );
        ids.push(applied.event.id);
    }

    let paid = engine
        .update_event(&ids[1], EventPatch { payment_real: Some(120.0), ..Default::default() })
        .await?;
    println!("   💶 {} paid: {}", paid.event.name, paid.event.is_paid);
    println!("   📋 Queue length: {}", engine.queue_len().await?);

    // ─────────────────────────────────────────────────────────────────────────
    // 4. Reconnect: the probe notices, the run loop drains
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n📶 Remote is back...");
    backend.set_reachable(true);
    for _ in 0..50 {
        if engine.queue_len().await? == 0 && !engine.is_syncing() {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    }
    println!("   📋 Queue length: {}", engine.queue_len().await?);
    println!("   ☁️  Remote records: {}", backend.len());

    println!("\n📅 View (sorted by start date):");
    for event in engine.events() {
        println!(
            "   └─ {} {:<22} {:>8} {:?}",
            event.start_date,
            event.name,
            event.event_type.as_str(),
            event.sync_status
        );
    }

    // ─────────────────────────────────────────────────────────────────────────
    // 5. Metrics
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n📊 Metrics:");
    dump_metrics(&snapshotter);

    // ─────────────────────────────────────────────────────────────────────────
    // 6. Shutdown
    // ─────────────────────────────────────────────────────────────────────────
    engine.shutdown().await;
    runner.await?;

    println!("\n╔═══════════════════════════════════════════════════════════════╗");
    println!("║                    Example complete!                          ║");
    println!("╚═══════════════════════════════════════════════════════════════╝\n");

    Ok(())
}

/// Dump all captured metrics
fn dump_metrics(snapshotter: &Snapshotter) {
    let snapshot = snapshotter.snapshot();

    let mut counters: Vec<_> = vec![];
    let mut gauges: Vec<_> = vec![];
    let mut histograms: Vec<_> = vec![];

    for (composite_key, _, _, value) in snapshot.into_vec() {
        let (_, key) = composite_key.into_parts();
        let name = key.name().to_string();
        let labels: Vec<_> = key.labels().map(|l| format!("{}={}", l.key(), l.value())).collect();
        let label_str = if labels.is_empty() { String::new() } else { format!("{{{}}}", labels.join(",")) };

        match value {
            DebugValue::Counter(v) => counters.push((name, label_str, v)),
            DebugValue::Gauge(v) => gauges.push((name, label_str, v.into_inner())),
            DebugValue::Histogram(samples) => {
                let count = samples.len();
                let sum: f64 = samples.iter().map(|v| v.into_inner()).sum();
                histograms.push((name, label_str, count, sum));
            }
        }
    }

    counters.sort();
    gauges.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
    histograms.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));

    if !counters.is_empty() {
        println!("   ┌─ Counters");
        for (name, labels, value) in &counters {
            println!("   │  └─ {}{} = {}", name, labels, value);
        }
    }
    if !gauges.is_empty() {
        println!("   ├─ Gauges");
        for (name, labels, value) in &gauges {
            println!("   │  └─ {}{} = {:.2}", name, labels, value);
        }
    }
    if !histograms.is_empty() {
        println!("   └─ Histograms");
        for (name, labels, count, sum) in &histograms {
            println!("      └─ {}{} count={} sum={:.4}", name, labels, count, sum);
        }
    }
    if counters.is_empty() && gauges.is_empty() && histograms.is_empty() {
        println!("   └─ (no metrics recorded)");
    }
}
