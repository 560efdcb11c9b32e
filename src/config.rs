//! Configuration for the sync engine.
//!
//! # Example
//!
//! ```
//! use gig_sync::{DrainPolicy, SyncEngineConfig};
//!
//! // Minimal config: local-only, every mutation is queued
//! let config = SyncEngineConfig::default();
//! assert!(!config.remote_configured());
//! assert_eq!(config.probe_interval_secs, 30);
//!
//! // Full config
//! let config = SyncEngineConfig {
//!     remote_url: Some("https://xyz.supabase.co".into()),
//!     remote_api_key: Some("anon-key".into()),
//!     local_db_path: "/var/lib/gigs/local.db".into(),
//!     drain_policy: DrainPolicy::ClearAll,
//!     ..Default::default()
//! };
//! assert!(config.remote_configured());
//! ```

use std::time::Duration;

use serde::Deserialize;

/// What happens to the queue after a drain pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DrainPolicy {
    /// Keep operations that failed as unreachable; acknowledge the rest
    #[default]
    RetainFailed,
    /// Empty the queue after every pass regardless of per-item outcome
    ClearAll,
}

/// Configuration for the sync engine.
///
/// All fields have defaults. Without both `remote_url` and `remote_api_key`
/// the engine runs local-only.
#[derive(Debug, Clone, Deserialize)]
pub struct SyncEngineConfig {
    /// Remote project URL (e.g., "https://xyz.supabase.co")
    #[serde(default)]
    pub remote_url: Option<String>,

    /// Remote API key, sent as `apikey` and bearer token
    #[serde(default)]
    pub remote_api_key: Option<String>,

    /// SQLite file for the local durable store
    #[serde(default = "default_local_db_path")]
    pub local_db_path: String,

    /// Liveness probe interval
    #[serde(default = "default_probe_interval_secs")]
    pub probe_interval_secs: u64,

    /// A successful probe older than this no longer counts as online
    #[serde(default = "default_probe_staleness_secs")]
    pub probe_staleness_secs: u64,

    /// Consecutive unreachable failures before the remote is considered down
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    #[serde(default)]
    pub drain_policy: DrainPolicy,

    /// Periodic drain retry for retained operations (0 = disabled)
    #[serde(default = "default_drain_interval_secs")]
    pub drain_interval_secs: u64,

    /// Per-request timeout for remote calls
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_local_db_path() -> String { "./gig_sync.db".to_string() }
fn default_probe_interval_secs() -> u64 { 30 }
fn default_probe_staleness_secs() -> u64 { 90 }
fn default_failure_threshold() -> u32 { 3 }
fn default_drain_interval_secs() -> u64 { 60 }
fn default_request_timeout_ms() -> u64 { 10_000 }

impl Default for SyncEngineConfig {
    fn default() -> Self {
        Self {
            remote_url: None,
            remote_api_key: None,
            local_db_path: default_local_db_path(),
            probe_interval_secs: default_probe_interval_secs(),
            probe_staleness_secs: default_probe_staleness_secs(),
            failure_threshold: default_failure_threshold(),
            drain_policy: DrainPolicy::default(),
            drain_interval_secs: default_drain_interval_secs(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl SyncEngineConfig {
    /// Defaults overlaid with `GIG_SYNC_REMOTE_URL`, `GIG_SYNC_REMOTE_KEY`
    /// and `GIG_SYNC_DB_PATH` when set and non-empty.
    #[must_use]
    pub fn from_env() -> Self {
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.trim().is_empty());
        let mut config = Self::default();
        if let Some(url) = var("GIG_SYNC_REMOTE_URL") {
            config.remote_url = Some(url);
        }
        if let Some(key) = var("GIG_SYNC_REMOTE_KEY") {
            config.remote_api_key = Some(key);
        }
        if let Some(path) = var("GIG_SYNC_DB_PATH") {
            config.local_db_path = path;
        }
        config
    }

    /// Whether both remote URL and key are present.
    #[must_use]
    pub fn remote_configured(&self) -> bool {
        let set = |v: &Option<String>| v.as_deref().is_some_and(|s| !s.trim().is_empty());
        set(&self.remote_url) && set(&self.remote_api_key)
    }

    #[must_use]
    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_secs)
    }

    #[must_use]
    pub fn probe_staleness(&self) -> Duration {
        Duration::from_secs(self.probe_staleness_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SyncEngineConfig::default();
        assert_eq!(config.local_db_path, "./gig_sync.db");
        assert_eq!(config.probe_staleness(), Duration::from_secs(90));
        assert_eq!(config.failure_threshold, 3);
        assert_eq!(config.drain_policy, DrainPolicy::RetainFailed);
        assert_eq!(config.request_timeout_ms, 10_000);
    }

    #[test]
    fn test_deserialize_partial_uses_defaults() {
        let config: SyncEngineConfig = serde_json::from_str(
            r#"{"remote_url": "https://x.supabase.co", "drain_policy": "clear_all", "probe_interval_secs": 5}"#,
        )
        .unwrap();
        assert_eq!(config.drain_policy, DrainPolicy::ClearAll);
        assert_eq!(config.probe_interval(), Duration::from_secs(5));
        assert_eq!(config.drain_interval_secs, 60);
        assert!(!config.remote_configured());
    }

    #[test]
    fn test_blank_remote_is_not_configured() {
        let config = SyncEngineConfig {
            remote_url: Some("https://x.supabase.co".into()),
            remote_api_key: Some("  ".into()),
            ..Default::default()
        };
        assert!(!config.remote_configured());
    }
}
