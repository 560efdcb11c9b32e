// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! PostgREST (Supabase-style) remote store client.
//!
//! ```text
//! GET    /rest/v1/user_profiles?select=password&username=eq.<u>   verify
//! POST   /rest/v1/user_profiles                                    register
//! HEAD   /rest/v1/user_profiles?select=count                      probe
//! GET    /rest/v1/events?username=eq.<u>&order=start_date.asc     list
//! POST   /rest/v1/events                                          create
//! PATCH  /rest/v1/events?id=eq.<id>                               update
//! DELETE /rest/v1/events?id=eq.<id>                               delete
//! ```
//!
//! Every call except the probe goes through a [`CircuitBreaker`]. Only
//! unreachability counts against the breaker: a rejected insert says nothing
//! about backend health.
//!
//! # Error classification
//!
//! | Response                          | Error                          |
//! |-----------------------------------|--------------------------------|
//! | connect/timeout, 5xx, 408, 429    | `Unreachable`                  |
//! | circuit open                      | `Unreachable`                  |
//! | 404, PostgREST `PGRST116`         | `NotFound`                     |
//! | other 4xx                         | `Rejected { code, message }`   |
//! | body that does not decode         | `InvalidResponse`              |

use std::future::Future;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use super::traits::{CredentialCheck, RemoteError, RemoteStore};
use crate::config::SyncEngineConfig;
use crate::event::{Event, EventChanges};
use crate::resilience::circuit_breaker::{CircuitBreaker, CircuitConfig, CircuitError};

/// PostgREST error body
#[derive(Debug, Deserialize)]
struct PostgrestError {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PasswordRow {
    password: String,
}

pub struct RestRemoteStore {
    client: Client,
    base_url: String,
    api_key: String,
    circuit: CircuitBreaker,
}

impl RestRemoteStore {
    /// `url` is the project root, e.g. `https://xyz.supabase.co`.
    pub fn new(url: &str, api_key: &str, timeout: Duration) -> Result<Self, RemoteError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RemoteError::Unreachable(format!("HTTP client init failed: {}", e)))?;

        Ok(Self {
            client,
            base_url: format!("{}/rest/v1", url.trim_end_matches('/')),
            api_key: api_key.to_string(),
            circuit: CircuitBreaker::new("remote", CircuitConfig::remote()),
        })
    }

    /// Build from config; `None` when the remote is not configured.
    pub fn from_config(config: &SyncEngineConfig) -> Result<Option<Self>, RemoteError> {
        match (config.remote_url.as_deref(), config.remote_api_key.as_deref()) {
            (Some(url), Some(key)) if !url.trim().is_empty() && !key.trim().is_empty() => {
                Self::new(url, key, Duration::from_millis(config.request_timeout_ms)).map(Some)
            }
            _ => Ok(None),
        }
    }

    #[must_use]
    pub fn circuit(&self) -> &CircuitBreaker {
        &self.circuit
    }

    fn request(&self, method: reqwest::Method, table: &str) -> RequestBuilder {
        self.client
            .request(method, format!("{}/{}", self.base_url, table))
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
    }

    /// Run a call through the circuit breaker, recording the outcome.
    async fn execute<T, F, Fut>(&self, operation: &'static str, f: F) -> Result<T, RemoteError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, RemoteError>>,
    {
        let start = Instant::now();
        let outcome = self
            .circuit
            .call(move || async move {
                match f().await {
                    Err(e) if e.is_unreachable() => Err(e),
                    other => Ok(other),
                }
            })
            .await;

        let result = match outcome {
            Ok(inner) => inner,
            Err(CircuitError::Inner(e)) => Err(e),
            Err(CircuitError::Rejected) => Err(RemoteError::Unreachable("circuit breaker open".to_string())),
        };

        let label = match &result {
            Ok(_) => "success",
            Err(RemoteError::Unreachable(_)) => "unreachable",
            Err(RemoteError::Rejected { .. }) => "rejected",
            Err(RemoteError::NotFound) => "not_found",
            Err(RemoteError::InvalidResponse(_)) => "invalid_response",
            Err(RemoteError::OwnedElsewhere(_)) => "owned_elsewhere",
        };
        crate::metrics::record_remote_call(operation, label, start.elapsed());
        if let Err(e) = &result {
            debug!(operation, error = %e, "Remote call failed");
        }
        result
    }

    async fn send(builder: RequestBuilder) -> Result<Response, RemoteError> {
        let response = builder.send().await.map_err(transport_error)?;
        check_status(response).await
    }

    fn single(mut rows: Vec<Event>) -> Result<Event, RemoteError> {
        match rows.len() {
            0 => Err(RemoteError::NotFound),
            1 => Ok(rows.remove(0)),
            n => Err(RemoteError::InvalidResponse(format!("expected one row, got {}", n))),
        }
    }
}

fn transport_error(e: reqwest::Error) -> RemoteError {
    if e.is_decode() {
        RemoteError::InvalidResponse(e.to_string())
    } else if e.is_builder() {
        RemoteError::Rejected { code: "request".to_string(), message: e.to_string() }
    } else {
        RemoteError::Unreachable(e.to_string())
    }
}

/// Map a non-2xx response onto the error taxonomy.
async fn check_status(response: Response) -> Result<Response, RemoteError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let parsed = serde_json::from_str::<PostgrestError>(&body).ok();
    let code = parsed.as_ref().and_then(|p| p.code.clone());
    let message = parsed.and_then(|p| p.message).unwrap_or(body);

    Err(classify_status(status, code, message))
}

fn classify_status(status: StatusCode, code: Option<String>, message: String) -> RemoteError {
    if status.is_server_error() || status == StatusCode::REQUEST_TIMEOUT || status == StatusCode::TOO_MANY_REQUESTS {
        return RemoteError::Unreachable(format!("HTTP {}: {}", status.as_u16(), message));
    }
    if status == StatusCode::NOT_FOUND || code.as_deref() == Some("PGRST116") {
        return RemoteError::NotFound;
    }
    RemoteError::Rejected {
        code: code.unwrap_or_else(|| status.as_u16().to_string()),
        message,
    }
}

#[async_trait]
impl RemoteStore for RestRemoteStore {
    async fn verify_credential(&self, username: &str, password: &str) -> Result<CredentialCheck, RemoteError> {
        self.execute("verify_credential", || async {
            let response = Self::send(
                self.request(reqwest::Method::GET, "user_profiles")
                    .query(&[("select", "password".to_string()), ("username", format!("eq.{}", username))]),
            )
            .await?;
            let rows: Vec<PasswordRow> = response.json().await.map_err(transport_error)?;
            Ok(match rows.first() {
                None => CredentialCheck::NotFound,
                Some(row) if row.password == password => CredentialCheck::Valid,
                Some(_) => CredentialCheck::Invalid,
            })
        })
        .await
    }

    async fn create_credential(&self, username: &str, password: &str) -> Result<(), RemoteError> {
        self.execute("create_credential", || async {
            Self::send(
                self.request(reqwest::Method::POST, "user_profiles")
                    .header("Prefer", "return=minimal")
                    .json(&json!([{ "username": username, "password": password }])),
            )
            .await?;
            Ok(())
        })
        .await
    }

    async fn list_events_by_owner(&self, owner: &str) -> Result<Vec<Event>, RemoteError> {
        self.execute("list_events", || async {
            let response = Self::send(self.request(reqwest::Method::GET, "events").query(&[
                ("select", "*".to_string()),
                ("username", format!("eq.{}", owner)),
                ("order", "start_date.asc".to_string()),
            ]))
            .await?;
            response.json::<Vec<Event>>().await.map_err(transport_error)
        })
        .await
    }

    async fn get_event(&self, id: &str) -> Result<Option<Event>, RemoteError> {
        self.execute("get_event", || async {
            let response = Self::send(
                self.request(reqwest::Method::GET, "events")
                    .query(&[("select", "*".to_string()), ("id", format!("eq.{}", id))]),
            )
            .await?;
            let rows: Vec<Event> = response.json().await.map_err(transport_error)?;
            match rows.len() {
                0 => Ok(None),
                _ => Self::single(rows).map(Some),
            }
        })
        .await
    }

    async fn create_event(&self, event: &Event) -> Result<Event, RemoteError> {
        self.execute("create_event", || async {
            let response = Self::send(
                self.request(reqwest::Method::POST, "events")
                    .header("Prefer", "return=representation")
                    .json(&[event]),
            )
            .await?;
            Self::single(response.json().await.map_err(transport_error)?)
        })
        .await
    }

    async fn update_event(&self, id: &str, changes: &EventChanges) -> Result<Event, RemoteError> {
        self.execute("update_event", || async {
            let response = Self::send(
                self.request(reqwest::Method::PATCH, "events")
                    .query(&[("id", format!("eq.{}", id))])
                    .header("Prefer", "return=representation")
                    .json(changes),
            )
            .await?;
            Self::single(response.json().await.map_err(transport_error)?)
        })
        .await
    }

    async fn delete_event(&self, id: &str) -> Result<(), RemoteError> {
        self.execute("delete_event", || async {
            let response = Self::send(
                self.request(reqwest::Method::DELETE, "events")
                    .query(&[("id", format!("eq.{}", id))])
                    .header("Prefer", "return=representation"),
            )
            .await?;
            let deleted: Vec<serde_json::Value> = response.json().await.map_err(transport_error)?;
            if deleted.is_empty() {
                Err(RemoteError::NotFound)
            } else {
                Ok(())
            }
        })
        .await
    }

    async fn probe_reachable(&self) -> bool {
        let result = Self::send(
            self.request(reqwest::Method::HEAD, "user_profiles")
                .query(&[("select", "count")])
                .header("Prefer", "count=exact"),
        )
        .await;

        match result {
            Ok(_) => true,
            Err(e) => {
                warn!(error = %e, "Remote liveness probe failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_errors_are_unreachable() {
        for status in [StatusCode::INTERNAL_SERVER_ERROR, StatusCode::BAD_GATEWAY, StatusCode::REQUEST_TIMEOUT, StatusCode::TOO_MANY_REQUESTS] {
            assert!(classify_status(status, None, "down".into()).is_unreachable());
        }
    }

    #[test]
    fn test_unique_violation_is_duplicate_rejection() {
        let err = classify_status(StatusCode::CONFLICT, Some("23505".into()), "duplicate key".into());
        assert!(err.is_duplicate());
        assert!(!err.is_unreachable());
    }

    #[test]
    fn test_not_found_mapping() {
        assert_eq!(classify_status(StatusCode::NOT_FOUND, None, String::new()), RemoteError::NotFound);
        assert_eq!(
            classify_status(StatusCode::NOT_ACCEPTABLE, Some("PGRST116".into()), "0 rows".into()),
            RemoteError::NotFound
        );
    }

    #[test]
    fn test_client_error_without_code_uses_status() {
        let err = classify_status(StatusCode::UNAUTHORIZED, None, "bad key".into());
        assert_eq!(err, RemoteError::Rejected { code: "401".into(), message: "bad key".into() });
    }

    #[test]
    fn test_from_config_requires_url_and_key() {
        let mut config = SyncEngineConfig::default();
        assert!(RestRemoteStore::from_config(&config).unwrap().is_none());

        config.remote_url = Some("https://example.supabase.co/".into());
        assert!(RestRemoteStore::from_config(&config).unwrap().is_none());

        config.remote_api_key = Some("anon".into());
        let store = RestRemoteStore::from_config(&config).unwrap().unwrap();
        assert_eq!(store.base_url, "https://example.supabase.co/rest/v1");
    }

    #[tokio::test]
    async fn test_unreachable_host_is_classified() {
        let store = RestRemoteStore::new("http://127.0.0.1:9", "key", Duration::from_millis(500)).unwrap();
        assert!(!store.probe_reachable().await);
        let err = store.list_events_by_owner("anna").await.unwrap_err();
        assert!(err.is_unreachable());
    }
}
