// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Login and registration.
//!
//! The remote `user_profiles` table is authoritative. The local credential
//! table is a cache that makes offline login possible: it is filled on every
//! successful remote login and on registration, and consulted only when the
//! remote store is unreachable (never when it rejects).
//!
//! Passwords are compared as plain strings on both sides.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::remote::traits::{CredentialCheck, RemoteError, RemoteStore};
use crate::storage::traits::{LocalStore, StorageError, UserCredential};

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Username and password are required")]
    MissingCredentials,
    #[error("Unknown user: {0}")]
    UnknownUser(String),
    #[error("Wrong password")]
    WrongPassword,
    #[error("Username already taken: {0}")]
    UsernameTaken(String),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Remote(#[from] RemoteError),
}

/// Which store vouched for a login or holds a new registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialSource {
    Remote,
    /// Remote unreachable or not configured; local table only
    Local,
}

pub struct CredentialService {
    local: Arc<dyn LocalStore>,
    remote: Option<Arc<dyn RemoteStore>>,
}

impl CredentialService {
    pub fn new(local: Arc<dyn LocalStore>, remote: Option<Arc<dyn RemoteStore>>) -> Self {
        Self { local, remote }
    }

    /// Check a username/password pair. On success the trimmed username is the
    /// identity to hand to [`crate::SyncEngine::start_session`].
    #[tracing::instrument(skip(self, password))]
    pub async fn login(&self, username: &str, password: &str) -> Result<CredentialSource, AuthError> {
        let credential = normalize(username, password)?;

        if let Some(remote) = &self.remote {
            match remote.verify_credential(&credential.username, &credential.password).await {
                Ok(CredentialCheck::Valid) => {
                    self.local.put_credential(&credential).await?;
                    info!(user = %credential.username, "Logged in");
                    return Ok(CredentialSource::Remote);
                }
                Ok(CredentialCheck::Invalid) => return Err(AuthError::WrongPassword),
                Ok(CredentialCheck::NotFound) => return Err(AuthError::UnknownUser(credential.username)),
                Err(e) if e.is_unreachable() => {
                    warn!(error = %e, "Remote unreachable; checking local credentials");
                }
                Err(e) => return Err(e.into()),
            }
        }

        match self.local.get_credential(&credential.username).await? {
            Some(stored) if stored.password == credential.password => {
                info!(user = %credential.username, "Logged in offline");
                Ok(CredentialSource::Local)
            }
            Some(_) => Err(AuthError::WrongPassword),
            None => Err(AuthError::UnknownUser(credential.username)),
        }
    }

    /// Register a new user. Fails with [`AuthError::UsernameTaken`] if the
    /// name exists remotely, or locally when the remote cannot be asked.
    #[tracing::instrument(skip(self, password))]
    pub async fn register(&self, username: &str, password: &str) -> Result<CredentialSource, AuthError> {
        let credential = normalize(username, password)?;

        let source = match &self.remote {
            Some(remote) => self.register_remote(remote.as_ref(), &credential).await?,
            None => {
                self.ensure_free_locally(&credential.username).await?;
                CredentialSource::Local
            }
        };

        self.local.put_credential(&credential).await?;
        info!(user = %credential.username, source = ?source, "Registered");
        Ok(source)
    }

    async fn register_remote(
        &self,
        remote: &dyn RemoteStore,
        credential: &UserCredential,
    ) -> Result<CredentialSource, AuthError> {
        match remote.verify_credential(&credential.username, &credential.password).await {
            Ok(CredentialCheck::NotFound) => {}
            Ok(_) => return Err(AuthError::UsernameTaken(credential.username.clone())),
            Err(e) if e.is_unreachable() => {
                debug!(error = %e, "Remote unreachable; checking local credentials");
                self.ensure_free_locally(&credential.username).await?;
                return Ok(CredentialSource::Local);
            }
            Err(e) => return Err(e.into()),
        }

        match remote.create_credential(&credential.username, &credential.password).await {
            Ok(()) => Ok(CredentialSource::Remote),
            Err(e) if e.is_duplicate() => Err(AuthError::UsernameTaken(credential.username.clone())),
            Err(e) if e.is_unreachable() => {
                warn!(error = %e, "Remote went away during registration; saved locally only");
                Ok(CredentialSource::Local)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn ensure_free_locally(&self, username: &str) -> Result<(), AuthError> {
        match self.local.get_credential(username).await? {
            Some(_) => Err(AuthError::UsernameTaken(username.to_string())),
            None => Ok(()),
        }
    }
}

fn normalize(username: &str, password: &str) -> Result<UserCredential, AuthError> {
    let (username, password) = (username.trim(), password.trim());
    if username.is_empty() || password.is_empty() {
        return Err(AuthError::MissingCredentials);
    }
    Ok(UserCredential::new(username, password))
}
