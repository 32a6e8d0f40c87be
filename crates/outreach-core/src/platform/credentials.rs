//! Credential store implementations

use super::{Credential, CredentialStore};
use async_trait::async_trait;
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::RwLock;

/// Credential resolution errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CredentialError {
    #[error("Credential not found: {0}")]
    NotFound(String),

    #[error("Credential store unavailable: {0}")]
    Unavailable(String),
}

/// Credentials held in memory, keyed by reference
#[derive(Default)]
pub struct StaticCredentialStore {
    secrets: RwLock<HashMap<String, String>>,
}

impl StaticCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, reference: impl Into<String>, secret: impl Into<String>) {
        self.secrets
            .write()
            .await
            .insert(reference.into(), secret.into());
    }

    pub async fn remove(&self, reference: &str) {
        self.secrets.write().await.remove(reference);
    }
}

#[async_trait]
impl CredentialStore for StaticCredentialStore {
    async fn resolve(&self, reference: &str) -> Result<Credential, CredentialError> {
        let secrets = self.secrets.read().await;
        secrets
            .get(reference)
            .map(|secret| Credential {
                reference: reference.to_string(),
                secret: secret.clone(),
            })
            .ok_or_else(|| CredentialError::NotFound(reference.to_string()))
    }
}

/// Hands the reference itself to the platform client.
///
/// For gateways that keep account sessions on their side and only need the handle.
#[derive(Debug, Default, Clone, Copy)]
pub struct PassthroughCredentialStore;

#[async_trait]
impl CredentialStore for PassthroughCredentialStore {
    async fn resolve(&self, reference: &str) -> Result<Credential, CredentialError> {
        Ok(Credential {
            reference: reference.to_string(),
            secret: reference.to_string(),
        })
    }
}
