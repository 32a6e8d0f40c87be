//! External platform collaborators
//!
//! The engine only sees the external messaging platform through
//! [`PlatformClient`] and resolves account credentials through
//! [`CredentialStore`]. Raw credentials are never persisted by the core.

mod credentials;
mod http;

pub use credentials::{CredentialError, PassthroughCredentialStore, StaticCredentialStore};
pub use http::HttpPlatformClient;

use async_trait::async_trait;
use outreach_common::types::{AccountId, ActionKind};
use serde::{Deserialize, Serialize};

/// Usable auth material for one account
#[derive(Clone)]
pub struct Credential {
    pub reference: String,
    pub secret: String,
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("reference", &self.reference)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// One action to perform on the platform
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRequest {
    pub account_id: AccountId,
    pub action: ActionKind,
    /// Platform user or channel handle
    pub target: String,
    /// Task payload, e.g. the group to invite into or the message text
    pub payload: serde_json::Value,
    /// Add the invited user to the account's contacts
    pub add_contact: bool,
}

/// What the platform said, before classification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawOutcome {
    /// The action was performed
    Delivered,
    /// The platform answered with a structured rejection
    Rejected {
        code: String,
        message: Option<String>,
        /// Wait the platform asked for, if it sent one out of band (e.g. `Retry-After`)
        retry_after_secs: Option<u64>,
        /// The action reached the platform before it was rejected
        sent: bool,
    },
    /// The request never got an answer
    Network { message: String },
    /// No answer within the call-level timeout
    TimedOut,
}

impl RawOutcome {
    /// Shorthand for a rejection that happened before anything was sent
    pub fn rejected(code: impl Into<String>) -> Self {
        RawOutcome::Rejected {
            code: code.into(),
            message: None,
            retry_after_secs: None,
            sent: false,
        }
    }
}

/// Performs actions on the external messaging platform
#[async_trait]
pub trait PlatformClient: Send + Sync {
    /// Must not panic; every failure is reported as a [`RawOutcome`]
    async fn perform_action(&self, credential: &Credential, request: &ActionRequest)
        -> RawOutcome;
}

/// Resolves an account's credential reference to usable auth material
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn resolve(&self, reference: &str) -> Result<Credential, CredentialError>;
}
