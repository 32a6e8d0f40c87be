//! Failure Classifier - maps raw platform outcomes into the closed outcome taxonomy
//!
//! Every [`RawOutcome`] maps to exactly one [`ActionOutcome`]. Codes nobody
//! recognises become `unknown_error` and are logged for operator review; the
//! classifier never fails.

mod codes;

use crate::platform::RawOutcome;
use outreach_common::types::ActionOutcome;
use serde::Serialize;
use tracing::warn;

pub use codes::CodeClass;

/// Canonical outcome plus what the engine needs to settle quota
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Classification {
    pub outcome: ActionOutcome,
    /// The action reached the platform, so it consumed quota
    pub executed: bool,
    /// Raw detail kept for the execution log and `last_error`
    pub detail: Option<String>,
}

/// Maps raw platform responses to [`Classification`]s
#[derive(Debug, Clone, Copy, Default)]
pub struct FailureClassifier;

impl FailureClassifier {
    pub fn new() -> Self {
        Self
    }

    pub fn classify(&self, raw: &RawOutcome) -> Classification {
        match raw {
            RawOutcome::Delivered => Classification {
                outcome: ActionOutcome::Succeeded,
                executed: true,
                detail: None,
            },
            RawOutcome::Network { message } => Classification {
                outcome: ActionOutcome::TransientNetworkError,
                executed: false,
                detail: Some(message.clone()),
            },
            // The request may have been performed; count it so quota is never under-reported
            RawOutcome::TimedOut => Classification {
                outcome: ActionOutcome::TransientNetworkError,
                executed: true,
                detail: Some("platform call timed out".to_string()),
            },
            RawOutcome::Rejected {
                code,
                message,
                retry_after_secs,
                sent,
            } => {
                let detail = match message {
                    Some(message) => format!("{}: {}", code, message),
                    None => code.clone(),
                };
                let outcome = Self::classify_code(code, *retry_after_secs);

                if outcome == ActionOutcome::UnknownError {
                    warn!(
                        code = %code,
                        message = message.as_deref().unwrap_or(""),
                        retry_after_secs = ?retry_after_secs,
                        sent = sent,
                        "Unrecognised platform rejection"
                    );
                }

                Classification {
                    outcome,
                    executed: *sent,
                    detail: Some(detail),
                }
            }
        }
    }

    fn classify_code(code: &str, retry_after_secs: Option<u64>) -> ActionOutcome {
        match codes::lookup(code) {
            CodeClass::Wait(seconds) => ActionOutcome::FloodWait { seconds },
            // An explicit wait from the platform beats the internal backoff
            CodeClass::RateLimited => match retry_after_secs {
                Some(seconds) => ActionOutcome::FloodWait { seconds },
                None => ActionOutcome::RateLimited,
            },
            CodeClass::AccountRestricted => ActionOutcome::AccountRestricted,
            CodeClass::TargetUnreachable => ActionOutcome::TargetUnreachable,
            CodeClass::TargetInvalid => ActionOutcome::TargetInvalid,
            CodeClass::AlreadyDone => ActionOutcome::Succeeded,
            CodeClass::Transient => ActionOutcome::TransientNetworkError,
            CodeClass::Unknown => ActionOutcome::UnknownError,
        }
    }
}
