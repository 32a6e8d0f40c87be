//! HTTP platform gateway client

use super::{ActionRequest, Credential, PlatformClient, RawOutcome};
use async_trait::async_trait;
use outreach_common::config::PlatformConfig;
use outreach_common::types::{AccountId, ActionKind};
use outreach_common::{Error, Result};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Serialize)]
struct GatewayRequest<'a> {
    account: AccountId,
    credential: &'a str,
    action: ActionKind,
    target: &'a str,
    payload: &'a serde_json::Value,
    options: GatewayOptions,
}

#[derive(Debug, Serialize)]
struct GatewayOptions {
    add_contact: bool,
}

#[derive(Debug, Deserialize)]
struct GatewayResponse {
    status: String,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    retry_after: Option<u64>,
    #[serde(default)]
    sent: Option<bool>,
}

impl GatewayResponse {
    fn into_outcome(self, fallback_code: &str) -> RawOutcome {
        if self.status.eq_ignore_ascii_case("ok") {
            return RawOutcome::Delivered;
        }
        RawOutcome::Rejected {
            code: self.code.unwrap_or_else(|| fallback_code.to_string()),
            message: self.message,
            retry_after_secs: self.retry_after,
            sent: self.sent.unwrap_or(false),
        }
    }
}

/// Platform client talking JSON to an action gateway
pub struct HttpPlatformClient {
    http_client: Client,
    endpoint: String,
    api_token: Option<String>,
}

impl HttpPlatformClient {
    /// Create a new client from configuration
    pub fn new(config: &PlatformConfig) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            endpoint: format!("{}/v1/actions", config.base_url.trim_end_matches('/')),
            api_token: config.api_token.clone(),
        })
    }

    fn retry_after(response: &reqwest::Response) -> Option<u64> {
        response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse().ok())
    }
}

#[async_trait]
impl PlatformClient for HttpPlatformClient {
    async fn perform_action(
        &self,
        credential: &Credential,
        request: &ActionRequest,
    ) -> RawOutcome {
        let body = GatewayRequest {
            account: request.account_id,
            credential: &credential.secret,
            action: request.action,
            target: &request.target,
            payload: &request.payload,
            options: GatewayOptions {
                add_contact: request.add_contact,
            },
        };

        let mut http_request = self.http_client.post(&self.endpoint).json(&body);
        if let Some(ref token) = self.api_token {
            http_request = http_request.bearer_auth(token);
        }

        let response = match http_request.send().await {
            Ok(response) => response,
            Err(e) if e.is_timeout() => return RawOutcome::TimedOut,
            Err(e) => {
                return RawOutcome::Network {
                    message: e.to_string(),
                }
            }
        };

        let status = response.status();
        debug!(
            account_id = %request.account_id,
            action = %request.action,
            status = %status,
            "Platform gateway responded"
        );

        if status.is_server_error() {
            return RawOutcome::Network {
                message: format!("gateway returned {}", status),
            };
        }

        let header_retry_after = Self::retry_after(&response);
        let fallback_code = status.as_str().to_string();

        match response.json::<GatewayResponse>().await {
            Ok(parsed) => match parsed.into_outcome(&fallback_code) {
                RawOutcome::Rejected {
                    code,
                    message,
                    retry_after_secs,
                    sent,
                } => RawOutcome::Rejected {
                    code,
                    message,
                    retry_after_secs: retry_after_secs.or(header_retry_after),
                    sent,
                },
                other => other,
            },
            Err(_) if status == StatusCode::TOO_MANY_REQUESTS => RawOutcome::Rejected {
                code: fallback_code,
                message: None,
                retry_after_secs: header_retry_after,
                sent: false,
            },
            Err(e) if status.is_success() => RawOutcome::Rejected {
                code: "MALFORMED_RESPONSE".to_string(),
                message: Some(e.to_string()),
                retry_after_secs: None,
                sent: false,
            },
            Err(_) => RawOutcome::Rejected {
                code: fallback_code,
                message: None,
                retry_after_secs: header_retry_after,
                sent: false,
            },
        }
    }
}
