//! HTTP token authority
//!
//! `POST {base_url}/api/v1/audio/validate-token` with `{"token": "..."}`.
//! Only a response body whose `valid` field is JSON `true` accepts the
//! token; transport errors, timeouts, non-2xx statuses and unexpected bodies
//! all reject it.

use std::time::Duration;

use reqwest::header::ACCEPT;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::Authority;
use crate::error::Result;
use crate::protocol::constants::VALIDATE_TOKEN_PATH;

#[derive(Serialize)]
struct ValidateRequest<'a> {
    token: &'a str,
}

#[derive(Deserialize)]
struct ValidateResponse {
    #[serde(default)]
    valid: Value,
}

/// Authority reached over HTTP
#[derive(Debug, Clone)]
pub struct HttpAuthority {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpAuthority {
    /// Build a client for the authority at `base_url`
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        let endpoint = format!("{}{}", base_url.trim_end_matches('/'), VALIDATE_TOKEN_PATH);

        Ok(Self { client, endpoint })
    }

    /// Full validation URL
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl Authority for HttpAuthority {
    async fn validate(&self, token: &str) -> bool {
        let response = match self
            .client
            .post(&self.endpoint)
            .header(ACCEPT, "application/json")
            .json(&ValidateRequest { token })
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(
                    endpoint = %self.endpoint,
                    timeout = e.is_timeout(),
                    error = %e,
                    "Token validation request failed"
                );
                return false;
            }
        };

        let status = response.status();
        if !status.is_success() {
            tracing::warn!(endpoint = %self.endpoint, status = %status, "Authority refused validation");
            return false;
        }

        match response.json::<ValidateResponse>().await {
            Ok(body) => body.valid == Value::Bool(true),
            Err(e) => {
                tracing::warn!(endpoint = %self.endpoint, error = %e, "Unreadable authority response");
                false
            }
        }
    }
}
