//! HTTP Ledger Client
//!
//! Talks JSON to a ledger gateway that fronts the on-chain anchor
//! contract. The gateway is expected to wait for transaction inclusion
//! before answering a submission.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::error::{BridgeError, Result};
use crate::ledger::{Confirmation, Ledger, LedgerError};

/// Ledger gateway client
pub struct HttpLedger {
    endpoint: String,
    timeout: Duration,
    http_client: Client,
}

#[derive(Debug, Serialize)]
struct SubmitRequest<'a> {
    aid: &'a str,
    sequence: u64,
    digest: &'a str,
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    digest: String,
    block_number: u64,
    #[serde(default = "default_true")]
    newly_recorded: bool,
    confirmed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct AnchorResponse {
    digest: String,
}

fn default_true() -> bool {
    true
}

impl HttpLedger {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BridgeError::ConfigError(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            timeout,
            http_client,
        })
    }

    fn transport_error(&self, err: reqwest::Error) -> LedgerError {
        if err.is_timeout() {
            LedgerError::Timeout(self.timeout)
        } else {
            LedgerError::Unavailable(format!("Ledger request failed: {}", err))
        }
    }
}

#[async_trait]
impl Ledger for HttpLedger {
    async fn submit_anchor(
        &self,
        identity: &str,
        sequence: u64,
        digest: &str,
    ) -> std::result::Result<Confirmation, LedgerError> {
        let url = format!("{}/anchors", self.endpoint);
        debug!("Submitting anchor {} #{} to {}", identity, sequence, url);

        let response = self
            .http_client
            .post(&url)
            .json(&SubmitRequest {
                aid: identity,
                sequence,
                digest,
            })
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        if status == StatusCode::CONFLICT {
            let existing = response
                .json::<AnchorResponse>()
                .await
                .map(|body| body.digest)
                .unwrap_or_default();
            return Err(LedgerError::Conflict {
                identity: identity.to_string(),
                sequence,
                existing,
            });
        }
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            return Err(LedgerError::Unavailable(format!("Ledger returned {}", status)));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LedgerError::Rejected(format!("Ledger returned {}: {}", status, body)));
        }

        let body: SubmitResponse = response
            .json()
            .await
            .map_err(|e| LedgerError::Unavailable(format!("Malformed ledger response: {}", e)))?;

        if body.digest != digest {
            return Err(LedgerError::Conflict {
                identity: identity.to_string(),
                sequence,
                existing: body.digest,
            });
        }

        Ok(Confirmation {
            identity: identity.to_string(),
            sequence,
            digest: body.digest,
            block_number: body.block_number,
            newly_recorded: body.newly_recorded,
            confirmed_at: body.confirmed_at.unwrap_or_else(Utc::now),
        })
    }

    async fn get_anchor(
        &self,
        identity: &str,
        sequence: u64,
    ) -> std::result::Result<Option<String>, LedgerError> {
        let url = format!("{}/anchors/{}/{}", self.endpoint, identity, sequence);
        let response = self
            .http_client
            .get(&url)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let body: AnchorResponse = response.json().await.map_err(|e| {
                    LedgerError::Unavailable(format!("Malformed ledger response: {}", e))
                })?;
                Ok(Some(body.digest))
            }
            status => Err(LedgerError::Unavailable(format!("Ledger returned {}", status))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_normalized() {
        let ledger = HttpLedger::new("http://localhost:8545/", Duration::from_secs(5)).unwrap();
        assert_eq!(ledger.endpoint, "http://localhost:8545");
    }
}
