//! Escrow ledger bridge.
//!
//! The chain integration lives in a separate bridge service; this client
//! speaks plain JSON over HTTP to it. `DryRunLedger` stands in when no
//! bridge is configured, logging every call and minting synthetic
//! transaction hashes so the rest of the engine can be exercised
//! end to end.

use async_trait::async_trait;
use heirloom_engine::{EscrowLedger, ExternalError};
use heirloom_store::AssetType;
use serde_json::{json, Value};
use std::time::Duration;

/// HTTP client for the ledger bridge service.
pub struct HttpEscrowLedger {
    client: reqwest::Client,
    endpoint: String,
    auth_token: Option<String>,
}

impl HttpEscrowLedger {
    pub fn new(
        endpoint: impl Into<String>,
        auth_token: Option<String>,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            auth_token,
        })
    }

    async fn post(&self, path: &str, body: Value) -> Result<Value, ExternalError> {
        let url = format!("{}{path}", self.endpoint);
        let mut request = self.client.post(&url).json(&body);
        if let Some(ref token) = self.auth_token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ExternalError::Unavailable(format!("{url}: {e}")))?;

        let status = response.status();
        if status.is_client_error() {
            let detail = response.text().await.unwrap_or_default();
            return Err(ExternalError::Rejected(format!("{url}: {status} {detail}")));
        }
        if !status.is_success() {
            return Err(ExternalError::Unavailable(format!("{url}: {status}")));
        }

        response
            .json()
            .await
            .map_err(|e| ExternalError::Unavailable(format!("{url}: bad response body: {e}")))
    }

    fn tx_hash(body: &Value, url_hint: &str) -> Result<String, ExternalError> {
        body.get("tx_hash")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| {
                ExternalError::Unavailable(format!("{url_hint}: response missing tx_hash"))
            })
    }
}

#[async_trait]
impl EscrowLedger for HttpEscrowLedger {
    async fn lock_escrow(
        &self,
        plan_id: i64,
        asset: AssetType,
        units: u64,
    ) -> Result<(), ExternalError> {
        self.post(
            "/escrow/lock",
            json!({ "plan_id": plan_id, "asset": asset.as_str(), "units": units }),
        )
        .await
        .map(|_| ())
    }

    async fn release_escrow(
        &self,
        plan_id: i64,
        beneficiary_index: u32,
        units: u64,
    ) -> Result<String, ExternalError> {
        let body = self
            .post(
                "/escrow/release",
                json!({
                    "plan_id": plan_id,
                    "beneficiary_index": beneficiary_index,
                    "units": units,
                }),
            )
            .await?;
        Self::tx_hash(&body, "/escrow/release")
    }

    async fn release_distribution(
        &self,
        plan_id: i64,
        period_number: u32,
        units: u64,
    ) -> Result<String, ExternalError> {
        let body = self
            .post(
                "/escrow/distribute",
                json!({
                    "plan_id": plan_id,
                    "period_number": period_number,
                    "units": units,
                }),
            )
            .await?;
        Self::tx_hash(&body, "/escrow/distribute")
    }

    async fn refund_escrow(&self, plan_id: i64) -> Result<String, ExternalError> {
        let body = self
            .post("/escrow/refund", json!({ "plan_id": plan_id }))
            .await?;
        Self::tx_hash(&body, "/escrow/refund")
    }
}

/// Logs every call and returns deterministic synthetic hashes.
#[derive(Debug, Default)]
pub struct DryRunLedger;

#[async_trait]
impl EscrowLedger for DryRunLedger {
    async fn lock_escrow(
        &self,
        plan_id: i64,
        asset: AssetType,
        units: u64,
    ) -> Result<(), ExternalError> {
        log::info!("[dry-run] lock_escrow plan={plan_id} asset={asset} units={units}");
        Ok(())
    }

    async fn release_escrow(
        &self,
        plan_id: i64,
        beneficiary_index: u32,
        units: u64,
    ) -> Result<String, ExternalError> {
        log::info!(
            "[dry-run] release_escrow plan={plan_id} beneficiary={beneficiary_index} units={units}"
        );
        Ok(format!("dryrun-release-{plan_id}-{beneficiary_index}"))
    }

    async fn release_distribution(
        &self,
        plan_id: i64,
        period_number: u32,
        units: u64,
    ) -> Result<String, ExternalError> {
        log::info!(
            "[dry-run] release_distribution plan={plan_id} period={period_number} units={units}"
        );
        Ok(format!("dryrun-period-{plan_id}-{period_number}"))
    }

    async fn refund_escrow(&self, plan_id: i64) -> Result<String, ExternalError> {
        log::info!("[dry-run] refund_escrow plan={plan_id}");
        Ok(format!("dryrun-refund-{plan_id}"))
    }
}
