//! Execution gateway transport
//!
//! The keeper never signs transactions itself; batch updates go to the
//! execution gateway, which owns the keys and the mempool plumbing. Without
//! a gateway configured the keeper runs dry: plans are logged and treated as
//! confirmed, which is the right behavior for staging against a fork.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use cordon_allowance::{
    AllowanceError, AllowancePlan, Result as AllowanceResult, SubmissionHandle, SubstrateWriter,
};

/// Submits batch updates to the execution gateway over HTTP.
pub struct GatewayWriter {
    http: reqwest::Client,
    endpoint: String,
}

#[derive(Deserialize)]
struct SubmitResponse {
    submission_id: Uuid,
}

#[derive(Deserialize)]
struct StatusResponse {
    confirmed: bool,
}

impl GatewayWriter {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: endpoint.into(),
        }
    }

    fn submission_error(e: impl std::fmt::Display) -> AllowanceError {
        AllowanceError::Submission {
            message: e.to_string(),
        }
    }
}

#[async_trait]
impl SubstrateWriter for GatewayWriter {
    async fn submit_batch_update(
        &self,
        plan: &AllowancePlan,
        sequence: u64,
    ) -> AllowanceResult<SubmissionHandle> {
        let body = json!({
            "module": format!("{:#x}", plan.module),
            "subAccount": format!("{:#x}", plan.sub_account),
            "newAllowance": plan.new_allowance.to_string(),
            "tokens": plan.tokens.iter().map(|t| format!("{t:#x}")).collect::<Vec<_>>(),
            "balances": plan.balances.iter().map(|b| b.to_string()).collect::<Vec<_>>(),
            "sequence": sequence,
        });
        let response: SubmitResponse = self
            .http
            .post(format!("{}/batch-updates", self.endpoint))
            .json(&body)
            .send()
            .await
            .map_err(Self::submission_error)?
            .error_for_status()
            .map_err(Self::submission_error)?
            .json()
            .await
            .map_err(Self::submission_error)?;
        Ok(SubmissionHandle {
            id: response.submission_id,
            sequence,
        })
    }

    async fn await_confirmation(&self, handle: &SubmissionHandle) -> AllowanceResult<bool> {
        let response: StatusResponse = self
            .http
            .get(format!(
                "{}/batch-updates/{}/status",
                self.endpoint, handle.id
            ))
            .send()
            .await
            .map_err(Self::submission_error)?
            .error_for_status()
            .map_err(Self::submission_error)?
            .json()
            .await
            .map_err(Self::submission_error)?;
        Ok(response.confirmed)
    }
}

/// Logs plans instead of submitting them.
pub struct DryRunWriter;

#[async_trait]
impl SubstrateWriter for DryRunWriter {
    async fn submit_batch_update(
        &self,
        plan: &AllowancePlan,
        sequence: u64,
    ) -> AllowanceResult<SubmissionHandle> {
        info!(
            sub_account = %plan.sub_account,
            allowance = %plan.new_allowance,
            tokens = plan.tokens.len(),
            sequence,
            "dry-run: batch update not submitted"
        );
        Ok(SubmissionHandle {
            id: Uuid::new_v4(),
            sequence,
        })
    }

    async fn await_confirmation(&self, _handle: &SubmissionHandle) -> AllowanceResult<bool> {
        Ok(true)
    }
}
