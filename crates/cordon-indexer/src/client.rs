//! Substrate read clients and endpoint rotation

use std::sync::Arc;

use alloy_primitives::B256;
use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::warn;

use cordon_types::ModuleEvent;

use crate::{IndexerError, Result};

/// Failures tolerated on one endpoint before rotating to the next.
pub const MAX_ENDPOINT_FAILURES: u32 = 3;

/// Read access to the enforcement substrate.
///
/// The deployment's log codec lives behind this seam: `module_events`
/// returns fully decoded events for a block range.
#[async_trait]
pub trait SubstrateClient: Send + Sync {
    async fn block_number(&self) -> Result<u64>;

    async fn block_hash(&self, height: u64) -> Result<B256>;

    /// Decoded module events with `block_number` in `[from_block, to_block]`.
    async fn module_events(&self, from_block: u64, to_block: u64) -> Result<Vec<ModuleEvent>>;
}

struct RingState {
    current: usize,
    failures: u32,
}

/// Rotates through a ring of fallback endpoints.
///
/// Each call goes to the current endpoint; after
/// [`MAX_ENDPOINT_FAILURES`] consecutive failures the ring advances. A call
/// is retried on each endpoint at most once per invocation, so a fully dead
/// ring fails fast rather than spinning.
pub struct RotatingClient {
    endpoints: Vec<Arc<dyn SubstrateClient>>,
    state: Mutex<RingState>,
}

impl RotatingClient {
    pub fn new(endpoints: Vec<Arc<dyn SubstrateClient>>) -> Self {
        Self {
            endpoints,
            state: Mutex::new(RingState {
                current: 0,
                failures: 0,
            }),
        }
    }

    async fn current(&self) -> (usize, Arc<dyn SubstrateClient>) {
        let state = self.state.lock().await;
        (state.current, self.endpoints[state.current].clone())
    }

    async fn record_success(&self, index: usize) {
        let mut state = self.state.lock().await;
        if state.current == index {
            state.failures = 0;
        }
    }

    async fn record_failure(&self, index: usize) {
        let mut state = self.state.lock().await;
        if state.current != index {
            return;
        }
        state.failures += 1;
        if state.failures >= MAX_ENDPOINT_FAILURES {
            state.current = (state.current + 1) % self.endpoints.len();
            state.failures = 0;
            warn!(endpoint = state.current, "rotating to fallback endpoint");
        }
    }

    async fn with_rotation<T, F, Fut>(&self, call: F) -> Result<T>
    where
        F: Fn(Arc<dyn SubstrateClient>) -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let mut attempts = 0;
        loop {
            let (index, endpoint) = self.current().await;
            match call(endpoint).await {
                Ok(value) => {
                    self.record_success(index).await;
                    return Ok(value);
                }
                Err(e) => {
                    warn!(endpoint = index, error = %e, "substrate call failed");
                    self.record_failure(index).await;
                    attempts += 1;
                    if attempts >= self.endpoints.len() * MAX_ENDPOINT_FAILURES as usize {
                        return Err(IndexerError::AllEndpointsFailed {
                            count: self.endpoints.len(),
                        });
                    }
                }
            }
        }
    }
}

#[async_trait]
impl SubstrateClient for RotatingClient {
    async fn block_number(&self) -> Result<u64> {
        self.with_rotation(|c| async move { c.block_number().await })
            .await
    }

    async fn block_hash(&self, height: u64) -> Result<B256> {
        self.with_rotation(|c| async move { c.block_hash(height).await })
            .await
    }

    async fn module_events(&self, from_block: u64, to_block: u64) -> Result<Vec<ModuleEvent>> {
        self.with_rotation(|c| async move { c.module_events(from_block, to_block).await })
            .await
    }
}
