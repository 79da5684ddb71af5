//! Per-chain RPC gateway with two retry tiers.
//!
//! The chain map is built once at startup and never mutated, so lookups
//! need no locking.
//!
//! - [`RpcGateway::with_bounded_retry`]: finite attempts; for optional data
//!   (sender, receipt status) whose absence only degrades the result.
//! - [`RpcGateway::with_unbounded_retry`]: retries until success or until
//!   the caller's `CancellationToken` fires; for mandatory data (block
//!   timestamps).

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::error::TransportError;
use crate::http::HttpTransport;
use crate::policy::{RetryConfig, RetryPolicy};
use crate::pool::{ProviderPool, ProviderPoolConfig};
use crate::transport::RpcTransport;

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub bounded: RetryConfig,
    pub unbounded: RetryConfig,
    pub pool: ProviderPoolConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bounded: RetryConfig::default(),
            unbounded: RetryConfig::unbounded(),
            pool: ProviderPoolConfig::default(),
        }
    }
}

pub struct RpcGateway {
    chains: HashMap<u64, Arc<ProviderPool>>,
    bounded: RetryPolicy,
    unbounded: RetryPolicy,
}

impl RpcGateway {
    /// Build from ready-made transports per chain.
    pub fn new(
        config: GatewayConfig,
        chains: impl IntoIterator<Item = (u64, Vec<Arc<dyn RpcTransport>>)>,
    ) -> Self {
        let chains = chains
            .into_iter()
            .map(|(chain_id, transports)| {
                let pool = ProviderPool::new(format!("chain-{chain_id}"), transports, config.pool.clone());
                (chain_id, Arc::new(pool))
            })
            .collect();
        Self {
            chains,
            bounded: RetryPolicy::new(config.bounded),
            unbounded: RetryPolicy::new(RetryConfig {
                max_attempts: None,
                ..config.unbounded
            }),
        }
    }

    /// Build HTTP transports from endpoint URLs per chain.
    pub fn from_urls(
        config: GatewayConfig,
        chains: impl IntoIterator<Item = (u64, Vec<String>)>,
    ) -> Result<Self, TransportError> {
        let timeout = config.pool.request_timeout;
        let mut built = Vec::new();
        for (chain_id, urls) in chains {
            let transports = urls
                .into_iter()
                .map(|url| {
                    HttpTransport::new(url, timeout).map(|t| Arc::new(t) as Arc<dyn RpcTransport>)
                })
                .collect::<Result<Vec<_>, _>>()?;
            built.push((chain_id, transports));
        }
        Ok(Self::new(config, built))
    }

    pub fn has_chain(&self, chain_id: u64) -> bool {
        self.chains.contains_key(&chain_id)
    }

    fn pool(&self, chain_id: u64) -> Result<Arc<dyn RpcTransport>, TransportError> {
        self.chains
            .get(&chain_id)
            .map(|p| p.clone() as Arc<dyn RpcTransport>)
            .ok_or(TransportError::UnknownChain { chain_id })
    }

    /// Run `op` against the chain's pool, retrying retryable errors up to the
    /// bounded attempt budget. Non-retryable errors return immediately.
    pub async fn with_bounded_retry<T, F, Fut>(&self, chain_id: u64, op: F) -> Result<T, TransportError>
    where
        F: Fn(Arc<dyn RpcTransport>) -> Fut,
        Fut: Future<Output = Result<T, TransportError>>,
    {
        let pool = self.pool(chain_id)?;
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match op(pool.clone()).await {
                Ok(v) => return Ok(v),
                Err(e) if e.is_retryable() => match self.bounded.delay_after(attempt) {
                    Some(delay) => {
                        tracing::debug!(chain_id, attempt, error = %e, "retrying rpc call");
                        tokio::time::sleep(delay).await;
                    }
                    None => return Err(e),
                },
                Err(e) => return Err(e),
            }
        }
    }

    /// Run `op` until it succeeds or `cancel` fires. Every error is retried;
    /// cancellation is observed while waiting between attempts and while an
    /// attempt is in flight.
    pub async fn with_unbounded_retry<T, F, Fut>(
        &self,
        chain_id: u64,
        cancel: &CancellationToken,
        op: F,
    ) -> Result<T, TransportError>
    where
        F: Fn(Arc<dyn RpcTransport>) -> Fut,
        Fut: Future<Output = Result<T, TransportError>>,
    {
        let pool = self.pool(chain_id)?;
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let outcome = tokio::select! {
                _ = cancel.cancelled() => return Err(TransportError::Cancelled),
                r = op(pool.clone()) => r,
            };
            let e = match outcome {
                Ok(v) => return Ok(v),
                Err(e) => e,
            };
            let delay = self.unbounded.delay_after(attempt).unwrap_or_default();
            if attempt % 10 == 0 {
                tracing::warn!(chain_id, attempt, error = %e, "mandatory rpc call still failing");
            } else {
                tracing::debug!(chain_id, attempt, error = %e, "retrying mandatory rpc call");
            }
            tokio::select! {
                _ = cancel.cancelled() => return Err(TransportError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}
