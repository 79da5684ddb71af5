//! `EnrichmentPipeline`: fills in what a raw log does not carry.
//!
//! | Field            | Tier      | Retry                   | On failure              |
//! |------------------|-----------|-------------------------|-------------------------|
//! | block timestamp  | mandatory | unbounded, cancellable  | propagate (cancel only) |
//! | sender           | optional  | bounded                 | warn, leave `None`      |
//! | receipt status   | optional  | bounded                 | warn, leave `None`      |

use std::sync::Arc;

use chrono::DateTime;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use timelock_core::TransactionEvent;
use timelock_rpc::request::{parse_quantity, quantity};
use timelock_rpc::{call, RpcGateway};

use crate::error::EnrichError;
use crate::recovery::{recover_sender, RecoveryScheme};
use crate::rpc_types::{RpcBlock, RpcReceipt, RpcTransaction};

/// How the sender of a transaction is determined.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SenderSource {
    /// Trust the `from` the node reports.
    NodeReported,
    /// Recover from the signature, trying these schemes first.
    Recover(Vec<RecoveryScheme>),
}

pub struct EnrichmentPipeline {
    gateway: Arc<RpcGateway>,
    sender: SenderSource,
}

impl EnrichmentPipeline {
    pub fn new(gateway: Arc<RpcGateway>, sender: SenderSource) -> Self {
        Self { gateway, sender }
    }

    /// Enrich `event` in place. Only a missing block number or cancellation
    /// of `cancel` (or an unconfigured chain) fails; optional fields degrade.
    pub async fn enrich(
        &self,
        event: &mut TransactionEvent,
        cancel: &CancellationToken,
    ) -> Result<(), EnrichError> {
        if event.block_timestamp.is_none() {
            event.block_timestamp = Some(self.block_timestamp(event, cancel).await?);
        }

        if event.sender.is_none() {
            match self.sender(event).await {
                Ok(sender) => event.sender = Some(sender),
                Err(e) => tracing::warn!(
                    chain_id = event.chain_id,
                    tx = %event.tx_hash,
                    error = %e,
                    "sender unavailable, continuing without it"
                ),
            }
        }

        if event.tx_succeeded.is_none() {
            match self.receipt_status(event).await {
                Ok(status) => event.tx_succeeded = status,
                Err(e) => tracing::warn!(
                    chain_id = event.chain_id,
                    tx = %event.tx_hash,
                    error = %e,
                    "receipt status unavailable, continuing without it"
                ),
            }
        }
        Ok(())
    }

    async fn block_timestamp(
        &self,
        event: &TransactionEvent,
        cancel: &CancellationToken,
    ) -> Result<DateTime<chrono::Utc>, EnrichError> {
        let number = event.block_number.ok_or(EnrichError::MissingBlockNumber)?;
        let block: RpcBlock = self
            .gateway
            .with_unbounded_retry(event.chain_id, cancel, |rpc| async move {
                call(rpc.as_ref(), "eth_getBlockByNumber", vec![json!(quantity(number)), json!(false)])
                    .await
            })
            .await?;
        let secs = parse_quantity(&block.timestamp)
            .and_then(|s| i64::try_from(s).ok())
            .ok_or_else(|| EnrichError::InvalidResponse(format!("block timestamp '{}'", block.timestamp)))?;
        DateTime::from_timestamp(secs, 0)
            .ok_or_else(|| EnrichError::InvalidResponse(format!("block timestamp {secs} out of range")))
    }

    async fn sender(&self, event: &TransactionEvent) -> Result<String, EnrichError> {
        let hash = event.tx_hash.clone();
        let tx: RpcTransaction = self
            .gateway
            .with_bounded_retry(event.chain_id, |rpc| {
                let hash = hash.clone();
                async move { call(rpc.as_ref(), "eth_getTransactionByHash", vec![json!(hash)]).await }
            })
            .await?;
        match &self.sender {
            SenderSource::NodeReported => tx
                .from
                .map(|f| f.to_ascii_lowercase())
                .ok_or(EnrichError::SenderRecoveryFailed { tx_hash: tx.hash }),
            SenderSource::Recover(candidates) => recover_sender(candidates, &tx, event.chain_id),
        }
    }

    async fn receipt_status(&self, event: &TransactionEvent) -> Result<Option<bool>, EnrichError> {
        let hash = event.tx_hash.clone();
        let receipt: RpcReceipt = self
            .gateway
            .with_bounded_retry(event.chain_id, |rpc| {
                let hash = hash.clone();
                async move { call(rpc.as_ref(), "eth_getTransactionReceipt", vec![json!(hash)]).await }
            })
            .await?;
        Ok(receipt
            .status
            .as_deref()
            .and_then(parse_quantity)
            .map(|s| s == 1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::Value;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;
    use timelock_core::{EventKind, Standard};
    use timelock_rpc::policy::RetryConfig;
    use timelock_rpc::{GatewayConfig, JsonRpcRequest, JsonRpcResponse, RpcTransport, TransportError};

    /// Answers eth_getBlockByNumber after `block_failures` failures; the
    /// transaction and receipt lookups always fail when `optional_down`.
    struct MockNode {
        block_failures: u32,
        block_calls: AtomicU32,
        optional_down: bool,
    }

    #[async_trait]
    impl RpcTransport for MockNode {
        async fn send(&self, req: JsonRpcRequest) -> Result<JsonRpcResponse, TransportError> {
            let result = match req.method.as_str() {
                "eth_getBlockByNumber" => {
                    if self.block_calls.fetch_add(1, Ordering::SeqCst) < self.block_failures {
                        return Err(TransportError::Http("503".into()));
                    }
                    json!({ "timestamp": "0x6553f100" })
                }
                _ if self.optional_down => return Err(TransportError::Http("503".into())),
                "eth_getTransactionByHash" => json!({ "hash": "0xaa", "from": "0xABCD" }),
                "eth_getTransactionReceipt" => json!({ "status": "0x1" }),
                _ => Value::Null,
            };
            Ok(JsonRpcResponse::ok(req.id, result))
        }
        fn url(&self) -> &str {
            "mock"
        }
    }

    fn pipeline(block_failures: u32, optional_down: bool) -> EnrichmentPipeline {
        let quick = RetryConfig {
            max_attempts: Some(2),
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(1),
            multiplier: 1.0,
        };
        let mut config = GatewayConfig {
            bounded: quick.clone(),
            unbounded: quick,
            ..Default::default()
        };
        config.pool.circuit_breaker.failure_threshold = 1_000;
        let node = Arc::new(MockNode {
            block_failures,
            block_calls: AtomicU32::new(0),
            optional_down,
        });
        let gw = RpcGateway::new(config, [(1u64, vec![node as Arc<dyn RpcTransport>])]);
        EnrichmentPipeline::new(Arc::new(gw), SenderSource::NodeReported)
    }

    fn event() -> TransactionEvent {
        let mut ev = TransactionEvent::new(EventKind::Queue, Standard::Compound, 1, "0xc", "0xf", "0xaa");
        ev.block_number = Some(42);
        ev
    }

    #[tokio::test]
    async fn fills_all_fields() {
        let mut ev = event();
        pipeline(0, false).enrich(&mut ev, &CancellationToken::new()).await.unwrap();
        assert_eq!(ev.block_timestamp.unwrap().timestamp(), 0x6553f100);
        assert_eq!(ev.sender.as_deref(), Some("0xabcd"));
        assert_eq!(ev.tx_succeeded, Some(true));
    }

    #[tokio::test]
    async fn timestamp_retries_past_the_bounded_budget() {
        let mut ev = event();
        pipeline(5, false).enrich(&mut ev, &CancellationToken::new()).await.unwrap();
        assert!(ev.block_timestamp.is_some());
    }

    #[tokio::test]
    async fn optional_failures_degrade() {
        let mut ev = event();
        pipeline(0, true).enrich(&mut ev, &CancellationToken::new()).await.unwrap();
        assert!(ev.block_timestamp.is_some());
        assert_eq!(ev.sender, None);
        assert_eq!(ev.tx_succeeded, None);
    }

    #[tokio::test]
    async fn cancellation_propagates() {
        let mut ev = event();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = pipeline(u32::MAX, false).enrich(&mut ev, &cancel).await.unwrap_err();
        assert!(matches!(err, EnrichError::Cancelled));
    }

    #[tokio::test]
    async fn missing_block_number() {
        let mut ev = event();
        ev.block_number = None;
        let err = pipeline(0, false).enrich(&mut ev, &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, EnrichError::MissingBlockNumber));
    }
}
