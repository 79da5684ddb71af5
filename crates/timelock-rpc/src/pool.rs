//! Round-robin failover over the RPC endpoints of one chain.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::TransportError;
use crate::policy::{CircuitBreaker, CircuitBreakerConfig};
use crate::request::{JsonRpcRequest, JsonRpcResponse};
use crate::transport::{HealthStatus, RpcTransport};

#[derive(Debug, Clone)]
pub struct ProviderPoolConfig {
    pub circuit_breaker: CircuitBreakerConfig,
    pub request_timeout: Duration,
}

impl Default for ProviderPoolConfig {
    fn default() -> Self {
        Self {
            circuit_breaker: CircuitBreakerConfig::default(),
            request_timeout: Duration::from_secs(15),
        }
    }
}

struct Slot {
    transport: Arc<dyn RpcTransport>,
    circuit: CircuitBreaker,
}

/// Each `send` goes to the next provider whose circuit is not open, so a
/// retry loop over the pool naturally rotates through endpoints.
pub struct ProviderPool {
    name: String,
    slots: Vec<Slot>,
    cursor: AtomicUsize,
    request_timeout: Duration,
}

impl ProviderPool {
    pub fn new(
        name: impl Into<String>,
        transports: Vec<Arc<dyn RpcTransport>>,
        config: ProviderPoolConfig,
    ) -> Self {
        let slots = transports
            .into_iter()
            .map(|transport| Slot {
                circuit: CircuitBreaker::new(transport.url(), config.circuit_breaker.clone()),
                transport,
            })
            .collect();
        Self {
            name: name.into(),
            slots,
            cursor: AtomicUsize::new(0),
            request_timeout: config.request_timeout,
        }
    }

    fn next_slot(&self) -> Option<&Slot> {
        let n = self.slots.len();
        if n == 0 {
            return None;
        }
        let start = self.cursor.fetch_add(1, Ordering::Relaxed) % n;
        (0..n)
            .map(|i| &self.slots[(start + i) % n])
            .find(|slot| slot.circuit.is_allowed())
    }
}

#[async_trait]
impl RpcTransport for ProviderPool {
    async fn send(&self, req: JsonRpcRequest) -> Result<JsonRpcResponse, TransportError> {
        let slot = self.next_slot().ok_or(TransportError::AllProvidersDown)?;

        let result = match tokio::time::timeout(self.request_timeout, slot.transport.send(req)).await
        {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout {
                ms: self.request_timeout.as_millis() as u64,
            }),
        };

        match &result {
            Ok(_) => slot.circuit.record_success(),
            Err(e) if e.is_provider_fault() => slot.circuit.record_failure(),
            Err(_) => {}
        }
        result
    }

    fn health(&self) -> HealthStatus {
        let allowed = self.slots.iter().filter(|s| s.circuit.is_allowed()).count();
        match allowed {
            0 => HealthStatus::Unhealthy,
            n if n == self.slots.len() => HealthStatus::Healthy,
            _ => HealthStatus::Degraded,
        }
    }

    fn url(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;
    use std::sync::atomic::AtomicU32;

    struct MockTransport {
        url: String,
        fail: bool,
        hits: AtomicU32,
    }

    #[async_trait]
    impl RpcTransport for MockTransport {
        async fn send(&self, req: JsonRpcRequest) -> Result<JsonRpcResponse, TransportError> {
            self.hits.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(TransportError::Http("connection refused".into()))
            } else {
                Ok(JsonRpcResponse::ok(req.id, Value::String(self.url.clone())))
            }
        }
        fn url(&self) -> &str {
            &self.url
        }
    }

    fn mock(url: &str, fail: bool) -> Arc<MockTransport> {
        Arc::new(MockTransport {
            url: url.into(),
            fail,
            hits: AtomicU32::new(0),
        })
    }

    fn pool(transports: Vec<Arc<MockTransport>>, threshold: u32) -> ProviderPool {
        ProviderPool::new(
            "test",
            transports.into_iter().map(|t| t as Arc<dyn RpcTransport>).collect(),
            ProviderPoolConfig {
                circuit_breaker: CircuitBreakerConfig {
                    failure_threshold: threshold,
                    open_duration: Duration::from_secs(60),
                },
                request_timeout: Duration::from_secs(1),
            },
        )
    }

    #[tokio::test]
    async fn rotates_between_providers() {
        let a = mock("a", false);
        let b = mock("b", false);
        let p = pool(vec![a.clone(), b.clone()], 5);
        for _ in 0..4 {
            p.send(JsonRpcRequest::new("eth_chainId", vec![])).await.unwrap();
        }
        assert_eq!(a.hits.load(Ordering::SeqCst), 2);
        assert_eq!(b.hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn skips_open_circuits() {
        let bad = mock("bad", true);
        let good = mock("good", false);
        let p = pool(vec![bad.clone(), good.clone()], 1);
        let _ = p.send(JsonRpcRequest::new("eth_chainId", vec![])).await;
        assert_eq!(p.health(), HealthStatus::Degraded);
        for _ in 0..3 {
            let resp = p.send(JsonRpcRequest::new("eth_chainId", vec![])).await.unwrap();
            assert_eq!(resp.into_result().unwrap(), Value::String("good".into()));
        }
        assert_eq!(bad.hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn empty_pool_is_down() {
        let p = pool(vec![], 1);
        let err = p.send(JsonRpcRequest::new("eth_chainId", vec![])).await.unwrap_err();
        assert!(matches!(err, TransportError::AllProvidersDown));
        assert_eq!(p.health(), HealthStatus::Unhealthy);
    }
}
