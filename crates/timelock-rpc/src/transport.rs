//! The `RpcTransport` trait and the typed `call` helper.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::TransportError;
use crate::request::{JsonRpcRequest, JsonRpcResponse};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Healthy,
    /// Some providers of a pool are circuit-open.
    Degraded,
    Unhealthy,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Degraded => write!(f, "degraded"),
            Self::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

/// A JSON-RPC endpoint. Object-safe; stored as `Arc<dyn RpcTransport>`.
#[async_trait]
pub trait RpcTransport: Send + Sync + 'static {
    async fn send(&self, req: JsonRpcRequest) -> Result<JsonRpcResponse, TransportError>;

    fn health(&self) -> HealthStatus {
        HealthStatus::Healthy
    }

    /// Endpoint URL or name, for logs.
    fn url(&self) -> &str;
}

/// Call `method` and deserialize its result.
///
/// A `null` result maps to [`TransportError::EmptyResult`] so that callers
/// asking for a not-yet-visible block or transaction can retry.
pub async fn call<T: DeserializeOwned>(
    transport: &dyn RpcTransport,
    method: &str,
    params: Vec<Value>,
) -> Result<T, TransportError> {
    let resp = transport.send(JsonRpcRequest::new(method, params)).await?;
    let result = resp.into_result().map_err(TransportError::Rpc)?;
    if result.is_null() {
        return Err(TransportError::EmptyResult {
            method: method.to_string(),
        });
    }
    serde_json::from_value(result).map_err(TransportError::Deserialization)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(Value);

    #[async_trait]
    impl RpcTransport for Fixed {
        async fn send(&self, req: JsonRpcRequest) -> Result<JsonRpcResponse, TransportError> {
            Ok(JsonRpcResponse::ok(req.id, self.0.clone()))
        }
        fn url(&self) -> &str {
            "fixed"
        }
    }

    #[tokio::test]
    async fn typed_call() {
        let t = Fixed(Value::String("0x2a".into()));
        let v: String = call(&t, "eth_blockNumber", vec![]).await.unwrap();
        assert_eq!(v, "0x2a");
    }

    #[tokio::test]
    async fn null_result_is_empty() {
        let t = Fixed(Value::Null);
        let err = call::<Value>(&t, "eth_getTransactionByHash", vec![]).await.unwrap_err();
        assert!(matches!(err, TransportError::EmptyResult { .. }));
    }
}
