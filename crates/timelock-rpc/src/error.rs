//! Transport-level error types.

use thiserror::Error;

use crate::request::JsonRpcError;

/// Errors that can occur while talking to a chain node.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection refused, non-2xx status, body read failure.
    #[error("HTTP error: {0}")]
    Http(String),

    /// JSON-RPC error object returned by the node.
    #[error("RPC error {}: {}", .0.code, .0.message)]
    Rpc(JsonRpcError),

    /// The node answered `null` (block or transaction not visible yet).
    #[error("Empty result for {method}")]
    EmptyResult { method: String },

    #[error("Circuit breaker open for provider: {provider}")]
    CircuitOpen { provider: String },

    #[error("All providers unavailable")]
    AllProvidersDown,

    #[error("No RPC endpoints configured for chain {chain_id}")]
    UnknownChain { chain_id: u64 },

    #[error("Request timed out after {ms}ms")]
    Timeout { ms: u64 },

    /// The owning scope was cancelled while retrying.
    #[error("Cancelled")]
    Cancelled,

    #[error("Deserialization error: {0}")]
    Deserialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl TransportError {
    /// Returns `true` if another attempt may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Http(_)
                | Self::Timeout { .. }
                | Self::EmptyResult { .. }
                | Self::CircuitOpen { .. }
                | Self::AllProvidersDown
        )
    }

    /// Returns `true` if the provider itself misbehaved and its circuit
    /// breaker should count the failure.
    pub fn is_provider_fault(&self) -> bool {
        matches!(self, Self::Http(_) | Self::Timeout { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_classification() {
        assert!(TransportError::Http("503".into()).is_retryable());
        assert!(TransportError::EmptyResult { method: "eth_getTransactionByHash".into() }.is_retryable());
        assert!(!TransportError::UnknownChain { chain_id: 1 }.is_retryable());
        assert!(!TransportError::Cancelled.is_retryable());
        let rpc = TransportError::Rpc(JsonRpcError {
            code: -32602,
            message: "invalid params".into(),
            data: None,
        });
        assert!(!rpc.is_retryable());
        assert!(!rpc.is_provider_fault());
    }
}
