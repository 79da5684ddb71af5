//! Error types for the flow pipeline.

use thiserror::Error;

/// Errors that can occur while normalizing, storing, or mutating flows.
#[derive(Debug, Error)]
pub enum FlowError {
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    #[error("Unsupported event kind '{tag}'")]
    UnsupportedEventKind { tag: String },

    #[error("Invalid credential")]
    InvalidCredential,

    #[error("Contract {contract} on chain {chain_id} is not an active platform contract")]
    NotPlatformContract { chain_id: u64, contract: String },

    #[error("Flow not found: {key}")]
    NotFound { key: String },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Registry error: {0}")]
    Registry(String),

    #[error("Notification error: {0}")]
    Notify(String),

    #[error("{0}")]
    Other(String),
}

impl FlowError {
    /// Returns `true` for outcomes that are skipped by policy rather than
    /// reported as failures (unregistered contract, unknown event kind).
    pub fn is_policy_skip(&self) -> bool {
        matches!(
            self,
            Self::NotPlatformContract { .. } | Self::UnsupportedEventKind { .. }
        )
    }

    /// Returns `true` if the input was rejected at the boundary.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::MalformedPayload(_) | Self::InvalidCredential)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        assert!(FlowError::UnsupportedEventKind { tag: "Foo".into() }.is_policy_skip());
        assert!(FlowError::NotPlatformContract {
            chain_id: 1,
            contract: "0x1".into()
        }
        .is_policy_skip());
        assert!(FlowError::InvalidCredential.is_validation());
        assert!(!FlowError::Storage("disk".into()).is_policy_skip());
        assert!(!FlowError::Storage("disk".into()).is_validation());
    }
}
