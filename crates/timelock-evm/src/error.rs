//! Decoding and enrichment errors.

use thiserror::Error;
use timelock_rpc::TransportError;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Unknown event signature: {topic0}")]
    UnknownEventSignature { topic0: String },

    #[error("Log has no topics")]
    NoTopics,

    #[error("Missing topic {index} for '{field}'")]
    MissingTopic { index: usize, field: String },

    #[error("Invalid log: {reason}")]
    InvalidLog { reason: String },

    #[error("ABI decode failed: {reason}")]
    AbiDecodeFailed { reason: String },

    #[error("Unexpected value for '{field}'")]
    UnexpectedValue { field: String },
}

#[derive(Debug, Error)]
pub enum EnrichError {
    /// The owning scope was cancelled while fetching mandatory data.
    #[error("Enrichment cancelled")]
    Cancelled,

    #[error("Log carries no block number")]
    MissingBlockNumber,

    #[error("Transport error: {0}")]
    Transport(TransportError),

    #[error("Invalid RPC response: {0}")]
    InvalidResponse(String),

    /// A single recovery scheme did not apply or recovered an inconsistent sender.
    #[error("Recovery scheme {scheme} failed: {reason}")]
    Scheme { scheme: String, reason: String },

    /// Every configured scheme and the generic fallback failed.
    #[error("Sender recovery failed for {tx_hash}")]
    SenderRecoveryFailed { tx_hash: String },
}

impl From<TransportError> for EnrichError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::Cancelled => Self::Cancelled,
            other => Self::Transport(other),
        }
    }
}

impl EnrichError {
    /// Returns `true` if the event cannot be used at all.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Cancelled | Self::MissingBlockNumber | Self::Transport(_)
        )
    }
}
