//! Error types for the engine's entry points.

use thiserror::Error;

use timelock_core::FlowError;
use timelock_evm::{DecodeError, EnrichError};
use timelock_rpc::TransportError;

/// Errors returned to a webhook caller.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Invalid or missing webhook secret")]
    Unauthorized,

    #[error("Malformed payload: {0}")]
    Malformed(String),

    #[error("Mutation failed: {0}")]
    Mutation(#[source] FlowError),

    #[error("Mutation task failed: {0}")]
    TaskFailed(String),
}

impl IngestError {
    /// Returns `true` if the caller sent something we will never accept.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::Unauthorized | Self::Malformed(_))
    }
}

impl From<FlowError> for IngestError {
    fn from(e: FlowError) -> Self {
        match e {
            FlowError::InvalidCredential => Self::Unauthorized,
            FlowError::MalformedPayload(msg) => Self::Malformed(msg),
            other => Self::Mutation(other),
        }
    }
}

/// Errors talking to the indexer's query API.
#[derive(Debug, Error)]
pub enum IndexerError {
    #[error("HTTP error from {endpoint}: {reason}")]
    Http { endpoint: String, reason: String },

    #[error("GraphQL errors: {}", .0.join("; "))]
    GraphQl(Vec<String>),

    #[error("Response missing field '{0}'")]
    MissingData(String),

    #[error("Deserialization error: {0}")]
    Deserialization(#[from] serde_json::Error),
}

impl IndexerError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Http { .. })
    }
}

/// Errors from a poll sync run.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("No indexer configured for chain {chain_id}")]
    UnknownChain { chain_id: u64 },

    #[error("Indexer query failed on chain {chain_id}: {source}")]
    Indexer {
        chain_id: u64,
        #[source]
        source: IndexerError,
    },

    #[error("Flow error on chain {chain_id}: {source}")]
    Flow {
        chain_id: u64,
        #[source]
        source: FlowError,
    },

    #[error("Sync task for chain {chain_id} panicked or was aborted")]
    TaskFailed { chain_id: u64 },
}

impl SyncError {
    pub fn chain_id(&self) -> u64 {
        match self {
            Self::UnknownChain { chain_id }
            | Self::Indexer { chain_id, .. }
            | Self::Flow { chain_id, .. }
            | Self::TaskFailed { chain_id } => *chain_id,
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Indexer { source, .. } => source.is_retryable(),
            _ => false,
        }
    }
}

/// Errors applying a raw chain log.
#[derive(Debug, Error)]
pub enum LogError {
    #[error("No processor configured for chain {chain_id}")]
    UnknownChain { chain_id: u64 },

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Enrich(#[from] EnrichError),

    #[error(transparent)]
    Flow(#[from] FlowError),
}

/// Errors starting the engine.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("RPC setup failed: {0}")]
    Transport(#[from] TransportError),

    #[error("Indexer client setup failed: {0}")]
    Indexer(#[from] IndexerError),

    #[error("Storage setup failed: {0}")]
    Store(#[from] FlowError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
