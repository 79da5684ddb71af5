//! timelock-engine: reconciles timelock flows from push, poll and clock.
//!
//! # Architecture
//!
//! ```text
//! Engine::start → EngineHandle
//!                     ├── WebhookIngestor  (axum route, secret → chain binding)
//!                     ├── PollSyncEngine   (periodic GraphQL resync per chain)
//!                     ├── StatusPromoter   (waiting → ready → expired by clock)
//!                     ├── LogProcessor     (raw logs via timelock-evm)
//!                     └── FlowMutator      (per-flow locking, conflict rule, notifications)
//! ```
//!
//! All writes go through [`FlowMutator`], which serializes mutations per
//! flow key so push, poll and promotion never interleave on one flow.

pub mod config;
pub mod engine;
pub mod error;
pub mod indexer;
pub mod log_processor;
pub mod mutator;
pub mod normalizer;
pub mod notifications;
pub mod promoter;
pub mod sync;
pub mod webhook;

pub use config::{init_tracing, ChainConfig, EngineConfig, LogConfig, StorageBackend};
pub use engine::{open_store, seeded_registry, Engine, EngineHandle};
pub use error::{EngineError, IndexerError, IngestError, LogError, SyncError};
pub use indexer::{FlowRecord, GraphqlIndexerClient, IndexerClient};
pub use log_processor::LogProcessor;
pub use mutator::{FlowMutator, MutationOutcome, SkipReason};
pub use normalizer::{EventNormalizer, WebhookPayload};
pub use notifications::{LogNotifier, NotificationDispatcher};
pub use promoter::StatusPromoter;
pub use sync::{PollSyncEngine, SyncStats};
pub use webhook::{IngestReport, WebhookIngestor, SECRET_HEADER, WEBHOOK_PATH};
