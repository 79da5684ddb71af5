//! timelock-evm: timelock events straight from chain logs.
//!
//! Used when a lifecycle event has to be derived from a raw log rather than
//! from indexer data (rescans, chains without indexer coverage).
//!
//! ```text
//! RawLog ─► ChainEventDecoder ─► TransactionEvent ─► EnrichmentPipeline ─► TransactionEvent
//!            (fixed ABI table)                        (timestamp / sender / status via RpcGateway)
//! ```

pub mod abi;
pub mod decoder;
pub mod enrich;
pub mod error;
pub mod log;
pub mod processor;
pub mod recovery;
pub mod rpc_types;

pub use abi::{EventAbi, EventTable, TIMELOCK_EVENTS};
pub use decoder::{ChainEventDecoder, COMPOUND_GRACE_PERIOD_SECS};
pub use enrich::{EnrichmentPipeline, SenderSource};
pub use error::{DecodeError, EnrichError};
pub use log::RawLog;
pub use processor::{ChainProcessor, EvmChainProcessor, L2ChainProcessor, ProcessorRegistry};
pub use recovery::{recover_sender, RecoveryScheme};
