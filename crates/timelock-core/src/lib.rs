//! timelock-core: shared vocabulary of the timelock flow engine.
//!
//! # Architecture
//!
//! ```text
//! WebhookIngestor ─┐
//!                  ├─► EventNormalizer ─► FlowMutator ─► FlowStore
//! PollSyncEngine ──┘                                        ▲
//! StatusPromoter ───────────────────────────────────────────┘
//! ```
//!
//! This crate holds the types every other crate speaks in (`Flow`,
//! `TransactionEvent`, `FlowStatus`), the status state machine, and the
//! traits for the collaborators the engine consumes (`FlowStore`,
//! `ContractRegistry`, `Notifier`, `Clock`).

pub mod clock;
pub mod error;
pub mod notify;
pub mod registry;
pub mod status;
pub mod store;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::FlowError;
pub use notify::{Notifier, StatusChange};
pub use registry::{ContractEntry, ContractRegistry, MemoryContractRegistry, SecretBinding};
pub use store::{FlowStore, UpsertOutcome};
pub use types::{
    canonical_hex, CallDetails, EventKind, Flow, FlowKey, FlowPatch, FlowSnapshot, FlowStatus,
    Standard, TransactionEvent,
};
