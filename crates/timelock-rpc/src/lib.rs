//! timelock-rpc: chain node access for log enrichment.
//!
//! # Overview
//!
//! ```text
//! RpcGateway ── chain_id ──► ProviderPool ──► [CircuitBreaker] ──► HttpTransport
//!      │                         (round-robin, per-provider breaker)
//!      ├─ with_bounded_retry    finite attempts, optional data
//!      └─ with_unbounded_retry  until success or cancellation, mandatory data
//! ```
//!
//! - [`RpcTransport`]: object-safe async trait every endpoint implements
//! - [`call`]: typed request helper over any transport
//! - [`RpcGateway`]: immutable chain id → pool map with the two retry tiers

pub mod error;
pub mod gateway;
pub mod http;
pub mod policy;
pub mod pool;
pub mod request;
pub mod transport;

pub use error::TransportError;
pub use gateway::{GatewayConfig, RpcGateway};
pub use http::HttpTransport;
pub use pool::{ProviderPool, ProviderPoolConfig};
pub use request::{JsonRpcError, JsonRpcRequest, JsonRpcResponse, RpcId};
pub use transport::{call, HealthStatus, RpcTransport};
