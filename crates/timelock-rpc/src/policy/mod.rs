//! Reliability policies applied by the pool and the gateway.
//!
//! ```text
//! gateway retry loop → [ProviderPool: next allowed slot → CircuitBreaker] → transport
//! ```

pub mod circuit_breaker;
pub mod retry;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use retry::{RetryConfig, RetryPolicy};
