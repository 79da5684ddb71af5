//! Engine configuration, loaded from YAML.
//!
//! ```yaml
//! poll_interval_secs: 300
//! promotion_interval_secs: 60
//! chains:
//!   - chain_id: 1
//!     name: ethereum
//!     rpc_urls: ["https://eth.llamarpc.com"]
//!     indexer_url: "https://api.goldsky.com/.../ethereum/gn"
//!   - chain_id: 10
//!     name: optimism
//!     rpc_urls: ["https://mainnet.optimism.io"]
//!     recovery_schemes: [eip1559, eip155]
//! registry:
//!   contracts:
//!     - { standard: compound, chain_id: 1, address: "0x6d903f6003cca6255d85cca4d3b5e5146dc33925" }
//!   secrets:
//!     - { secret: "s3cr3t", chain_id: 1, standard: compound }
//! webhook:
//!   listen: "0.0.0.0:8080"
//! log:
//!   level: info
//!   components: { timelock_rpc: warn }
//! ```

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use timelock_core::{ContractEntry, SecretBinding, Standard};
use timelock_evm::{RecoveryScheme, COMPOUND_GRACE_PERIOD_SECS};
use timelock_rpc::policy::{CircuitBreakerConfig, RetryConfig};
use timelock_rpc::{GatewayConfig, ProviderPoolConfig};

use crate::error::EngineError;

// ─── Top level ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Seconds between full poll resyncs.
    pub poll_interval_secs: u64,
    /// Seconds between promoter sweeps.
    pub promotion_interval_secs: u64,
    /// Flows promoted per sweep.
    pub promotion_batch_size: usize,
    /// Maximum flows requested per indexer query.
    pub indexer_result_limit: usize,
    /// Capacity of the notification queue; overflow is dropped.
    pub notification_queue: usize,
    pub chains: Vec<ChainConfig>,
    pub rpc: RpcConfig,
    pub registry: RegistrySeed,
    pub webhook: WebhookConfig,
    pub storage: StorageConfig,
    pub log: LogConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 300,
            promotion_interval_secs: 60,
            promotion_batch_size: 200,
            indexer_result_limit: 1_000,
            notification_queue: 1_024,
            chains: Vec::new(),
            rpc: RpcConfig::default(),
            registry: RegistrySeed::default(),
            webhook: WebhookConfig::default(),
            storage: StorageConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self, EngineError> {
        let config: Self =
            serde_yaml::from_str(yaml).map_err(|e| EngineError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, EngineError> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&yaml)
            .map_err(|e| EngineError::Config(format!("{}: {e}", path.display())))
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.poll_interval_secs == 0 || self.promotion_interval_secs == 0 {
            return Err(EngineError::Config("intervals must be non-zero".into()));
        }
        if self.promotion_batch_size == 0 || self.indexer_result_limit == 0 {
            return Err(EngineError::Config(
                "promotion_batch_size and indexer_result_limit must be non-zero".into(),
            ));
        }

        let mut seen = HashSet::new();
        for chain in &self.chains {
            if !seen.insert(chain.chain_id) {
                return Err(EngineError::Config(format!(
                    "chain {} configured twice",
                    chain.chain_id
                )));
            }
        }

        for contract in &self.registry.contracts {
            if !seen.contains(&contract.chain_id) {
                return Err(EngineError::Config(format!(
                    "contract {} references unconfigured chain {}",
                    contract.address, contract.chain_id
                )));
            }
        }
        for secret in &self.registry.secrets {
            if secret.secret.is_empty() {
                return Err(EngineError::Config("empty webhook secret".into()));
            }
        }

        if self.storage.backend == StorageBackend::Sqlite && self.storage.path.is_none() {
            return Err(EngineError::Config("sqlite storage requires a path".into()));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn promotion_interval(&self) -> Duration {
        Duration::from_secs(self.promotion_interval_secs)
    }

    pub fn chain(&self, chain_id: u64) -> Option<&ChainConfig> {
        self.chains.iter().find(|c| c.chain_id == chain_id)
    }
}

// ─── Chains ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    pub chain_id: u64,
    #[serde(default)]
    pub name: String,
    /// JSON-RPC endpoints; empty disables raw-log processing for the chain.
    #[serde(default)]
    pub rpc_urls: Vec<String>,
    /// GraphQL endpoint of the indexer; `None` disables poll sync.
    #[serde(default)]
    pub indexer_url: Option<String>,
    /// Sender recovery schemes to try, in order. Empty trusts the node's `from`.
    #[serde(default)]
    pub recovery_schemes: Vec<RecoveryScheme>,
    #[serde(default = "default_grace_period")]
    pub grace_period_secs: u64,
}

fn default_grace_period() -> u64 {
    COMPOUND_GRACE_PERIOD_SECS
}

// ─── RPC ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RpcConfig {
    /// Retry tier for optional enrichment data.
    pub bounded: RetryConfig,
    /// Retry tier for mandatory data; `max_attempts` is ignored.
    pub unbounded: RetryConfig,
    pub request_timeout_ms: u64,
    pub failure_threshold: u32,
    pub open_duration_ms: u64,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            bounded: RetryConfig::default(),
            unbounded: RetryConfig::unbounded(),
            request_timeout_ms: 15_000,
            failure_threshold: 5,
            open_duration_ms: 30_000,
        }
    }
}

impl RpcConfig {
    pub fn gateway_config(&self) -> GatewayConfig {
        GatewayConfig {
            bounded: self.bounded.clone(),
            unbounded: self.unbounded.clone(),
            pool: ProviderPoolConfig {
                circuit_breaker: CircuitBreakerConfig {
                    failure_threshold: self.failure_threshold,
                    open_duration: Duration::from_millis(self.open_duration_ms),
                },
                request_timeout: Duration::from_millis(self.request_timeout_ms),
            },
        }
    }
}

// ─── Registry seed ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistrySeed {
    #[serde(default)]
    pub contracts: Vec<ContractEntry>,
    #[serde(default)]
    pub secrets: Vec<SecretConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretConfig {
    pub secret: String,
    pub chain_id: u64,
    pub standard: Standard,
}

impl RegistrySeed {
    pub fn secret_bindings(&self) -> HashMap<String, SecretBinding> {
        self.secrets
            .iter()
            .map(|s| {
                (
                    s.secret.clone(),
                    SecretBinding {
                        chain_id: s.chain_id,
                        standard: s.standard,
                    },
                )
            })
            .collect()
    }
}

// ─── Webhook / storage ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    pub enabled: bool,
    pub listen: SocketAddr,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listen: SocketAddr::from(([0, 0, 0, 0], 8080)),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Memory,
    Sqlite,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub path: Option<String>,
}

// ─── Logging ─────────────────────────────────────────────────────────────────

/// Log level per component.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Global default level: "trace" | "debug" | "info" | "warn" | "error"
    #[serde(default = "default_level")]
    pub level: String,
    /// Override per component: crate name → level
    #[serde(default)]
    pub components: HashMap<String, String>,
    /// Emit JSON structured logs instead of human-readable text
    #[serde(default)]
    pub json: bool,
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            components: HashMap::new(),
            json: false,
        }
    }
}

impl LogConfig {
    /// Filter directives, e.g. `"info,timelock_rpc=warn"`.
    pub fn directives(&self) -> String {
        let mut directives = self.level.clone();
        let mut components: Vec<_> = self.components.iter().collect();
        components.sort();
        for (component, level) in components {
            directives.push_str(&format!(",{}={}", component.replace('-', "_"), level));
        }
        directives
    }
}

/// Install the global subscriber. Call once at startup; `RUST_LOG`, when
/// set, takes precedence over the configured directives.
pub fn init_tracing(config: &LogConfig) -> Result<(), EngineError> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.directives()))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let result = if config.json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer())
            .try_init()
    };
    result.map_err(|e| EngineError::Config(format!("tracing: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
poll_interval_secs: 120
chains:
  - chain_id: 1
    name: ethereum
    rpc_urls: ["http://localhost:8545"]
    indexer_url: "http://localhost:8000/graphql"
  - chain_id: 10
    recovery_schemes: [eip1559, eip155]
registry:
  contracts:
    - { standard: compound, chain_id: 1, address: "0xAbC" }
    - { standard: openzeppelin, chain_id: 10, address: "0xdef", active: false }
  secrets:
    - { secret: "s1", chain_id: 1, standard: compound }
log:
  level: debug
  components: { timelock-rpc: warn }
"#;

    #[test]
    fn parses_with_defaults() {
        let cfg = EngineConfig::from_yaml_str(SAMPLE).unwrap();
        assert_eq!(cfg.poll_interval(), Duration::from_secs(120));
        assert_eq!(cfg.promotion_interval_secs, 60);
        assert_eq!(cfg.chains.len(), 2);
        assert_eq!(cfg.chain(1).unwrap().grace_period_secs, COMPOUND_GRACE_PERIOD_SECS);
        assert_eq!(
            cfg.chain(10).unwrap().recovery_schemes,
            vec![RecoveryScheme::Eip1559, RecoveryScheme::Eip155]
        );
        assert!(cfg.chain(10).unwrap().indexer_url.is_none());
        assert!(!cfg.registry.contracts[1].active);
        assert_eq!(
            cfg.registry.secret_bindings()["s1"],
            SecretBinding { chain_id: 1, standard: Standard::Compound }
        );
        assert!(cfg.webhook.enabled);
        assert_eq!(cfg.storage.backend, StorageBackend::Memory);
    }

    #[test]
    fn log_directives() {
        let cfg = EngineConfig::from_yaml_str(SAMPLE).unwrap();
        assert_eq!(cfg.log.directives(), "debug,timelock_rpc=warn");
    }

    #[test]
    fn rejects_duplicate_chains() {
        let yaml = "chains: [{ chain_id: 1 }, { chain_id: 1 }]";
        assert!(matches!(
            EngineConfig::from_yaml_str(yaml),
            Err(EngineError::Config(_))
        ));
    }

    #[test]
    fn rejects_contract_on_unknown_chain() {
        let yaml = r#"
registry:
  contracts: [{ standard: compound, chain_id: 5, address: "0x1" }]
"#;
        assert!(EngineConfig::from_yaml_str(yaml).is_err());
    }

    #[test]
    fn sqlite_needs_path() {
        assert!(EngineConfig::from_yaml_str("storage: { backend: sqlite }").is_err());
        let cfg = EngineConfig::from_yaml_str("storage: { backend: sqlite, path: ./f.db }").unwrap();
        assert_eq!(cfg.storage.path.as_deref(), Some("./f.db"));
    }

    #[test]
    fn example_config_is_valid() {
        let cfg =
            EngineConfig::from_yaml_str(include_str!("../../../config/engine.example.yaml")).unwrap();
        assert_eq!(cfg.chains.len(), 2);
        assert_eq!(cfg.chain(10).unwrap().recovery_schemes.len(), 3);
        assert_eq!(cfg.rpc.bounded.max_attempts, Some(3));
        assert_eq!(cfg.registry.secrets.len(), 1);
    }

    #[test]
    fn gateway_config_from_rpc_section() {
        let yaml = "rpc: { request_timeout_ms: 500, failure_threshold: 2 }";
        let gw = EngineConfig::from_yaml_str(yaml).unwrap().rpc.gateway_config();
        assert_eq!(gw.pool.request_timeout, Duration::from_millis(500));
        assert_eq!(gw.pool.circuit_breaker.failure_threshold, 2);
        assert!(gw.unbounded.max_attempts.is_none());
    }
}
