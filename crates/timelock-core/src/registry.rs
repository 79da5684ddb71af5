//! Platform contract registry.
//!
//! Flows are only created or mutated for contracts registered and active
//! here. The registry also resolves webhook shared secrets to the
//! chain + standard they authenticate.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::FlowError;
use crate::types::Standard;

/// The chain and standard a webhook secret authenticates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretBinding {
    pub chain_id: u64,
    pub standard: Standard,
}

/// A registered contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractEntry {
    pub standard: Standard,
    pub chain_id: u64,
    pub address: String,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

#[async_trait]
pub trait ContractRegistry: Send + Sync {
    /// Registered and active.
    async fn is_platform_contract(
        &self,
        standard: Standard,
        chain_id: u64,
        contract: &str,
    ) -> Result<bool, FlowError>;

    /// Active contract addresses, `0x`-prefixed lowercase.
    async fn list_active_contracts(
        &self,
        standard: Standard,
        chain_id: u64,
    ) -> Result<Vec<String>, FlowError>;

    async fn contract_by_shared_secret(
        &self,
        secret: &str,
    ) -> Result<Option<SecretBinding>, FlowError>;
}

type ContractId = (Standard, u64, String);

/// In-memory registry, seeded from configuration.
#[derive(Default)]
pub struct MemoryContractRegistry {
    contracts: RwLock<HashMap<ContractId, bool>>,
    secrets: RwLock<HashMap<String, SecretBinding>>,
}

impl MemoryContractRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from configuration entries.
    pub fn seeded(
        contracts: impl IntoIterator<Item = ContractEntry>,
        secrets: impl IntoIterator<Item = (String, SecretBinding)>,
    ) -> Self {
        let reg = Self::new();
        for entry in contracts {
            reg.register(entry);
        }
        for (secret, binding) in secrets {
            reg.bind_secret(secret, binding);
        }
        reg
    }

    /// Add or replace a contract.
    pub fn register(&self, entry: ContractEntry) {
        let id = (entry.standard, entry.chain_id, entry.address.to_ascii_lowercase());
        if let Ok(mut map) = self.contracts.write() {
            map.insert(id, entry.active);
        }
    }

    /// Mark a contract inactive. Returns `false` if it was never registered.
    pub fn deactivate(&self, standard: Standard, chain_id: u64, contract: &str) -> bool {
        let id = (standard, chain_id, contract.to_ascii_lowercase());
        match self.contracts.write() {
            Ok(mut map) => match map.get_mut(&id) {
                Some(active) => {
                    *active = false;
                    true
                }
                None => false,
            },
            Err(_) => false,
        }
    }

    pub fn bind_secret(&self, secret: impl Into<String>, binding: SecretBinding) {
        if let Ok(mut map) = self.secrets.write() {
            map.insert(secret.into(), binding);
        }
    }
}

#[async_trait]
impl ContractRegistry for MemoryContractRegistry {
    async fn is_platform_contract(
        &self,
        standard: Standard,
        chain_id: u64,
        contract: &str,
    ) -> Result<bool, FlowError> {
        let map = self
            .contracts
            .read()
            .map_err(|e| FlowError::Registry(e.to_string()))?;
        let id = (standard, chain_id, contract.to_ascii_lowercase());
        Ok(map.get(&id).copied().unwrap_or(false))
    }

    async fn list_active_contracts(
        &self,
        standard: Standard,
        chain_id: u64,
    ) -> Result<Vec<String>, FlowError> {
        let map = self
            .contracts
            .read()
            .map_err(|e| FlowError::Registry(e.to_string()))?;
        let mut out: Vec<String> = map
            .iter()
            .filter(|((s, c, _), active)| *s == standard && *c == chain_id && **active)
            .map(|((_, _, addr), _)| addr.clone())
            .collect();
        out.sort();
        Ok(out)
    }

    async fn contract_by_shared_secret(
        &self,
        secret: &str,
    ) -> Result<Option<SecretBinding>, FlowError> {
        let map = self
            .secrets
            .read()
            .map_err(|e| FlowError::Registry(e.to_string()))?;
        Ok(map.get(secret).copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(addr: &str, active: bool) -> ContractEntry {
        ContractEntry {
            standard: Standard::Compound,
            chain_id: 1,
            address: addr.into(),
            active,
        }
    }

    #[tokio::test]
    async fn membership_is_case_insensitive() {
        let reg = MemoryContractRegistry::new();
        reg.register(entry("0xABCD", true));
        assert!(reg.is_platform_contract(Standard::Compound, 1, "0xabcd").await.unwrap());
        assert!(!reg.is_platform_contract(Standard::Openzeppelin, 1, "0xabcd").await.unwrap());
        assert!(!reg.is_platform_contract(Standard::Compound, 2, "0xabcd").await.unwrap());
    }

    #[tokio::test]
    async fn inactive_contracts_are_excluded() {
        let reg = MemoryContractRegistry::seeded([entry("0x01", true), entry("0x02", false)], []);
        assert_eq!(
            reg.list_active_contracts(Standard::Compound, 1).await.unwrap(),
            vec!["0x01".to_string()]
        );
        assert!(reg.deactivate(Standard::Compound, 1, "0x01"));
        assert!(!reg.is_platform_contract(Standard::Compound, 1, "0x01").await.unwrap());
        assert!(!reg.deactivate(Standard::Compound, 1, "0x99"));
    }

    #[tokio::test]
    async fn secrets_resolve_to_binding() {
        let binding = SecretBinding {
            chain_id: 10,
            standard: Standard::Openzeppelin,
        };
        let reg = MemoryContractRegistry::seeded([], [("s3cret".to_string(), binding)]);
        assert_eq!(reg.contract_by_shared_secret("s3cret").await.unwrap(), Some(binding));
        assert_eq!(reg.contract_by_shared_secret("nope").await.unwrap(), None);
    }
}
