//! The subset of eth_* response objects enrichment reads.

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct RpcBlock {
    pub timestamp: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RpcReceipt {
    /// `"0x1"` success, `"0x0"` reverted. Absent on pre-Byzantium receipts.
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcAccessListItem {
    pub address: String,
    #[serde(default)]
    pub storage_keys: Vec<String>,
}

/// A transaction object as returned by `eth_getTransactionByHash`.
///
/// Everything but the hash is optional: L2 nodes omit or add fields freely.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcTransaction {
    pub hash: String,
    pub from: Option<String>,
    #[serde(rename = "type")]
    pub tx_type: Option<String>,
    pub nonce: Option<String>,
    pub gas_price: Option<String>,
    pub max_priority_fee_per_gas: Option<String>,
    pub max_fee_per_gas: Option<String>,
    pub gas: Option<String>,
    pub to: Option<String>,
    pub value: Option<String>,
    pub input: Option<String>,
    pub chain_id: Option<String>,
    pub access_list: Option<Vec<RpcAccessListItem>>,
    pub v: Option<String>,
    pub r: Option<String>,
    pub s: Option<String>,
    pub y_parity: Option<String>,
}
