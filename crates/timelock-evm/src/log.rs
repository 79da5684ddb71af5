//! Raw EVM log as returned by `eth_getLogs` / receipts.

use serde::{Deserialize, Deserializer};

/// A raw chain log. Field names follow the JSON-RPC log object.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawLog {
    pub address: String,
    pub topics: Vec<String>,
    #[serde(deserialize_with = "hex_data")]
    pub data: Vec<u8>,
    pub transaction_hash: String,
    #[serde(default, deserialize_with = "opt_quantity")]
    pub block_number: Option<u64>,
    #[serde(default, deserialize_with = "opt_quantity")]
    pub log_index: Option<u64>,
}

fn hex_data<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
    let s = String::deserialize(d)?;
    let body = s.strip_prefix("0x").unwrap_or(&s);
    hex::decode(body).map_err(serde::de::Error::custom)
}

fn opt_quantity<'de, D: Deserializer<'de>>(d: D) -> Result<Option<u64>, D::Error> {
    let s: Option<String> = Option::deserialize(d)?;
    match s {
        None => Ok(None),
        Some(s) => timelock_rpc::request::parse_quantity(&s)
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid quantity '{s}'"))),
    }
}
