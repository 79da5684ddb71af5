//! `ChainEventDecoder`: raw log → `TransactionEvent`.

use std::collections::HashMap;

use alloy_core::dyn_abi::{DynSolType, DynSolValue};
use alloy_primitives::U256;
use chrono::{DateTime, Utc};

use timelock_core::{EventKind, Standard, TransactionEvent};

use crate::abi::{EventAbi, EventTable};
use crate::error::DecodeError;
use crate::log::RawLog;

/// Compound `Timelock.GRACE_PERIOD`.
pub const COMPOUND_GRACE_PERIOD_SECS: u64 = 14 * 24 * 60 * 60;

/// Decodes timelock logs of both standards. Stateless after construction.
#[derive(Debug, Clone)]
pub struct ChainEventDecoder {
    table: EventTable,
    grace_period: u64,
}

impl Default for ChainEventDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl ChainEventDecoder {
    pub fn new() -> Self {
        Self {
            table: EventTable::new(),
            grace_period: COMPOUND_GRACE_PERIOD_SECS,
        }
    }

    /// Override the compound grace period (forks sometimes change it).
    pub fn with_grace_period(mut self, secs: u64) -> Self {
        self.grace_period = secs;
        self
    }

    /// The ABI entry a log matches, without decoding it.
    pub fn identify(&self, log: &RawLog) -> Result<&'static EventAbi, DecodeError> {
        let topic0 = log.topics.first().ok_or(DecodeError::NoTopics)?;
        self.table
            .get(topic0)
            .ok_or_else(|| DecodeError::UnknownEventSignature {
                topic0: topic0.clone(),
            })
    }

    /// Decode `log` emitted on `chain_id`. Block timestamp, sender and
    /// receipt status are left for enrichment.
    pub fn decode(&self, chain_id: u64, log: &RawLog) -> Result<TransactionEvent, DecodeError> {
        let abi = self.identify(log)?;
        let mut fields: HashMap<&'static str, DynSolValue> = HashMap::new();

        // Indexed params → topics[1..]
        for (i, param) in abi.indexed_params().enumerate() {
            let index = i + 1;
            let topic = log.topics.get(index).ok_or_else(|| DecodeError::MissingTopic {
                index,
                field: param.name.to_string(),
            })?;
            fields.insert(param.name, decode_topic(topic, param.ty)?);
        }

        // Non-indexed params → data
        let data_params: Vec<_> = abi.data_params().collect();
        let values = decode_data(&log.data, data_params.iter().map(|p| p.ty))?;
        for (param, value) in data_params.iter().zip(values) {
            fields.insert(param.name, value);
        }

        let id_field = match abi.standard {
            Standard::Compound => "txHash",
            Standard::Openzeppelin => "id",
        };
        let flow_id = opt(fixed_bytes_hex(&fields, id_field))?.ok_or_else(|| {
            DecodeError::UnexpectedValue {
                field: id_field.to_string(),
            }
        })?;

        let mut event = TransactionEvent::new(
            abi.kind,
            abi.standard,
            chain_id,
            &log.address,
            flow_id,
            &log.transaction_hash,
        );
        event.block_number = log.block_number;

        event.call.target = opt(address_hex(&fields, "target"))?;
        event.call.value = opt(uint(&fields, "value"))?.map(|v| v.to_string());
        event.call.data = opt(bytes(&fields, "data"))?;

        match abi.standard {
            Standard::Compound => {
                event.call.signature = opt(string(&fields, "signature"))?;
                event.eta = opt(uint(&fields, "eta"))?.and_then(timestamp);
                if abi.kind == EventKind::Queue {
                    event.grace_period = Some(self.grace_period);
                }
            }
            Standard::Openzeppelin => {
                event.call.predecessor = opt(fixed_bytes_hex(&fields, "predecessor"))?;
                event.delay = opt(uint(&fields, "delay"))?
                    .map(|d| u64::try_from(d).map_err(|_| DecodeError::UnexpectedValue {
                        field: "delay".into(),
                    }))
                    .transpose()?;
            }
        }

        tracing::debug!(
            chain_id,
            event = abi.name,
            contract = %event.contract,
            flow_id = %event.flow_id,
            "decoded timelock log"
        );
        Ok(event)
    }
}

// ─── ABI plumbing ─────────────────────────────────────────────────────────────

fn parse_type(ty: &str) -> Result<DynSolType, DecodeError> {
    DynSolType::parse(ty).map_err(|e| DecodeError::AbiDecodeFailed {
        reason: format!("bad type '{ty}': {e}"),
    })
}

/// Decode one indexed topic. Only value types are indexed in the timelock
/// ABIs, so every topic is a 32-byte ABI word.
fn decode_topic(topic_hex: &str, ty: &str) -> Result<DynSolValue, DecodeError> {
    let hex = topic_hex.strip_prefix("0x").unwrap_or(topic_hex);
    let bytes = hex::decode(hex).map_err(|e| DecodeError::InvalidLog {
        reason: format!("invalid topic hex: {e}"),
    })?;
    if bytes.len() != 32 {
        return Err(DecodeError::InvalidLog {
            reason: format!("topic is {} bytes, expected 32", bytes.len()),
        });
    }
    parse_type(ty)?
        .abi_decode(&bytes)
        .map_err(|e| DecodeError::AbiDecodeFailed {
            reason: format!("topic decode: {e}"),
        })
}

/// Decode the log data as the sequence of non-indexed params.
fn decode_data<'a>(
    data: &[u8],
    types: impl Iterator<Item = &'a str>,
) -> Result<Vec<DynSolValue>, DecodeError> {
    let types = types.map(parse_type).collect::<Result<Vec<_>, _>>()?;
    if types.is_empty() {
        return Ok(Vec::new());
    }
    let decoded = DynSolType::Tuple(types)
        .abi_decode_sequence(data)
        .map_err(|e| DecodeError::AbiDecodeFailed {
            reason: e.to_string(),
        })?;
    match decoded {
        DynSolValue::Tuple(vals) => Ok(vals),
        other => Ok(vec![other]),
    }
}

// ─── Field extraction ─────────────────────────────────────────────────────────
//
// Each extractor returns `Err(None)` when the field is absent from this
// event's ABI and `Err(Some(e))` when it is present with the wrong shape;
// `opt` folds absence into `Ok(None)`.

type Extract<T> = Result<T, Option<DecodeError>>;

fn opt<T>(r: Extract<T>) -> Result<Option<T>, DecodeError> {
    match r {
        Ok(v) => Ok(Some(v)),
        Err(None) => Ok(None),
        Err(Some(e)) => Err(e),
    }
}

fn unexpected(field: &str) -> Option<DecodeError> {
    Some(DecodeError::UnexpectedValue {
        field: field.to_string(),
    })
}

fn fixed_bytes_hex(fields: &HashMap<&str, DynSolValue>, name: &str) -> Extract<String> {
    match fields.get(name) {
        Some(DynSolValue::FixedBytes(word, size)) => {
            Ok(format!("0x{}", hex::encode(&word[..*size])))
        }
        Some(_) => Err(unexpected(name)),
        None => Err(None),
    }
}

fn address_hex(fields: &HashMap<&str, DynSolValue>, name: &str) -> Extract<String> {
    match fields.get(name) {
        Some(DynSolValue::Address(a)) => Ok(format!("0x{}", hex::encode(a.as_slice()))),
        Some(_) => Err(unexpected(name)),
        None => Err(None),
    }
}

fn uint(fields: &HashMap<&str, DynSolValue>, name: &str) -> Extract<U256> {
    match fields.get(name) {
        Some(DynSolValue::Uint(v, _)) => Ok(*v),
        Some(_) => Err(unexpected(name)),
        None => Err(None),
    }
}

fn bytes(fields: &HashMap<&str, DynSolValue>, name: &str) -> Extract<Vec<u8>> {
    match fields.get(name) {
        Some(DynSolValue::Bytes(b)) => Ok(b.clone()),
        Some(_) => Err(unexpected(name)),
        None => Err(None),
    }
}

fn string(fields: &HashMap<&str, DynSolValue>, name: &str) -> Extract<String> {
    match fields.get(name) {
        Some(DynSolValue::String(s)) => Ok(s.clone()),
        Some(_) => Err(unexpected(name)),
        None => Err(None),
    }
}

fn timestamp(secs: U256) -> Option<DateTime<Utc>> {
    let secs = i64::try_from(u64::try_from(secs).ok()?).ok()?;
    DateTime::from_timestamp(secs, 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::TIMELOCK_EVENTS;
    use alloy_primitives::{Address, B256};

    fn word(byte: u8) -> String {
        format!("0x{}", hex::encode([byte; 32]))
    }

    fn address_topic(addr: &Address) -> String {
        let mut w = [0u8; 32];
        w[12..].copy_from_slice(addr.as_slice());
        format!("0x{}", hex::encode(w))
    }

    fn log_for(name: &str, topics: Vec<String>, data: Vec<u8>) -> RawLog {
        let abi = TIMELOCK_EVENTS.iter().find(|e| e.name == name).unwrap();
        let mut all = vec![abi.topic0()];
        all.extend(topics);
        RawLog {
            address: "0x6D903F6003CCA6255D85CCA4D3B5E5146DC33925".into(),
            topics: all,
            data,
            transaction_hash: "0xABCDEF".into(),
            block_number: Some(100),
            log_index: Some(0),
        }
    }

    #[test]
    fn decodes_compound_queue() {
        let target = Address::repeat_byte(0x11);
        let data = DynSolValue::Tuple(vec![
            DynSolValue::Uint(U256::from(5u64), 256),
            DynSolValue::String("setPendingAdmin(address)".into()),
            DynSolValue::Bytes(vec![0xde, 0xad]),
            DynSolValue::Uint(U256::from(1_700_000_000u64), 256),
        ])
        .abi_encode_params();
        let log = log_for("QueueTransaction", vec![word(0xaa), address_topic(&target)], data);

        let ev = ChainEventDecoder::new().decode(1, &log).unwrap();
        assert_eq!(ev.kind, EventKind::Queue);
        assert_eq!(ev.standard, Standard::Compound);
        assert_eq!(ev.flow_id, word(0xaa));
        assert_eq!(ev.contract, "0x6d903f6003cca6255d85cca4d3b5e5146dc33925");
        assert_eq!(ev.tx_hash, "0xabcdef");
        assert_eq!(ev.call.target.as_deref(), Some("0x1111111111111111111111111111111111111111"));
        assert_eq!(ev.call.value.as_deref(), Some("5"));
        assert_eq!(ev.call.signature.as_deref(), Some("setPendingAdmin(address)"));
        assert_eq!(ev.call.data, Some(vec![0xde, 0xad]));
        assert_eq!(ev.eta.unwrap().timestamp(), 1_700_000_000);
        assert_eq!(ev.grace_period, Some(COMPOUND_GRACE_PERIOD_SECS));
        assert_eq!(ev.block_number, Some(100));
    }

    #[test]
    fn decodes_openzeppelin_schedule() {
        let data = DynSolValue::Tuple(vec![
            DynSolValue::Address(Address::repeat_byte(0x22)),
            DynSolValue::Uint(U256::ZERO, 256),
            DynSolValue::Bytes(vec![1, 2, 3]),
            DynSolValue::FixedBytes(B256::ZERO, 32),
            DynSolValue::Uint(U256::from(86_400u64), 256),
        ])
        .abi_encode_params();
        let index_topic = format!("0x{}", hex::encode(B256::ZERO));
        let log = log_for("CallScheduled", vec![word(0xbb), index_topic], data);

        let ev = ChainEventDecoder::new().decode(10, &log).unwrap();
        assert_eq!(ev.standard, Standard::Openzeppelin);
        assert_eq!(ev.kind, EventKind::Queue);
        assert_eq!(ev.flow_id, word(0xbb));
        assert_eq!(ev.delay, Some(86_400));
        assert_eq!(ev.call.value.as_deref(), Some("0"));
        assert_eq!(ev.call.predecessor, Some(format!("0x{}", "00".repeat(32))));
        assert_eq!(ev.grace_period, None);
    }

    #[test]
    fn decodes_openzeppelin_cancel_without_data() {
        let log = log_for("Cancelled", vec![word(0xcc)], vec![]);
        let ev = ChainEventDecoder::new().decode(1, &log).unwrap();
        assert_eq!(ev.kind, EventKind::Cancel);
        assert_eq!(ev.flow_id, word(0xcc));
        assert!(ev.call.target.is_none());
    }

    #[test]
    fn unknown_signature() {
        let mut log = log_for("Cancelled", vec![word(0xcc)], vec![]);
        log.topics[0] = word(0x01);
        let err = ChainEventDecoder::new().decode(1, &log).unwrap_err();
        assert!(matches!(err, DecodeError::UnknownEventSignature { .. }));
    }

    #[test]
    fn missing_topic() {
        let log = log_for("CallExecuted", vec![word(0xcc)], vec![]);
        let err = ChainEventDecoder::new().decode(1, &log).unwrap_err();
        assert!(matches!(err, DecodeError::MissingTopic { index: 2, .. }));
    }
}
