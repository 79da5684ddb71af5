//! Transaction sender recovery.
//!
//! Some L2s report a `from` that is not the signer, or sign with a rule that
//! differs from the primary chain. Each chain is configured with an ordered
//! list of candidate schemes:
//!
//! ```text
//! candidates[0] ─✗─► candidates[1] ─✗─► … ─✗─► generic (scheme by tx type) ─✗─► node `from` ─✗─► SenderRecoveryFailed
//! ```
//!
//! A scheme only counts as successful if re-encoding the signed transaction
//! under it reproduces the transaction hash, so a scheme that does not apply
//! fails instead of recovering a wrong address.

use alloy_primitives::{Address, Bytes, PrimitiveSignature, B256, U256};
use alloy_rlp::{BufMut, Encodable};
use serde::{Deserialize, Serialize};

use crate::abi::keccak256;
use crate::error::EnrichError;
use crate::rpc_types::RpcTransaction;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecoveryScheme {
    /// Type 0x02 dynamic-fee transactions.
    Eip1559,
    /// Type 0x01 access-list transactions.
    Eip2930,
    /// Legacy transactions with replay-protected `v`.
    Eip155,
    /// Legacy transactions with `v ∈ {27, 28}`.
    Homestead,
}

impl RecoveryScheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Eip1559 => "eip1559",
            Self::Eip2930 => "eip2930",
            Self::Eip155 => "eip155",
            Self::Homestead => "homestead",
        }
    }

    /// The scheme the primary chain would use for `tx`, from its type and `v`.
    pub fn detect(tx: &RpcTransaction) -> Option<Self> {
        match tx_type(tx)? {
            2 => Some(Self::Eip1559),
            1 => Some(Self::Eip2930),
            0 => match tx.v.as_deref().and_then(|v| quantity(v).ok()) {
                Some(v) if v >= U256::from(35u64) => Some(Self::Eip155),
                Some(_) => Some(Self::Homestead),
                None => None,
            },
            _ => None,
        }
    }

    /// Recover the signer of `tx` under this scheme. `chain_id` is used when
    /// the transaction object does not carry one.
    pub fn recover(&self, tx: &RpcTransaction, chain_id: u64) -> Result<String, EnrichError> {
        let fail = |reason: String| EnrichError::Scheme {
            scheme: self.as_str().to_string(),
            reason,
        };

        let ty = tx_type(tx).ok_or_else(|| fail("unknown transaction type".into()))?;
        let expected_ty = match self {
            Self::Eip1559 => 2,
            Self::Eip2930 => 1,
            Self::Eip155 | Self::Homestead => 0,
        };
        if ty != expected_ty {
            return Err(fail(format!("transaction type {ty} does not match")));
        }

        let f = Fields::parse(tx, chain_id).map_err(fail)?;
        let (unsigned, signed, odd) = match self {
            Self::Eip1559 => {
                let odd = typed_parity(&f).map_err(fail)?;
                let parity = U256::from(odd as u8);
                let access = Raw(&f.access_list);
                let body: [&dyn Encodable; 9] = [
                    &f.chain_id, &f.nonce, &f.max_priority_fee, &f.max_fee, &f.gas, &f.to,
                    &f.value, &f.input, &access,
                ];
                let unsigned = typed(2, &rlp_list(&body));
                let signed_body: Vec<&dyn Encodable> =
                    body.iter().copied().chain([&parity as &dyn Encodable, &f.r, &f.s]).collect();
                (unsigned, typed(2, &rlp_list(&signed_body)), odd)
            }
            Self::Eip2930 => {
                let odd = typed_parity(&f).map_err(fail)?;
                let parity = U256::from(odd as u8);
                let access = Raw(&f.access_list);
                let body: [&dyn Encodable; 8] = [
                    &f.chain_id, &f.nonce, &f.gas_price, &f.gas, &f.to, &f.value, &f.input,
                    &access,
                ];
                let unsigned = typed(1, &rlp_list(&body));
                let signed_body: Vec<&dyn Encodable> =
                    body.iter().copied().chain([&parity as &dyn Encodable, &f.r, &f.s]).collect();
                (unsigned, typed(1, &rlp_list(&signed_body)), odd)
            }
            Self::Eip155 => {
                let offset = f.chain_id * U256::from(2u64) + U256::from(35u64);
                let odd = match f.v.checked_sub(offset) {
                    Some(p) if p == U256::ZERO => false,
                    Some(p) if p == U256::from(1u64) => true,
                    _ => return Err(fail(format!("v={} is not replay-protected for chain {}", f.v, f.chain_id))),
                };
                let zero = U256::ZERO;
                let unsigned = rlp_list(&[
                    &f.nonce as &dyn Encodable, &f.gas_price, &f.gas, &f.to, &f.value, &f.input, &f.chain_id,
                    &zero, &zero,
                ]);
                let signed = rlp_list(&[
                    &f.nonce as &dyn Encodable, &f.gas_price, &f.gas, &f.to, &f.value, &f.input, &f.v, &f.r, &f.s,
                ]);
                (unsigned, signed, odd)
            }
            Self::Homestead => {
                let odd = if f.v == U256::from(27u64) {
                    false
                } else if f.v == U256::from(28u64) {
                    true
                } else {
                    return Err(fail(format!("v={} is not a homestead value", f.v)));
                };
                let unsigned =
                    rlp_list(&[&f.nonce as &dyn Encodable, &f.gas_price, &f.gas, &f.to, &f.value, &f.input]);
                let signed = rlp_list(&[
                    &f.nonce as &dyn Encodable, &f.gas_price, &f.gas, &f.to, &f.value, &f.input, &f.v, &f.r, &f.s,
                ]);
                (unsigned, signed, odd)
            }
        };

        let recomputed = format!("0x{}", hex::encode(keccak256(&signed)));
        if !recomputed.eq_ignore_ascii_case(&tx.hash) {
            return Err(fail(format!("re-encoded hash {recomputed} does not match")));
        }

        let sig = PrimitiveSignature::new(f.r, f.s, odd);
        let prehash = B256::from(keccak256(&unsigned));
        let signer: Address = sig
            .recover_address_from_prehash(&prehash)
            .map_err(|e| fail(e.to_string()))?;
        Ok(format!("0x{}", hex::encode(signer.as_slice())))
    }
}

/// Try `candidates` in order, then the generic scheme, then the node-reported
/// `from`.
pub fn recover_sender(
    candidates: &[RecoveryScheme],
    tx: &RpcTransaction,
    chain_id: u64,
) -> Result<String, EnrichError> {
    for scheme in candidates {
        match scheme.recover(tx, chain_id) {
            Ok(sender) => return Ok(sender),
            Err(e) => tracing::debug!(chain_id, tx = %tx.hash, error = %e, "sender recovery candidate failed"),
        }
    }

    if let Some(generic) = RecoveryScheme::detect(tx).filter(|s| !candidates.contains(s)) {
        match generic.recover(tx, chain_id) {
            Ok(sender) => return Ok(sender),
            Err(e) => tracing::debug!(chain_id, tx = %tx.hash, error = %e, "generic sender recovery failed"),
        }
    }

    match tx.from.as_deref().map(str::trim).filter(|f| !f.is_empty()) {
        Some(from) => Ok(from.to_ascii_lowercase()),
        None => Err(EnrichError::SenderRecoveryFailed {
            tx_hash: tx.hash.clone(),
        }),
    }
}

// ─── Field parsing ────────────────────────────────────────────────────────────

struct Fields {
    chain_id: U256,
    nonce: U256,
    gas_price: U256,
    max_priority_fee: U256,
    max_fee: U256,
    gas: U256,
    to: Bytes,
    value: U256,
    input: Bytes,
    /// Already RLP-encoded list.
    access_list: Vec<u8>,
    v: U256,
    y_parity: Option<U256>,
    r: U256,
    s: U256,
}

impl Fields {
    fn parse(tx: &RpcTransaction, chain_id: u64) -> Result<Self, String> {
        let chain_id = match tx.chain_id.as_deref() {
            Some(raw) => quantity(raw)?,
            None => U256::from(chain_id),
        };
        Ok(Self {
            chain_id,
            nonce: required(&tx.nonce, "nonce")?,
            gas_price: optional(&tx.gas_price)?,
            max_priority_fee: optional(&tx.max_priority_fee_per_gas)?,
            max_fee: optional(&tx.max_fee_per_gas)?,
            gas: required(&tx.gas, "gas")?,
            to: match tx.to.as_deref() {
                Some(to) => bytes(to)?,
                None => Bytes::new(),
            },
            value: optional(&tx.value)?,
            input: match tx.input.as_deref() {
                Some(input) => bytes(input)?,
                None => Bytes::new(),
            },
            access_list: access_list(tx)?,
            v: required(&tx.v, "v")?,
            y_parity: tx.y_parity.as_deref().map(quantity).transpose()?,
            r: required(&tx.r, "r")?,
            s: required(&tx.s, "s")?,
        })
    }
}

fn typed_parity(f: &Fields) -> Result<bool, String> {
    let y = f.y_parity.unwrap_or(f.v);
    if y == U256::ZERO {
        Ok(false)
    } else if y == U256::from(1u64) {
        Ok(true)
    } else {
        Err(format!("y parity {y} out of range"))
    }
}

fn tx_type(tx: &RpcTransaction) -> Option<u64> {
    match tx.tx_type.as_deref() {
        None => Some(0),
        Some(raw) => timelock_rpc::request::parse_quantity(raw),
    }
}

fn quantity(raw: &str) -> Result<U256, String> {
    let body = raw.strip_prefix("0x").unwrap_or(raw);
    if body.is_empty() {
        return Ok(U256::ZERO);
    }
    U256::from_str_radix(body, 16).map_err(|e| format!("invalid quantity '{raw}': {e}"))
}

fn required(raw: &Option<String>, name: &str) -> Result<U256, String> {
    raw.as_deref()
        .ok_or_else(|| format!("missing {name}"))
        .and_then(quantity)
}

fn optional(raw: &Option<String>) -> Result<U256, String> {
    raw.as_deref().map(quantity).unwrap_or(Ok(U256::ZERO))
}

fn bytes(raw: &str) -> Result<Bytes, String> {
    let body = raw.strip_prefix("0x").unwrap_or(raw);
    hex::decode(body)
        .map(Bytes::from)
        .map_err(|e| format!("invalid hex '{raw}': {e}"))
}

fn access_list(tx: &RpcTransaction) -> Result<Vec<u8>, String> {
    let mut items = Vec::new();
    for item in tx.access_list.iter().flatten() {
        let address: Address = item
            .address
            .parse()
            .map_err(|e| format!("invalid access list address: {e}"))?;
        let keys = item
            .storage_keys
            .iter()
            .map(|k| k.parse::<B256>().map_err(|e| format!("invalid storage key: {e}")))
            .collect::<Result<Vec<_>, _>>()?;
        items.push(rlp_list(&[&address as &dyn Encodable, &keys]));
    }
    let raws: Vec<Raw<'_>> = items.iter().map(|i| Raw(i)).collect();
    let refs: Vec<&dyn Encodable> = raws.iter().map(|r| r as &dyn Encodable).collect();
    Ok(rlp_list(&refs))
}

// ─── RLP ──────────────────────────────────────────────────────────────────────

/// Pre-encoded RLP item, written verbatim.
struct Raw<'a>(&'a [u8]);

impl Encodable for Raw<'_> {
    fn encode(&self, out: &mut dyn BufMut) {
        out.put_slice(self.0);
    }

    fn length(&self) -> usize {
        self.0.len()
    }
}

fn rlp_list(items: &[&dyn Encodable]) -> Vec<u8> {
    let mut out = Vec::new();
    alloy_rlp::encode_list::<&dyn Encodable, dyn Encodable>(items, &mut out);
    out
}

fn typed(ty: u8, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 1);
    out.push(ty);
    out.extend_from_slice(payload);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn legacy(v: &str) -> RpcTransaction {
        RpcTransaction {
            hash: "0x01".into(),
            from: Some("0xABCDEF0000000000000000000000000000000001".into()),
            tx_type: Some("0x0".into()),
            nonce: Some("0x1".into()),
            gas_price: Some("0x3b9aca00".into()),
            gas: Some("0x5208".into()),
            to: Some("0x0000000000000000000000000000000000000002".into()),
            value: Some("0x0".into()),
            input: Some("0x".into()),
            v: Some(v.into()),
            r: Some("0x1".into()),
            s: Some("0x1".into()),
            ..Default::default()
        }
    }

    #[test]
    fn detect_by_type_and_v() {
        assert_eq!(RecoveryScheme::detect(&legacy("0x25")), Some(RecoveryScheme::Eip155));
        assert_eq!(RecoveryScheme::detect(&legacy("0x1b")), Some(RecoveryScheme::Homestead));
        let mut tx = legacy("0x0");
        tx.tx_type = Some("0x2".into());
        assert_eq!(RecoveryScheme::detect(&tx), Some(RecoveryScheme::Eip1559));
        tx.tx_type = Some("0x7e".into());
        assert_eq!(RecoveryScheme::detect(&tx), None);
    }

    #[test]
    fn scheme_rejects_wrong_type() {
        let err = RecoveryScheme::Eip1559.recover(&legacy("0x25"), 1).unwrap_err();
        assert!(matches!(err, EnrichError::Scheme { .. }));
    }

    #[test]
    fn eip155_rejects_foreign_chain_v() {
        // v = 37 belongs to chain 1; chain 10 expects 55/56
        let err = RecoveryScheme::Eip155.recover(&legacy("0x25"), 10).unwrap_err();
        assert!(err.to_string().contains("replay-protected"));
    }

    #[test]
    fn hash_mismatch_is_a_scheme_failure() {
        let err = RecoveryScheme::Homestead.recover(&legacy("0x1b"), 1).unwrap_err();
        assert!(err.to_string().contains("does not match"));
    }

    #[test]
    fn falls_back_to_node_sender() {
        let tx = legacy("0x1b");
        let sender = recover_sender(&[RecoveryScheme::Eip155], &tx, 1).unwrap();
        assert_eq!(sender, "0xabcdef0000000000000000000000000000000001");
    }

    #[test]
    fn exhausted_options_fail() {
        let mut tx = legacy("0x1b");
        tx.from = None;
        let err = recover_sender(&[RecoveryScheme::Eip1559, RecoveryScheme::Eip2930], &tx, 1).unwrap_err();
        assert!(matches!(err, EnrichError::SenderRecoveryFailed { .. }));
    }

    /// The EIP-155 reference transaction, signed with key 0x4646…46.
    fn eip155_reference() -> RpcTransaction {
        RpcTransaction {
            hash: "0x33469b22e9f636356c4160a87eb19df52b7412e8eac32a4a55ffe88ea8350788".into(),
            from: Some("0x0000000000000000000000000000000000000bad".into()),
            tx_type: Some("0x0".into()),
            nonce: Some("0x9".into()),
            gas_price: Some("0x4a817c800".into()),
            gas: Some("0x5208".into()),
            to: Some("0x3535353535353535353535353535353535353535".into()),
            value: Some("0xde0b6b3a7640000".into()),
            input: Some("0x".into()),
            v: Some("0x25".into()),
            r: Some("0x28ef61340bd939bc2195fe537567866003e1a15d3c71ff63e1590620aa636276".into()),
            s: Some("0x67cbe9d8997f761aecb703304b3800ccf555c9f3dc64214b297fb1966a3b6d83".into()),
            ..Default::default()
        }
    }

    fn eip1559_signed() -> RpcTransaction {
        RpcTransaction {
            hash: "0x8e4fb81ad38ea85cd393d67edc18c5b3fdfbd70436c620ebfe4a4787d638e782".into(),
            from: Some("0x0000000000000000000000000000000000000bad".into()),
            tx_type: Some("0x2".into()),
            chain_id: Some("0x1".into()),
            nonce: Some("0x0".into()),
            max_priority_fee_per_gas: Some("0x77359400".into()),
            max_fee_per_gas: Some("0x6fc23ac00".into()),
            gas: Some("0xc350".into()),
            to: Some("0x3535353535353535353535353535353535353535".into()),
            value: Some("0x3039".into()),
            input: Some("0x0825f38f".into()),
            access_list: Some(Vec::new()),
            v: Some("0x1".into()),
            y_parity: Some("0x1".into()),
            r: Some("0x5bca0564101393bf7cb0e7915a26458c18feee0f2e5b25d321a56d24c73ebead".into()),
            s: Some("0x60098b28471eb4deb0b097c5bc8658bf223d06107f8932d71fccc68989205dc4".into()),
            ..Default::default()
        }
    }

    const SIGNER: &str = "0x9d8a62f656a8d1615c1294fd71e9cfb3e4855a4f";

    #[test]
    fn eip155_reference_recovers_signer() {
        let sender = RecoveryScheme::Eip155.recover(&eip155_reference(), 1).unwrap();
        assert_eq!(sender, SIGNER);
    }

    #[test]
    fn eip1559_recovers_signer() {
        let sender = RecoveryScheme::Eip1559.recover(&eip1559_signed(), 1).unwrap();
        assert_eq!(sender, SIGNER);
    }

    #[test]
    fn later_candidate_wins_after_earlier_fails() {
        let tx = eip155_reference();
        assert!(RecoveryScheme::Homestead.recover(&tx, 1).is_err());
        let sender = recover_sender(&[RecoveryScheme::Homestead, RecoveryScheme::Eip155], &tx, 1).unwrap();
        assert_eq!(sender, SIGNER);

        let sender = recover_sender(
            &[RecoveryScheme::Eip2930, RecoveryScheme::Eip1559],
            &eip1559_signed(),
            1,
        )
        .unwrap();
        assert_eq!(sender, SIGNER);
    }

    #[test]
    fn recovered_signer_beats_node_sender() {
        // no candidates: the generic scheme from the tx type still recovers
        let sender = recover_sender(&[], &eip1559_signed(), 1).unwrap();
        assert_eq!(sender, SIGNER);
    }

    #[test]
    fn rlp_list_matches_reference_encoding() {
        // ["cat", "dog"] → 0xc88363617483646f67
        let cat = Bytes::from_static(b"cat");
        let dog = Bytes::from_static(b"dog");
        assert_eq!(hex::encode(rlp_list(&[&cat as &dyn Encodable, &dog])), "c88363617483646f67");
        // empty access list
        assert_eq!(access_list(&legacy("0x1b")).unwrap(), vec![0xc0]);
    }
}
