//! The fixed event ABI of both timelock standards.
//!
//! The topic0 of an EVM log is the keccak256 of the event's canonical
//! signature, e.g.
//!   keccak256("Cancelled(bytes32)")
//! Each entry here knows its signature, its lifecycle kind, and which of its
//! parameters are indexed.

use std::collections::HashMap;

use tiny_keccak::{Hasher, Keccak};

use timelock_core::{EventKind, Standard};

/// One event parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Param {
    pub name: &'static str,
    /// Solidity type, as accepted by `DynSolType::parse`.
    pub ty: &'static str,
    pub indexed: bool,
}

const fn indexed(name: &'static str, ty: &'static str) -> Param {
    Param {
        name,
        ty,
        indexed: true,
    }
}

const fn data(name: &'static str, ty: &'static str) -> Param {
    Param {
        name,
        ty,
        indexed: false,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventAbi {
    pub name: &'static str,
    pub standard: Standard,
    pub kind: EventKind,
    pub params: &'static [Param],
}

impl EventAbi {
    /// Canonical signature, e.g. `"CallExecuted(bytes32,uint256,address,uint256,bytes)"`.
    pub fn signature(&self) -> String {
        let types: Vec<&str> = self.params.iter().map(|p| p.ty).collect();
        format!("{}({})", self.name, types.join(","))
    }

    /// `0x`-prefixed keccak256 of the signature.
    pub fn topic0(&self) -> String {
        format!("0x{}", hex::encode(keccak256(self.signature().as_bytes())))
    }

    pub fn indexed_params(&self) -> impl Iterator<Item = &Param> {
        self.params.iter().filter(|p| p.indexed)
    }

    pub fn data_params(&self) -> impl Iterator<Item = &Param> {
        self.params.iter().filter(|p| !p.indexed)
    }
}

// ─── Compound Timelock ────────────────────────────────────────────────────────

const COMPOUND_PARAMS: &[Param] = &[
    indexed("txHash", "bytes32"),
    indexed("target", "address"),
    data("value", "uint256"),
    data("signature", "string"),
    data("data", "bytes"),
    data("eta", "uint256"),
];

// ─── OpenZeppelin TimelockController ─────────────────────────────────────────

const OZ_SCHEDULED_PARAMS: &[Param] = &[
    indexed("id", "bytes32"),
    indexed("index", "uint256"),
    data("target", "address"),
    data("value", "uint256"),
    data("data", "bytes"),
    data("predecessor", "bytes32"),
    data("delay", "uint256"),
];

const OZ_EXECUTED_PARAMS: &[Param] = &[
    indexed("id", "bytes32"),
    indexed("index", "uint256"),
    data("target", "address"),
    data("value", "uint256"),
    data("data", "bytes"),
];

const OZ_CANCELLED_PARAMS: &[Param] = &[indexed("id", "bytes32")];

/// Every event the decoder understands.
pub const TIMELOCK_EVENTS: &[EventAbi] = &[
    EventAbi {
        name: "QueueTransaction",
        standard: Standard::Compound,
        kind: EventKind::Queue,
        params: COMPOUND_PARAMS,
    },
    EventAbi {
        name: "ExecuteTransaction",
        standard: Standard::Compound,
        kind: EventKind::Execute,
        params: COMPOUND_PARAMS,
    },
    EventAbi {
        name: "CancelTransaction",
        standard: Standard::Compound,
        kind: EventKind::Cancel,
        params: COMPOUND_PARAMS,
    },
    EventAbi {
        name: "CallScheduled",
        standard: Standard::Openzeppelin,
        kind: EventKind::Queue,
        params: OZ_SCHEDULED_PARAMS,
    },
    EventAbi {
        name: "CallExecuted",
        standard: Standard::Openzeppelin,
        kind: EventKind::Execute,
        params: OZ_EXECUTED_PARAMS,
    },
    EventAbi {
        name: "Cancelled",
        standard: Standard::Openzeppelin,
        kind: EventKind::Cancel,
        params: OZ_CANCELLED_PARAMS,
    },
];

/// topic0 → event lookup, built once.
#[derive(Debug, Clone)]
pub struct EventTable {
    by_topic: HashMap<String, &'static EventAbi>,
}

impl EventTable {
    pub fn new() -> Self {
        let by_topic = TIMELOCK_EVENTS.iter().map(|e| (e.topic0(), e)).collect();
        Self { by_topic }
    }

    /// Look up by a `0x`-prefixed topic0, case-insensitively.
    pub fn get(&self, topic0: &str) -> Option<&'static EventAbi> {
        self.by_topic.get(&topic0.to_ascii_lowercase()).copied()
    }

    pub fn len(&self) -> usize {
        self.by_topic.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_topic.is_empty()
    }
}

impl Default for EventTable {
    fn default() -> Self {
        Self::new()
    }
}

pub fn keccak256(bytes: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak::v256();
    let mut output = [0u8; 32];
    hasher.update(bytes);
    hasher.finalize(&mut output);
    output
}
