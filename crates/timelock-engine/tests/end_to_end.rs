//! Full lifecycle through a running engine: webhook push, clock promotion,
//! a conflicting poll, and execution.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use serde_json::json;

use timelock_core::{
    Clock, ContractEntry, FlowError, FlowKey, FlowStatus, FlowStore, ManualClock,
    MemoryContractRegistry, Notifier, SecretBinding, Standard, StatusChange,
};
use timelock_engine::config::{ChainConfig, WebhookConfig};
use timelock_engine::indexer::CompoundFlowRecord;
use timelock_engine::{
    Engine, EngineConfig, EngineHandle, FlowRecord, IndexerClient, IndexerError, IngestReport,
};
use timelock_storage::MemoryFlowStore;

const CONTRACT: &str = "0x00000000000000000000000000000000000000c0";
const FLOW_ID: &str = "0xf1";
const SECRET: &str = "hook-secret";
const T0: i64 = 1_700_000_000;

#[derive(Default)]
struct StubIndexer {
    records: Mutex<Vec<FlowRecord>>,
}

#[async_trait]
impl IndexerClient for StubIndexer {
    async fn flows_by_contracts(
        &self,
        standard: Standard,
        _contracts: &[String],
        _limit: usize,
    ) -> Result<Vec<FlowRecord>, IndexerError> {
        let records = self.records.lock().unwrap();
        Ok(records
            .iter()
            .filter(|r| r.standard() == standard)
            .cloned()
            .collect())
    }

    async fn transaction_by_hash(
        &self,
        _standard: Standard,
        _tx_hash: &str,
    ) -> Result<Option<FlowRecord>, IndexerError> {
        Ok(None)
    }

    fn endpoint(&self) -> &str {
        "stub"
    }
}

#[derive(Default)]
struct Recorder {
    seen: Mutex<Vec<StatusChange>>,
}

#[async_trait]
impl Notifier for Recorder {
    async fn notify(&self, change: &StatusChange) -> Result<(), FlowError> {
        self.seen.lock().unwrap().push(change.clone());
        Ok(())
    }

    fn name(&self) -> &str {
        "recorder"
    }
}

struct Harness {
    handle: EngineHandle,
    clock: Arc<ManualClock>,
    indexer: Arc<StubIndexer>,
    recorder: Arc<Recorder>,
}

async fn start() -> Harness {
    let registry = Arc::new(MemoryContractRegistry::new());
    registry.register(ContractEntry {
        standard: Standard::Compound,
        chain_id: 1,
        address: CONTRACT.into(),
        active: true,
    });
    registry.bind_secret(
        SECRET,
        SecretBinding {
            chain_id: 1,
            standard: Standard::Compound,
        },
    );

    let config = EngineConfig {
        poll_interval_secs: 3_600,
        promotion_interval_secs: 3_600,
        chains: vec![ChainConfig {
            chain_id: 1,
            name: "mainnet".into(),
            rpc_urls: Vec::new(),
            indexer_url: None,
            recovery_schemes: Vec::new(),
            grace_period_secs: 1_209_600,
        }],
        webhook: WebhookConfig {
            enabled: false,
            ..Default::default()
        },
        ..Default::default()
    };

    let clock = Arc::new(ManualClock::new(Utc.timestamp_opt(T0, 0).unwrap()));
    let indexer = Arc::new(StubIndexer::default());
    let recorder = Arc::new(Recorder::default());
    let handle = Engine::new(config, Arc::new(MemoryFlowStore::new()), registry)
        .with_clock(clock.clone())
        .with_indexer(1, indexer.clone())
        .with_notifier(recorder.clone())
        .start()
        .await
        .unwrap();
    Harness {
        handle,
        clock,
        indexer,
        recorder,
    }
}

fn key() -> FlowKey {
    FlowKey::new(Standard::Compound, 1, CONTRACT, FLOW_ID)
}

async fn status(h: &Harness) -> FlowStatus {
    h.handle
        .mutator()
        .store()
        .get(&key())
        .await
        .unwrap()
        .expect("flow exists")
        .status
}

async fn push(h: &Harness, row: serde_json::Value) -> IngestReport {
    let body = json!({ "op": "INSERT", "data": { "new": row } }).to_string();
    h.handle
        .ingestor()
        .ingest(Some(SECRET), body.as_bytes())
        .await
        .unwrap()
}

#[tokio::test]
async fn flow_lifecycle_across_sources() {
    let h = start().await;

    // Queued an hour out.
    push(
        &h,
        json!({
            "event_type": "QueueTransaction",
            "contract_address": CONTRACT,
            "tx_hash": FLOW_ID,
            "transaction_hash": "0xa1",
            "target": "0x00000000000000000000000000000000000000aa",
            "value": "0",
            "eta": T0 + 3_600,
            "block_timestamp": T0,
        }),
    )
    .await;
    assert_eq!(status(&h).await, FlowStatus::Waiting);

    // Past the eta the promoter makes it executable.
    h.clock.advance(ChronoDuration::seconds(3_601));
    h.handle.promoter().tick().await.unwrap();
    assert_eq!(status(&h).await, FlowStatus::Ready);

    // The indexer still reports the raw on-chain state; local wins.
    let stale: CompoundFlowRecord = serde_json::from_value(json!({
        "id": FLOW_ID,
        "contract": CONTRACT,
        "status": "waiting",
        "eta": T0 + 3_600,
        "queue": { "txHash": "0xa1" },
    }))
    .unwrap();
    *h.indexer.records.lock().unwrap() = vec![FlowRecord::Compound(stale)];
    h.handle.sync().sync_chain(1).await.unwrap();
    assert_eq!(status(&h).await, FlowStatus::Ready);

    // Executed.
    let report = push(
        &h,
        json!({
            "event_type": "ExecuteTransaction",
            "contract_address": CONTRACT,
            "tx_hash": FLOW_ID,
            "transaction_hash": "0xe1",
            "block_timestamp": h.clock.now().timestamp(),
        }),
    )
    .await;
    assert_eq!(report.applied, 1);
    let flow = h
        .handle
        .mutator()
        .store()
        .get(&key())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(flow.status, FlowStatus::Executed);
    assert_eq!(flow.execute_tx_hash.as_deref(), Some("0xe1"));

    // A later poll cannot pull it back out of a terminal state.
    h.handle.sync().sync_chain(1).await.unwrap();
    assert_eq!(status(&h).await, FlowStatus::Executed);

    // Notifications are drained asynchronously.
    let mut statuses = Vec::new();
    for _ in 0..50 {
        statuses = h
            .recorder
            .seen
            .lock()
            .unwrap()
            .iter()
            .map(|c| c.new_status)
            .collect::<Vec<_>>();
        if statuses.len() >= 3 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(
        statuses,
        vec![FlowStatus::Waiting, FlowStatus::Ready, FlowStatus::Executed]
    );
    assert!(h.handle.last_poll_error().is_none());

    h.handle.stop().await;
}

#[tokio::test]
async fn duplicate_and_foreign_deliveries() {
    let h = start().await;
    let row = json!({
        "event_type": "QueueTransaction",
        "contract_address": CONTRACT,
        "tx_hash": FLOW_ID,
        "transaction_hash": "0xa1",
        "eta": T0 + 60,
        "block_timestamp": T0,
    });

    let first = push(&h, row.clone()).await;
    let second = push(&h, row).await;
    assert_eq!(first.applied, 1);
    assert_eq!(second.unchanged, 1);

    let foreign = push(
        &h,
        json!({
            "event_type": "QueueTransaction",
            "contract_address": "0x00000000000000000000000000000000000000ff",
            "tx_hash": "0xf2",
            "transaction_hash": "0xa2",
            "eta": T0 + 60,
        }),
    )
    .await;
    assert_eq!(foreign.skipped, 1);
    assert!(h
        .handle
        .mutator()
        .store()
        .list_by_contract(1, "0x00000000000000000000000000000000000000ff")
        .await
        .unwrap()
        .is_empty());

    h.handle.stop().await;
}
