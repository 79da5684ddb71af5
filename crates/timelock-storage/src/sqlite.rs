//! SQLite flow store.
//!
//! One table per standard (`compound_flows`, `openzeppelin_flows`), keyed by
//! `(chain_id, contract, flow_id)`. Hex columns are stored canonically
//! lowercase `0x`-prefixed; instants as unix seconds.
//!
//! Each upsert runs read-merge-write inside one transaction.
//!
//! # Usage
//! ```rust,no_run
//! use timelock_storage::sqlite::SqliteFlowStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = SqliteFlowStore::open("./flows.db").await?;
//! let scratch = SqliteFlowStore::in_memory().await?;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use tracing::debug;

use timelock_core::store::eta_order;
use timelock_core::{
    Flow, FlowError, FlowKey, FlowPatch, FlowStatus, FlowStore, Standard, UpsertOutcome,
};

const COLUMNS: &str = "chain_id, contract, flow_id, status, queue_tx_hash, execute_tx_hash,
    cancel_tx_hash, initiator, target, value, call_data, function_signature, predecessor, salt,
    delay, grace_period, queue_block_number, queued_at, eta, expired_at, executed_at,
    cancelled_at, created_at, updated_at";

fn table(standard: Standard) -> &'static str {
    match standard {
        Standard::Compound => "compound_flows",
        Standard::Openzeppelin => "openzeppelin_flows",
    }
}

fn storage_err(e: sqlx::Error) -> FlowError {
    FlowError::Storage(e.to_string())
}

pub struct SqliteFlowStore {
    pool: SqlitePool,
}

impl SqliteFlowStore {
    /// Open (or create) a database at `path`, a file path or a `sqlite:` URL.
    pub async fn open(path: &str) -> Result<Self, FlowError> {
        let url = if path.starts_with("sqlite:") {
            path.to_string()
        } else {
            format!("sqlite:{path}?mode=rwc")
        };
        let pool = SqlitePool::connect(&url).await.map_err(storage_err)?;
        let store = Self { pool };
        store.init_schema(true).await?;
        Ok(store)
    }

    /// A private in-memory database. A single connection, since every
    /// `:memory:` connection is its own database.
    pub async fn in_memory() -> Result<Self, FlowError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(storage_err)?;
        let store = Self { pool };
        store.init_schema(false).await?;
        Ok(store)
    }

    async fn init_schema(&self, wal: bool) -> Result<(), FlowError> {
        if wal {
            sqlx::query("PRAGMA journal_mode=WAL;")
                .execute(&self.pool)
                .await
                .map_err(storage_err)?;
        }

        for standard in Standard::ALL {
            let t = table(standard);
            sqlx::query(&format!(
                "CREATE TABLE IF NOT EXISTS {t} (
                    chain_id           INTEGER NOT NULL,
                    contract           TEXT    NOT NULL,
                    flow_id            TEXT    NOT NULL,
                    status             TEXT    NOT NULL,
                    queue_tx_hash      TEXT,
                    execute_tx_hash    TEXT,
                    cancel_tx_hash     TEXT,
                    initiator          TEXT,
                    target             TEXT,
                    value              TEXT,
                    call_data          BLOB,
                    function_signature TEXT,
                    predecessor        TEXT,
                    salt               TEXT,
                    delay              INTEGER,
                    grace_period       INTEGER,
                    queue_block_number INTEGER,
                    queued_at          INTEGER,
                    eta                INTEGER,
                    expired_at         INTEGER,
                    executed_at        INTEGER,
                    cancelled_at       INTEGER,
                    created_at         INTEGER NOT NULL,
                    updated_at         INTEGER NOT NULL,
                    PRIMARY KEY (chain_id, contract, flow_id)
                );"
            ))
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;

            sqlx::query(&format!(
                "CREATE INDEX IF NOT EXISTS idx_{t}_status_eta ON {t} (status, eta);"
            ))
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;
        }
        Ok(())
    }
}

// ─── Row mapping ─────────────────────────────────────────────────────────────

fn secs(t: Option<DateTime<Utc>>) -> Option<i64> {
    t.map(|t| t.timestamp())
}

fn instant(row: &SqliteRow, col: &str) -> Result<Option<DateTime<Utc>>, FlowError> {
    let v: Option<i64> = row.try_get(col).map_err(storage_err)?;
    Ok(v.and_then(|s| DateTime::from_timestamp(s, 0)))
}

fn required_instant(row: &SqliteRow, col: &str) -> Result<DateTime<Utc>, FlowError> {
    instant(row, col)?.ok_or_else(|| FlowError::Storage(format!("column {col} is null")))
}

fn unsigned(row: &SqliteRow, col: &str) -> Result<Option<u64>, FlowError> {
    let v: Option<i64> = row.try_get(col).map_err(storage_err)?;
    Ok(v.and_then(|n| u64::try_from(n).ok()))
}

fn row_to_flow(standard: Standard, row: &SqliteRow) -> Result<Flow, FlowError> {
    let chain_id: i64 = row.try_get("chain_id").map_err(storage_err)?;
    let status: String = row.try_get("status").map_err(storage_err)?;
    Ok(Flow {
        key: FlowKey::new(
            standard,
            u64::try_from(chain_id).map_err(|e| FlowError::Storage(e.to_string()))?,
            row.try_get::<String, _>("contract").map_err(storage_err)?,
            row.try_get::<String, _>("flow_id").map_err(storage_err)?,
        ),
        status: status.parse()?,
        queue_tx_hash: row.try_get("queue_tx_hash").map_err(storage_err)?,
        execute_tx_hash: row.try_get("execute_tx_hash").map_err(storage_err)?,
        cancel_tx_hash: row.try_get("cancel_tx_hash").map_err(storage_err)?,
        initiator: row.try_get("initiator").map_err(storage_err)?,
        target: row.try_get("target").map_err(storage_err)?,
        value: row.try_get("value").map_err(storage_err)?,
        call_data: row.try_get("call_data").map_err(storage_err)?,
        function_signature: row.try_get("function_signature").map_err(storage_err)?,
        predecessor: row.try_get("predecessor").map_err(storage_err)?,
        salt: row.try_get("salt").map_err(storage_err)?,
        delay: unsigned(row, "delay")?,
        grace_period: unsigned(row, "grace_period")?,
        queue_block_number: unsigned(row, "queue_block_number")?,
        queued_at: instant(row, "queued_at")?,
        eta: instant(row, "eta")?,
        expired_at: instant(row, "expired_at")?,
        executed_at: instant(row, "executed_at")?,
        cancelled_at: instant(row, "cancelled_at")?,
        created_at: required_instant(row, "created_at")?,
        updated_at: required_instant(row, "updated_at")?,
    })
}

fn bind_flow<'q>(
    q: sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>>,
    f: &'q Flow,
) -> sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>> {
    q.bind(f.key.chain_id as i64)
        .bind(&f.key.contract)
        .bind(&f.key.flow_id)
        .bind(f.status.as_str())
        .bind(&f.queue_tx_hash)
        .bind(&f.execute_tx_hash)
        .bind(&f.cancel_tx_hash)
        .bind(&f.initiator)
        .bind(&f.target)
        .bind(&f.value)
        .bind(&f.call_data)
        .bind(&f.function_signature)
        .bind(&f.predecessor)
        .bind(&f.salt)
        .bind(f.delay.map(|v| v as i64))
        .bind(f.grace_period.map(|v| v as i64))
        .bind(f.queue_block_number.map(|v| v as i64))
        .bind(secs(f.queued_at))
        .bind(secs(f.eta))
        .bind(secs(f.expired_at))
        .bind(secs(f.executed_at))
        .bind(secs(f.cancelled_at))
        .bind(f.created_at.timestamp())
        .bind(f.updated_at.timestamp())
}

// ─── FlowStore impl ──────────────────────────────────────────────────────────

#[async_trait]
impl FlowStore for SqliteFlowStore {
    async fn upsert(
        &self,
        key: &FlowKey,
        patch: FlowPatch,
        now: DateTime<Utc>,
    ) -> Result<UpsertOutcome, FlowError> {
        let t = table(key.standard);
        let mut tx = self.pool.begin().await.map_err(storage_err)?;

        let select = format!("SELECT {COLUMNS} FROM {t} WHERE chain_id = ? AND contract = ? AND flow_id = ?");
        let existing = sqlx::query(&select)
            .bind(key.chain_id as i64)
            .bind(&key.contract)
            .bind(&key.flow_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(storage_err)?
            .map(|row| row_to_flow(key.standard, &row))
            .transpose()?;

        let placeholders = vec!["?"; 24].join(", ");
        let outcome = match existing {
            Some(mut flow) => {
                if !patch.merge_into(&mut flow, now) {
                    tx.rollback().await.map_err(storage_err)?;
                    return Ok(UpsertOutcome::Unchanged(flow));
                }
                let sql = format!("INSERT OR REPLACE INTO {t} ({COLUMNS}) VALUES ({placeholders})");
                bind_flow(sqlx::query(&sql), &flow)
                    .execute(&mut *tx)
                    .await
                    .map_err(storage_err)?;
                UpsertOutcome::Merged(flow)
            }
            None => {
                let flow = patch.into_flow(key.clone(), now);
                let sql = format!("INSERT INTO {t} ({COLUMNS}) VALUES ({placeholders})");
                bind_flow(sqlx::query(&sql), &flow)
                    .execute(&mut *tx)
                    .await
                    .map_err(storage_err)?;
                debug!(key = %key, status = %flow.status, "flow created");
                UpsertOutcome::Created(flow)
            }
        };

        tx.commit().await.map_err(storage_err)?;
        Ok(outcome)
    }

    async fn set_status(
        &self,
        key: &FlowKey,
        previous: FlowStatus,
        next: FlowStatus,
        now: DateTime<Utc>,
    ) -> Result<Flow, FlowError> {
        let t = table(key.standard);
        let result = sqlx::query(&format!(
            "UPDATE {t} SET status = ?, updated_at = ? WHERE chain_id = ? AND contract = ? AND flow_id = ?"
        ))
        .bind(next.as_str())
        .bind(now.timestamp())
        .bind(key.chain_id as i64)
        .bind(&key.contract)
        .bind(&key.flow_id)
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        if result.rows_affected() == 0 {
            return Err(FlowError::NotFound {
                key: key.to_string(),
            });
        }
        debug!(key = %key, from = %previous, to = %next, "flow status written");
        self.get(key).await?.ok_or_else(|| FlowError::NotFound {
            key: key.to_string(),
        })
    }

    async fn get(&self, key: &FlowKey) -> Result<Option<Flow>, FlowError> {
        let sql = format!(
            "SELECT {COLUMNS} FROM {} WHERE chain_id = ? AND contract = ? AND flow_id = ?",
            table(key.standard)
        );
        sqlx::query(&sql)
            .bind(key.chain_id as i64)
            .bind(&key.contract)
            .bind(&key.flow_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?
            .map(|row| row_to_flow(key.standard, &row))
            .transpose()
    }

    async fn list_needing_promotion(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Flow>, FlowError> {
        let now = now.timestamp();
        let limit_sql = i64::try_from(limit).unwrap_or(i64::MAX);
        let mut out = Vec::new();
        for standard in Standard::ALL {
            let due = if standard.has_expiry() {
                "(status = 'waiting' AND eta <= ?1) OR (status = 'ready' AND expired_at <= ?1)"
            } else {
                "status = 'waiting' AND eta <= ?1"
            };
            let sql = format!(
                "SELECT {COLUMNS} FROM {} WHERE {due} ORDER BY eta IS NULL, eta LIMIT ?2",
                table(standard)
            );
            let rows = sqlx::query(&sql)
                .bind(now)
                .bind(limit_sql)
                .fetch_all(&self.pool)
                .await
                .map_err(storage_err)?;
            for row in &rows {
                out.push(row_to_flow(standard, row)?);
            }
        }
        out.sort_by(eta_order);
        out.truncate(limit);
        Ok(out)
    }

    async fn list_by_contract(
        &self,
        chain_id: u64,
        contract: &str,
    ) -> Result<Vec<Flow>, FlowError> {
        let contract = contract.to_ascii_lowercase();
        let mut out = Vec::new();
        for standard in Standard::ALL {
            let sql = format!(
                "SELECT {COLUMNS} FROM {} WHERE chain_id = ? AND contract = ?",
                table(standard)
            );
            let rows = sqlx::query(&sql)
                .bind(chain_id as i64)
                .bind(&contract)
                .fetch_all(&self.pool)
                .await
                .map_err(storage_err)?;
            for row in &rows {
                out.push(row_to_flow(standard, row)?);
            }
        }
        out.sort_by(eta_order);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn queued(eta: i64) -> FlowPatch {
        FlowPatch {
            status: Some(FlowStatus::Waiting),
            queue_tx_hash: Some("0xq".into()),
            call_data: Some(vec![0xde, 0xad]),
            value: Some("1000000000000000000".into()),
            eta: Some(t(eta)),
            expired_at: Some(t(eta + 100)),
            ..Default::default()
        }
    }

    // ── upsert ────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn upsert_roundtrip() {
        let store = SqliteFlowStore::in_memory().await.unwrap();
        let k = FlowKey::new(Standard::Compound, 1, "0xC0", "0xF1");
        let created = store.upsert(&k, queued(10), t(0)).await.unwrap();
        assert!(created.is_created());

        let loaded = store.get(&k).await.unwrap().unwrap();
        assert_eq!(&loaded, created.flow());
        assert_eq!(loaded.call_data.as_deref(), Some(&[0xde, 0xad][..]));
        assert_eq!(loaded.eta, Some(t(10)));
    }

    #[tokio::test]
    async fn upsert_merge_and_unchanged() {
        let store = SqliteFlowStore::in_memory().await.unwrap();
        let k = FlowKey::new(Standard::Openzeppelin, 1, "0xc0", "0xf1");
        store.upsert(&k, queued(10), t(0)).await.unwrap();

        let again = store.upsert(&k, queued(10), t(1)).await.unwrap();
        assert!(matches!(again, UpsertOutcome::Unchanged(_)));

        let patch = FlowPatch {
            status: Some(FlowStatus::Cancelled),
            cancel_tx_hash: Some("0xc".into()),
            ..Default::default()
        };
        let merged = store.upsert(&k, patch, t(2)).await.unwrap();
        assert!(matches!(merged, UpsertOutcome::Merged(_)));
        let flow = store.get(&k).await.unwrap().unwrap();
        assert_eq!(flow.status, FlowStatus::Waiting);
        assert_eq!(flow.cancel_tx_hash.as_deref(), Some("0xc"));
        assert_eq!(flow.updated_at, t(2));
    }

    // ── status ────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn set_status_persists() {
        let store = SqliteFlowStore::in_memory().await.unwrap();
        let k = FlowKey::new(Standard::Compound, 1, "0xc0", "0xf1");
        store.upsert(&k, queued(10), t(0)).await.unwrap();
        let flow = store
            .set_status(&k, FlowStatus::Waiting, FlowStatus::Ready, t(11))
            .await
            .unwrap();
        assert_eq!(flow.status, FlowStatus::Ready);
        assert_eq!(flow.updated_at, t(11));

        let missing = FlowKey::new(Standard::Compound, 1, "0xc0", "0xnone");
        let err = store
            .set_status(&missing, FlowStatus::Waiting, FlowStatus::Ready, t(11))
            .await
            .unwrap_err();
        assert!(matches!(err, FlowError::NotFound { .. }));
    }

    // ── queries ───────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn promotion_candidates_across_tables() {
        let store = SqliteFlowStore::in_memory().await.unwrap();
        let c = FlowKey::new(Standard::Compound, 1, "0xc0", "0xc");
        let o = FlowKey::new(Standard::Openzeppelin, 1, "0xc0", "0xo");
        let later = FlowKey::new(Standard::Openzeppelin, 1, "0xc0", "0xlater");
        store.upsert(&c, queued(20), t(0)).await.unwrap();
        store.upsert(&o, queued(10), t(0)).await.unwrap();
        store.upsert(&later, queued(1_000), t(0)).await.unwrap();

        let due = store.list_needing_promotion(t(50), 10).await.unwrap();
        let ids: Vec<_> = due.iter().map(|f| f.key.flow_id.as_str()).collect();
        assert_eq!(ids, vec!["0xo", "0xc"]);

        // Ready rows are candidates only where the standard expires.
        store.set_status(&c, FlowStatus::Waiting, FlowStatus::Ready, t(50)).await.unwrap();
        store.set_status(&o, FlowStatus::Waiting, FlowStatus::Ready, t(50)).await.unwrap();
        let due = store.list_needing_promotion(t(500), 10).await.unwrap();
        let ids: Vec<_> = due.iter().map(|f| f.key.flow_id.as_str()).collect();
        assert_eq!(ids, vec!["0xc"]);
    }

    #[tokio::test]
    async fn list_by_contract_is_case_insensitive() {
        let store = SqliteFlowStore::in_memory().await.unwrap();
        store
            .upsert(&FlowKey::new(Standard::Compound, 1, "0xAB", "0x1"), queued(5), t(0))
            .await
            .unwrap();
        store
            .upsert(&FlowKey::new(Standard::Compound, 2, "0xab", "0x2"), queued(5), t(0))
            .await
            .unwrap();
        let flows = store.list_by_contract(1, "0xAB").await.unwrap();
        assert_eq!(flows.len(), 1);
        assert_eq!(flows[0].key.flow_id, "0x1");
    }
}
