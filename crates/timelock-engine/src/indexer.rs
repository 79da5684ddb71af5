//! Indexer query API (GraphQL over HTTP).
//!
//! Each flow document carries nested `queue` / `execute` / `cancel`
//! sub-records; numeric fields are decimal strings and hex fields `0x…`.

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};

use timelock_core::Standard;

use crate::error::IndexerError;
use crate::normalizer::Scalar;

// ─── Wire records ────────────────────────────────────────────────────────────

/// One lifecycle transaction of a flow.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexerTx {
    pub tx_hash: String,
    #[serde(default)]
    pub block_number: Option<Scalar>,
    #[serde(default)]
    pub timestamp: Option<Scalar>,
    #[serde(default)]
    pub from: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompoundFlowRecord {
    /// The timelock `txHash`.
    pub id: String,
    pub contract: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default)]
    pub value: Option<Scalar>,
    #[serde(default)]
    pub signature: Option<String>,
    #[serde(default)]
    pub data: Option<String>,
    #[serde(default)]
    pub eta: Option<Scalar>,
    #[serde(default)]
    pub grace_period: Option<Scalar>,
    #[serde(default)]
    pub expired_at: Option<Scalar>,
    #[serde(default)]
    pub queue: Option<IndexerTx>,
    #[serde(default)]
    pub execute: Option<IndexerTx>,
    #[serde(default)]
    pub cancel: Option<IndexerTx>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenzeppelinFlowRecord {
    /// The operation id.
    pub id: String,
    pub contract: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default)]
    pub value: Option<Scalar>,
    #[serde(default)]
    pub data: Option<String>,
    #[serde(default)]
    pub predecessor: Option<String>,
    #[serde(default)]
    pub salt: Option<String>,
    #[serde(default)]
    pub delay: Option<Scalar>,
    #[serde(default)]
    pub eta: Option<Scalar>,
    #[serde(default, alias = "schedule")]
    pub queue: Option<IndexerTx>,
    #[serde(default)]
    pub execute: Option<IndexerTx>,
    #[serde(default)]
    pub cancel: Option<IndexerTx>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FlowRecord {
    Compound(CompoundFlowRecord),
    Openzeppelin(OpenzeppelinFlowRecord),
}

impl FlowRecord {
    pub fn standard(&self) -> Standard {
        match self {
            Self::Compound(_) => Standard::Compound,
            Self::Openzeppelin(_) => Standard::Openzeppelin,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Self::Compound(r) => &r.id,
            Self::Openzeppelin(r) => &r.id,
        }
    }
}

// ─── Trait ───────────────────────────────────────────────────────────────────

/// Pull access to one chain's indexer.
#[async_trait]
pub trait IndexerClient: Send + Sync {
    /// All flows of the given contracts, at most `limit`.
    async fn flows_by_contracts(
        &self,
        standard: Standard,
        contracts: &[String],
        limit: usize,
    ) -> Result<Vec<FlowRecord>, IndexerError>;

    /// The flow whose queue/schedule transaction is `tx_hash`.
    async fn transaction_by_hash(
        &self,
        standard: Standard,
        tx_hash: &str,
    ) -> Result<Option<FlowRecord>, IndexerError>;

    fn endpoint(&self) -> &str;
}

// ─── GraphQL documents ───────────────────────────────────────────────────────

const TX_FIELDS: &str = "txHash blockNumber timestamp from";

fn flow_fields(standard: Standard) -> String {
    let specific = match standard {
        Standard::Compound => "signature gracePeriod expiredAt",
        Standard::Openzeppelin => "predecessor salt delay",
    };
    format!(
        "id contract status target value data eta {specific} \
         queue {{ {TX_FIELDS} }} execute {{ {TX_FIELDS} }} cancel {{ {TX_FIELDS} }}"
    )
}

fn collection(standard: Standard) -> &'static str {
    match standard {
        Standard::Compound => "compoundFlows",
        Standard::Openzeppelin => "openzeppelinFlows",
    }
}

fn flows_query(standard: Standard) -> String {
    format!(
        "query Flows($contracts: [String!]!, $first: Int!) {{ \
         {}(first: $first, where: {{ contract_in: $contracts }}, orderBy: eta, orderDirection: asc) \
         {{ {} }} }}",
        collection(standard),
        flow_fields(standard)
    )
}

fn by_hash_query(standard: Standard) -> String {
    format!(
        "query FlowByTx($hash: String!) {{ \
         {}(first: 1, where: {{ queue_: {{ txHash: $hash }} }}) {{ {} }} }}",
        collection(standard),
        flow_fields(standard)
    )
}

/// Pull `data.<field>` out of a GraphQL response body.
fn extract_list<T: DeserializeOwned>(body: Value, field: &str) -> Result<Vec<T>, IndexerError> {
    if let Some(errors) = body.get("errors").and_then(Value::as_array) {
        if !errors.is_empty() {
            let messages = errors
                .iter()
                .map(|e| {
                    e.get("message")
                        .and_then(Value::as_str)
                        .unwrap_or("unknown error")
                        .to_string()
                })
                .collect();
            return Err(IndexerError::GraphQl(messages));
        }
    }
    let list = body
        .get("data")
        .and_then(|d| d.get(field))
        .cloned()
        .ok_or_else(|| IndexerError::MissingData(format!("data.{field}")))?;
    Ok(serde_json::from_value(list)?)
}

fn parse_records(standard: Standard, body: Value) -> Result<Vec<FlowRecord>, IndexerError> {
    let field = collection(standard);
    Ok(match standard {
        Standard::Compound => extract_list::<CompoundFlowRecord>(body, field)?
            .into_iter()
            .map(FlowRecord::Compound)
            .collect(),
        Standard::Openzeppelin => extract_list::<OpenzeppelinFlowRecord>(body, field)?
            .into_iter()
            .map(FlowRecord::Openzeppelin)
            .collect(),
    })
}

// ─── HTTP client ─────────────────────────────────────────────────────────────

pub struct GraphqlIndexerClient {
    endpoint: String,
    client: reqwest::Client,
}

impl GraphqlIndexerClient {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, IndexerError> {
        let endpoint = endpoint.into();
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| IndexerError::Http {
                endpoint: endpoint.clone(),
                reason: e.to_string(),
            })?;
        Ok(Self { endpoint, client })
    }

    async fn post(&self, query: String, variables: Value) -> Result<Value, IndexerError> {
        let http_err = |e: reqwest::Error| IndexerError::Http {
            endpoint: self.endpoint.clone(),
            reason: e.to_string(),
        };
        let resp = self
            .client
            .post(&self.endpoint)
            .json(&json!({ "query": query, "variables": variables }))
            .send()
            .await
            .map_err(http_err)?;
        if !resp.status().is_success() {
            return Err(IndexerError::Http {
                endpoint: self.endpoint.clone(),
                reason: format!("status {}", resp.status()),
            });
        }
        resp.json::<Value>().await.map_err(http_err)
    }
}

#[async_trait]
impl IndexerClient for GraphqlIndexerClient {
    async fn flows_by_contracts(
        &self,
        standard: Standard,
        contracts: &[String],
        limit: usize,
    ) -> Result<Vec<FlowRecord>, IndexerError> {
        if contracts.is_empty() {
            return Ok(Vec::new());
        }
        let body = self
            .post(
                flows_query(standard),
                json!({ "contracts": contracts, "first": limit }),
            )
            .await?;
        let records = parse_records(standard, body)?;
        tracing::debug!(
            endpoint = %self.endpoint,
            standard = %standard,
            contracts = contracts.len(),
            records = records.len(),
            "indexer flows fetched"
        );
        Ok(records)
    }

    async fn transaction_by_hash(
        &self,
        standard: Standard,
        tx_hash: &str,
    ) -> Result<Option<FlowRecord>, IndexerError> {
        let body = self
            .post(by_hash_query(standard), json!({ "hash": tx_hash }))
            .await?;
        Ok(parse_records(standard, body)?.into_iter().next())
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }
}
