//! `WebhookIngestor`: push notifications from the indexer.
//!
//! 1. Authenticate: secret from the header, else from the payload. The
//!    registry maps it to the `(chain, standard)` the webhook is bound to.
//! 2. No new-row data → acknowledged no-op.
//! 3. Normalize every row up front; one malformed row rejects the delivery
//!    before anything is written. Unknown event kinds are skipped.
//! 4. Mutate in a spawned task: the request awaits the outcome, but a
//!    dropped request does not abort the mutation.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use timelock_core::{ContractRegistry, FlowError, SecretBinding, TransactionEvent};

use crate::error::IngestError;
use crate::mutator::{FlowMutator, MutationOutcome};
use crate::normalizer::{EventNormalizer, WebhookPayload};

pub const WEBHOOK_PATH: &str = "/webhooks/goldsky";
pub const SECRET_HEADER: &str = "goldsky-webhook-secret";

/// What a delivery did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub received: usize,
    pub applied: usize,
    pub unchanged: usize,
    pub skipped: usize,
}

pub struct WebhookIngestor {
    registry: Arc<dyn ContractRegistry>,
    normalizer: EventNormalizer,
    mutator: Arc<FlowMutator>,
}

impl WebhookIngestor {
    pub fn new(normalizer: EventNormalizer, mutator: Arc<FlowMutator>) -> Self {
        Self {
            registry: mutator.registry().clone(),
            normalizer,
            mutator,
        }
    }

    pub async fn ingest(
        &self,
        header_secret: Option<&str>,
        body: &[u8],
    ) -> Result<IngestReport, IngestError> {
        let payload = WebhookPayload::parse(body)?;
        let binding = self
            .authenticate(header_secret, payload.secret.as_deref())
            .await?;

        let rows = payload.rows();
        let mut report = IngestReport {
            received: rows.len(),
            ..Default::default()
        };
        if rows.is_empty() {
            return Ok(report);
        }

        let mut events = Vec::with_capacity(rows.len());
        for row in rows {
            match self
                .normalizer
                .normalize_row(binding.standard, binding.chain_id, row)
            {
                Ok(ev) => events.push(ev),
                Err(FlowError::UnsupportedEventKind { tag }) => {
                    info!(chain_id = binding.chain_id, tag = %tag, "unsupported event kind, skipping");
                    report.skipped += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }

        let outcomes = self.mutate_detached(events).await?;
        for outcome in outcomes {
            match outcome {
                MutationOutcome::Skipped(_) => report.skipped += 1,
                MutationOutcome::Unchanged(_) => report.unchanged += 1,
                MutationOutcome::Applied { .. } => report.applied += 1,
            }
        }
        info!(
            chain_id = binding.chain_id,
            standard = %binding.standard,
            ?report,
            "webhook delivery processed"
        );
        Ok(report)
    }

    /// The header secret wins when it resolves; otherwise the payload's.
    async fn authenticate(
        &self,
        header_secret: Option<&str>,
        payload_secret: Option<&str>,
    ) -> Result<SecretBinding, IngestError> {
        for secret in [header_secret, payload_secret].into_iter().flatten() {
            if secret.is_empty() {
                continue;
            }
            if let Some(binding) = self.registry.contract_by_shared_secret(secret).await? {
                return Ok(binding);
            }
        }
        Err(IngestError::Unauthorized)
    }

    /// Apply `events` in order in a task of their own. Stops at the first
    /// failure, which is surfaced to the caller.
    async fn mutate_detached(
        &self,
        events: Vec<TransactionEvent>,
    ) -> Result<Vec<MutationOutcome>, IngestError> {
        let mutator = Arc::clone(&self.mutator);
        let task = tokio::spawn(async move {
            let mut outcomes = Vec::with_capacity(events.len());
            for event in &events {
                outcomes.push(mutator.apply_event(event).await?);
            }
            Ok::<_, FlowError>(outcomes)
        });
        task.await
            .map_err(|e| IngestError::TaskFailed(e.to_string()))?
            .map_err(IngestError::Mutation)
    }
}

// ─── HTTP route ──────────────────────────────────────────────────────────────

impl IntoResponse for IngestError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Malformed(_) => StatusCode::BAD_REQUEST,
            Self::Mutation(_) | Self::TaskFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if !self.is_client_error() {
            warn!(error = %self, "webhook delivery failed");
        }
        (status, self.to_string()).into_response()
    }
}

async fn handle_delivery(
    State(ingestor): State<Arc<WebhookIngestor>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<IngestReport>, IngestError> {
    let secret = headers.get(SECRET_HEADER).and_then(|v| v.to_str().ok());
    ingestor.ingest(secret, &body).await.map(Json)
}

pub fn router(ingestor: Arc<WebhookIngestor>) -> Router {
    Router::new()
        .route(WEBHOOK_PATH, post(handle_delivery))
        .with_state(ingestor)
}

/// Serve the webhook route on `addr` until `cancel` fires. Returns the bound
/// address (useful with port 0) and the server task.
pub async fn serve(
    addr: SocketAddr,
    ingestor: Arc<WebhookIngestor>,
    cancel: CancellationToken,
) -> Result<(SocketAddr, JoinHandle<()>), std::io::Error> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let bound = listener.local_addr()?;
    info!(addr = %bound, path = WEBHOOK_PATH, "webhook listener bound");
    let task = tokio::spawn(async move {
        let shutdown = async move { cancel.cancelled().await };
        if let Err(e) = axum::serve(listener, router(ingestor))
            .with_graceful_shutdown(shutdown)
            .await
        {
            warn!(error = %e, "webhook server exited with error");
        }
        info!("webhook listener stopped");
    });
    Ok((bound, task))
}
