//! Best-effort status-change notifications.
//!
//! Producers enqueue with `try_send` and never wait: a full queue drops the
//! change with a warning. One worker drains the queue and fans each change
//! out to every registered [`Notifier`]; delivery errors are logged only.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use timelock_core::{FlowError, Notifier, StatusChange};

#[derive(Clone)]
pub struct NotificationDispatcher {
    tx: mpsc::Sender<StatusChange>,
}

impl NotificationDispatcher {
    /// A dispatcher and the receiving end of its queue.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<StatusChange>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// A dispatcher whose worker is already running.
    pub fn spawn(
        capacity: usize,
        notifiers: Vec<Arc<dyn Notifier>>,
        cancel: CancellationToken,
    ) -> (Self, JoinHandle<()>) {
        let (dispatcher, rx) = Self::channel(capacity);
        let worker = tokio::spawn(run_worker(rx, notifiers, cancel));
        (dispatcher, worker)
    }

    /// Enqueue `change`. Returns `false` if it was dropped.
    pub fn dispatch(&self, change: StatusChange) -> bool {
        match self.tx.try_send(change) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(change)) => {
                warn!(
                    chain_id = change.chain_id,
                    flow_id = %change.flow_id,
                    status = %change.new_status,
                    "notification queue full, dropping status change"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("notification worker stopped, dropping status change");
                false
            }
        }
    }
}

/// Drain `rx` until it closes or `cancel` fires.
pub async fn run_worker(
    mut rx: mpsc::Receiver<StatusChange>,
    notifiers: Vec<Arc<dyn Notifier>>,
    cancel: CancellationToken,
) {
    loop {
        let change = tokio::select! {
            _ = cancel.cancelled() => break,
            change = rx.recv() => match change {
                Some(c) => c,
                None => break,
            },
        };
        for notifier in &notifiers {
            if let Err(e) = notifier.notify(&change).await {
                warn!(
                    notifier = notifier.name(),
                    flow_id = %change.flow_id,
                    error = %e,
                    "notification failed"
                );
            }
        }
    }
    debug!("notification worker stopped");
}

/// Writes every status change to the log.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, change: &StatusChange) -> Result<(), FlowError> {
        info!(
            standard = %change.standard,
            chain_id = change.chain_id,
            contract = %change.contract,
            flow_id = %change.flow_id,
            old = change.old_status.map(|s| s.as_str()).unwrap_or("none"),
            new = %change.new_status,
            tx = change.tx_hash.as_deref().unwrap_or(""),
            initiator = change.initiator.as_deref().unwrap_or(""),
            "flow status changed"
        );
        Ok(())
    }

    fn name(&self) -> &str {
        "log"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use timelock_core::{FlowStatus, Standard};

    fn change(flow: &str) -> StatusChange {
        StatusChange {
            standard: Standard::Compound,
            chain_id: 1,
            contract: "0xc".into(),
            flow_id: flow.into(),
            old_status: None,
            new_status: FlowStatus::Waiting,
            tx_hash: None,
            initiator: None,
        }
    }

    struct Recording(Mutex<Vec<String>>);

    #[async_trait]
    impl Notifier for Recording {
        async fn notify(&self, change: &StatusChange) -> Result<(), FlowError> {
            self.0.lock().unwrap().push(change.flow_id.clone());
            Ok(())
        }
        fn name(&self) -> &str {
            "recording"
        }
    }

    struct Failing;

    #[async_trait]
    impl Notifier for Failing {
        async fn notify(&self, _: &StatusChange) -> Result<(), FlowError> {
            Err(FlowError::Notify("smtp down".into()))
        }
        fn name(&self) -> &str {
            "failing"
        }
    }

    #[test]
    fn full_queue_drops() {
        let (d, mut rx) = NotificationDispatcher::channel(1);
        assert!(d.dispatch(change("0x1")));
        assert!(!d.dispatch(change("0x2")));
        assert_eq!(rx.try_recv().unwrap().flow_id, "0x1");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn worker_delivers_despite_failing_notifier() {
        let recording = Arc::new(Recording(Mutex::new(Vec::new())));
        let (d, rx) = NotificationDispatcher::channel(8);
        d.dispatch(change("0x1"));
        d.dispatch(change("0x2"));
        drop(d);

        let notifiers: Vec<Arc<dyn Notifier>> = vec![Arc::new(Failing), recording.clone()];
        run_worker(rx, notifiers, CancellationToken::new()).await;
        assert_eq!(*recording.0.lock().unwrap(), vec!["0x1", "0x2"]);
    }

    #[tokio::test]
    async fn worker_stops_on_cancel() {
        let cancel = CancellationToken::new();
        let (_d, worker) = NotificationDispatcher::spawn(8, vec![Arc::new(LogNotifier)], cancel.clone());
        cancel.cancel();
        worker.await.unwrap();
    }
}
