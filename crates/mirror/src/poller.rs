//! # Reconciliation poller
//!
//! Walks every ledger entry still in `progress`, fetches the remote order and settles the entry
//! when the remote status is terminal.
//!
//! ## Exactly-once
//!
//! The ledger transition is a compare-and-set (`OfferLedger::settle`) and only the caller that
//! wins it notifies. Two pollers racing on the same entry, in one process or two, produce a
//! single notification.
//!
//! ## Shutdown
//!
//! A `CancellationToken` aborts an in-flight fetch. Ledger I/O runs on the blocking pool, and
//! settling, auditing and notifying form one blocking task, so neither cancellation nor a
//! dropped sweep can leave an entry settled without its notification.

use crate::{
    audit::AuditLog,
    ledger::{split_pair, Offer, OfferLedger, Progress},
    notify::{Completion, CompletionState, NotificationKind, Notifier},
    providers::{OrderStatusSource, RemoteStatus, SwitchainOrder},
};
use serde::Serialize;
use std::{sync::Arc, time::Duration};
use tokio::{sync::Notify, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PollReport {
    pub checked: usize,
    pub completed: usize,
    pub failed: usize,
    pub still_pending: usize,
    pub fetch_errors: usize,
}

pub struct ReconciliationPoller {
    ledger: OfferLedger,
    source: Arc<dyn OrderStatusSource>,
    notifier: Arc<dyn Notifier>,
    audit: Option<AuditLog>,
    interval: Duration,
}

impl std::fmt::Debug for ReconciliationPoller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconciliationPoller")
            .field("ledger", &self.ledger)
            .field("interval", &self.interval)
            .finish_non_exhaustive()
    }
}

impl ReconciliationPoller {
    pub fn new(
        ledger: OfferLedger,
        source: Arc<dyn OrderStatusSource>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            ledger,
            source,
            notifier,
            audit: None,
            interval: DEFAULT_POLL_INTERVAL,
        }
    }

    #[must_use]
    pub const fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Record every settlement in the audit trail.
    #[must_use]
    pub fn with_audit(mut self, audit: AuditLog) -> Self {
        self.audit = Some(audit);
        self
    }

    /// One sweep that cannot be cancelled.
    pub async fn poll_once(&self) -> eyre::Result<PollReport> {
        self.poll(&CancellationToken::new()).await
    }

    /// One sweep over the pending entries. Fetch failures are counted and left for the next
    /// sweep; ledger failures abort the sweep.
    pub async fn poll(&self, shutdown: &CancellationToken) -> eyre::Result<PollReport> {
        let pending: Vec<Offer> = self
            .ledger
            .offload(OfferLedger::list)
            .await?
            .into_iter()
            .filter(|o| o.progress == Progress::Progress)
            .collect();

        let mut report = PollReport::default();
        for offer in pending {
            let order_id = offer.order.order_id.as_str();
            let fetched = tokio::select! {
                r = self.source.order_status(order_id) => r,
                () = shutdown.cancelled() => {
                    debug!(pair = %offer.pair_key, "sweep cancelled mid-fetch");
                    break;
                }
            };
            report.checked += 1;

            let snapshot = match fetched {
                Ok(s) => s,
                Err(e) => {
                    warn!(
                        pair = %offer.pair_key,
                        order_id,
                        error = %e,
                        "order status fetch failed"
                    );
                    report.fetch_errors += 1;
                    continue;
                }
            };
            let (progress, state) = match snapshot.remote_status() {
                RemoteStatus::Pending => {
                    report.still_pending += 1;
                    continue;
                }
                RemoteStatus::Completed => (Progress::Completed, CompletionState::Completed),
                RemoteStatus::Failed => (Progress::Failed, CompletionState::Failed),
            };

            let settler = Settler {
                notifier: Arc::clone(&self.notifier),
                audit: self.audit.clone(),
            };
            let (pair_key, id) = (offer.pair_key.clone(), order_id.to_owned());
            let won = self
                .ledger
                .offload(move |ledger| {
                    settler.settle(ledger, &pair_key, &id, snapshot, progress, state)
                })
                .await?;
            if !won {
                debug!(pair = %offer.pair_key, order_id, "entry already settled elsewhere");
                continue;
            }
            match state {
                CompletionState::Completed => report.completed += 1,
                CompletionState::Failed => report.failed += 1,
            }
        }
        Ok(report)
    }

    /// Sweep, then wait for the interval, a trigger or shutdown. Runs until cancelled.
    pub async fn run(self, shutdown: CancellationToken, trigger: Arc<Notify>) {
        info!(
            interval_secs = self.interval.as_secs(),
            "reconciliation poller starting"
        );

        loop {
            if shutdown.is_cancelled() {
                info!("reconciliation poller shutting down");
                return;
            }

            match self.poll(&shutdown).await {
                Ok(report) if report.checked > 0 => info!(?report, "reconciliation sweep"),
                Ok(_) => {}
                Err(e) => warn!(error = %e, "reconciliation sweep failed"),
            }

            tokio::select! {
                () = tokio::time::sleep(self.interval) => {},
                () = trigger.notified() => debug!("reconciliation triggered"),
                () = shutdown.cancelled() => {
                    info!("reconciliation poller shutting down");
                    return;
                }
            }
        }
    }

    pub fn spawn(self) -> PollerHandle {
        let shutdown = CancellationToken::new();
        let trigger = Arc::new(Notify::new());
        let task = tokio::spawn(self.run(shutdown.clone(), Arc::clone(&trigger)));
        PollerHandle {
            shutdown,
            trigger,
            task,
        }
    }
}

/// Sinks for a won settlement. Moved onto the blocking pool together with the ledger write.
struct Settler {
    notifier: Arc<dyn Notifier>,
    audit: Option<AuditLog>,
}

impl Settler {
    /// Compare-and-set the entry; only the winner logs, audits and notifies.
    fn settle(
        &self,
        ledger: &OfferLedger,
        pair_key: &str,
        order_id: &str,
        snapshot: SwitchainOrder,
        progress: Progress,
        state: CompletionState,
    ) -> eyre::Result<bool> {
        let Some(settled) = ledger.settle(pair_key, order_id, snapshot, progress)? else {
            return Ok(false);
        };
        info!(
            pair = %settled.pair_key,
            order_id = %settled.order.order_id,
            status = %settled.order.status,
            progress = settled.progress.as_str(),
            "order settled"
        );
        if let Some(audit) = &self.audit {
            audit.record(serde_json::json!({
                "event": "order_settled",
                "pair_key": settled.pair_key,
                "order_id": settled.order.order_id,
                "result": settled.progress.as_str(),
            }));
        }
        self.notifier
            .notify(NotificationKind::Swap, &completion_for(&settled, state));
        Ok(true)
    }
}

fn completion_for(offer: &Offer, state: CompletionState) -> Completion {
    let (from, to) = split_pair(&offer.pair_key);
    Completion {
        key: offer.pair_key.clone(),
        order_id: offer.order.order_id.clone(),
        from: from.to_owned(),
        to: to.to_owned(),
        from_amount: offer.order.from_amount.clone(),
        to_amount: offer.order.rate.clone(),
        state,
        reason: None,
    }
}

/// Owner side of a spawned poller.
#[derive(Debug)]
pub struct PollerHandle {
    shutdown: CancellationToken,
    trigger: Arc<Notify>,
    task: JoinHandle<()>,
}

impl PollerHandle {
    /// Sweep now instead of waiting for the next tick (screen focus regained).
    pub fn trigger(&self) {
        self.trigger.notify_one();
    }

    pub async fn shutdown(self) -> eyre::Result<()> {
        self.shutdown.cancel();
        self.task
            .await
            .map_err(|e| eyre::eyre!("poller task failed: {e}"))
    }
}
