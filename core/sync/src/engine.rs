//! Core sync engine: optimistic local writes, outbox replay and reconciliation.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use stepsync_common::{Error, LocalState, Operation, OutboxItem, Result};
use stepsync_storage::{Snapshot, StateStore};

use crate::connectivity::Connectivity;
use crate::outbox::Outbox;
use crate::reconcile;
use crate::remote::{dispatch, RemoteResponse, RemoteService};
use crate::retry::{classify, with_timeout, Disposition};

/// Configuration for the sync engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Seconds between scheduled flushes.
    pub flush_interval_secs: u64,
    /// Deadline for a single remote call, in milliseconds.
    pub request_timeout_ms: u64,
    /// Prefix of locally generated placeholder wallets.
    pub wallet_prefix: String,
    /// Steps needed to earn one balance unit.
    pub steps_per_coin: u64,
    /// Seconds between connectivity probes.
    pub probe_interval_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            flush_interval_secs: 10,
            request_timeout_ms: 5000,
            wallet_prefix: "DOGE".to_string(),
            steps_per_coin: 1,
            probe_interval_secs: 10,
        }
    }
}

impl SyncConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval_secs.max(1))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms.max(1))
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_secs.max(1))
    }
}

/// What the caller learns about an attempted operation.
///
/// Transport details never reach the caller: "sent but unacknowledged" and
/// "never sent" are both `Queued`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Stored in the outbox for a later flush.
    Queued,
    /// Acknowledged by the remote authority and reconciled.
    Confirmed { message: Option<String> },
    /// Refused for good; nothing was queued.
    Rejected { status: u16, message: String },
}

/// An outbox item the remote refused during a flush.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedItem {
    pub item: OutboxItem,
    pub status: u16,
    pub message: String,
}

/// Result of one flush pass.
#[derive(Debug, Clone, Default)]
pub struct FlushReport {
    /// Items sent to the remote.
    pub attempted: usize,
    /// Items confirmed and removed.
    pub confirmed: usize,
    /// Items left queued after a retryable failure, or not reached.
    pub requeued: usize,
    /// Items dropped after a terminal rejection.
    pub rejected: Vec<RejectedItem>,
    /// Another flush was already running, so this one did nothing.
    pub skipped: bool,
    /// Time taken.
    pub duration: Duration,
}

impl FlushReport {
    /// Report for a flush that yielded to one already in flight.
    pub fn skipped() -> Self {
        Self {
            skipped: true,
            ..Self::default()
        }
    }
}

/// State and queue, always persisted together.
#[derive(Debug, Clone, Default)]
struct Ledger {
    state: LocalState,
    outbox: Outbox,
}

impl Ledger {
    fn snapshot(&self) -> Snapshot {
        Snapshot::new(self.state.clone(), self.outbox.to_vec())
    }
}

/// Main sync engine.
///
/// Owns the local state and the outbox. Every change to either is persisted
/// before it becomes visible, so a failed save leaves memory and disk agreeing.
pub struct SyncEngine {
    /// Remote authority.
    remote: Arc<dyn RemoteService>,
    /// Durable store for the ledger.
    store: Arc<dyn StateStore>,
    /// Current online/offline signal.
    connectivity: Connectivity,
    ledger: Mutex<Ledger>,
    /// Held for a whole flush, and around a direct call.
    in_flight: Mutex<()>,
    config: SyncConfig,
}

impl SyncEngine {
    /// Create an engine, restoring the last persisted snapshot.
    pub async fn new(
        remote: Arc<dyn RemoteService>,
        store: Arc<dyn StateStore>,
        connectivity: Connectivity,
        config: SyncConfig,
    ) -> Result<Self> {
        let snapshot = store.load().await?;
        info!(
            "Loaded state from {} store: counter={}, balance={}, {} pending",
            store.name(),
            snapshot.state.counter,
            snapshot.state.balance,
            snapshot.outbox.len()
        );

        Ok(Self {
            remote,
            store,
            connectivity,
            ledger: Mutex::new(Ledger {
                state: snapshot.state,
                outbox: Outbox::from_items(snapshot.outbox),
            }),
            in_flight: Mutex::new(()),
            config,
        })
    }

    /// Get the configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Get the connectivity handle.
    pub fn connectivity(&self) -> &Connectivity {
        &self.connectivity
    }

    /// Get the remote service.
    pub fn remote(&self) -> Arc<dyn RemoteService> {
        self.remote.clone()
    }

    /// Current local state.
    pub async fn state(&self) -> LocalState {
        self.ledger.lock().await.state.clone()
    }

    /// Queued items, oldest first.
    pub async fn pending(&self) -> Vec<OutboxItem> {
        self.ledger.lock().await.outbox.to_vec()
    }

    pub async fn outbox_len(&self) -> usize {
        self.ledger.lock().await.outbox.len()
    }

    /// Apply a local-only change to the state and persist it.
    ///
    /// If `mutate` fails nothing changes; if the save fails the change is
    /// discarded and the error returned.
    pub async fn update<T, F>(&self, mutate: F) -> Result<T>
    where
        F: FnOnce(&mut LocalState) -> Result<T>,
    {
        self.commit(|ledger| mutate(&mut ledger.state)).await
    }

    /// Send an operation now, or queue it if that is not possible.
    ///
    /// # Errors
    /// Only persistence failures; remote failures become `Queued` or
    /// `Rejected`.
    pub async fn attempt_operation(&self, operation: Operation) -> Result<Outcome> {
        let item = OutboxItem::new(operation);

        if !self.connectivity.is_online() {
            debug!("Offline, queueing {}", item.kind());
            return self.defer(item).await;
        }

        let Ok(_guard) = self.in_flight.try_lock() else {
            debug!("Flush in flight, queueing {} behind it", item.kind());
            return self.defer(item).await;
        };

        match with_timeout(self.config.request_timeout(), dispatch(self.remote.as_ref(), &item))
            .await
        {
            Ok(response) => {
                let prefix = &self.config.wallet_prefix;
                self.commit(|ledger| {
                    ledger.state = reconcile::confirm(&ledger.state, &response, prefix);
                    Ok(())
                })
                .await?;
                info!("{} confirmed", item.kind());
                Ok(Outcome::Confirmed {
                    message: response.message().map(str::to_string),
                })
            }
            Err(e) => match classify(&e) {
                Disposition::Requeue => {
                    warn!("{} failed, queueing: {}", item.kind(), e);
                    self.defer(item).await
                }
                Disposition::Drop => {
                    let (status, message) = rejection(&e);
                    warn!("{} rejected ({}): {}", item.kind(), status, message);
                    let prefix = &self.config.wallet_prefix;
                    self.commit(|ledger| {
                        ledger.state = reconcile::defer(&ledger.state, item.operation(), prefix);
                        Ok(())
                    })
                    .await?;
                    Ok(Outcome::Rejected { status, message })
                }
            },
        }
    }

    /// Replay queued items against the remote, oldest first.
    ///
    /// Only items present at entry are attempted. Each call completes before
    /// the next starts; a connectivity loss stops the pass.
    pub async fn flush_once(&self) -> Result<FlushReport> {
        let Ok(_guard) = self.in_flight.try_lock() else {
            debug!("Flush already in progress, skipping");
            return Ok(FlushReport::skipped());
        };

        if !self.connectivity.is_online() {
            debug!("Offline, flush is a no-op");
            return Ok(FlushReport::default());
        }

        let start = Instant::now();
        let drain = self.ledger.lock().await.outbox.drain();
        if drain.len() == 0 {
            return Ok(FlushReport::default());
        }

        info!("Flushing {} queued operations", drain.len());
        let captured = drain.len();
        let mut report = FlushReport::default();

        for item in drain {
            if !self.connectivity.is_online() {
                info!("Connectivity lost, stopping flush");
                break;
            }

            report.attempted += 1;
            let result =
                with_timeout(self.config.request_timeout(), dispatch(self.remote.as_ref(), &item))
                    .await;

            match result {
                Ok(response) => {
                    self.commit(|ledger| {
                        ledger.state = reconcile::reconcile(&ledger.state, &response);
                        ledger.outbox.remove(item.id());
                        Ok(())
                    })
                    .await?;
                    report.confirmed += 1;
                    debug!("Flushed {} {}", item.kind(), item.id());
                }
                Err(e) => match classify(&e) {
                    Disposition::Requeue => {
                        warn!("{} {} still pending: {}", item.kind(), item.id(), e);
                    }
                    Disposition::Drop => {
                        let (status, message) = rejection(&e);
                        warn!(
                            "{} {} rejected ({}), dropping: {}",
                            item.kind(),
                            item.id(),
                            status,
                            message
                        );
                        report.rejected.push(RejectedItem {
                            item,
                            status,
                            message,
                        });
                    }
                },
            }
        }

        if !report.rejected.is_empty() {
            let dropped: Vec<String> = report
                .rejected
                .iter()
                .map(|r| r.item.id().to_string())
                .collect();
            self.commit(|ledger| {
                ledger
                    .outbox
                    .retain_all(|item| !dropped.iter().any(|id| id == item.id()));
                Ok(())
            })
            .await?;
        }

        report.requeued = captured - report.confirmed - report.rejected.len();
        report.duration = start.elapsed();
        info!(
            "Flush completed in {:?}: {} confirmed, {} pending, {} rejected",
            report.duration,
            report.confirmed,
            report.requeued,
            report.rejected.len()
        );

        Ok(report)
    }

    /// Pull the authoritative state from the remote.
    ///
    /// # Returns
    /// `true` if the remote answered and its state was applied.
    pub async fn pull_status(&self) -> Result<bool> {
        if !self.connectivity.is_online() {
            debug!("Offline, skipping status pull");
            return Ok(false);
        }

        match with_timeout(self.config.request_timeout(), self.remote.status()).await {
            Ok(status) => {
                let response = RemoteResponse::Status(status);
                self.commit(|ledger| {
                    ledger.state = reconcile::reconcile(&ledger.state, &response);
                    Ok(())
                })
                .await?;
                info!("Applied authoritative state from {}", self.remote.name());
                Ok(true)
            }
            Err(e) => {
                warn!("Status pull failed: {}", e);
                Ok(false)
            }
        }
    }

    /// Queue an item, apply its deferred local effect and persist both.
    async fn defer(&self, item: OutboxItem) -> Result<Outcome> {
        let prefix = &self.config.wallet_prefix;
        let kind = item.kind();
        self.commit(|ledger| {
            ledger.state = reconcile::defer(&ledger.state, item.operation(), prefix);
            ledger.outbox.enqueue(item);
            Ok(())
        })
        .await?;
        debug!("Queued {}", kind);
        Ok(Outcome::Queued)
    }

    /// Mutate a copy of the ledger, persist it, then swap it in.
    async fn commit<T, F>(&self, mutate: F) -> Result<T>
    where
        F: FnOnce(&mut Ledger) -> Result<T>,
    {
        let mut ledger = self.ledger.lock().await;
        let mut next = ledger.clone();
        let value = mutate(&mut next)?;
        if let Err(e) = self.store.save(&next.snapshot()).await {
            error!("Failed to persist state: {}", e);
            return Err(e);
        }
        *ledger = next;
        Ok(value)
    }
}

fn rejection(err: &Error) -> (u16, String) {
    match err {
        Error::Rejected { status, message } => (*status, message.clone()),
        other => (0, other.to_string()),
    }
}
