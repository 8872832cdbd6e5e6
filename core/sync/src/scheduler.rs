//! Flush scheduling: startup, periodic, connectivity-regained and on demand.

use std::future::Future;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info};

use stepsync_common::{Error, Result};

use crate::connectivity::Connectivity;
use crate::engine::FlushReport;

/// Why a flush was started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushTrigger {
    /// Once when the scheduler starts.
    Startup,
    /// The recurring timer fired.
    Interval,
    /// The device went from offline to online.
    ConnectivityRegained,
    /// A caller asked for it (e.g. after login).
    Requested,
}

type Reply = oneshot::Sender<Result<FlushReport>>;

enum Request {
    /// Flush, optionally answering with the report.
    Flush(Option<Reply>),
    Shutdown,
}

/// Cloneable front end for asking the scheduler to flush.
#[derive(Clone)]
pub struct FlushScheduler {
    request_tx: mpsc::Sender<Request>,
}

impl FlushScheduler {
    /// Create a scheduler and the handle that runs it.
    pub fn new(interval: Duration, connectivity: Connectivity) -> (Self, FlushSchedulerHandle) {
        let (request_tx, request_rx) = mpsc::channel(100);

        let scheduler = Self { request_tx };
        let handle = FlushSchedulerHandle {
            interval,
            connectivity,
            request_rx,
        };

        (scheduler, handle)
    }

    /// Request a flush and wait for its report.
    ///
    /// If a flush is already running, the request is answered by the next
    /// one rather than starting a second.
    pub async fn request_flush(&self) -> Result<FlushReport> {
        let (reply_tx, reply_rx) = oneshot::channel();

        self.request_tx
            .send(Request::Flush(Some(reply_tx)))
            .await
            .map_err(|_| Error::Scheduler("Scheduler not running".to_string()))?;

        reply_rx
            .await
            .map_err(|_| Error::Scheduler("Failed to receive flush report".to_string()))?
    }

    /// Ask for a flush without waiting for it.
    pub fn notify_flush(&self) {
        if let Err(e) = self.request_tx.try_send(Request::Flush(None)) {
            // A full queue already holds a pending flush.
            debug!("Flush notification not delivered: {}", e);
        }
    }

    /// Shutdown the scheduler.
    pub async fn shutdown(&self) {
        let _ = self.request_tx.send(Request::Shutdown).await;
    }
}

/// Handle for the scheduler background task.
pub struct FlushSchedulerHandle {
    interval: Duration,
    connectivity: Connectivity,
    request_rx: mpsc::Receiver<Request>,
}

impl FlushSchedulerHandle {
    /// Run the scheduler background task.
    ///
    /// This should be spawned in a tokio task. `flush_fn` is called whenever
    /// a flush is due; calls never overlap.
    pub async fn run<F, Fut>(mut self, flush_fn: F)
    where
        F: Fn(FlushTrigger) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<FlushReport>> + Send,
    {
        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut online_rx = self.connectivity.subscribe();
        let mut was_online = *online_rx.borrow_and_update();

        info!("Flush scheduler started (every {:?})", self.interval);

        let result = Self::flush(&flush_fn, FlushTrigger::Startup).await;
        if self.answer_queued(&result) {
            info!("Flush scheduler shutting down");
            return;
        }

        loop {
            let (trigger, reply) = tokio::select! {
                request = self.request_rx.recv() => match request {
                    Some(Request::Flush(reply)) => (FlushTrigger::Requested, reply),
                    Some(Request::Shutdown) | None => {
                        info!("Flush scheduler shutting down");
                        break;
                    }
                },

                _ = ticker.tick() => (FlushTrigger::Interval, None),

                Ok(()) = online_rx.changed() => {
                    let online = *online_rx.borrow_and_update();
                    let regained = online && !was_online;
                    was_online = online;
                    if !regained {
                        continue;
                    }
                    (FlushTrigger::ConnectivityRegained, None)
                }
            };

            let result = Self::flush(&flush_fn, trigger).await;
            let shutting_down = self.answer_queued(&result);
            if let Some(reply) = reply {
                let _ = reply.send(result);
            }
            if shutting_down {
                info!("Flush scheduler shutting down");
                break;
            }
        }
    }

    async fn flush<F, Fut>(flush_fn: &F, trigger: FlushTrigger) -> Result<FlushReport>
    where
        F: Fn(FlushTrigger) -> Fut,
        Fut: Future<Output = Result<FlushReport>>,
    {
        debug!("Triggering flush: {:?}", trigger);
        let result = flush_fn(trigger).await;
        match &result {
            Ok(report) if report.attempted > 0 => {
                info!(
                    "{:?} flush completed: {} confirmed, {} pending, {} rejected",
                    trigger,
                    report.confirmed,
                    report.requeued,
                    report.rejected.len()
                );
            }
            Ok(_) => {}
            Err(e) => {
                error!("{:?} flush failed: {}", trigger, e);
            }
        }
        result
    }

    /// Answer requests that queued up during a flush with its result.
    ///
    /// Returns `true` if a shutdown was among them.
    fn answer_queued(&mut self, result: &Result<FlushReport>) -> bool {
        let mut coalesced = 0;
        while let Ok(request) = self.request_rx.try_recv() {
            match request {
                Request::Flush(reply) => {
                    coalesced += 1;
                    if let Some(reply) = reply {
                        let _ = reply.send(share(result));
                    }
                }
                Request::Shutdown => return true,
            }
        }
        if coalesced > 0 {
            debug!("Coalesced {} flush requests", coalesced);
        }
        false
    }
}

fn share(result: &Result<FlushReport>) -> Result<FlushReport> {
    match result {
        Ok(report) => Ok(report.clone()),
        Err(e) => Err(Error::Scheduler(e.to_string())),
    }
}
