//! Connectivity signal shared by the engine and the scheduler.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use stepsync_common::Error;

use crate::remote::RemoteService;

/// Cloneable handle on the current online/offline state.
///
/// The engine only reads it before each call; the scheduler subscribes to
/// it to flush when the device comes back online.
#[derive(Clone)]
pub struct Connectivity {
    tx: Arc<watch::Sender<bool>>,
}

impl Connectivity {
    /// Create a signal with an initial state.
    pub fn new(online: bool) -> Self {
        let (tx, _rx) = watch::channel(online);
        Self { tx: Arc::new(tx) }
    }

    /// Record the current state; subscribers only wake on actual changes.
    pub fn set_online(&self, online: bool) {
        let changed = self.tx.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });
        if changed {
            info!(
                "Connectivity changed: {}",
                if online { "online" } else { "offline" }
            );
        }
    }

    /// Check the current state.
    pub fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    /// Subscribe to state changes.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

impl Default for Connectivity {
    fn default() -> Self {
        Self::new(true)
    }
}

/// Ask the status endpoint whether the server can be reached.
///
/// An error status still proves the server is reachable; only a failed or
/// timed-out call counts as offline.
pub async fn check_reachable(remote: &dyn RemoteService) -> bool {
    match remote.status().await {
        Ok(_) => true,
        Err(Error::Server { .. }) | Err(Error::Rejected { .. }) => true,
        Err(e) => {
            debug!("Status check failed: {}", e);
            false
        }
    }
}

/// Derive connectivity by polling the status endpoint.
///
/// For hosts without a platform signal.
pub fn spawn_probe(
    remote: Arc<dyn RemoteService>,
    connectivity: Connectivity,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            connectivity.set_online(check_reachable(remote.as_ref()).await);
        }
    })
}
