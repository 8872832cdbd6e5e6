//! StepSync Sync Engine
//!
//! This module provides offline-first synchronization of a step counter and
//! its reward balance, including:
//! - An outbox of operations awaiting confirmation by the remote authority
//! - Optimistic local writes reconciled against authoritative responses
//! - Terminal vs retryable classification of remote failures
//! - A flush scheduler driven by time, connectivity and explicit requests

pub mod client;
pub mod connectivity;
pub mod engine;
pub mod outbox;
pub mod reconcile;
pub mod remote;
pub mod retry;
pub mod scheduler;

#[cfg(test)]
mod testing;

// Re-export main types
pub use client::{LoginOutcome, StepClient};
pub use connectivity::{check_reachable, spawn_probe, Connectivity};
pub use engine::{FlushReport, Outcome, RejectedItem, SyncConfig, SyncEngine};
pub use outbox::{Drain, Outbox};
pub use reconcile::{placeholder_wallet_id, reconcile};
pub use remote::{
    dispatch, ConversionPreview, HttpRemote, RemoteResponse, RemoteService, StatusResponse,
    StepsResponse, WalletResponse, WithdrawResponse,
};
pub use retry::{classify, with_timeout, Disposition};
pub use scheduler::{FlushScheduler, FlushSchedulerHandle, FlushTrigger};
