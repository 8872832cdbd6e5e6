//! Common types shared across the StepSync crates.
//!
//! This module holds the error taxonomy and the on-device data model: the
//! local state snapshot and the operations that wait in the outbox until
//! the remote authority confirms them.

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::{
    LocalState, Operation, OperationKind, OutboxItem, StepsPayload, WalletId, WalletPayload,
    WithdrawPayload,
};
