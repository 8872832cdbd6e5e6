//! Reconciliation of authoritative responses into local state.
//!
//! Everything here is pure: functions take the current state and return the
//! next one, leaving persistence to the engine.

use tracing::debug;

use stepsync_common::{LocalState, Operation, WalletId};

use crate::remote::{RemoteResponse, WalletResponse};

/// Length of the random part of a placeholder wallet ID.
pub const PLACEHOLDER_SUFFIX_LEN: usize = 10;

const PLACEHOLDER_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Generate a stand-in wallet ID: `PREFIX-` plus ten characters of `[A-Z0-9]`.
pub fn placeholder_wallet_id(prefix: &str) -> WalletId {
    let suffix: String = (0..PLACEHOLDER_SUFFIX_LEN)
        .map(|_| {
            let index = rand::random_range(0..PLACEHOLDER_ALPHABET.len());
            PLACEHOLDER_ALPHABET[index] as char
        })
        .collect();
    let prefix = if prefix.is_empty() { "WALLET" } else { prefix };
    WalletId::with_prefix(prefix, &suffix)
}

/// Merge a success response into local state.
///
/// Fields present in the response replace the local value outright; the
/// remote count is the source of truth once acknowledged. Absent fields
/// leave local values untouched.
pub fn reconcile(state: &LocalState, response: &RemoteResponse) -> LocalState {
    let mut next = state.clone();

    match response {
        RemoteResponse::Steps(r) => {
            replace(&mut next.counter, r.steps, "counter");
            replace(&mut next.balance, r.doge, "balance");
        }
        RemoteResponse::Withdraw(r) => {
            // The optimistic debit is already in `balance`; only an explicit
            // authoritative value changes it.
            replace(&mut next.balance, r.doge, "balance");
        }
        RemoteResponse::Wallet(r) => {
            if let Some(address) = assigned_address(r) {
                debug!("Wallet assigned by server: {}", address);
                next.wallet_id = Some(address);
            }
        }
        RemoteResponse::Status(r) => {
            replace(&mut next.counter, r.steps, "counter");
            replace(&mut next.balance, r.doge, "balance");
            if let Some(wallet) = r.wallet.as_deref().and_then(|w| WalletId::new(w).ok()) {
                next.wallet_id = Some(wallet);
            }
        }
    }

    next
}

/// Reconcile an answer to a call made directly by the user.
///
/// Same as [`reconcile`], except that a wallet request answered without an
/// address still leaves the user with a fresh placeholder; nothing is queued
/// for it, since the server did answer.
pub fn confirm(state: &LocalState, response: &RemoteResponse, wallet_prefix: &str) -> LocalState {
    let mut next = reconcile(state, response);
    if let RemoteResponse::Wallet(r) = response {
        if assigned_address(r).is_none() {
            next.wallet_id = Some(placeholder_wallet_id(wallet_prefix));
        }
    }
    next
}

/// Local consequence of an operation the remote did not confirm.
///
/// A wallet request installs a placeholder right away so the user has an
/// address to show; the authoritative one overwrites it once a flush lands.
/// Other operations already carry their optimistic effect.
pub fn defer(state: &LocalState, operation: &Operation, wallet_prefix: &str) -> LocalState {
    let mut next = state.clone();
    if let Operation::WalletAssignment(_) = operation {
        let placeholder = placeholder_wallet_id(wallet_prefix);
        debug!("Installing placeholder wallet {}", placeholder);
        next.wallet_id = Some(placeholder);
    }
    next
}

fn assigned_address(response: &WalletResponse) -> Option<WalletId> {
    response
        .address
        .as_deref()
        .and_then(|address| WalletId::new(address).ok())
}

fn replace(field: &mut u64, authoritative: Option<u64>, name: &str) {
    if let Some(value) = authoritative {
        if *field != value {
            debug!("Server overrides {}: {} -> {}", name, field, value);
        }
        *field = value;
    }
}
