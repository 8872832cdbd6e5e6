//! Data model shared by the store, the outbox and the sync engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Opaque identifier of a payout destination.
///
/// Either assigned by the remote authority or generated locally as a
/// placeholder until the authority answers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct WalletId(String);

impl WalletId {
    /// Create a new WalletId from a string.
    ///
    /// # Errors
    /// - Returns error if id is empty or only whitespace
    pub fn new(id: impl Into<String>) -> crate::Result<Self> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(crate::Error::InvalidInput(
                "WalletId cannot be empty".to_string(),
            ));
        }
        Ok(Self(id))
    }

    /// Build `PREFIX-SUFFIX`; never empty, so it cannot fail.
    pub fn with_prefix(prefix: &str, suffix: &str) -> Self {
        Self(format!("{}-{}", prefix, suffix))
    }

    /// Get the inner string value.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for WalletId {
    type Error = crate::Error;

    fn try_from(id: String) -> crate::Result<Self> {
        Self::new(id)
    }
}

impl From<WalletId> for String {
    fn from(id: WalletId) -> Self {
        id.0
    }
}

impl fmt::Display for WalletId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The device's authoritative snapshot.
///
/// `counter` and `balance` are persisted independently. Once the remote
/// authority has answered, no arithmetic relation between them is assumed:
/// the server may convert steps at a different rate.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalState {
    /// Accumulated step count.
    pub counter: u64,
    /// Reward balance derived from steps, overwritable by the remote authority.
    pub balance: u64,
    /// Payout destination, if one has been assigned or generated.
    pub wallet_id: Option<WalletId>,
    /// Whether a login succeeded and has not been revoked.
    pub session_active: bool,
}

impl LocalState {
    /// Apply an optimistic step increment.
    ///
    /// One balance unit is earned every time the counter crosses a multiple
    /// of `steps_per_coin` (a value of zero is treated as one).
    ///
    /// # Returns
    /// The number of balance units earned by this increment.
    pub fn record_steps(&mut self, delta: u64, steps_per_coin: u64) -> u64 {
        let per_coin = steps_per_coin.max(1);
        let before = self.counter;
        self.counter = before.saturating_add(delta);
        let earned = self.counter / per_coin - before / per_coin;
        self.balance = self.balance.saturating_add(earned);
        earned
    }

    /// Apply an optimistic withdrawal debit.
    ///
    /// # Errors
    /// - `InsufficientBalance` if `amount` exceeds the balance; state is untouched
    pub fn debit(&mut self, amount: u64) -> crate::Result<()> {
        if amount > self.balance {
            return Err(crate::Error::InsufficientBalance {
                requested: amount,
                available: self.balance,
            });
        }
        self.balance -= amount;
        Ok(())
    }
}

/// Payload of a step increment, with the local values at the time it was made.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepsPayload {
    pub delta: u64,
    pub counter_snapshot: u64,
    pub balance_snapshot: u64,
    pub wallet_snapshot: Option<WalletId>,
}

impl StepsPayload {
    /// Capture a payload from the current (already incremented) state.
    pub fn from_state(state: &LocalState, delta: u64) -> Self {
        Self {
            delta,
            counter_snapshot: state.counter,
            balance_snapshot: state.balance,
            wallet_snapshot: state.wallet_id.clone(),
        }
    }
}

/// Payload of a withdrawal request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawPayload {
    /// Address the funds go to.
    pub destination: String,
    pub amount: u64,
    /// Wallet the funds are taken from.
    pub wallet_snapshot: Option<WalletId>,
}

/// Payload of a wallet assignment request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

/// A mutation that must be confirmed by the remote authority.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum Operation {
    CounterIncrement(StepsPayload),
    WithdrawalRequest(WithdrawPayload),
    WalletAssignment(WalletPayload),
}

impl Operation {
    /// Get the kind of this operation.
    pub fn kind(&self) -> OperationKind {
        match self {
            Operation::CounterIncrement(_) => OperationKind::CounterIncrement,
            Operation::WithdrawalRequest(_) => OperationKind::WithdrawalRequest,
            Operation::WalletAssignment(_) => OperationKind::WalletAssignment,
        }
    }
}

/// Fieldless mirror of [`Operation`], for logs and reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    CounterIncrement,
    WithdrawalRequest,
    WalletAssignment,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OperationKind::CounterIncrement => "counter_increment",
            OperationKind::WithdrawalRequest => "withdrawal_request",
            OperationKind::WalletAssignment => "wallet_assignment",
        };
        f.write_str(name)
    }
}

/// A pending mutation awaiting confirmation.
///
/// Fields are only readable: an item never changes after it is built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboxItem {
    id: String,
    operation: Operation,
    enqueued_at: DateTime<Utc>,
}

impl OutboxItem {
    /// Wrap an operation, stamped with the current time.
    pub fn new(operation: Operation) -> Self {
        Self::at(operation, Utc::now())
    }

    /// Wrap an operation with an explicit timestamp.
    pub fn at(operation: Operation, enqueued_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            operation,
            enqueued_at,
        }
    }

    /// Unique ID for this item.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn operation(&self) -> &Operation {
        &self.operation
    }

    pub fn kind(&self) -> OperationKind {
        self.operation.kind()
    }

    /// When the operation was first attempted.
    pub fn enqueued_at(&self) -> DateTime<Utc> {
        self.enqueued_at
    }

    /// Epoch milliseconds, the `ts` field the remote service expects.
    pub fn ts_millis(&self) -> i64 {
        self.enqueued_at.timestamp_millis()
    }
}
