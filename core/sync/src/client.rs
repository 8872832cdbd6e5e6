//! User-facing actions: the entry points a UI or CLI calls.

use std::sync::Arc;
use tracing::{debug, info, warn};

use stepsync_common::{
    Error, Operation, Result, StepsPayload, WalletId, WalletPayload, WithdrawPayload,
};

use crate::engine::{Outcome, SyncEngine};
use crate::remote::ConversionPreview;
use crate::retry::with_timeout;
use crate::scheduler::FlushScheduler;

/// How a login attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginOutcome {
    /// The server accepted the PIN.
    Accepted,
    /// The server was unreachable and the PIN matched the offline one.
    AcceptedOffline,
    /// The PIN was refused.
    Refused,
}

impl LoginOutcome {
    pub fn is_accepted(&self) -> bool {
        !matches!(self, LoginOutcome::Refused)
    }
}

/// Actions of a step-counting user, applied optimistically and synced.
pub struct StepClient {
    engine: Arc<SyncEngine>,
    scheduler: Option<FlushScheduler>,
    offline_pin: Option<String>,
}

impl StepClient {
    /// Create a client that flushes directly through the engine.
    pub fn new(engine: Arc<SyncEngine>) -> Self {
        Self {
            engine,
            scheduler: None,
            offline_pin: None,
        }
    }

    /// Route flush triggers through a running scheduler instead.
    pub fn with_scheduler(mut self, scheduler: FlushScheduler) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    /// Accept this PIN when the server cannot be reached.
    pub fn with_offline_pin(mut self, pin: impl Into<String>) -> Self {
        self.offline_pin = Some(pin.into());
        self
    }

    pub fn engine(&self) -> &Arc<SyncEngine> {
        &self.engine
    }

    /// Count one step.
    pub async fn on_user_increment(&self) -> Result<Outcome> {
        let per_coin = self.engine.config().steps_per_coin;
        let payload = self
            .engine
            .update(|state| {
                state.record_steps(1, per_coin);
                Ok(StepsPayload::from_state(state, 1))
            })
            .await?;

        debug!("Step recorded, counter={}", payload.counter_snapshot);
        self.engine
            .attempt_operation(Operation::CounterIncrement(payload))
            .await
    }

    /// Withdraw `amount` to `destination`.
    ///
    /// # Errors
    /// - `InvalidInput` if the destination is blank or the amount is zero
    /// - `InsufficientBalance` if the amount exceeds the local balance
    ///
    /// Neither reaches the network, and neither changes the balance.
    pub async fn on_withdraw_requested(&self, destination: &str, amount: u64) -> Result<Outcome> {
        let destination = destination.trim();
        if destination.is_empty() {
            return Err(Error::InvalidInput(
                "Withdrawal address cannot be empty".to_string(),
            ));
        }
        if amount == 0 {
            return Err(Error::InvalidInput(
                "Withdrawal amount must be positive".to_string(),
            ));
        }

        let payload = self
            .engine
            .update(|state| {
                state.debit(amount)?;
                Ok(WithdrawPayload {
                    destination: destination.to_string(),
                    amount,
                    wallet_snapshot: state.wallet_id.clone(),
                })
            })
            .await?;

        info!("Withdrawing {} to {}", amount, destination);
        self.engine
            .attempt_operation(Operation::WithdrawalRequest(payload))
            .await
    }

    /// Ask for a wallet; a placeholder stands in until the server assigns one.
    pub async fn on_wallet_requested(&self) -> Result<(Outcome, WalletId)> {
        let outcome = self
            .engine
            .attempt_operation(Operation::WalletAssignment(WalletPayload::default()))
            .await?;

        let wallet = self
            .engine
            .state()
            .await
            .wallet_id
            .ok_or_else(|| Error::NotFound("No wallet after assignment".to_string()))?;
        Ok((outcome, wallet))
    }

    /// Log in with a PIN.
    ///
    /// The server decides when it answers. Only when it cannot be reached is
    /// the configured offline PIN consulted; without one, login fails.
    pub async fn login(&self, pin: &str) -> Result<LoginOutcome> {
        let outcome = if self.engine.connectivity().is_online() {
            let remote = self.engine.remote();
            let timeout = self.engine.config().request_timeout();
            match with_timeout(timeout, remote.authenticate(pin)).await {
                Ok(true) => LoginOutcome::Accepted,
                Ok(false) => LoginOutcome::Refused,
                Err(e) => {
                    warn!("Authentication unavailable, checking offline PIN: {}", e);
                    self.offline_login(pin)
                }
            }
        } else {
            self.offline_login(pin)
        };

        if outcome.is_accepted() {
            self.engine
                .update(|state| {
                    state.session_active = true;
                    Ok(())
                })
                .await?;
            info!("Logged in ({:?})", outcome);
            self.on_login_succeeded().await?;
        } else {
            warn!("Login refused");
        }

        Ok(outcome)
    }

    /// Flush after a login; through the scheduler when one is attached.
    pub async fn on_login_succeeded(&self) -> Result<()> {
        match &self.scheduler {
            Some(scheduler) => scheduler.notify_flush(),
            None => {
                let report = self.engine.flush_once().await?;
                debug!("Post-login flush: {} confirmed", report.confirmed);
            }
        }
        Ok(())
    }

    /// End the session.
    pub async fn logout(&self) -> Result<()> {
        self.engine
            .update(|state| {
                state.session_active = false;
                Ok(())
            })
            .await?;
        info!("Logged out");
        Ok(())
    }

    /// Pull the authoritative state once at startup.
    pub async fn startup(&self) -> Result<bool> {
        self.engine.pull_status().await
    }

    /// Preview what a step count converts to; `None` when unavailable.
    pub async fn conversion_preview(&self, steps: u64) -> Option<ConversionPreview> {
        if !self.engine.connectivity().is_online() {
            return None;
        }
        let remote = self.engine.remote();
        let timeout = self.engine.config().request_timeout();
        match with_timeout(timeout, remote.convert(steps)).await {
            Ok(preview) => preview,
            Err(e) => {
                debug!("Conversion preview unavailable: {}", e);
                None
            }
        }
    }

    fn offline_login(&self, pin: &str) -> LoginOutcome {
        match self.offline_pin.as_deref() {
            Some(expected) if expected == pin => LoginOutcome::AcceptedOffline,
            _ => LoginOutcome::Refused,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connectivity::Connectivity;
    use crate::engine::SyncConfig;
    use crate::remote::{StepsResponse, WalletResponse, WithdrawResponse};
    use crate::testing::FakeRemote;
    use stepsync_common::LocalState;
    use stepsync_storage::{MemoryStore, Snapshot};

    async fn client_with(
        remote: Arc<FakeRemote>,
        state: LocalState,
        online: bool,
        config: SyncConfig,
    ) -> (StepClient, Connectivity) {
        let connectivity = Connectivity::new(online);
        let store = MemoryStore::with_snapshot(Snapshot::new(state, Vec::new()));
        let engine = SyncEngine::new(remote, Arc::new(store), connectivity.clone(), config)
            .await
            .unwrap();
        (StepClient::new(Arc::new(engine)), connectivity)
    }

    #[tokio::test]
    async fn test_increment_offline_is_optimistic() {
        let remote = Arc::new(FakeRemote::new());
        let (client, _) =
            client_with(remote.clone(), LocalState::default(), false, SyncConfig::default()).await;

        assert_eq!(client.on_user_increment().await.unwrap(), Outcome::Queued);
        assert_eq!(client.on_user_increment().await.unwrap(), Outcome::Queued);

        let state = client.engine().state().await;
        assert_eq!(state.counter, 2);
        assert_eq!(state.balance, 2);

        let pending = client.engine().pending().await;
        match pending[1].operation() {
            Operation::CounterIncrement(payload) => {
                assert_eq!(payload.delta, 1);
                assert_eq!(payload.counter_snapshot, 2);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_increment_respects_steps_per_coin() {
        let config = SyncConfig {
            steps_per_coin: 2,
            ..SyncConfig::default()
        };
        let (client, _) =
            client_with(Arc::new(FakeRemote::new()), LocalState::default(), false, config).await;

        for _ in 0..3 {
            client.on_user_increment().await.unwrap();
        }

        let state = client.engine().state().await;
        assert_eq!(state.counter, 3);
        assert_eq!(state.balance, 1);
    }

    #[tokio::test]
    async fn test_increment_online_takes_server_values() {
        let remote = Arc::new(FakeRemote::new());
        remote.push_steps(Ok(StepsResponse {
            steps: Some(500),
            doge: Some(5),
        }));
        let (client, _) =
            client_with(remote, LocalState::default(), true, SyncConfig::default()).await;

        let outcome = client.on_user_increment().await.unwrap();

        assert!(matches!(outcome, Outcome::Confirmed { .. }));
        assert_eq!(client.engine().state().await.counter, 500);
    }

    #[tokio::test]
    async fn test_withdraw_validation_never_reaches_network() {
        let remote = Arc::new(FakeRemote::new());
        let state = LocalState {
            balance: 10,
            ..Default::default()
        };
        let (client, _) = client_with(remote.clone(), state, true, SyncConfig::default()).await;

        assert!(matches!(
            client.on_withdraw_requested("  ", 5).await,
            Err(Error::InvalidInput(_))
        ));
        assert!(matches!(
            client.on_withdraw_requested("addr", 0).await,
            Err(Error::InvalidInput(_))
        ));
        assert!(matches!(
            client.on_withdraw_requested("addr", 11).await,
            Err(Error::InsufficientBalance {
                requested: 11,
                available: 10
            })
        ));

        assert_eq!(remote.call_count(), 0);
        assert_eq!(client.engine().state().await.balance, 10);
        assert_eq!(client.engine().outbox_len().await, 0);
    }

    #[tokio::test]
    async fn test_withdraw_debits_and_confirms() {
        let remote = Arc::new(FakeRemote::new());
        remote.push_withdraw(Ok(WithdrawResponse {
            doge: None,
            message: Some("Saque enviado".to_string()),
        }));
        let state = LocalState {
            balance: 100,
            ..Default::default()
        };
        let (client, _) = client_with(remote.clone(), state, true, SyncConfig::default()).await;

        let outcome = client.on_withdraw_requested("addr-1", 50).await.unwrap();

        assert_eq!(
            outcome,
            Outcome::Confirmed {
                message: Some("Saque enviado".to_string())
            }
        );
        assert_eq!(client.engine().state().await.balance, 50);
        match &remote.calls()[0] {
            Operation::WithdrawalRequest(payload) => {
                assert_eq!(payload.destination, "addr-1");
                assert_eq!(payload.amount, 50);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_rejected_withdraw_keeps_debit() {
        let remote = Arc::new(FakeRemote::new());
        remote.push_withdraw(Err(Error::Rejected {
            status: 400,
            message: "invalid address".to_string(),
        }));
        let state = LocalState {
            balance: 100,
            ..Default::default()
        };
        let (client, _) = client_with(remote, state, true, SyncConfig::default()).await;

        let outcome = client.on_withdraw_requested("bad", 30).await.unwrap();

        assert!(matches!(outcome, Outcome::Rejected { status: 400, .. }));
        assert_eq!(client.engine().state().await.balance, 70);
    }

    #[tokio::test]
    async fn test_wallet_requested_online_and_offline() {
        let remote = Arc::new(FakeRemote::new());
        remote.push_wallet(Ok(WalletResponse {
            address: Some("REAL123".to_string()),
        }));
        let (client, connectivity) =
            client_with(remote, LocalState::default(), true, SyncConfig::default()).await;

        let (outcome, wallet) = client.on_wallet_requested().await.unwrap();
        assert!(matches!(outcome, Outcome::Confirmed { .. }));
        assert_eq!(wallet.as_str(), "REAL123");

        connectivity.set_online(false);
        let (outcome, wallet) = client.on_wallet_requested().await.unwrap();
        assert_eq!(outcome, Outcome::Queued);
        assert!(wallet.as_str().starts_with("DOGE-"));
    }

    #[tokio::test]
    async fn test_login_flushes_queue() {
        let remote = Arc::new(FakeRemote::new());
        let (client, connectivity) =
            client_with(remote.clone(), LocalState::default(), false, SyncConfig::default()).await;
        client.on_user_increment().await.unwrap();

        connectivity.set_online(true);
        let outcome = client.login("4321").await.unwrap();

        assert_eq!(outcome, LoginOutcome::Accepted);
        assert!(client.engine().state().await.session_active);
        assert_eq!(remote.call_count(), 1);
        assert_eq!(client.engine().outbox_len().await, 0);
    }

    #[tokio::test]
    async fn test_login_refused() {
        let remote = Arc::new(FakeRemote::new());
        remote.push_auth(Ok(false));
        let (client, _) = client_with(remote, LocalState::default(), true, SyncConfig::default())
            .await;
        let client = client.with_offline_pin("1234");

        // The server's answer wins even if it matches the offline PIN.
        assert_eq!(client.login("1234").await.unwrap(), LoginOutcome::Refused);
        assert!(!client.engine().state().await.session_active);
    }

    #[tokio::test]
    async fn test_login_offline_pin_fallback() {
        let remote = Arc::new(FakeRemote::new());
        remote.push_auth(Err(Error::Network("unreachable".to_string())));
        remote.push_auth(Err(Error::Network("unreachable".to_string())));
        let (client, _) = client_with(remote, LocalState::default(), true, SyncConfig::default())
            .await;
        let client = client.with_offline_pin("1234");

        assert_eq!(client.login("9999").await.unwrap(), LoginOutcome::Refused);
        assert_eq!(
            client.login("1234").await.unwrap(),
            LoginOutcome::AcceptedOffline
        );
        assert!(client.engine().state().await.session_active);
    }

    #[tokio::test]
    async fn test_login_without_offline_pin_fails_when_unreachable() {
        let (client, _) = client_with(
            Arc::new(FakeRemote::new()),
            LocalState::default(),
            false,
            SyncConfig::default(),
        )
        .await;

        assert_eq!(client.login("1234").await.unwrap(), LoginOutcome::Refused);
    }

    #[tokio::test]
    async fn test_logout() {
        let state = LocalState {
            session_active: true,
            ..Default::default()
        };
        let (client, _) =
            client_with(Arc::new(FakeRemote::new()), state, false, SyncConfig::default()).await;

        client.logout().await.unwrap();
        assert!(!client.engine().state().await.session_active);
    }

    #[tokio::test]
    async fn test_startup_pulls_status_only_online() {
        let remote = Arc::new(FakeRemote::new());
        let (client, connectivity) =
            client_with(remote.clone(), LocalState::default(), false, SyncConfig::default()).await;

        assert!(!client.startup().await.unwrap());
        assert_eq!(remote.status_calls(), 0);

        connectivity.set_online(true);
        assert!(client.startup().await.unwrap());
        assert_eq!(remote.status_calls(), 1);
    }
}
