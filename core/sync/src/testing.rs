//! Scripted remote service for unit tests.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use stepsync_common::{Operation, Result, StepsPayload, WalletPayload, WithdrawPayload};

use crate::remote::{
    ConversionPreview, RemoteService, StatusResponse, StepsResponse, WalletResponse,
    WithdrawResponse,
};

/// Remote whose answers are queued up front.
///
/// Each endpoint pops its next scripted result; an empty script answers with
/// an empty success. Every mutation call is recorded in order.
#[derive(Default)]
pub(crate) struct FakeRemote {
    steps: Mutex<VecDeque<Result<StepsResponse>>>,
    withdraw: Mutex<VecDeque<Result<WithdrawResponse>>>,
    wallet: Mutex<VecDeque<Result<WalletResponse>>>,
    auth: Mutex<VecDeque<Result<bool>>>,
    status: Mutex<VecDeque<Result<StatusResponse>>>,
    calls: Mutex<Vec<Operation>>,
    status_calls: Mutex<usize>,
    delay: Option<Duration>,
}

impl FakeRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call sleep first, so tests can overlap work with it.
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn push_steps(&self, result: Result<StepsResponse>) {
        self.steps.lock().unwrap().push_back(result);
    }

    pub fn push_withdraw(&self, result: Result<WithdrawResponse>) {
        self.withdraw.lock().unwrap().push_back(result);
    }

    pub fn push_wallet(&self, result: Result<WalletResponse>) {
        self.wallet.lock().unwrap().push_back(result);
    }

    pub fn push_auth(&self, result: Result<bool>) {
        self.auth.lock().unwrap().push_back(result);
    }

    pub fn push_status(&self, result: Result<StatusResponse>) {
        self.status.lock().unwrap().push_back(result);
    }

    /// Mutation calls received so far, in order.
    pub fn calls(&self) -> Vec<Operation> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn status_calls(&self) -> usize {
        *self.status_calls.lock().unwrap()
    }

    async fn pause(&self) {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
    }

    fn next<T: Default>(script: &Mutex<VecDeque<Result<T>>>) -> Result<T> {
        script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(T::default()))
    }
}

#[async_trait]
impl RemoteService for FakeRemote {
    fn name(&self) -> &str {
        "fake"
    }

    async fn post_steps(&self, payload: &StepsPayload, _ts: i64) -> Result<StepsResponse> {
        self.calls
            .lock()
            .unwrap()
            .push(Operation::CounterIncrement(payload.clone()));
        self.pause().await;
        Self::next(&self.steps)
    }

    async fn post_withdraw(&self, payload: &WithdrawPayload, _ts: i64) -> Result<WithdrawResponse> {
        self.calls
            .lock()
            .unwrap()
            .push(Operation::WithdrawalRequest(payload.clone()));
        self.pause().await;
        Self::next(&self.withdraw)
    }

    async fn post_wallet(&self, payload: &WalletPayload, _ts: i64) -> Result<WalletResponse> {
        self.calls
            .lock()
            .unwrap()
            .push(Operation::WalletAssignment(payload.clone()));
        self.pause().await;
        Self::next(&self.wallet)
    }

    async fn authenticate(&self, _pin: &str) -> Result<bool> {
        self.pause().await;
        self.auth.lock().unwrap().pop_front().unwrap_or(Ok(true))
    }

    async fn status(&self) -> Result<StatusResponse> {
        *self.status_calls.lock().unwrap() += 1;
        self.pause().await;
        Self::next(&self.status)
    }

    async fn convert(&self, _steps: u64) -> Result<Option<ConversionPreview>> {
        Ok(None)
    }
}
