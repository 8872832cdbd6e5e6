//! Remote service contract and its HTTP client.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::de::{self, DeserializeOwned};
use serde::{Deserialize, Deserializer, Serialize};
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use stepsync_common::{
    Error, Operation, OutboxItem, Result, StepsPayload, WalletPayload, WithdrawPayload,
};

/// User agent sent with every request.
const USER_AGENT: &str = concat!("StepSync/", env!("CARGO_PKG_VERSION"));

/// Accepts a JSON number or a numeric string, the way the server has been
/// seen to encode amounts. Fractions are truncated.
fn lenient_u64<'de, D>(deserializer: D) -> std::result::Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<serde_json::Value>::deserialize(deserializer)? {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::Number(n)) => n
            .as_u64()
            .or_else(|| {
                n.as_f64()
                    .filter(|f| f.is_finite() && *f >= 0.0)
                    .map(|f| f.trunc() as u64)
            })
            .map(Some)
            .ok_or_else(|| de::Error::custom(format!("invalid amount: {}", n))),
        Some(serde_json::Value::String(s)) => s
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| de::Error::custom(format!("invalid amount: {:?}", s))),
        Some(other) => Err(de::Error::custom(format!("invalid amount: {}", other))),
    }
}

/// Response to `POST /api/steps`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct StepsResponse {
    #[serde(default, deserialize_with = "lenient_u64")]
    pub steps: Option<u64>,
    #[serde(default, deserialize_with = "lenient_u64")]
    pub doge: Option<u64>,
}

/// Response to `POST /api/withdraw`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct WithdrawResponse {
    #[serde(default, deserialize_with = "lenient_u64")]
    pub doge: Option<u64>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Response to `POST /api/wallet`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct WalletResponse {
    #[serde(default)]
    pub address: Option<String>,
}

/// Response to `GET /api/status`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct StatusResponse {
    #[serde(default, deserialize_with = "lenient_u64")]
    pub steps: Option<u64>,
    #[serde(default, deserialize_with = "lenient_u64")]
    pub doge: Option<u64>,
    #[serde(default)]
    pub wallet: Option<String>,
}

/// Response to `GET /api/convert`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversionPreview {
    #[serde(default)]
    pub doge_equivalent: Option<f64>,
    #[serde(default)]
    pub trx_equivalent: Option<f64>,
    #[serde(default)]
    pub rate: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct AuthResponse {
    #[serde(default)]
    success: bool,
}

/// A parsed success response, tagged by the endpoint that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteResponse {
    Steps(StepsResponse),
    Withdraw(WithdrawResponse),
    Wallet(WalletResponse),
    Status(StatusResponse),
}

impl RemoteResponse {
    /// Human-readable message from the server, if it sent one.
    pub fn message(&self) -> Option<&str> {
        match self {
            RemoteResponse::Withdraw(r) => r.message.as_deref(),
            _ => None,
        }
    }
}

#[derive(Serialize)]
struct StepsRequest<'a> {
    steps: u64,
    doge: u64,
    wallet: Option<&'a str>,
    delta: u64,
    ts: i64,
}

#[derive(Serialize)]
struct WithdrawRequest<'a> {
    address: &'a str,
    amount: u64,
    wallet: Option<&'a str>,
    ts: i64,
}

#[derive(Serialize)]
struct WalletRequest<'a> {
    ts: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    hint: Option<&'a str>,
}

#[derive(Serialize)]
struct AuthRequest<'a> {
    pin: &'a str,
}

/// The remote authority.
///
/// Every mutation endpoint must tolerate duplicate delivery: a call whose
/// acknowledgement was lost is replayed from the outbox later.
#[async_trait]
pub trait RemoteService: Send + Sync {
    /// Get the service name (e.g., "http").
    fn name(&self) -> &str;

    /// Report a step increment.
    async fn post_steps(&self, payload: &StepsPayload, ts: i64) -> Result<StepsResponse>;

    /// Request a withdrawal.
    async fn post_withdraw(&self, payload: &WithdrawPayload, ts: i64) -> Result<WithdrawResponse>;

    /// Request a wallet assignment.
    async fn post_wallet(&self, payload: &WalletPayload, ts: i64) -> Result<WalletResponse>;

    /// Validate a PIN.
    ///
    /// # Returns
    /// - `Ok(false)` if the server answered but refused the PIN
    ///
    /// # Errors
    /// - Transport failures, so callers can tell "refused" from "unreachable"
    async fn authenticate(&self, pin: &str) -> Result<bool>;

    /// Fetch the authoritative state.
    async fn status(&self) -> Result<StatusResponse>;

    /// Preview how many coins a step count converts to.
    ///
    /// Best-effort: failures yield `Ok(None)`.
    async fn convert(&self, steps: u64) -> Result<Option<ConversionPreview>>;
}

/// Send an outbox item to the endpoint matching its operation.
pub async fn dispatch(remote: &dyn RemoteService, item: &OutboxItem) -> Result<RemoteResponse> {
    let ts = item.ts_millis();
    match item.operation() {
        Operation::CounterIncrement(payload) => remote
            .post_steps(payload, ts)
            .await
            .map(RemoteResponse::Steps),
        Operation::WithdrawalRequest(payload) => remote
            .post_withdraw(payload, ts)
            .await
            .map(RemoteResponse::Withdraw),
        Operation::WalletAssignment(payload) => remote
            .post_wallet(payload, ts)
            .await
            .map(RemoteResponse::Wallet),
    }
}

/// JSON-over-HTTP client for the remote service.
pub struct HttpRemote {
    http: Client,
    base_url: String,
    timeout: Duration,
}

impl HttpRemote {
    /// Create a new client.
    ///
    /// # Errors
    /// - `base_url` is not an absolute http(s) URL
    /// - The HTTP client cannot be built
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let parsed = Url::parse(base_url)
            .map_err(|e| Error::InvalidInput(format!("Invalid API URL {}: {}", base_url, e)))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(Error::InvalidInput(format!(
                "API URL must be http or https: {}",
                base_url
            )));
        }

        let http = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Network(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn transport_error(&self, action: &str, err: reqwest::Error) -> Error {
        if err.is_timeout() {
            Error::Timeout(self.timeout)
        } else {
            Error::Network(format!("Failed to {}: {}", action, err))
        }
    }

    async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized + Sync,
        T: DeserializeOwned,
    {
        debug!("POST {}", path);
        let response = self
            .http
            .post(self.endpoint(path))
            .json(body)
            .send()
            .await
            .map_err(|e| self.transport_error(&format!("POST {}", path), e))?;

        self.handle_response(response).await
    }

    /// Handle API response with error checking.
    async fn handle_response<T: DeserializeOwned>(&self, response: reqwest::Response) -> Result<T> {
        let status = response.status();

        if status.is_success() {
            let body = response
                .text()
                .await
                .map_err(|e| self.transport_error("read response", e))?;
            // An empty acknowledgement carries no authoritative fields.
            let body = if body.trim().is_empty() { "{}" } else { body.as_str() };
            serde_json::from_str(body)
                .map_err(|e| Error::Network(format!("Failed to parse response: {}", e)))
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(status_error(status, body))
        }
    }
}

/// Map a non-success status to the error taxonomy.
///
/// 408 and 429 are transient even though they are 4xx.
fn status_error(status: StatusCode, body: String) -> Error {
    let code = status.as_u16();
    if status.is_client_error()
        && status != StatusCode::REQUEST_TIMEOUT
        && status != StatusCode::TOO_MANY_REQUESTS
    {
        let message = if body.trim().is_empty() {
            status.canonical_reason().unwrap_or("rejected").to_string()
        } else {
            body
        };
        Error::Rejected {
            status: code,
            message,
        }
    } else {
        Error::Server { status: code, body }
    }
}

#[async_trait]
impl RemoteService for HttpRemote {
    fn name(&self) -> &str {
        "http"
    }

    async fn post_steps(&self, payload: &StepsPayload, ts: i64) -> Result<StepsResponse> {
        let body = StepsRequest {
            steps: payload.counter_snapshot,
            doge: payload.balance_snapshot,
            wallet: payload.wallet_snapshot.as_ref().map(|w| w.as_str()),
            delta: payload.delta,
            ts,
        };
        self.post_json("/api/steps", &body).await
    }

    async fn post_withdraw(&self, payload: &WithdrawPayload, ts: i64) -> Result<WithdrawResponse> {
        let body = WithdrawRequest {
            address: &payload.destination,
            amount: payload.amount,
            wallet: payload.wallet_snapshot.as_ref().map(|w| w.as_str()),
            ts,
        };
        self.post_json("/api/withdraw", &body).await
    }

    async fn post_wallet(&self, payload: &WalletPayload, ts: i64) -> Result<WalletResponse> {
        let body = WalletRequest {
            ts,
            hint: payload.hint.as_deref(),
        };
        self.post_json("/api/wallet", &body).await
    }

    async fn authenticate(&self, pin: &str) -> Result<bool> {
        let response = self
            .http
            .post(self.endpoint("/api/auth"))
            .json(&AuthRequest { pin })
            .send()
            .await
            .map_err(|e| self.transport_error("POST /api/auth", e))?;

        if !response.status().is_success() {
            warn!("PIN refused by server: {}", response.status());
            return Ok(false);
        }

        let auth: AuthResponse = self.handle_response(response).await?;
        Ok(auth.success)
    }

    async fn status(&self) -> Result<StatusResponse> {
        let response = self
            .http
            .get(self.endpoint("/api/status"))
            .send()
            .await
            .map_err(|e| self.transport_error("GET /api/status", e))?;

        self.handle_response(response).await
    }

    async fn convert(&self, steps: u64) -> Result<Option<ConversionPreview>> {
        let response = match self
            .http
            .get(self.endpoint("/api/convert"))
            .query(&[("steps", steps)])
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!("Conversion preview unavailable: {}", e);
                return Ok(None);
            }
        };

        match self.handle_response(response).await {
            Ok(preview) => Ok(Some(preview)),
            Err(e) => {
                warn!("Conversion preview unavailable: {}", e);
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;
    use stepsync_common::WalletId;

    fn remote_for(server: &mockito::ServerGuard) -> HttpRemote {
        HttpRemote::new(&server.url(), Duration::from_secs(2)).unwrap()
    }

    fn steps_payload() -> StepsPayload {
        StepsPayload {
            delta: 1,
            counter_snapshot: 11,
            balance_snapshot: 11,
            wallet_snapshot: Some(WalletId::new("DOGE-X").unwrap()),
        }
    }

    #[test]
    fn test_invalid_base_url() {
        assert!(HttpRemote::new("not a url", Duration::from_secs(1)).is_err());
        assert!(HttpRemote::new("ftp://example.com", Duration::from_secs(1)).is_err());
    }

    #[test]
    fn test_lenient_numbers() {
        let parsed: StepsResponse = serde_json::from_str(r#"{"steps":"42","doge":7.9}"#).unwrap();
        assert_eq!(parsed.steps, Some(42));
        assert_eq!(parsed.doge, Some(7));

        let empty: StepsResponse = serde_json::from_str(r#"{"steps":null}"#).unwrap();
        assert_eq!(empty, StepsResponse::default());

        assert!(serde_json::from_str::<StepsResponse>(r#"{"doge":-3}"#).is_err());
        assert!(serde_json::from_str::<StepsResponse>(r#"{"doge":"lots"}"#).is_err());
    }

    #[test]
    fn test_status_classification() {
        assert!(matches!(
            status_error(StatusCode::BAD_REQUEST, "bad amount".into()),
            Error::Rejected { status: 400, ref message } if message == "bad amount"
        ));
        assert!(matches!(
            status_error(StatusCode::TOO_MANY_REQUESTS, String::new()),
            Error::Server { status: 429, .. }
        ));
        assert!(matches!(
            status_error(StatusCode::REQUEST_TIMEOUT, String::new()),
            Error::Server { status: 408, .. }
        ));
        assert!(matches!(
            status_error(StatusCode::BAD_GATEWAY, String::new()),
            Error::Server { status: 502, .. }
        ));
        assert!(matches!(
            status_error(StatusCode::NOT_FOUND, String::new()),
            Error::Rejected { status: 404, ref message } if message == "Not Found"
        ));
    }

    #[tokio::test]
    async fn test_post_steps_sends_snapshot() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/steps")
            .match_body(Matcher::Json(serde_json::json!({
                "steps": 11,
                "doge": 11,
                "wallet": "DOGE-X",
                "delta": 1,
                "ts": 1_700_000_000_000i64
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"steps":42,"doge":7}"#)
            .create_async()
            .await;

        let response = remote_for(&server)
            .post_steps(&steps_payload(), 1_700_000_000_000)
            .await
            .unwrap();

        assert_eq!(response.steps, Some(42));
        assert_eq!(response.doge, Some(7));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_empty_success_body() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/api/wallet")
            .with_status(204)
            .create_async()
            .await;

        let response = remote_for(&server)
            .post_wallet(&WalletPayload::default(), 1)
            .await
            .unwrap();
        assert_eq!(response.address, None);
    }

    #[tokio::test]
    async fn test_unparsable_success_is_network_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/api/withdraw")
            .with_status(200)
            .with_body("<html>oops</html>")
            .create_async()
            .await;

        let payload = WithdrawPayload {
            destination: "addr".to_string(),
            amount: 5,
            wallet_snapshot: None,
        };
        let err = remote_for(&server)
            .post_withdraw(&payload, 1)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Network(_)));
    }

    #[tokio::test]
    async fn test_withdraw_rejection() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/api/withdraw")
            .match_body(Matcher::PartialJson(serde_json::json!({
                "address": "addr",
                "amount": 5
            })))
            .with_status(422)
            .with_body("invalid address")
            .create_async()
            .await;

        let payload = WithdrawPayload {
            destination: "addr".to_string(),
            amount: 5,
            wallet_snapshot: None,
        };
        let err = remote_for(&server)
            .post_withdraw(&payload, 1)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Rejected { status: 422, ref message } if message == "invalid address"
        ));
    }

    #[tokio::test]
    async fn test_authenticate() {
        let mut server = mockito::Server::new_async().await;
        let _ok = server
            .mock("POST", "/api/auth")
            .match_body(Matcher::Json(serde_json::json!({ "pin": "1234" })))
            .with_status(200)
            .with_body(r#"{"success":true}"#)
            .create_async()
            .await;
        let _refused = server
            .mock("POST", "/api/auth")
            .match_body(Matcher::Json(serde_json::json!({ "pin": "0000" })))
            .with_status(401)
            .create_async()
            .await;

        let remote = remote_for(&server);
        assert!(remote.authenticate("1234").await.unwrap());
        assert!(!remote.authenticate("0000").await.unwrap());
    }

    #[tokio::test]
    async fn test_unreachable_server_is_network_error() {
        // Nothing listens on port 9 (discard) on a test host.
        let remote = HttpRemote::new("http://127.0.0.1:9", Duration::from_secs(2)).unwrap();
        let err = remote.status().await.unwrap_err();
        assert!(matches!(err, Error::Network(_) | Error::Timeout(_)));
    }

    #[tokio::test]
    async fn test_convert_is_best_effort() {
        let mut server = mockito::Server::new_async().await;
        let _ok = server
            .mock("GET", "/api/convert")
            .match_query(Matcher::UrlEncoded("steps".into(), "100".into()))
            .with_status(200)
            .with_body(r#"{"dogeEquivalent":1.5,"trxEquivalent":3.0,"rate":{"doge":0.015}}"#)
            .create_async()
            .await;
        let _down = server
            .mock("GET", "/api/convert")
            .match_query(Matcher::UrlEncoded("steps".into(), "5".into()))
            .with_status(503)
            .create_async()
            .await;

        let remote = remote_for(&server);
        let preview = remote.convert(100).await.unwrap().unwrap();
        assert_eq!(preview.doge_equivalent, Some(1.5));
        assert!(remote.convert(5).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_dispatch_routes_by_operation() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/wallet")
            .with_status(200)
            .with_body(r#"{"address":"REAL123"}"#)
            .create_async()
            .await;

        let remote = remote_for(&server);
        let item = OutboxItem::new(Operation::WalletAssignment(WalletPayload::default()));
        let response = dispatch(&remote, &item).await.unwrap();
        assert_eq!(
            response,
            RemoteResponse::Wallet(WalletResponse {
                address: Some("REAL123".to_string())
            })
        );
        mock.assert_async().await;
    }
}
