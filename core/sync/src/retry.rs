//! Failure classification for remote calls.
//!
//! Retrying happens by leaving an item in the outbox for the next flush, so
//! there is no in-place backoff loop here: a call either confirms, goes back
//! to the queue, or is dropped as permanently invalid.

use std::future::Future;
use std::time::Duration;
use tokio::time::timeout;

use stepsync_common::{Error, Result};

/// What to do with an operation whose remote call failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Keep it queued and try again on a later flush.
    Requeue,
    /// The server refused it for good; drop it and report to the caller.
    Drop,
}

/// Classify a remote-call error.
///
/// Only explicit rejections are terminal. Transport failures, timeouts,
/// transient statuses and anything unexpected stay in the queue.
pub fn classify(err: &Error) -> Disposition {
    match err {
        Error::Rejected { .. } => Disposition::Drop,
        _ => Disposition::Requeue,
    }
}

/// Run a remote call with a deadline; expiry becomes `Error::Timeout`.
pub async fn with_timeout<F, T>(limit: Duration, call: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(Error::Timeout(limit)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejections_are_dropped() {
        let err = Error::Rejected {
            status: 400,
            message: "malformed withdrawal".to_string(),
        };
        assert_eq!(classify(&err), Disposition::Drop);
    }

    #[test]
    fn test_transient_failures_requeue() {
        let transient = [
            Error::Network("connection reset".to_string()),
            Error::Timeout(Duration::from_secs(5)),
            Error::Server {
                status: 503,
                body: String::new(),
            },
            Error::Serialization("truncated".to_string()),
        ];
        for err in &transient {
            assert_eq!(classify(err), Disposition::Requeue, "{}", err);
        }
    }

    #[tokio::test]
    async fn test_with_timeout_passes_through() {
        let result = with_timeout(Duration::from_secs(1), async { Ok(42) }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_with_timeout_expires() {
        let result: Result<()> = with_timeout(Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(Error::Timeout(_))));
    }
}
