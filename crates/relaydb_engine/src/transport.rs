//! Remote endpoint contract and the retrying transport wrapper.

use crate::config::BackoffConfig;
use crate::online::OnlineDetector;
use bytes::Bytes;
use relaydb_protocol::{CommittedBatch, MutationBatch, PullResume, SendOutcome};
use std::future::Future;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::warn;

/// A failed remote request.
///
/// Every transport failure is treated as transient: the resilient
/// transport retries until the request succeeds. Permanent outcomes
/// (batch rejections) travel inside successful responses, never as
/// transport errors.
#[derive(Error, Debug)]
#[error("transport error: {0}")]
pub struct TransportError(pub String);

/// Result type for raw remote requests.
pub type TransportResult<T> = Result<T, TransportError>;

/// The remote sync endpoint as seen by the engine.
///
/// Implementations carry the actual wire protocol (HTTP, gRPC, an
/// in-process server in tests). Methods are plain request/response;
/// retries, backoff, and offline gating live in [`ResilientTransport`].
pub trait RemoteEndpoint: Send + Sync + 'static {
    /// Submits mutation batches for conflict-resolved application.
    fn send(
        &self,
        batches: Vec<MutationBatch>,
    ) -> impl Future<Output = TransportResult<SendOutcome>> + Send;

    /// Fetches batches committed remotely after `since_ms`, oldest first.
    fn get(
        &self,
        since_ms: i64,
    ) -> impl Future<Output = TransportResult<Vec<CommittedBatch>>> + Send;

    /// Opens a bulk-pull stream for the given resume state.
    ///
    /// The returned channel yields raw byte chunks; chunk boundaries
    /// carry no meaning. A closed channel ends the stream, which is only
    /// complete once the decoder has seen the end marker.
    fn pull(
        &self,
        resume: PullResume,
    ) -> impl Future<Output = TransportResult<mpsc::Receiver<Bytes>>> + Send;
}

/// Wraps a [`RemoteEndpoint`] with offline gating and retry backoff.
///
/// Requests wait for the online signal, then retry on failure with
/// exponentially growing delays, forever. Callers only ever observe
/// success; an unreachable remote shows up as latency, not errors.
pub struct ResilientTransport<R: RemoteEndpoint> {
    endpoint: R,
    detector: OnlineDetector,
    backoff: BackoffConfig,
}

impl<R: RemoteEndpoint> ResilientTransport<R> {
    /// Creates a transport over `endpoint`, gated by `detector`.
    pub fn new(endpoint: R, detector: OnlineDetector, backoff: BackoffConfig) -> Self {
        Self {
            endpoint,
            detector,
            backoff,
        }
    }

    /// Sends batches, retrying until the remote answers.
    pub async fn send(&self, batches: Vec<MutationBatch>) -> SendOutcome {
        self.request("send", || self.endpoint.send(batches.clone()))
            .await
    }

    /// Fetches the catch-up feed, retrying until the remote answers.
    pub async fn get(&self, since_ms: i64) -> Vec<CommittedBatch> {
        self.request("get", || self.endpoint.get(since_ms)).await
    }

    /// Opens a pull stream, retrying until the remote answers.
    ///
    /// Only the opening request is retried here; a stream that dies
    /// mid-flight surfaces to the pull consumer, which re-opens with an
    /// updated resume state.
    pub async fn pull(&self, resume: &PullResume) -> mpsc::Receiver<Bytes> {
        self.request("pull", || self.endpoint.pull(resume.clone()))
            .await
    }

    async fn request<T, F, Fut>(&self, op: &'static str, mut attempt_fn: F) -> T
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = TransportResult<T>>,
    {
        let mut attempt = 0u32;
        loop {
            self.detector.wait_until_online().await;
            match attempt_fn().await {
                Ok(value) => return value,
                Err(err) => {
                    let delay = self.backoff.delay(attempt);
                    warn!(op, attempt, ?delay, error = %err, "request failed, retrying");
                    tokio::time::sleep(delay).await;
                    attempt = attempt.saturating_add(1);
                }
            }
        }
    }
}
