//! Forwarding engine: delivers captured calls to downstream targets.
//!
//! One delivery chain walks `Pending -> Attempting -> {Succeeded, Retrying,
//! Failed}`; `Retrying` loops back to `Attempting` after an exponential
//! backoff. Chains run on a fixed pool of workers consuming a bounded
//! queue, so a slow downstream suspends only its own chain. Every attempt
//! writes exactly one audit record before the chain moves on.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::sleep;

use crate::error::{EnqueueError, ReplayError};
use crate::storage::Storage;
use crate::types::{
    AttemptId, CallId, CapturedCall, ForwardingAttempt, ForwardingConfig, UserId,
};

/// Correlation header carrying the captured call's identifier.
pub const REQUEST_ID_HEADER: &str = "X-Hookrelay-Request-Id";

/// Correlation header carrying the 1-based attempt number.
pub const ATTEMPT_HEADER: &str = "X-Hookrelay-Attempt";

/// Connection-scoped headers that must never be relayed verbatim.
const HOP_BY_HOP: [&str; 4] = ["host", "content-length", "transfer-encoding", "connection"];

/// Tuning for the forwarding worker pool and retry policy.
#[derive(Debug, Clone)]
pub struct ForwarderConfig {
    pub worker_count: usize,
    pub queue_size: usize,
    /// Backoff before attempt n+1 is `backoff_base * 2^(n-1)`.
    pub backoff_base: Duration,
    /// Hard ceiling on any single backoff wait.
    pub backoff_cap: Duration,
}

impl Default for ForwarderConfig {
    fn default() -> Self {
        Self {
            worker_count: 4,
            queue_size: 1_024,
            backoff_base: Duration::from_secs(1),
            backoff_cap: Duration::from_secs(30),
        }
    }
}

/// Terminal state of a delivery chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainState {
    Succeeded,
    Failed,
}

/// Result of one full delivery chain (initial or replay).
#[derive(Debug, Clone)]
pub struct ForwardingOutcome {
    pub state: ChainState,
    /// Attempts actually dispatched; equals the number of audit records
    /// written for this chain.
    pub attempts: u32,
    pub last_status: Option<u16>,
    pub last_error: Option<String>,
}

/// Classification of a single finished attempt.
#[derive(Debug, Clone)]
enum Disposition {
    /// 2xx response received.
    Success(u16),
    /// Transport failure or 5xx; eligible for another attempt.
    Retry { status: Option<u16>, error: String },
    /// Non-retryable downstream status. Retrying an unchanged payload
    /// against a client error cannot succeed, so the chain fast-fails
    /// without consuming the remaining budget.
    Terminal { status: Option<u16>, error: String },
}

impl Disposition {
    fn status(&self) -> Option<u16> {
        match self {
            Disposition::Success(status) => Some(*status),
            Disposition::Retry { status, .. } | Disposition::Terminal { status, .. } => *status,
        }
    }
}

#[derive(Debug)]
struct DeliveryJob {
    call: CapturedCall,
    config: ForwardingConfig,
}

struct Inner {
    storage: Arc<dyn Storage>,
    client: reqwest::Client,
    config: ForwarderConfig,
}

/// Handle to the forwarding worker pool.
///
/// `enqueue` is the receiver's non-blocking scheduling path; `deliver` and
/// `replay` run a chain inline and return its outcome.
pub struct Forwarder {
    job_tx: Option<mpsc::Sender<DeliveryJob>>,
    worker_handles: Vec<JoinHandle<()>>,
    inner: Arc<Inner>,
}

impl Forwarder {
    pub fn new(storage: Arc<dyn Storage>, config: ForwarderConfig) -> Self {
        let (job_tx, job_rx) = mpsc::channel(config.queue_size.max(1));
        let shared_rx = Arc::new(Mutex::new(job_rx));

        let inner = Arc::new(Inner {
            storage,
            client: reqwest::Client::new(),
            config,
        });

        let mut worker_handles = Vec::new();
        for _ in 0..inner.config.worker_count.max(1) {
            worker_handles.push(tokio::spawn(worker_loop(shared_rx.clone(), inner.clone())));
        }

        Self {
            job_tx: Some(job_tx),
            worker_handles,
            inner,
        }
    }

    /// Schedule a delivery chain without blocking the caller.
    pub fn enqueue(&self, call: CapturedCall, config: ForwardingConfig) -> Result<(), EnqueueError> {
        let Some(tx) = &self.job_tx else {
            return Err(EnqueueError::Shutdown);
        };
        match tx.try_send(DeliveryJob { call, config }) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => Err(EnqueueError::QueueFull),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(EnqueueError::Shutdown),
        }
    }

    /// Run one delivery chain to completion.
    pub async fn deliver(&self, call: &CapturedCall, config: &ForwardingConfig) -> ForwardingOutcome {
        deliver_chain(&self.inner, call, config).await
    }

    /// Manually re-forward a previously captured call.
    ///
    /// Starts a fresh chain with attempt numbering restarting at 1. Prior
    /// attempt records are never touched.
    pub async fn replay(&self, call_id: &CallId, owner: &UserId) -> Result<ForwardingOutcome, ReplayError> {
        let call = self
            .inner
            .storage
            .call(call_id)
            .await
            .ok_or(ReplayError::CallNotFound)?;
        let endpoint = self
            .inner
            .storage
            .endpoint(&call.endpoint_id)
            .await
            .ok_or(ReplayError::CallNotFound)?;
        if endpoint.user_id != *owner {
            return Err(ReplayError::NotOwner);
        }
        let config = self
            .inner
            .storage
            .forwarding_config(&call.endpoint_id)
            .await
            .filter(|c| c.active)
            .ok_or(ReplayError::NoActiveConfig)?;

        tracing::info!(call_id = %call.id.0, "replaying captured call");
        Ok(deliver_chain(&self.inner, &call, &config).await)
    }

    /// Stop accepting work and wait for in-flight chains to finish.
    pub async fn shutdown(&mut self) {
        self.job_tx.take();
        for handle in self.worker_handles.drain(..) {
            let _ = handle.await;
        }
    }
}

/// Main worker loop: pull one job at a time from the shared queue and run
/// its delivery chain to completion.
async fn worker_loop(rx: Arc<Mutex<mpsc::Receiver<DeliveryJob>>>, inner: Arc<Inner>) {
    loop {
        let job = {
            let mut guard = rx.lock().await;
            guard.recv().await
        };

        let Some(job) = job else { break };
        deliver_chain(&inner, &job.call, &job.config).await;
    }
}

/// Drive one delivery chain through its attempts.
///
/// Within a chain attempts are strictly sequential: attempt n+1 never
/// starts before attempt n's audit record is written. Backoff suspends
/// only this chain.
async fn deliver_chain(
    inner: &Inner,
    call: &CapturedCall,
    config: &ForwardingConfig,
) -> ForwardingOutcome {
    let mut last_status = None;
    let mut last_error = None;
    let mut attempts = 0;

    for attempt in 1..=config.max_retries {
        if attempt > 1 {
            sleep(backoff_delay(
                attempt - 1,
                inner.config.backoff_base,
                inner.config.backoff_cap,
            ))
            .await;

            // The config may have been deleted, deactivated or replaced
            // while this chain was backing off. In-flight attempts were
            // allowed to finish and log; no further attempt is scheduled.
            let cancelled = match inner.storage.forwarding_config(&config.endpoint_id).await {
                Some(current) => current.id != config.id || !current.active,
                None => true,
            };
            if cancelled {
                tracing::info!(
                    call_id = %call.id.0,
                    config_id = %config.id.0,
                    "forwarding config gone, abandoning chain"
                );
                return ForwardingOutcome {
                    state: ChainState::Failed,
                    attempts,
                    last_status,
                    last_error: Some("forwarding configuration removed or deactivated".into()),
                };
            }
        }

        attempts = attempt;
        match attempt_once(inner, call, config, attempt).await {
            Disposition::Success(status) => {
                tracing::info!(
                    call_id = %call.id.0,
                    attempt,
                    status,
                    "forwarding chain succeeded"
                );
                return ForwardingOutcome {
                    state: ChainState::Succeeded,
                    attempts,
                    last_status: Some(status),
                    last_error: None,
                };
            }
            Disposition::Terminal { status, error } => {
                tracing::warn!(
                    call_id = %call.id.0,
                    attempt,
                    error = %error,
                    "forwarding chain ended on non-retryable failure"
                );
                return ForwardingOutcome {
                    state: ChainState::Failed,
                    attempts,
                    last_status: status,
                    last_error: Some(error),
                };
            }
            Disposition::Retry { status, error } => {
                last_status = status;
                last_error = Some(error);
            }
        }
    }

    tracing::warn!(
        call_id = %call.id.0,
        attempts,
        "forwarding chain exhausted its retry budget"
    );
    ForwardingOutcome {
        state: ChainState::Failed,
        attempts,
        last_status,
        last_error,
    }
}

/// Dispatch one attempt and write its audit record.
async fn attempt_once(
    inner: &Inner,
    call: &CapturedCall,
    config: &ForwardingConfig,
    attempt_number: u32,
) -> Disposition {
    let started = tokio::time::Instant::now();
    let disposition = send_attempt(inner, call, config, attempt_number).await;
    let duration_ms = started.elapsed().as_millis() as u64;

    let record = ForwardingAttempt {
        id: AttemptId::generate(),
        config_id: config.id.clone(),
        call_id: call.id.clone(),
        attempt_number,
        status_code: disposition.status(),
        success: matches!(disposition, Disposition::Success(_)),
        error: match &disposition {
            Disposition::Success(_) => None,
            Disposition::Retry { error, .. } | Disposition::Terminal { error, .. } => {
                Some(error.clone())
            }
        },
        duration_ms,
        attempted_at: Utc::now(),
    };

    // Part of the attempt's transaction boundary, not best-effort: the
    // record lands before the chain takes its next transition.
    inner.storage.append_attempt(&record).await;

    tracing::debug!(
        call_id = %call.id.0,
        attempt = attempt_number,
        status = ?record.status_code,
        success = record.success,
        duration_ms,
        "forwarding attempt finished"
    );

    disposition
}

/// Issue the outbound request for one attempt and classify the result.
async fn send_attempt(
    inner: &Inner,
    call: &CapturedCall,
    config: &ForwardingConfig,
    attempt_number: u32,
) -> Disposition {
    let method = match reqwest::Method::from_bytes(call.method.as_bytes()) {
        Ok(method) => method,
        Err(_) => {
            return Disposition::Terminal {
                status: None,
                error: format!("invalid method {:?}", call.method),
            }
        }
    };

    let response = inner
        .client
        .request(method, &config.target_url)
        .timeout(config.timeout)
        .headers(outbound_header_map(call, attempt_number))
        .body(call.body.clone())
        .send()
        .await;

    match response {
        Ok(resp) => {
            let status = resp.status();
            if status.is_success() {
                Disposition::Success(status.as_u16())
            } else if status.is_server_error() {
                Disposition::Retry {
                    status: Some(status.as_u16()),
                    error: format!("HTTP {}", status.as_u16()),
                }
            } else {
                Disposition::Terminal {
                    status: Some(status.as_u16()),
                    error: format!("HTTP {}", status.as_u16()),
                }
            }
        }
        Err(err) => {
            // Transport-level failures are always retryable.
            let error = if err.is_timeout() {
                format!("timeout after {:?}", config.timeout)
            } else if err.is_connect() {
                "connection failed".to_string()
            } else {
                truncate(err.to_string(), 500)
            };
            Disposition::Retry { status: None, error }
        }
    }
}

/// Headers for the outbound request: the captured set minus hop-by-hop
/// names, plus the two correlation headers.
fn outbound_headers(call: &CapturedCall, attempt_number: u32) -> Vec<(String, String)> {
    let mut headers: Vec<(String, String)> = call
        .headers
        .iter()
        .filter(|(name, _)| !HOP_BY_HOP.iter().any(|hop| name.eq_ignore_ascii_case(hop)))
        .map(|(name, value)| (name.to_string(), value.to_string()))
        .collect();
    headers.push((REQUEST_ID_HEADER.to_string(), call.id.0.clone()));
    headers.push((ATTEMPT_HEADER.to_string(), attempt_number.to_string()));
    headers
}

fn outbound_header_map(call: &CapturedCall, attempt_number: u32) -> HeaderMap {
    let mut map = HeaderMap::new();
    for (name, value) in outbound_headers(call, attempt_number) {
        // Names and values were captured from a real request; anything that
        // still fails to parse is dropped rather than failing the attempt.
        let Ok(name) = HeaderName::from_bytes(name.as_bytes()) else {
            continue;
        };
        let Ok(value) = HeaderValue::from_str(&value) else {
            continue;
        };
        map.append(name, value);
    }
    map
}

/// Backoff after `completed` finished attempts: `base * 2^(completed-1)`,
/// capped.
fn backoff_delay(completed: u32, base: Duration, cap: Duration) -> Duration {
    let base_ms = (base.as_millis() as u64).max(1);
    let cap_ms = (cap.as_millis() as u64).max(base_ms);
    let pow = 2u64.saturating_pow(completed.saturating_sub(1));
    Duration::from_millis(base_ms.saturating_mul(pow).min(cap_ms))
}

fn truncate(mut message: String, max: usize) -> String {
    if message.len() > max {
        message = message.chars().take(max).collect();
    }
    message
}
