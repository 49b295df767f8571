use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use chrono::{NaiveDate, Utc};
use futures::{Stream, StreamExt};
use tokio::sync::RwLock;

use crate::error::RejectReason;
use crate::types::{Endpoint, Plan, UserId};

/// Default maximum body size accepted from untrusted senders: 1 MiB.
pub const DEFAULT_MAX_BODY_SIZE: usize = 1_048_576;

/// Hard limits applied to every inbound call before persistence.
#[derive(Debug, Clone)]
pub struct QuotaLimits {
    pub max_body_size: usize,
}

impl Default for QuotaLimits {
    fn default() -> Self {
        Self {
            max_body_size: DEFAULT_MAX_BODY_SIZE,
        }
    }
}

/// Admission control in front of the capture store.
///
/// Bounds body size before and during the body read, and applies the
/// owner's daily plan quota. Only admitted calls consume quota; a call
/// rejected during the body read leaves the counter untouched. The quota
/// check is advisory: the counter read and the increment are separate
/// operations, so concurrent callers may overshoot the limit by a small
/// margin. The increments themselves are atomic; there is no
/// read-modify-write race on the counter value.
pub struct QuotaGate {
    limits: QuotaLimits,
    daily: RwLock<HashMap<(UserId, NaiveDate), AtomicU64>>,
}

impl QuotaGate {
    pub fn new(limits: QuotaLimits) -> Self {
        Self {
            limits,
            daily: RwLock::new(HashMap::new()),
        }
    }

    pub fn max_body_size(&self) -> usize {
        self.limits.max_body_size
    }

    /// Evaluate one inbound call and, if admitted, read its body.
    ///
    /// A declared length over the limit is rejected before a single body
    /// byte is read. Without a declared length the stream is read under a
    /// hard cap instead.
    pub async fn admit<S, E>(
        &self,
        endpoint: Option<&Endpoint>,
        declared_len: Option<u64>,
        body: S,
    ) -> Result<Vec<u8>, RejectReason>
    where
        S: Stream<Item = Result<Bytes, E>> + Unpin,
        E: fmt::Display,
    {
        let endpoint = endpoint.ok_or(RejectReason::NotFound)?;
        if !endpoint.active {
            return Err(RejectReason::Inactive);
        }

        if let Some(len) = declared_len {
            if len > self.limits.max_body_size as u64 {
                return Err(RejectReason::BodyTooLarge);
            }
        }

        if self.quota_exhausted(&endpoint.user_id, endpoint.plan).await {
            return Err(RejectReason::QuotaExhausted);
        }

        let body = read_capped(body, self.limits.max_body_size).await?;
        // Counted only now: a call rejected during the body read never
        // burns quota.
        self.record_daily(&endpoint.user_id).await;
        Ok(body)
    }

    /// Whether the owner's plan limit for the current UTC day is reached.
    pub async fn quota_exhausted(&self, user: &UserId, plan: Plan) -> bool {
        self.requests_today(user).await >= plan.max_requests_per_day()
    }

    /// Count one admitted call against the owner's daily quota.
    ///
    /// Check-then-count is deliberately approximate under concurrency;
    /// the increment itself is atomic.
    pub async fn record_daily(&self, user: &UserId) {
        let key = (user.clone(), Utc::now().date_naive());
        {
            let guard = self.daily.read().await;
            if let Some(counter) = guard.get(&key) {
                counter.fetch_add(1, Ordering::Relaxed);
                return;
            }
        }

        let mut guard = self.daily.write().await;
        guard
            .entry(key)
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::Relaxed);
    }

    /// Calls counted against the user's quota today.
    pub async fn requests_today(&self, user: &UserId) -> u64 {
        let key = (user.clone(), Utc::now().date_naive());
        let guard = self.daily.read().await;
        guard
            .get(&key)
            .map(|counter| counter.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Drop counters for days before `day`. Called by housekeeping.
    pub async fn prune_days_before(&self, day: NaiveDate) {
        let mut guard = self.daily.write().await;
        guard.retain(|(_, counted_day), _| *counted_day >= day);
    }
}

impl Default for QuotaGate {
    fn default() -> Self {
        Self::new(QuotaLimits::default())
    }
}

/// Accumulate a body stream into memory, failing once `max` bytes are
/// exceeded. The over-limit chunk is dropped, not buffered.
pub async fn read_capped<S, E>(mut body: S, max: usize) -> Result<Vec<u8>, RejectReason>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
    E: fmt::Display,
{
    let mut buf = Vec::new();
    while let Some(chunk) = body.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(err) => {
                tracing::debug!(error = %err, "inbound body stream failed");
                return Err(RejectReason::UnreadableBody);
            }
        };
        if buf.len() + chunk.len() > max {
            return Err(RejectReason::BodyTooLarge);
        }
        buf.extend_from_slice(&chunk);
    }
    Ok(buf)
}
