use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::types::{
    AttemptStats, CallId, CallQuery, CapturedCall, ConfigId, Endpoint, EndpointId, ForwardingAttempt,
    ForwardingConfig,
};

/// Persistence boundary for the capture-and-forward pipeline.
///
/// Captured calls and forwarding attempts are append-only: nothing in this
/// crate mutates a previously written record. Endpoints and forwarding
/// configurations are owned by the CRUD layer; this trait exposes the reads
/// the pipeline needs plus the writes it is allowed to make (the request
/// counter and the retention purge).
#[async_trait]
pub trait Storage: Send + Sync {
    async fn endpoint(&self, id: &EndpointId) -> Option<Endpoint>;
    async fn upsert_endpoint(&self, endpoint: Endpoint);
    /// Atomically bump the endpoint's running request counter.
    async fn increment_request_count(&self, id: &EndpointId) -> u64;
    async fn request_count(&self, id: &EndpointId) -> u64;

    async fn insert_call(&self, call: &CapturedCall);
    async fn call(&self, id: &CallId) -> Option<CapturedCall>;
    /// Newest-first page of an endpoint's calls plus the total match count.
    async fn list_calls(&self, endpoint_id: &EndpointId, query: &CallQuery)
        -> (Vec<CapturedCall>, u64);
    /// Retention hook: delete calls captured strictly before `cutoff`.
    async fn purge_calls_older_than(&self, cutoff: DateTime<Utc>) -> u64;

    async fn forwarding_config(&self, endpoint_id: &EndpointId) -> Option<ForwardingConfig>;
    /// At most one configuration per endpoint; a second write replaces it.
    async fn upsert_forwarding_config(&self, config: ForwardingConfig);
    async fn delete_forwarding_config(&self, endpoint_id: &EndpointId) -> bool;

    async fn append_attempt(&self, attempt: &ForwardingAttempt);
    /// Newest-first page of a configuration's attempt log plus total count.
    async fn list_attempts(
        &self,
        config_id: &ConfigId,
        limit: usize,
        offset: usize,
    ) -> (Vec<ForwardingAttempt>, u64);
    async fn attempt_stats(&self, config_id: &ConfigId) -> AttemptStats;
}

/// In-memory storage for tests and lightweight deployments.
#[derive(Default)]
pub struct InMemoryStorage {
    endpoints: RwLock<HashMap<EndpointId, Endpoint>>,
    counters: RwLock<HashMap<EndpointId, AtomicU64>>,
    calls: RwLock<Vec<CapturedCall>>,
    configs: RwLock<HashMap<EndpointId, ForwardingConfig>>,
    attempts: RwLock<Vec<ForwardingAttempt>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

fn matches_query(call: &CapturedCall, query: &CallQuery) -> bool {
    if let Some(ref method) = query.method {
        if !call.method.eq_ignore_ascii_case(method) {
            return false;
        }
    }
    if let Some(ref needle) = query.search {
        let needle = needle.to_ascii_lowercase();
        let in_body = String::from_utf8_lossy(&call.body)
            .to_ascii_lowercase()
            .contains(&needle);
        let in_headers = call.headers.iter().any(|(name, value)| {
            name.to_ascii_lowercase().contains(&needle)
                || value.to_ascii_lowercase().contains(&needle)
        });
        let in_query = call.query.iter().any(|(key, value)| {
            key.to_ascii_lowercase().contains(&needle)
                || value.to_ascii_lowercase().contains(&needle)
        });
        if !(in_body || in_headers || in_query) {
            return false;
        }
    }
    true
}

#[async_trait]
impl Storage for InMemoryStorage {
    async fn endpoint(&self, id: &EndpointId) -> Option<Endpoint> {
        self.endpoints.read().await.get(id).cloned()
    }

    async fn upsert_endpoint(&self, endpoint: Endpoint) {
        self.endpoints
            .write()
            .await
            .insert(endpoint.id.clone(), endpoint);
    }

    async fn increment_request_count(&self, id: &EndpointId) -> u64 {
        {
            let guard = self.counters.read().await;
            if let Some(counter) = guard.get(id) {
                return counter.fetch_add(1, Ordering::Relaxed) + 1;
            }
        }
        let mut guard = self.counters.write().await;
        guard
            .entry(id.clone())
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::Relaxed)
            + 1
    }

    async fn request_count(&self, id: &EndpointId) -> u64 {
        self.counters
            .read()
            .await
            .get(id)
            .map(|counter| counter.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    async fn insert_call(&self, call: &CapturedCall) {
        self.calls.write().await.push(call.clone());
    }

    async fn call(&self, id: &CallId) -> Option<CapturedCall> {
        self.calls.read().await.iter().find(|c| &c.id == id).cloned()
    }

    async fn list_calls(
        &self,
        endpoint_id: &EndpointId,
        query: &CallQuery,
    ) -> (Vec<CapturedCall>, u64) {
        let guard = self.calls.read().await;
        let matched: Vec<&CapturedCall> = guard
            .iter()
            .rev()
            .filter(|c| &c.endpoint_id == endpoint_id && matches_query(c, query))
            .collect();
        let total = matched.len() as u64;
        let page = matched
            .into_iter()
            .skip(query.offset)
            .take(query.limit)
            .cloned()
            .collect();
        (page, total)
    }

    async fn purge_calls_older_than(&self, cutoff: DateTime<Utc>) -> u64 {
        let mut guard = self.calls.write().await;
        let before = guard.len();
        guard.retain(|c| c.received_at >= cutoff);
        (before - guard.len()) as u64
    }

    async fn forwarding_config(&self, endpoint_id: &EndpointId) -> Option<ForwardingConfig> {
        self.configs.read().await.get(endpoint_id).cloned()
    }

    async fn upsert_forwarding_config(&self, config: ForwardingConfig) {
        self.configs
            .write()
            .await
            .insert(config.endpoint_id.clone(), config);
    }

    async fn delete_forwarding_config(&self, endpoint_id: &EndpointId) -> bool {
        self.configs.write().await.remove(endpoint_id).is_some()
    }

    async fn append_attempt(&self, attempt: &ForwardingAttempt) {
        self.attempts.write().await.push(attempt.clone());
    }

    async fn list_attempts(
        &self,
        config_id: &ConfigId,
        limit: usize,
        offset: usize,
    ) -> (Vec<ForwardingAttempt>, u64) {
        let guard = self.attempts.read().await;
        let matched: Vec<&ForwardingAttempt> = guard
            .iter()
            .rev()
            .filter(|a| &a.config_id == config_id)
            .collect();
        let total = matched.len() as u64;
        let page = matched
            .into_iter()
            .skip(offset)
            .take(limit)
            .cloned()
            .collect();
        (page, total)
    }

    async fn attempt_stats(&self, config_id: &ConfigId) -> AttemptStats {
        let guard = self.attempts.read().await;
        let mut stats = AttemptStats::default();
        let mut duration_sum = 0u64;
        for attempt in guard.iter().filter(|a| &a.config_id == config_id) {
            stats.total += 1;
            if attempt.success {
                stats.succeeded += 1;
            } else {
                stats.failed += 1;
            }
            duration_sum += attempt.duration_ms;
        }
        if stats.total > 0 {
            stats.avg_duration_ms = duration_sum / stats.total;
        }
        stats
    }
}
