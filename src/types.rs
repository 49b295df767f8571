use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

use crate::error::ConfigError;

/// Unique identifier for an inbound endpoint.
///
/// This is a strongly-typed wrapper to avoid accidental mixing
/// of endpoint IDs with other string identifiers. The value is
/// opaque and unguessable (a UUID in practice).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EndpointId(pub String);

/// Unique identifier for the user owning an endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub String);

/// Unique identifier for a captured call.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CallId(pub String);

/// Unique identifier for a forwarding configuration.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConfigId(pub String);

/// Unique identifier for one forwarding attempt record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AttemptId(pub String);

impl EndpointId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl CallId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl ConfigId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl AttemptId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

/// Subscription plan of an endpoint's owner.
///
/// Plans bound how many calls a user's endpoints may receive per UTC
/// calendar day and how long captured calls are retained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Plan {
    Free,
    Pro,
    Team,
}

impl Plan {
    /// Daily request quota across all of the owner's endpoints.
    pub fn max_requests_per_day(self) -> u64 {
        match self {
            Plan::Free => 100,
            Plan::Pro => 10_000,
            Plan::Team => 100_000,
        }
    }

    /// Retention window feeding the capture-store purge hook.
    pub fn retention(self) -> chrono::Duration {
        match self {
            Plan::Free => chrono::Duration::hours(24),
            Plan::Pro => chrono::Duration::days(30),
            Plan::Team => chrono::Duration::days(90),
        }
    }
}

/// Canned response returned to the inbound caller on every accepted call.
///
/// Pure data; no dynamic evaluation of any kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyntheticResponse {
    pub status: u16,
    pub body: String,
    pub content_type: String,
}

impl Default for SyntheticResponse {
    fn default() -> Self {
        Self {
            status: 200,
            body: String::new(),
            content_type: "application/json".to_string(),
        }
    }
}

/// A user-owned inbound target.
///
/// Endpoints are created and mutated by the CRUD layer outside this crate;
/// the receiver only reads them and bumps the request counter kept in
/// storage. Deactivation flips `active` and makes the receiver reject
/// future calls while leaving history intact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Endpoint {
    pub id: EndpointId,
    pub user_id: UserId,
    pub active: bool,
    pub response: SyntheticResponse,
    pub plan: Plan,
}

impl Endpoint {
    /// Create an active free-plan endpoint with the default synthetic response.
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            id: EndpointId::generate(),
            user_id: UserId(user_id.into()),
            active: true,
            response: SyntheticResponse::default(),
            plan: Plan::Free,
        }
    }

    pub fn with_plan(mut self, plan: Plan) -> Self {
        self.plan = plan;
        self
    }

    pub fn with_response(
        mut self,
        status: u16,
        body: impl Into<String>,
        content_type: impl Into<String>,
    ) -> Self {
        self.response = SyntheticResponse {
            status,
            body: body.into(),
            content_type: content_type.into(),
        };
        self
    }

    pub fn with_active(mut self, active: bool) -> Self {
        self.active = active;
        self
    }
}

/// Ordered, case-insensitive header multimap.
///
/// Inbound traffic is untrusted, so no schema is assumed: names map to an
/// ordered list of values, lookup is case-insensitive, and the first-seen
/// casing of a name is preserved.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Headers(Vec<(String, Vec<String>)>);

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a value, merging into an existing name case-insensitively.
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        for (existing, values) in &mut self.0 {
            if existing.eq_ignore_ascii_case(&name) {
                values.push(value);
                return;
            }
        }
        self.0.push((name, vec![value]));
    }

    /// First value for a name, if any.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .and_then(|(_, values)| values.first())
            .map(String::as_str)
    }

    /// All values for a name, in insertion order.
    pub fn get_all(&self, name: &str) -> &[String] {
        self.0
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, values)| values.as_slice())
            .unwrap_or(&[])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.iter().any(|(n, _)| n.eq_ignore_ascii_case(name))
    }

    /// Iterate flattened `(name, value)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0
            .iter()
            .flat_map(|(n, values)| values.iter().map(move |v| (n.as_str(), v.as_str())))
    }

    /// Number of distinct header names.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<N: Into<String>, V: Into<String>> FromIterator<(N, V)> for Headers {
    fn from_iter<T: IntoIterator<Item = (N, V)>>(iter: T) -> Self {
        let mut headers = Headers::new();
        for (name, value) in iter {
            headers.append(name, value);
        }
        headers
    }
}

/// Immutable snapshot of one inbound HTTP interaction.
///
/// Created exactly once per accepted call and never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapturedCall {
    pub id: CallId,
    pub endpoint_id: EndpointId,
    /// Uppercase HTTP method as received.
    pub method: String,
    pub headers: Headers,
    /// Raw body bytes, possibly empty. Treated as opaque.
    pub body: Vec<u8>,
    /// Parsed query parameters in wire order.
    pub query: Vec<(String, String)>,
    pub content_type: String,
    /// Originating network address as reported by the transport.
    pub source: String,
    pub body_size: usize,
    pub received_at: DateTime<Utc>,
}

impl CapturedCall {
    pub fn new(
        endpoint_id: EndpointId,
        method: impl Into<String>,
        headers: Headers,
        body: Vec<u8>,
        query: Vec<(String, String)>,
        source: impl Into<String>,
    ) -> Self {
        let content_type = headers.get("content-type").unwrap_or("").to_string();
        let body_size = body.len();
        Self {
            id: CallId::generate(),
            endpoint_id,
            method: method.into().to_ascii_uppercase(),
            headers,
            body,
            query,
            content_type,
            source: source.into(),
            body_size,
            received_at: Utc::now(),
        }
    }
}

/// Bounds on forwarding configuration values, enforced at write time.
pub const MIN_RETRIES: u32 = 1;
pub const MAX_RETRIES: u32 = 10;
pub const MIN_TIMEOUT: Duration = Duration::from_secs(5);
pub const MAX_TIMEOUT: Duration = Duration::from_secs(120);

/// Per-endpoint policy describing where and how captured calls are relayed.
///
/// At most one configuration exists per endpoint; storage upserts are keyed
/// by the endpoint. Invalid values never reach the forwarding engine:
/// construction is the validation boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForwardingConfig {
    pub id: ConfigId,
    pub endpoint_id: EndpointId,
    pub target_url: String,
    pub active: bool,
    /// Total attempt ceiling for one delivery chain.
    pub max_retries: u32,
    /// Per-attempt timeout.
    pub timeout: Duration,
}

impl ForwardingConfig {
    /// Validate and build a configuration with the default retry policy
    /// (5 attempts, 30 second per-attempt timeout).
    pub fn new(endpoint_id: EndpointId, target_url: impl Into<String>) -> Result<Self, ConfigError> {
        Self::with_policy(endpoint_id, target_url, true, 5, Duration::from_secs(30))
    }

    /// Validate and build a configuration with an explicit policy.
    pub fn with_policy(
        endpoint_id: EndpointId,
        target_url: impl Into<String>,
        active: bool,
        max_retries: u32,
        timeout: Duration,
    ) -> Result<Self, ConfigError> {
        let target_url = target_url.into().trim().to_string();
        if target_url.is_empty() {
            return Err(ConfigError::EmptyTargetUrl);
        }
        let parsed = Url::parse(&target_url).map_err(|_| ConfigError::InvalidTargetUrl)?;
        match parsed.scheme() {
            "http" | "https" => {}
            other => return Err(ConfigError::UnsupportedScheme(other.to_string())),
        }
        if parsed.host_str().is_none() {
            return Err(ConfigError::InvalidTargetUrl);
        }
        if !(MIN_RETRIES..=MAX_RETRIES).contains(&max_retries) {
            return Err(ConfigError::RetriesOutOfRange(max_retries));
        }
        if timeout < MIN_TIMEOUT || timeout > MAX_TIMEOUT {
            return Err(ConfigError::TimeoutOutOfRange(timeout));
        }
        Ok(Self {
            id: ConfigId::generate(),
            endpoint_id,
            target_url,
            active,
            max_retries,
            timeout,
        })
    }
}

/// One immutable audit record per delivery attempt.
///
/// Attempt numbers are 1-based and contiguous within a chain; a chain ends
/// on first success or when the configured ceiling is reached.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForwardingAttempt {
    pub id: AttemptId,
    pub config_id: ConfigId,
    pub call_id: CallId,
    pub attempt_number: u32,
    /// Absent when no response was received at all.
    pub status_code: Option<u16>,
    pub success: bool,
    /// Absent on success.
    pub error: Option<String>,
    pub duration_ms: u64,
    pub attempted_at: DateTime<Utc>,
}

/// Aggregate counts over a configuration's attempt log.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AttemptStats {
    pub total: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub avg_duration_ms: u64,
}

impl AttemptStats {
    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.succeeded as f64 / self.total as f64 * 100.0
        }
    }
}

/// Filters for the paginated captured-call query surface.
#[derive(Debug, Clone)]
pub struct CallQuery {
    /// Exact method filter, case-insensitive.
    pub method: Option<String>,
    /// Free-text substring match over body, headers and query parameters.
    pub search: Option<String>,
    pub limit: usize,
    pub offset: usize,
}

impl Default for CallQuery {
    fn default() -> Self {
        Self {
            method: None,
            search: None,
            limit: 50,
            offset: 0,
        }
    }
}
