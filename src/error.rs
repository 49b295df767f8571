use std::fmt;
use std::time::Duration;

/// Why the quota gate refused an inbound call.
///
/// Every reason maps to exactly one response status; the receiver relies on
/// this mapping being exhaustive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    /// The identifier resolves to no endpoint.
    NotFound,

    /// The endpoint exists but has been deactivated.
    Inactive,

    /// Declared or actual body size exceeds the configured maximum.
    BodyTooLarge,

    /// The owner's daily plan quota is exhausted.
    QuotaExhausted,

    /// The inbound body stream failed mid-read.
    UnreadableBody,
}

impl RejectReason {
    /// Stable status-code mapping surfaced to the inbound caller.
    pub fn status_code(&self) -> u16 {
        match self {
            RejectReason::NotFound => 404,
            RejectReason::Inactive => 410,
            RejectReason::BodyTooLarge => 413,
            RejectReason::QuotaExhausted => 429,
            RejectReason::UnreadableBody => 400,
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            RejectReason::NotFound => "Endpoint not found",
            RejectReason::Inactive => "Endpoint is inactive",
            RejectReason::BodyTooLarge => "Request body too large",
            RejectReason::QuotaExhausted => "Daily request quota exhausted",
            RejectReason::UnreadableBody => "Request body could not be read",
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message())
    }
}

impl std::error::Error for RejectReason {}

/// Errors rejected at forwarding-configuration write time.
///
/// Nothing here ever reaches the forwarding engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    EmptyTargetUrl,
    InvalidTargetUrl,
    UnsupportedScheme(String),
    RetriesOutOfRange(u32),
    TimeoutOutOfRange(Duration),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::EmptyTargetUrl => write!(f, "target URL must not be empty"),
            ConfigError::InvalidTargetUrl => write!(f, "target URL is not a valid URL"),
            ConfigError::UnsupportedScheme(scheme) => {
                write!(f, "target URL scheme must be http or https, got {scheme:?}")
            }
            ConfigError::RetriesOutOfRange(n) => {
                write!(f, "max_retries out of range: {n}")
            }
            ConfigError::TimeoutOutOfRange(timeout) => {
                write!(f, "per-attempt timeout out of range: {timeout:?}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Errors returned when a manual replay cannot start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplayError {
    /// No captured call with that identifier.
    CallNotFound,

    /// The caller does not own the endpoint the call belongs to.
    NotOwner,

    /// The endpoint has no active forwarding configuration.
    NoActiveConfig,
}

impl fmt::Display for ReplayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReplayError::CallNotFound => write!(f, "captured call not found"),
            ReplayError::NotOwner => write!(f, "caller does not own this endpoint"),
            ReplayError::NoActiveConfig => {
                write!(f, "no active forwarding configuration for this endpoint")
            }
        }
    }
}

impl std::error::Error for ReplayError {}

/// Errors returned when scheduling a delivery chain fails *before* any
/// attempt is made. The inbound response is never affected by these.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnqueueError {
    /// Forwarder queue is full.
    QueueFull,

    /// Forwarder has been shut down.
    Shutdown,
}

impl fmt::Display for EnqueueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnqueueError::QueueFull => write!(f, "forwarder queue at capacity"),
            EnqueueError::Shutdown => write!(f, "forwarder is shut down"),
        }
    }
}

impl std::error::Error for EnqueueError {}
