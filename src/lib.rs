//! A webhook capture-and-forward pipeline.
//!
//! This crate ingests arbitrary inbound HTTP calls addressed to a
//! user-owned **endpoint**, records each call verbatim, and optionally
//! relays it to a downstream target with bounded, backed-off retries, a
//! per-attempt audit log, and on-demand manual replay.
//!
//! ## Guarantees
//! - Bounded memory per inbound call (declared and actual body caps)
//! - The inbound response never waits on a downstream target
//! - At-least-once forwarding with a hard attempt ceiling
//! - Exactly one audit record per delivery attempt
//! - Captured calls and attempt records are append-only
//!
//! ## Non-Guarantees
//! - Exactly-once forwarding delivery
//! - Ordering of forwarding chains across captured calls
//! - Durability beyond the configured storage backend
//! - Strict (non-approximate) daily quota enforcement
//!
//! Endpoint CRUD, authentication and dashboard rendering live outside
//! this crate; it consumes their data through [`Storage`].

mod error;
mod forwarder;
mod quota;
mod receiver;
mod server;
mod storage;
mod types;

pub use error::{ConfigError, EnqueueError, RejectReason, ReplayError};
pub use forwarder::{
    ChainState, Forwarder, ForwarderConfig, ForwardingOutcome, ATTEMPT_HEADER, REQUEST_ID_HEADER,
};
pub use quota::{read_capped, QuotaGate, QuotaLimits, DEFAULT_MAX_BODY_SIZE};
pub use receiver::{Inbound, Receiver, Reply};
pub use server::router;
pub use storage::{InMemoryStorage, Storage};
pub use types::{
    AttemptId, AttemptStats, CallId, CallQuery, CapturedCall, ConfigId, Endpoint, EndpointId,
    ForwardingAttempt, ForwardingConfig, Headers, Plan, SyntheticResponse, UserId,
};
