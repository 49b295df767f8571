use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use futures::Stream;

use crate::error::RejectReason;
use crate::forwarder::Forwarder;
use crate::quota::QuotaGate;
use crate::storage::Storage;
use crate::types::{CapturedCall, EndpointId, Headers};

/// One inbound call as seen by the transport, before normalization.
///
/// The body is a stream so the gate can reject oversized payloads without
/// buffering them.
pub struct Inbound<S> {
    pub method: String,
    pub headers: Headers,
    pub query: Vec<(String, String)>,
    pub source: String,
    /// Declared content length, when the sender provided one.
    pub declared_len: Option<u64>,
    pub body: S,
}

/// What the inbound caller gets back.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub status: u16,
    pub body: String,
    pub content_type: String,
}

impl Reply {
    fn rejection(reason: &RejectReason) -> Self {
        Self {
            status: reason.status_code(),
            body: serde_json::json!({ "error": reason.message() }).to_string(),
            content_type: "application/json".to_string(),
        }
    }
}

/// Public-facing entry point of the capture pipeline.
///
/// The inbound path is synchronous relative to the caller: admit or
/// reject, persist, reply. Forwarding is only scheduled here, never
/// awaited, so a slow downstream target cannot delay the reply.
pub struct Receiver {
    storage: Arc<dyn Storage>,
    gate: QuotaGate,
    forwarder: Arc<Forwarder>,
}

impl Receiver {
    pub fn new(storage: Arc<dyn Storage>, gate: QuotaGate, forwarder: Arc<Forwarder>) -> Self {
        Self {
            storage,
            gate,
            forwarder,
        }
    }

    /// Handle one inbound call addressed to `endpoint_id`.
    ///
    /// Every standard method is accepted; the method is recorded, not
    /// interpreted. Rejections map reasons to status codes stably:
    /// not-found 404, inactive 410, too-large 413, quota 429,
    /// unreadable body 400.
    pub async fn handle<S, E>(&self, endpoint_id: &EndpointId, inbound: Inbound<S>) -> Reply
    where
        S: Stream<Item = Result<Bytes, E>> + Unpin,
        E: fmt::Display,
    {
        let Some(endpoint) = self.storage.endpoint(endpoint_id).await else {
            tracing::debug!(endpoint_id = %endpoint_id.0, "inbound call for unknown endpoint");
            return Reply::rejection(&RejectReason::NotFound);
        };
        let body = match self
            .gate
            .admit(Some(&endpoint), inbound.declared_len, inbound.body)
            .await
        {
            Ok(body) => body,
            Err(reason) => {
                tracing::debug!(
                    endpoint_id = %endpoint_id.0,
                    reason = %reason,
                    "inbound call rejected"
                );
                return Reply::rejection(&reason);
            }
        };

        let call = CapturedCall::new(
            endpoint.id.clone(),
            inbound.method,
            inbound.headers,
            body,
            inbound.query,
            inbound.source,
        );
        self.storage.insert_call(&call).await;
        let count = self.storage.increment_request_count(&endpoint.id).await;
        tracing::debug!(
            endpoint_id = %endpoint.id.0,
            call_id = %call.id.0,
            method = %call.method,
            body_size = call.body_size,
            request_count = count,
            "captured inbound call"
        );

        // Scheduled strictly after persistence. A full queue costs the
        // delivery, never the inbound response.
        if let Some(config) = self.storage.forwarding_config(&endpoint.id).await {
            if config.active {
                if let Err(err) = self.forwarder.enqueue(call, config) {
                    tracing::warn!(
                        endpoint_id = %endpoint.id.0,
                        error = %err,
                        "could not schedule forwarding chain"
                    );
                }
            }
        }

        Reply {
            status: endpoint.response.status,
            body: endpoint.response.body,
            content_type: endpoint.response.content_type,
        }
    }
}
