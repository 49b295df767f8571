//! Wire adapter: an axum catch-all route feeding the receiver.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{ConnectInfo, Path, Request, State};
use axum::http::header::{CONTENT_LENGTH, CONTENT_TYPE};
use axum::http::StatusCode;
use axum::response::Response;
use axum::routing::any;
use axum::Router;

use crate::receiver::{Inbound, Receiver};
use crate::types::{EndpointId, Headers};

/// Build the inbound router: any method on `/hooks/:endpoint_id`.
pub fn router(receiver: Arc<Receiver>) -> Router {
    Router::new()
        .route("/hooks/:endpoint_id", any(receive))
        .with_state(receiver)
}

async fn receive(
    State(receiver): State<Arc<Receiver>>,
    Path(endpoint_id): Path<String>,
    request: Request,
) -> Response {
    let (parts, body) = request.into_parts();

    let mut headers = Headers::new();
    for (name, value) in parts.headers.iter() {
        headers.append(
            name.as_str(),
            String::from_utf8_lossy(value.as_bytes()).to_string(),
        );
    }

    let query: Vec<(String, String)> = parts
        .uri
        .query()
        .map(|q| url::form_urlencoded::parse(q.as_bytes()).into_owned().collect())
        .unwrap_or_default();

    let declared_len = parts
        .headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());

    // Peer address is present when the server is built with
    // `into_make_service_with_connect_info`.
    let source = parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string());

    let inbound = Inbound {
        method: parts.method.as_str().to_string(),
        headers,
        query,
        source,
        declared_len,
        body: body.into_data_stream(),
    };

    let reply = receiver.handle(&EndpointId(endpoint_id), inbound).await;

    match Response::builder()
        .status(reply.status)
        .header(CONTENT_TYPE, reply.content_type)
        .body(Body::from(reply.body))
    {
        Ok(response) => response,
        Err(err) => {
            // A misconfigured synthetic response (bad status or content
            // type) should not take the receiver down.
            tracing::error!(error = %err, "synthetic response could not be rendered");
            let mut response = Response::new(Body::empty());
            *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
            response
        }
    }
}
