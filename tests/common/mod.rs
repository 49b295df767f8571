#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::response::Response;
use axum::routing::any;
use axum::Router;
use tokio::sync::Mutex;

/// One request as observed by the downstream target.
pub struct SeenRequest {
    pub method: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

/// Shared state of a scripted downstream target.
pub struct TargetState {
    pub hits: AtomicUsize,
    pub seen: Mutex<Vec<SeenRequest>>,
    /// Status code per request, in order; the last entry repeats.
    script: Vec<u16>,
    /// Artificial handling delay, for timeout scenarios.
    delay: Option<Duration>,
}

impl TargetState {
    pub fn hit_count(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

/// Spin up a loopback HTTP target that answers with the scripted status
/// codes. Returns its URL and the observation state.
pub async fn spawn_target(script: Vec<u16>) -> (String, Arc<TargetState>) {
    spawn_target_with_delay(script, None).await
}

pub async fn spawn_target_with_delay(
    script: Vec<u16>,
    delay: Option<Duration>,
) -> (String, Arc<TargetState>) {
    let state = Arc::new(TargetState {
        hits: AtomicUsize::new(0),
        seen: Mutex::new(Vec::new()),
        script,
        delay,
    });

    let app = Router::new()
        .route("/sink", any(sink))
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind target");
    let addr = listener.local_addr().expect("target addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("serve target");
    });

    (format!("http://{addr}/sink"), state)
}

async fn sink(State(state): State<Arc<TargetState>>, request: Request) -> Response {
    let (parts, body) = request.into_parts();
    let bytes = axum::body::to_bytes(body, usize::MAX)
        .await
        .expect("read target body");

    let headers = parts
        .headers
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_string(),
                String::from_utf8_lossy(value.as_bytes()).to_string(),
            )
        })
        .collect();
    state.seen.lock().await.push(SeenRequest {
        method: parts.method.as_str().to_string(),
        headers,
        body: bytes.to_vec(),
    });

    let hit = state.hits.fetch_add(1, Ordering::SeqCst);
    if let Some(delay) = state.delay {
        tokio::time::sleep(delay).await;
    }

    let status = state
        .script
        .get(hit)
        .or_else(|| state.script.last())
        .copied()
        .unwrap_or(200);
    let mut response = Response::new(Body::empty());
    *response.status_mut() = StatusCode::from_u16(status).expect("scripted status");
    response
}

/// An address nothing listens on: connections are refused immediately.
pub async fn unreachable_url() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind probe");
    let addr = listener.local_addr().expect("probe addr");
    drop(listener);
    format!("http://{addr}/sink")
}
