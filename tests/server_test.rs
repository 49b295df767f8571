mod common;

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use hookrelay::{
    router, CallQuery, Endpoint, Forwarder, ForwarderConfig, InMemoryStorage, QuotaGate, Receiver,
    Storage,
};
use tower::ServiceExt;

fn app(storage: Arc<InMemoryStorage>) -> axum::Router {
    let forwarder = Arc::new(Forwarder::new(
        storage.clone(),
        ForwarderConfig {
            worker_count: 1,
            queue_size: 16,
            backoff_base: Duration::from_millis(20),
            backoff_cap: Duration::from_millis(100),
        },
    ));
    let receiver = Arc::new(Receiver::new(storage, QuotaGate::default(), forwarder));
    router(receiver)
}

#[tokio::test]
async fn any_method_on_the_hook_path_is_captured() {
    let storage = Arc::new(InMemoryStorage::new());
    let app = app(storage.clone());

    let endpoint = Endpoint::new("u1").with_response(202, "{\"ok\":true}", "application/json");
    storage.upsert_endpoint(endpoint.clone()).await;

    let request = Request::builder()
        .method("PUT")
        .uri(format!("/hooks/{}?tag=ci&n=1", endpoint.id.0))
        .header("content-type", "text/plain")
        .header("x-event", "deploy.finished")
        .body(Body::from("payload"))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::ACCEPTED);
    assert_eq!(
        response.headers().get("content-type").unwrap(),
        "application/json"
    );
    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&body[..], b"{\"ok\":true}");

    let (calls, total) = storage.list_calls(&endpoint.id, &CallQuery::default()).await;
    assert_eq!(total, 1);
    let call = &calls[0];
    assert_eq!(call.method, "PUT");
    assert_eq!(call.body, b"payload");
    assert_eq!(call.content_type, "text/plain");
    assert_eq!(call.headers.get("x-event"), Some("deploy.finished"));
    assert_eq!(
        call.query,
        vec![
            ("tag".to_string(), "ci".to_string()),
            ("n".to_string(), "1".to_string()),
        ]
    );
    // Without connection info on the request the source degrades gracefully.
    assert_eq!(call.source, "unknown");
}

#[tokio::test]
async fn rejections_surface_as_json_errors() {
    let storage = Arc::new(InMemoryStorage::new());
    let app = app(storage.clone());

    let request = Request::builder()
        .method("POST")
        .uri("/hooks/does-not-exist")
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert!(parsed["error"].is_string());

    let inactive = Endpoint::new("u1").with_active(false);
    storage.upsert_endpoint(inactive.clone()).await;
    let request = Request::builder()
        .method("POST")
        .uri(format!("/hooks/{}", inactive.id.0))
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::GONE);
}

#[tokio::test]
async fn declared_oversize_is_refused_at_the_edge() {
    let storage = Arc::new(InMemoryStorage::new());
    let app = app(storage.clone());

    let endpoint = Endpoint::new("u1");
    storage.upsert_endpoint(endpoint.clone()).await;

    let request = Request::builder()
        .method("POST")
        .uri(format!("/hooks/{}", endpoint.id.0))
        .header("content-length", (hookrelay::DEFAULT_MAX_BODY_SIZE + 1).to_string())
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);

    let (_, total) = storage.list_calls(&endpoint.id, &CallQuery::default()).await;
    assert_eq!(total, 0);
}

#[tokio::test]
async fn paths_outside_the_hook_namespace_do_not_exist() {
    let storage = Arc::new(InMemoryStorage::new());
    let app = app(storage);

    let request = Request::builder()
        .method("GET")
        .uri("/health")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
