use std::net::SocketAddr;

use axum::Router;
use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{Request, StatusCode};
use axum::response::Response;
use http_body_util::BodyExt;
use tower::ServiceExt;

use bulwark_core::models::ExtractionStatus;
use bulwark_core::rate_limit::RateLimitRule;
use bulwark_core::testutil::make_test_entry;
use bulwark_core::traits::CacheStore;
use bulwark_server::config::RateLimits;

use crate::common::{
    ARTICLE_TEXT, TestOptions, setup_test_app, setup_test_app_with_db, start_origin,
};

const CLIENT: &str = "198.51.100.7:40000";

fn peer(addr: &str) -> ConnectInfo<SocketAddr> {
    ConnectInfo(addr.parse().unwrap())
}

fn read_request_from(addr: &str, url: &str, force: bool) -> Request<Body> {
    let body = serde_json::json!({ "url": url, "force": force });
    Request::post("/v1/read")
        .header("content-type", "application/json")
        .extension(peer(addr))
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn read_request(url: &str, force: bool) -> Request<Body> {
    read_request_from(CLIENT, url, force)
}

fn image_request(url: &str) -> Request<Body> {
    Request::get(format!("/v1/image?url={url}"))
        .extension(peer(CLIENT))
        .body(Body::empty())
        .unwrap()
}

async fn send(router: &Router, request: Request<Body>) -> Response {
    router.clone().oneshot(request).await.unwrap()
}

async fn json_body(response: Response) -> serde_json::Value {
    let body = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&body).unwrap()
}

// ---------------------------------------------------------------------------
// Health / docs
// ---------------------------------------------------------------------------

#[tokio::test]
async fn health_returns_200_with_memory_cache() {
    let app = setup_test_app(TestOptions::default());

    let response = send(&app.router, Request::get("/health").body(Body::empty()).unwrap()).await;

    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["cache"], "memory");
    assert_eq!(json["database"], "not_configured");
    assert_eq!(json["primary_circuit"], "closed");
}

#[tokio::test]
async fn openapi_document_is_served() {
    let app = setup_test_app(TestOptions::default());

    let response = send(
        &app.router,
        Request::get("/api-docs/openapi.json").body(Body::empty()).unwrap(),
    )
    .await;

    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert!(json["paths"]["/v1/read"].is_object());
    assert!(json["paths"]["/v1/image"].is_object());
}

// ---------------------------------------------------------------------------
// Read
// ---------------------------------------------------------------------------

#[tokio::test]
async fn cached_entry_is_served_with_rate_headers() {
    let app = setup_test_app(TestOptions::default());
    let entry = make_test_entry(ExtractionStatus::Success);
    app.state
        .pipeline
        .cache()
        .set(&entry.original_url, &entry)
        .await
        .unwrap();

    let response = send(&app.router, read_request(&entry.original_url, false)).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["x-ratelimit-limit"], "20");
    assert_eq!(response.headers()["x-ratelimit-remaining"], "19");
    assert!(response.headers().contains_key("x-ratelimit-reset"));

    let json = json_body(response).await;
    assert_eq!(json["entry"]["status"], "success");
    assert_eq!(json["entry"]["title"], "Test headline");
    assert_eq!(json["entry"]["originalUrl"], entry.original_url);
}

#[tokio::test]
async fn read_falls_back_to_direct_extraction() {
    let origin = start_origin().await;
    let app = setup_test_app(TestOptions::default());
    let url = format!("{origin}/story");

    let response = send(&app.router, read_request(&url, false)).await;

    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    let entry = &json["entry"];
    assert_eq!(entry["status"], "fallback");
    assert_eq!(entry["title"], "Origin story");
    assert_eq!(entry["archiveUrl"], "none");
    assert_eq!(entry["paragraphs"], serde_json::json!([ARTICLE_TEXT]));
    assert!(entry["notes"].as_str().unwrap().to_lowercase().contains("fallback"));

    let cached = app.state.pipeline.cache().get(&url).await.unwrap().unwrap();
    assert_eq!(cached.status, ExtractionStatus::Fallback);
}

#[tokio::test]
async fn failing_origin_yields_error_entry_not_http_error() {
    let origin = start_origin().await;
    let app = setup_test_app(TestOptions::default());

    let response = send(&app.router, read_request(&format!("{origin}/broken"), false)).await;

    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert_eq!(json["entry"]["status"], "error");
    let paragraphs = json["entry"]["paragraphs"].as_array().unwrap();
    assert_eq!(paragraphs.len(), 1);
    assert!(!paragraphs[0].as_str().unwrap().is_empty());
}

#[tokio::test]
async fn force_bypasses_cached_entry() {
    let origin = start_origin().await;
    let app = setup_test_app(TestOptions::default());
    let url = format!("{origin}/story");
    let stale = make_test_entry(ExtractionStatus::Error);
    app.state.pipeline.cache().set(&url, &stale).await.unwrap();

    let cached = json_body(send(&app.router, read_request(&url, false)).await).await;
    assert_eq!(cached["entry"]["status"], "error");

    let fresh = json_body(send(&app.router, read_request(&url, true)).await).await;
    assert_eq!(fresh["entry"]["status"], "fallback");
}

#[tokio::test]
async fn private_address_is_rejected() {
    let app = setup_test_app(TestOptions {
        allow_private: false,
        ..TestOptions::default()
    });

    let response = send(
        &app.router,
        read_request("http://169.254.169.254/latest/meta-data", false),
    )
    .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = json_body(response).await;
    assert_eq!(json["error"], "validation_error");
}

#[tokio::test]
async fn rate_limit_applies_before_validation() {
    let app = setup_test_app(TestOptions {
        limits: RateLimits {
            read: RateLimitRule::new(2, 60),
            ..RateLimits::default()
        },
        ..TestOptions::default()
    });

    for _ in 0..2 {
        let response = send(&app.router, read_request("ftp://files.example/a", false)).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    let response = send(&app.router, read_request("ftp://files.example/a", false)).await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(response.headers()["x-ratelimit-remaining"], "0");
    let retry: u64 = response.headers()["retry-after"]
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    assert!((1..=60).contains(&retry));

    let json = json_body(response).await;
    assert_eq!(json["error"], "rate_limit_exceeded");
}

#[tokio::test]
async fn rate_limit_is_per_client() {
    let app = setup_test_app(TestOptions {
        limits: RateLimits {
            read: RateLimitRule::new(1, 60),
            ..RateLimits::default()
        },
        ..TestOptions::default()
    });

    let first = send(&app.router, read_request("ftp://files.example/a", false)).await;
    assert_eq!(first.status(), StatusCode::BAD_REQUEST);

    let other_client = read_request_from("203.0.113.9:50000", "ftp://files.example/a", false);
    let second = send(&app.router, other_client).await;
    assert_eq!(second.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn forwarded_headers_from_direct_clients_are_ignored() {
    let app = setup_test_app(TestOptions {
        limits: RateLimits {
            read: RateLimitRule::new(1, 60),
            ..RateLimits::default()
        },
        ..TestOptions::default()
    });

    let mut statuses = Vec::new();
    for spoofed in ["203.0.113.1", "203.0.113.2", "203.0.113.3"] {
        let mut request = read_request("ftp://files.example/a", false);
        request
            .headers_mut()
            .insert("x-forwarded-for", spoofed.parse().unwrap());
        request
            .headers_mut()
            .insert("x-real-ip", spoofed.parse().unwrap());
        statuses.push(send(&app.router, request).await.status());
    }

    assert_eq!(
        statuses,
        vec![
            StatusCode::BAD_REQUEST,
            StatusCode::TOO_MANY_REQUESTS,
            StatusCode::TOO_MANY_REQUESTS,
        ]
    );
}

#[tokio::test]
async fn trusted_proxy_rate_limits_per_forwarded_client() {
    let app = setup_test_app(TestOptions {
        limits: RateLimits {
            read: RateLimitRule::new(1, 60),
            ..RateLimits::default()
        },
        trusted_proxies: vec!["10.0.0.1".parse().unwrap()],
        ..TestOptions::default()
    });

    let via_proxy = |client: &'static str| {
        let mut request = read_request_from("10.0.0.1:443", "ftp://files.example/a", false);
        request
            .headers_mut()
            .insert("x-forwarded-for", client.parse().unwrap());
        request
    };

    let alice = send(&app.router, via_proxy("198.51.100.20")).await;
    assert_eq!(alice.status(), StatusCode::BAD_REQUEST);
    let bob = send(&app.router, via_proxy("198.51.100.21")).await;
    assert_eq!(bob.status(), StatusCode::BAD_REQUEST);
    let alice_again = send(&app.router, via_proxy("198.51.100.20")).await;
    assert_eq!(alice_again.status(), StatusCode::TOO_MANY_REQUESTS);
}

// ---------------------------------------------------------------------------
// Image
// ---------------------------------------------------------------------------

#[tokio::test]
async fn image_is_fetched_once_then_served_from_cache() {
    let origin = start_origin().await;
    let app = setup_test_app(TestOptions::default());
    let url = format!("{origin}/pic.png");

    let miss = send(&app.router, image_request(&url)).await;
    assert_eq!(miss.status(), StatusCode::OK);
    assert_eq!(miss.headers()["content-type"], "image/png");
    assert_eq!(miss.headers()["cache-control"], "public, max-age=600");
    assert_eq!(miss.headers()["x-image-cache"], "miss");
    assert_eq!(miss.headers()["x-content-type-options"], "nosniff");
    let bytes = miss.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&bytes[..], &[0x89, b'P', b'N', b'G']);

    let hit = send(&app.router, image_request(&url)).await;
    assert_eq!(hit.status(), StatusCode::OK);
    assert_eq!(hit.headers()["x-image-cache"], "hit");
}

#[tokio::test]
async fn non_image_origin_returns_415() {
    let origin = start_origin().await;
    let app = setup_test_app(TestOptions::default());

    let response = send(&app.router, image_request(&format!("{origin}/page.html"))).await;

    assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
    let json = json_body(response).await;
    assert_eq!(json["error"], "unsupported_content_type");
}

#[tokio::test]
async fn missing_image_url_returns_400() {
    let app = setup_test_app(TestOptions::default());

    let response = send(
        &app.router,
        Request::get("/v1/image").body(Body::empty()).unwrap(),
    )
    .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn invalid_image_url_returns_400() {
    let app = setup_test_app(TestOptions::default());

    let response = send(&app.router, image_request("javascript:alert(1)")).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = json_body(response).await;
    assert_eq!(json["error"], "validation_error");
}

// ---------------------------------------------------------------------------
// Postgres backend
// ---------------------------------------------------------------------------

#[tokio::test]
async fn postgres_backend_reports_healthy_and_persists_reads() {
    let origin = start_origin().await;
    let (app, _container) = setup_test_app_with_db().await;

    let response = send(&app.router, Request::get("/health").body(Body::empty()).unwrap()).await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert_eq!(json["cache"], "postgres");
    assert_eq!(json["database"], "ok");

    let url = format!("{origin}/story");
    let response = send(&app.router, read_request(&url, false)).await;
    assert_eq!(response.status(), StatusCode::OK);

    let db = app.state.db.as_ref().unwrap();
    let stored = db.reader_cache().get(&url).await.unwrap().unwrap();
    assert_eq!(stored.status, ExtractionStatus::Fallback);
}
