use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::Router;
use axum::extract::{ConnectInfo, Query, State};
use axum::http::{Extensions, HeaderMap, HeaderName, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use tower_http::limit::RequestBodyLimitLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use bulwark_core::models::RateLimitDecision;
use bulwark_core::pipeline::PRIMARY_CIRCUIT;
use bulwark_core::rate_limit::RateLimitRule;

use crate::dto::{HealthResponse, ImageQuery, ReadRequest, ReadResponse};
use crate::error::{ApiError, ImageError, RateLimited, rate_limit_headers};
use crate::openapi::ApiDoc;
use crate::state::AppState;

/// Largest accepted JSON request body.
const MAX_REQUEST_BYTES: usize = 16 * 1024;

/// Build the full router with all routes and middleware.
pub fn router(state: Arc<AppState>) -> Router {
    let api = Router::new()
        .route("/v1/read", post(read_content))
        .route("/v1/image", get(proxy_image))
        .layer(RequestBodyLimitLayer::new(MAX_REQUEST_BYTES));

    let public = Router::new()
        .route("/health", get(health))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()));

    public.merge(api).with_state(state)
}

/// Rate-limit identity for one request.
///
/// The connected peer's address, unless that peer is a trusted proxy. Then
/// `x-forwarded-for` is read from the right, skipping trusted hops, and the
/// first other address names the client; `x-real-ip` is the next choice.
/// Headers from any other peer are ignored.
pub fn client_identity(
    peer: Option<IpAddr>,
    headers: &HeaderMap,
    trusted_proxies: &[IpAddr],
) -> String {
    let Some(peer) = peer else {
        return "unknown".to_string();
    };
    if !trusted_proxies.contains(&peer) {
        return peer.to_string();
    }

    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| {
            v.rsplit(',')
                .filter_map(|hop| hop.trim().parse::<IpAddr>().ok())
                .find(|hop| !trusted_proxies.contains(hop))
        });
    let real_ip = || {
        headers
            .get("x-real-ip")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<IpAddr>().ok())
    };

    forwarded.or_else(real_ip).unwrap_or(peer).to_string()
}

fn peer_ip(extensions: &Extensions) -> Option<IpAddr> {
    extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
}

async fn check_rate(
    state: &AppState,
    namespace: &str,
    extensions: &Extensions,
    headers: &HeaderMap,
    rule: RateLimitRule,
) -> Result<RateLimitDecision, RateLimited> {
    let identity = client_identity(peer_ip(extensions), headers, &state.trusted_proxies);
    let decision = state.limiter.check(namespace, &identity, rule).await;
    if decision.ok {
        Ok(decision)
    } else {
        tracing::info!(%namespace, limit = rule.limit, "Rate limit exceeded");
        Err(RateLimited(decision))
    }
}

fn with_rate_headers(mut response: Response, decision: &RateLimitDecision) -> Response {
    let headers = response.headers_mut();
    for (name, value) in rate_limit_headers(decision) {
        headers.insert(name, value);
    }
    response
}

// ---------------------------------------------------------------------------
// Read
// ---------------------------------------------------------------------------

#[utoipa::path(
    post,
    path = "/v1/read",
    request_body = ReadRequest,
    responses(
        (status = 200, description = "Extraction result (status may be error)", body = ReadResponse),
        (status = 400, description = "Invalid or disallowed URL", body = crate::dto::ErrorResponse),
        (status = 429, description = "Rate limit exceeded", body = crate::dto::ErrorResponse),
    ),
    tag = "read"
)]
pub async fn read_content(
    State(state): State<Arc<AppState>>,
    extensions: Extensions,
    headers: HeaderMap,
    axum::Json(body): axum::Json<ReadRequest>,
) -> Response {
    let decision = match check_rate(&state, "read", &extensions, &headers, state.limits.read).await {
        Ok(decision) => decision,
        Err(limited) => return limited.into_response(),
    };

    let url = match state.validator.validate(&body.url).await {
        Ok(url) => url,
        Err(e) => return with_rate_headers(ApiError(e).into_response(), &decision),
    };

    let entry = state.pipeline.read_content(&url, body.force).await;
    with_rate_headers(axum::Json(ReadResponse { entry }).into_response(), &decision)
}

// ---------------------------------------------------------------------------
// Image
// ---------------------------------------------------------------------------

#[utoipa::path(
    get,
    path = "/v1/image",
    params(ImageQuery),
    responses(
        (status = 200, description = "Image bytes with the origin's content type"),
        (status = 400, description = "Invalid or disallowed URL", body = crate::dto::ErrorResponse),
        (status = 413, description = "Image too large", body = crate::dto::ErrorResponse),
        (status = 415, description = "Origin did not return an image", body = crate::dto::ErrorResponse),
        (status = 429, description = "Rate limit exceeded", body = crate::dto::ErrorResponse),
        (status = 502, description = "Origin failed", body = crate::dto::ErrorResponse),
        (status = 503, description = "Origin circuit open", body = crate::dto::ErrorResponse),
        (status = 504, description = "Origin timed out", body = crate::dto::ErrorResponse),
    ),
    tag = "image"
)]
pub async fn proxy_image(
    State(state): State<Arc<AppState>>,
    extensions: Extensions,
    headers: HeaderMap,
    Query(query): Query<ImageQuery>,
) -> Response {
    let decision = match check_rate(&state, "image", &extensions, &headers, state.limits.image).await {
        Ok(decision) => decision,
        Err(limited) => return limited.into_response(),
    };

    let response = match state.images.fetch_image(&query.url).await {
        Ok(image) => {
            let content_type = HeaderValue::from_str(&image.content_type)
                .unwrap_or(HeaderValue::from_static("application/octet-stream"));
            let cache_control = HeaderValue::from_str(&image.cache_control)
                .unwrap_or(HeaderValue::from_static("public, max-age=86400"));
            let cache_status = if image.cache_hit { "hit" } else { "miss" };
            (
                [
                    (header::CONTENT_TYPE, content_type),
                    (header::CACHE_CONTROL, cache_control),
                    (
                        HeaderName::from_static("x-image-cache"),
                        HeaderValue::from_static(cache_status),
                    ),
                    (
                        header::X_CONTENT_TYPE_OPTIONS,
                        HeaderValue::from_static("nosniff"),
                    ),
                ],
                image.body,
            )
                .into_response()
        }
        Err(failure) => ImageError(failure).into_response(),
    };

    with_rate_headers(response, &decision)
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service healthy", body = HealthResponse),
        (status = 503, description = "Cache backend unavailable", body = HealthResponse),
    ),
    tag = "system"
)]
pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let database = match &state.db {
        None => "not_configured",
        Some(db) => match db.health_check().await {
            Ok(()) => "ok",
            Err(e) => {
                tracing::warn!(error = %e, "Database health check failed");
                "unavailable"
            }
        },
    };
    let primary_circuit = state
        .breakers
        .stats(PRIMARY_CIRCUIT, &state.breaker_config)
        .state
        .to_string();

    let healthy = database != "unavailable";
    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        axum::Json(HealthResponse {
            status: if healthy { "healthy" } else { "degraded" },
            cache: state.cache_backend.as_str(),
            database,
            primary_circuit,
        }),
    )
}
