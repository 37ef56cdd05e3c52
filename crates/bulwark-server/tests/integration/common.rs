use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::http::{StatusCode, header};
use axum::routing::get;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use testcontainers::core::{ContainerPort, WaitFor};
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, GenericImage, ImageExt};
use tokio::net::TcpListener;

use bulwark_client::{DirectExtractor, PrimaryExtractor, ReqwestFetcher};
use bulwark_core::cache::MemoryCache;
use bulwark_core::circuit_breaker::{CircuitBreakerConfig, CircuitBreakerRegistry};
use bulwark_core::config::FetchConfig;
use bulwark_core::image_proxy::ImageProxy;
use bulwark_core::pipeline::ReaderPipeline;
use bulwark_core::rate_limit::RateLimiter;
use bulwark_core::url_guard::UrlValidator;
use bulwark_db::Database;
use bulwark_server::backends::CacheBackend;
use bulwark_server::config::{CacheBackendKind, RateLimits};
use bulwark_server::routes;
use bulwark_server::state::{AppState, ImageCache, ReaderCache};

pub const ARTICLE_TEXT: &str = "This is the opening paragraph of the test story, and it is comfortably longer than eighty characters.";

pub struct TestApp {
    pub router: Router,
    pub state: Arc<AppState>,
}

/// Options for [`setup_test_app`].
pub struct TestOptions {
    pub limits: RateLimits,
    /// `false` applies the production SSRF checks, which reject the local origin.
    pub allow_private: bool,
    pub trusted_proxies: Vec<IpAddr>,
}

impl Default for TestOptions {
    fn default() -> Self {
        Self {
            limits: RateLimits::default(),
            allow_private: true,
            trusted_proxies: Vec::new(),
        }
    }
}

/// App with in-memory caches, no primary extractor and no distributed counter.
pub fn setup_test_app(options: TestOptions) -> TestApp {
    let reader_cache: ReaderCache = CacheBackend::Memory(MemoryCache::new(100));
    let image_cache: ImageCache = CacheBackend::Memory(MemoryCache::new(100));
    build_app(options, reader_cache, image_cache, CacheBackendKind::Memory, None)
}

fn build_app(
    options: TestOptions,
    reader_cache: ReaderCache,
    image_cache: ImageCache,
    cache_backend: CacheBackendKind,
    db: Option<Database>,
) -> TestApp {
    let validator = if options.allow_private {
        UrlValidator::new().allow_private_urls()
    } else {
        UrlValidator::new()
    };
    let fetch = FetchConfig {
        page_timeout: Duration::from_secs(2),
        image_timeout: Duration::from_secs(2),
        max_image_bytes: 1024,
    };
    let fetcher = ReqwestFetcher::new(fetch, validator).expect("Failed to build fetcher");
    let breakers = CircuitBreakerRegistry::new();
    let breaker_config = CircuitBreakerConfig::default();

    let state = Arc::new(AppState {
        pipeline: ReaderPipeline::new(
            PrimaryExtractor::Disabled,
            DirectExtractor::new(fetcher.clone()),
            reader_cache,
        )
        .with_breaker(breakers.clone(), breaker_config),
        images: ImageProxy::new(fetcher, image_cache, validator, 1024)
            .with_breaker(breakers.clone(), breaker_config),
        limiter: RateLimiter::new(None, Duration::from_millis(100)),
        limits: options.limits,
        validator,
        breakers,
        breaker_config,
        cache_backend,
        trusted_proxies: options.trusted_proxies,
        db,
    });

    TestApp {
        router: routes::router(state.clone()),
        state,
    }
}

/// Serve a fake origin on loopback and return its base URL.
pub async fn start_origin() -> String {
    let article = format!(
        "<html><head><meta property=\"og:title\" content=\"Origin story\"></head>\
         <body><p>{ARTICLE_TEXT}</p><p>Share</p></body></html>"
    );
    let app = Router::new()
        .route(
            "/story",
            get(move || {
                let article = article.clone();
                async move { ([(header::CONTENT_TYPE, "text/html; charset=utf-8")], article) }
            }),
        )
        .route("/broken", get(|| async { StatusCode::INTERNAL_SERVER_ERROR }))
        .route(
            "/pic.png",
            get(|| async {
                (
                    [
                        (header::CONTENT_TYPE, "image/png"),
                        (header::CACHE_CONTROL, "public, max-age=600"),
                    ],
                    vec![0x89u8, b'P', b'N', b'G'],
                )
            }),
        )
        .route(
            "/page.html",
            get(|| async { ([(header::CONTENT_TYPE, "text/html")], "<p>not an image</p>") }),
        );

    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind origin");
    let addr = listener.local_addr().expect("Failed to read origin address");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("Origin server failed");
    });
    format!("http://{addr}")
}

/// App backed by a PostgreSQL container. Keep the container alive for the test.
pub async fn setup_test_app_with_db() -> (TestApp, ContainerAsync<GenericImage>) {
    let container = GenericImage::new("postgres", "16")
        .with_exposed_port(ContainerPort::Tcp(5432))
        .with_wait_for(WaitFor::message_on_stderr(
            "database system is ready to accept connections",
        ))
        .with_env_var("POSTGRES_PASSWORD", "postgres")
        .with_env_var("POSTGRES_DB", "bulwark_test")
        .start()
        .await
        .expect("Failed to start PostgreSQL container");

    let host = container.get_host().await.expect("Failed to get host");
    let port = container
        .get_host_port_ipv4(5432)
        .await
        .expect("Failed to get port");

    let url = format!("postgresql://postgres:postgres@{host}:{port}/bulwark_test");
    let pool = retry_connect(&url).await;

    let db = Database::from_pool(pool);
    db.migrate().await.expect("Failed to run migrations");

    let app = build_app(
        TestOptions::default(),
        CacheBackend::Postgres(db.reader_cache()),
        CacheBackend::Postgres(db.image_cache()),
        CacheBackendKind::Postgres,
        Some(db),
    );
    (app, container)
}

async fn retry_connect(url: &str) -> PgPool {
    for _ in 0..30 {
        if let Ok(pool) = PgPoolOptions::new().max_connections(5).connect(url).await {
            return pool;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    panic!("Failed to connect to test database");
}
