//! Local HTTP origin for adapter tests.

use axum::Router;
use bulwark_core::url_guard::{UrlValidator, ValidatedUrl};
use tokio::net::TcpListener;

/// Serve `app` on an ephemeral loopback port and return its base URL.
pub async fn serve(app: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

/// Validate a loopback URL the way the CLI does: syntax only.
pub fn permissive_url(raw: &str) -> ValidatedUrl {
    UrlValidator::new()
        .allow_private_urls()
        .validate_syntax(raw)
        .unwrap()
}
