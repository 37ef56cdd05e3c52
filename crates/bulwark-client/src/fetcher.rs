use std::sync::Arc;
use std::time::Duration;

use bulwark_core::config::{FetchConfig, USER_AGENT};
use bulwark_core::error::AppError;
use bulwark_core::models::FetchedImage;
use bulwark_core::traits::ImageFetcher;
use bulwark_core::url_guard::{UrlValidator, ValidatedUrl};
use reqwest::header::{ACCEPT, CACHE_CONTROL, CONTENT_TYPE};
use reqwest::redirect::Policy;
use reqwest::{Client, Response};

use crate::resolver::{BlockedAddress, GuardedResolver};

const MAX_REDIRECTS: usize = 5;

/// Upper bound for HTML documents read by [`ReqwestFetcher::fetch_page`].
pub const MAX_PAGE_BYTES: usize = 5 * 1024 * 1024;

/// HTTP fetcher using reqwest.
///
/// Downloads HTML pages (for direct extraction) and images (for the image
/// proxy) with an identifying User-Agent and per-request timeouts. Callers
/// pass in URLs that were already validated; redirects are re-checked hop by
/// hop with the same [`UrlValidator`], and every host name is resolved through
/// [`GuardedResolver`], so neither a redirect nor a rebinding DNS answer can
/// steer the request to a loopback or metadata address.
#[derive(Clone)]
pub struct ReqwestFetcher {
    client: Client,
    config: FetchConfig,
}

impl ReqwestFetcher {
    pub fn new(config: FetchConfig, validator: UrlValidator) -> Result<Self, AppError> {
        let resolver = GuardedResolver::new(validator.blocks_private_addresses());
        Self::with_resolver(config, validator, resolver)
    }

    fn with_resolver(
        config: FetchConfig,
        validator: UrlValidator,
        resolver: GuardedResolver,
    ) -> Result<Self, AppError> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .redirect(redirect_policy(validator))
            .dns_resolver(Arc::new(resolver))
            .build()
            .map_err(|e| AppError::HttpError(e.to_string()))?;

        Ok(Self { client, config })
    }

    pub fn config(&self) -> &FetchConfig {
        &self.config
    }

    /// GET an HTML document and return its body as text.
    ///
    /// Non-success statuses become `HttpError("HTTP <code> for <url>")`,
    /// anything that is not `text/html` or XHTML becomes
    /// `UnsupportedContentType`.
    pub async fn fetch_page(&self, url: &ValidatedUrl) -> Result<String, AppError> {
        let timeout = self.config.page_timeout;
        let response = self
            .send(url, timeout, "text/html,application/xhtml+xml;q=0.9,*/*;q=0.1")
            .await?;

        let content_type = header_value(&response, CONTENT_TYPE);
        let essence = content_type
            .as_deref()
            .and_then(|ct| ct.split(';').next())
            .map(|ct| ct.trim().to_ascii_lowercase());
        match essence.as_deref() {
            Some("text/html") | Some("application/xhtml+xml") => {}
            Some(other) => return Err(AppError::UnsupportedContentType(other.to_string())),
            None => return Err(AppError::UnsupportedContentType("unknown".to_string())),
        }

        let body = read_limited(response, MAX_PAGE_BYTES, timeout).await?;
        tracing::debug!(%url, bytes = body.len(), "Fetched page");
        Ok(String::from_utf8_lossy(&body).into_owned())
    }

    async fn send(
        &self,
        url: &ValidatedUrl,
        timeout: Duration,
        accept: &str,
    ) -> Result<Response, AppError> {
        let response = self
            .client
            .get(url.as_str())
            .header(ACCEPT, accept)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| map_reqwest_error(e, timeout))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::HttpError(format!(
                "HTTP {} for {}",
                status.as_u16(),
                url
            )));
        }
        Ok(response)
    }
}

impl ImageFetcher for ReqwestFetcher {
    async fn fetch_image(&self, url: &ValidatedUrl) -> Result<FetchedImage, AppError> {
        let timeout = self.config.image_timeout;
        let response = self.send(url, timeout, "image/*").await?;

        let content_type = header_value(&response, CONTENT_TYPE).unwrap_or_default();
        let cache_control = header_value(&response, CACHE_CONTROL);
        let bytes = read_limited(response, self.config.max_image_bytes, timeout).await?;

        Ok(FetchedImage {
            bytes,
            content_type,
            cache_control,
        })
    }
}

fn redirect_policy(validator: UrlValidator) -> Policy {
    Policy::custom(move |attempt| {
        if attempt.previous().len() >= MAX_REDIRECTS {
            return attempt.error(format!("more than {MAX_REDIRECTS} redirects"));
        }
        let verdict = validator.validate_syntax(attempt.url().as_str());
        match verdict {
            Ok(_) => attempt.follow(),
            Err(e) => {
                tracing::warn!(location = %attempt.url(), error = %e, "Refusing redirect");
                attempt.error(e.to_string())
            }
        }
    })
}

fn header_value(response: &Response, name: reqwest::header::HeaderName) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// Read the body, failing as soon as it grows past `max_bytes`.
async fn read_limited(
    mut response: Response,
    max_bytes: usize,
    timeout: Duration,
) -> Result<Vec<u8>, AppError> {
    if let Some(len) = response.content_length()
        && len > max_bytes as u64
    {
        return Err(AppError::PayloadTooLarge(len as usize));
    }

    let mut body = Vec::new();
    while let Some(chunk) = response
        .chunk()
        .await
        .map_err(|e| map_reqwest_error(e, timeout))?
    {
        if body.len() + chunk.len() > max_bytes {
            return Err(AppError::PayloadTooLarge(body.len() + chunk.len()));
        }
        body.extend_from_slice(&chunk);
    }
    Ok(body)
}

fn map_reqwest_error(e: reqwest::Error, timeout: Duration) -> AppError {
    if let Some(blocked) = blocked_address(&e) {
        AppError::ValidationError(blocked.to_string())
    } else if e.is_timeout() {
        AppError::Timeout(timeout.as_secs())
    } else if e.is_redirect() {
        AppError::ValidationError(format!("Redirect refused: {e}"))
    } else if e.is_connect() {
        AppError::NetworkError(format!("Connection failed: {e}"))
    } else {
        AppError::HttpError(e.to_string())
    }
}

fn blocked_address(e: &reqwest::Error) -> Option<&BlockedAddress> {
    let mut source = std::error::Error::source(e);
    while let Some(err) = source {
        if let Some(blocked) = err.downcast_ref::<BlockedAddress>() {
            return Some(blocked);
        }
        source = err.source();
    }
    None
}
