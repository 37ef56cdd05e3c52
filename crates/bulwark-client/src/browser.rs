use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use bulwark_core::error::AppError;
use bulwark_core::models::{DEFAULT_TITLE, ExtractionResult, ExtractionStatus, NO_ARCHIVE};
use bulwark_core::traits::ExtractorPort;
use bulwark_core::url_guard::ValidatedUrl;
use chromiumoxide::{Browser, BrowserConfig, Page};
use chrono::Utc;
use futures::StreamExt;

use crate::direct::extract_article;

/// In-process primary strategy: render the page in headless Chromium.
///
/// A single Chromium process is shared across all clones; each extraction
/// opens a tab, waits for `<body>`, reads the rendered DOM and closes the
/// tab. A rendered page with no readable paragraphs is reported as
/// `blocked` so the pipeline moves on to the direct fallback.
#[derive(Clone)]
pub struct BrowserExtractor {
    browser: Arc<Browser>,
    timeout: Duration,
}

impl BrowserExtractor {
    /// Launches headless Chromium with a custom navigation timeout.
    ///
    /// Requires a Chromium / Chrome binary reachable via `$PATH`, one of the
    /// well-known install locations, or `CHROME_BIN`.
    pub async fn launch(timeout: Duration) -> Result<Self, AppError> {
        let mut builder = BrowserConfig::builder().no_sandbox().disable_default_args();

        // The snap wrapper rejects standard Chrome flags; prefer the real binary.
        if let Some(bin) = find_chrome_binary() {
            tracing::info!(binary = %bin.display(), "Using Chrome binary");
            builder = builder.chrome_executable(bin);
        }

        let config = builder
            .arg("--headless=new")
            .arg("--disable-gpu")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-extensions")
            .arg("--no-first-run")
            .build()
            .map_err(|e| AppError::ConfigError(format!("Browser config error: {e}")))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| AppError::ProcessError(format!("Failed to launch browser: {e}")))?;

        // The CDP handler must be polled continuously for the connection to work.
        tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    tracing::warn!(error = %e, "Browser CDP handler error");
                    break;
                }
            }
        });

        Ok(Self {
            browser: Arc::new(browser),
            timeout,
        })
    }

    /// Render `url` in a fresh tab. The tab is closed on every outcome,
    /// including a navigation that overruns the timeout.
    async fn render(&self, url: &ValidatedUrl) -> Result<String, AppError> {
        let page = tokio::time::timeout(self.timeout, self.browser.new_page("about:blank"))
            .await
            .map_err(|_| AppError::Timeout(self.timeout.as_secs()))?
            .map_err(|e| AppError::NetworkError(format!("Failed to open browser tab: {e}")))?;

        let tab = page.clone();
        run_then_close(self.timeout, render_page(&page, url), async move {
            if let Err(e) = tab.close().await {
                tracing::debug!(error = %e, "Failed to close browser tab");
            }
        })
        .await
    }
}

async fn render_page(page: &Page, url: &ValidatedUrl) -> Result<String, AppError> {
    page.goto(url.as_str())
        .await
        .map_err(|e| AppError::NetworkError(format!("Failed to navigate to {url}: {e}")))?;

    page.find_element("body")
        .await
        .map_err(|e| AppError::ParseError(format!("Page did not render body: {e}")))?;

    page.content()
        .await
        .map_err(|e| AppError::ParseError(format!("Failed to read page content: {e}")))
}

/// Run `work` under `timeout`, then await `close` whatever the result.
async fn run_then_close<T, W, C>(timeout: Duration, work: W, close: C) -> Result<T, AppError>
where
    W: Future<Output = Result<T, AppError>>,
    C: Future<Output = ()>,
{
    let outcome = tokio::time::timeout(timeout, work).await;
    close.await;
    outcome.unwrap_or(Err(AppError::Timeout(timeout.as_secs())))
}

impl ExtractorPort for BrowserExtractor {
    async fn extract(&self, url: &ValidatedUrl) -> Result<ExtractionResult, AppError> {
        let html = self.render(url).await?;
        let article = extract_article(&html)?;

        let (status, notes) = if article.paragraphs.is_empty() {
            (
                ExtractionStatus::Blocked,
                "The rendered page had no readable article text.",
            )
        } else {
            (ExtractionStatus::Success, "Rendered in a headless browser.")
        };

        Ok(ExtractionResult {
            original_url: url.as_str().to_string(),
            status,
            archive_url: NO_ARCHIVE.to_string(),
            title: if article.title.is_empty() {
                DEFAULT_TITLE.to_string()
            } else {
                article.title
            },
            notes: notes.to_string(),
            paragraphs: article.paragraphs,
            checked_at: Utc::now(),
        })
    }
}

fn find_chrome_binary() -> Option<PathBuf> {
    if let Ok(p) = std::env::var("CHROME_BIN") {
        let path = PathBuf::from(p);
        if path.exists() {
            return Some(path);
        }
    }

    [
        "/snap/chromium/current/usr/lib/chromium-browser/chrome",
        "/usr/bin/google-chrome-stable",
        "/usr/bin/google-chrome",
        "/usr/bin/chromium",
        "/usr/bin/chromium-browser",
    ]
    .iter()
    .map(PathBuf::from)
    .find(|p| p.exists())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;

    async fn closed_after<T>(
        work: impl Future<Output = Result<T, AppError>>,
    ) -> (Result<T, AppError>, bool) {
        let closed = AtomicBool::new(false);
        let result = run_then_close(Duration::from_millis(50), work, async {
            closed.store(true, Ordering::SeqCst);
        })
        .await;
        (result, closed.load(Ordering::SeqCst))
    }

    #[tokio::test]
    async fn tab_is_closed_after_success() {
        let (result, closed) = closed_after(async { Ok("<html></html>".to_string()) }).await;
        assert_eq!(result.unwrap(), "<html></html>");
        assert!(closed);
    }

    #[tokio::test]
    async fn tab_is_closed_after_render_error() {
        let (result, closed) = closed_after::<String>(async {
            Err(AppError::ParseError("no body".into()))
        })
        .await;
        assert!(matches!(result, Err(AppError::ParseError(_))));
        assert!(closed);
    }

    #[tokio::test]
    async fn tab_is_closed_after_timeout() {
        let (result, closed) = closed_after::<String>(async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(String::new())
        })
        .await;
        assert!(matches!(result, Err(AppError::Timeout(_))));
        assert!(closed);
    }
}
