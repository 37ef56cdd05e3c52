//! The primary extraction strategy, chosen once at startup.

use bulwark_core::config::ExtractorConfig;
use bulwark_core::error::AppError;
use bulwark_core::models::ExtractionResult;
use bulwark_core::traits::ExtractorPort;
use bulwark_core::url_guard::ValidatedUrl;

#[cfg(feature = "browser")]
use crate::browser::BrowserExtractor;
use crate::process::ProcessExtractor;

#[derive(Clone)]
pub enum PrimaryExtractor {
    Process(ProcessExtractor),
    #[cfg(feature = "browser")]
    Browser(BrowserExtractor),
    /// No primary configured: every read goes straight to the fallback.
    Disabled,
}

impl PrimaryExtractor {
    /// A configured command wins; otherwise a headless browser when built
    /// with the `browser` feature; otherwise [`PrimaryExtractor::Disabled`].
    pub async fn from_config(config: &ExtractorConfig) -> Result<Self, AppError> {
        if config.command.is_some() {
            return Ok(PrimaryExtractor::Process(ProcessExtractor::new(
                config.clone(),
            )?));
        }

        #[cfg(feature = "browser")]
        {
            let browser = BrowserExtractor::launch(config.timeout).await?;
            return Ok(PrimaryExtractor::Browser(browser));
        }

        #[cfg(not(feature = "browser"))]
        {
            tracing::warn!("BULWARK_EXTRACTOR_COMMAND not set, reads use the direct fallback only");
            Ok(PrimaryExtractor::Disabled)
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            PrimaryExtractor::Process(_) => "process",
            #[cfg(feature = "browser")]
            PrimaryExtractor::Browser(_) => "browser",
            PrimaryExtractor::Disabled => "disabled",
        }
    }
}

impl ExtractorPort for PrimaryExtractor {
    async fn extract(&self, url: &ValidatedUrl) -> Result<ExtractionResult, AppError> {
        match self {
            PrimaryExtractor::Process(p) => p.extract(url).await,
            #[cfg(feature = "browser")]
            PrimaryExtractor::Browser(b) => b.extract(url).await,
            PrimaryExtractor::Disabled => Err(AppError::ConfigError(
                "no primary extractor configured".to_string(),
            )),
        }
    }
}
