use bulwark_core::error::AppError;
use bulwark_core::models::{
    DEFAULT_TITLE, ExtractionResult, ExtractionStatus, NO_ARCHIVE, NO_PARAGRAPHS_PLACEHOLDER,
};
use bulwark_core::traits::ExtractorPort;
use bulwark_core::url_guard::ValidatedUrl;
use chrono::Utc;
use scraper::{ElementRef, Html, Selector};

use crate::fetcher::ReqwestFetcher;

/// Shorter blocks are treated as navigation, captions or boilerplate.
pub const MIN_PARAGRAPH_CHARS: usize = 80;

/// Maximum number of paragraphs kept from one page.
pub const MAX_PARAGRAPHS: usize = 14;

const FALLBACK_NOTE: &str =
    "Direct-extraction fallback: the page was fetched directly and its text picked out heuristically.";

/// Title and body text picked out of an HTML document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArticleText {
    /// Empty when the document carries no usable title.
    pub title: String,
    /// At most [`MAX_PARAGRAPHS`], each at least [`MIN_PARAGRAPH_CHARS`] long.
    pub paragraphs: Vec<String>,
}

/// Secondary extraction strategy: one direct GET and a heuristic parse.
#[derive(Clone)]
pub struct DirectExtractor {
    fetcher: ReqwestFetcher,
}

impl DirectExtractor {
    pub fn new(fetcher: ReqwestFetcher) -> Self {
        Self { fetcher }
    }
}

impl ExtractorPort for DirectExtractor {
    async fn extract(&self, url: &ValidatedUrl) -> Result<ExtractionResult, AppError> {
        let html = self.fetcher.fetch_page(url).await?;
        let article = extract_article(&html)?;
        tracing::debug!(%url, paragraphs = article.paragraphs.len(), "Direct extraction parsed page");
        Ok(fallback_entry(url.as_str(), article))
    }
}

/// Builds the `fallback` entry for `url`, filling placeholders where the
/// page yielded nothing.
pub fn fallback_entry(url: &str, article: ArticleText) -> ExtractionResult {
    let title = if article.title.is_empty() {
        DEFAULT_TITLE.to_string()
    } else {
        article.title
    };
    let paragraphs = if article.paragraphs.is_empty() {
        vec![NO_PARAGRAPHS_PLACEHOLDER.to_string()]
    } else {
        article.paragraphs
    };

    ExtractionResult {
        original_url: url.to_string(),
        status: ExtractionStatus::Fallback,
        archive_url: NO_ARCHIVE.to_string(),
        title,
        notes: FALLBACK_NOTE.to_string(),
        paragraphs,
        checked_at: Utc::now(),
    }
}

/// Title: `og:title`, then the first `h1`, then `<title>`.
/// Paragraphs: `p` and `blockquote` text in document order, deduplicated.
pub fn extract_article(html: &str) -> Result<ArticleText, AppError> {
    let document = Html::parse_document(html);

    let og_title = selector("meta[property='og:title']")?;
    let h1 = selector("h1")?;
    let title_tag = selector("title")?;
    let blocks = selector("p, blockquote")?;

    let title = document
        .select(&og_title)
        .filter_map(|m| m.value().attr("content"))
        .map(collapse_whitespace)
        .find(|t| !t.is_empty())
        .or_else(|| first_text(&document, &h1))
        .or_else(|| first_text(&document, &title_tag))
        .unwrap_or_default();

    let mut paragraphs: Vec<String> = Vec::new();
    for block in document.select(&blocks) {
        if paragraphs.len() == MAX_PARAGRAPHS {
            break;
        }
        let text = element_text(block);
        if text.chars().count() < MIN_PARAGRAPH_CHARS || paragraphs.contains(&text) {
            continue;
        }
        paragraphs.push(text);
    }

    Ok(ArticleText { title, paragraphs })
}

fn selector(css: &str) -> Result<Selector, AppError> {
    Selector::parse(css).map_err(|e| AppError::ParseError(format!("Bad selector {css}: {e}")))
}

fn first_text(document: &Html, selector: &Selector) -> Option<String> {
    document
        .select(selector)
        .map(element_text)
        .find(|t| !t.is_empty())
}

fn element_text(element: ElementRef<'_>) -> String {
    collapse_whitespace(&element.text().collect::<String>())
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
