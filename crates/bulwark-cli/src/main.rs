use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use bulwark_client::{DirectExtractor, PrimaryExtractor, ReqwestFetcher};
use bulwark_core::cache::FileCache;
use bulwark_core::config::{ExtractorConfig, FetchConfig};
use bulwark_core::image_proxy::ImageProxy;
use bulwark_core::pipeline::ReaderPipeline;
use bulwark_core::url_guard::UrlValidator;

#[derive(Parser)]
#[command(name = "bulwark", version, about = "Reader-mode extraction and image fetching")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract the readable text of an article and print it as JSON
    Read {
        /// Article URL
        #[arg(short, long)]
        url: String,

        /// Ignore any cached result and extract again
        #[arg(long, default_value_t = false)]
        force: bool,

        /// Directory for cached results
        #[arg(long, env = "BULWARK_CACHE_DIR", default_value = ".bulwark-cache")]
        cache_dir: PathBuf,

        /// Reject private, loopback and link-local addresses
        #[arg(long, default_value_t = false)]
        strict: bool,
    },

    /// Fetch a remote image through the cache and write it to a file
    Image {
        /// Image URL
        #[arg(short, long)]
        url: String,

        /// Output file
        #[arg(short, long)]
        out: PathBuf,

        /// Directory for cached images
        #[arg(long, env = "BULWARK_CACHE_DIR", default_value = ".bulwark-cache")]
        cache_dir: PathBuf,

        /// Reject private, loopback and link-local addresses
        #[arg(long, default_value_t = false)]
        strict: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("bulwark=info".parse()?))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Read {
            url,
            force,
            cache_dir,
            strict,
        } => cmd_read(&url, force, &cache_dir, validator(strict)).await?,
        Commands::Image {
            url,
            out,
            cache_dir,
            strict,
        } => cmd_image(&url, &out, &cache_dir, validator(strict)).await?,
    }

    Ok(())
}

fn validator(strict: bool) -> UrlValidator {
    if strict {
        UrlValidator::new()
    } else {
        UrlValidator::new().allow_private_urls()
    }
}

async fn cmd_read(url: &str, force: bool, cache_dir: &Path, validator: UrlValidator) -> Result<()> {
    let url = validator.validate(url).await.map_err(|e| anyhow::anyhow!(e))?;

    let fetcher = ReqwestFetcher::new(FetchConfig::from_env()?, validator)
        .context("Failed to create HTTP client")?;
    let cache = FileCache::open(cache_dir.join("reader"))
        .with_context(|| format!("Failed to open cache in {}", cache_dir.display()))?;
    let primary = PrimaryExtractor::from_config(&ExtractorConfig::from_env()?).await?;
    tracing::info!(primary = primary.name(), "Reading {}", url);

    let pipeline = ReaderPipeline::new(primary, DirectExtractor::new(fetcher), cache);
    let entry = pipeline.read_content(&url, force).await;

    tracing::info!(
        status = %entry.status,
        paragraphs = entry.paragraphs.len(),
        "Read finished"
    );
    println!("{}", serde_json::to_string_pretty(&entry)?);

    Ok(())
}

async fn cmd_image(url: &str, out: &Path, cache_dir: &Path, validator: UrlValidator) -> Result<()> {
    let fetch = FetchConfig::from_env()?;
    let max_bytes = fetch.max_image_bytes;
    let fetcher = ReqwestFetcher::new(fetch, validator).context("Failed to create HTTP client")?;
    let cache = FileCache::open(cache_dir.join("images"))
        .with_context(|| format!("Failed to open cache in {}", cache_dir.display()))?;

    let proxy = ImageProxy::new(fetcher, cache, validator, max_bytes);
    let image = proxy
        .fetch_image(url)
        .await
        .map_err(|f| anyhow::anyhow!("Image fetch failed ({}): {}", f.status, f.error))?;

    tokio::fs::write(out, &image.body)
        .await
        .with_context(|| format!("Failed to write {}", out.display()))?;

    tracing::info!(
        content_type = %image.content_type,
        bytes = image.body.len(),
        cache_hit = image.cache_hit,
        "Saved image to {}",
        out.display()
    );

    Ok(())
}
