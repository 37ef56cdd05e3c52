use std::process::Stdio;
use std::sync::Arc;

use bulwark_core::compute_hash;
use bulwark_core::config::ExtractorConfig;
use bulwark_core::error::AppError;
use bulwark_core::models::ExtractionResult;
use bulwark_core::traits::ExtractorPort;
use bulwark_core::url_guard::ValidatedUrl;
use tokio::io::AsyncReadExt;
use tokio::process::Command;

/// Primary extraction strategy: an external automation process.
///
/// Invoked as `<command> <args…> <url> <output-path>`. The process may print
/// anything; only the last non-empty line of stdout is read, and it must be
/// one JSON `ExtractionResult`. The child is killed when the timeout fires or
/// when its output grows past the configured cap.
#[derive(Clone)]
pub struct ProcessExtractor {
    command: String,
    config: Arc<ExtractorConfig>,
}

impl ProcessExtractor {
    pub fn new(config: ExtractorConfig) -> Result<Self, AppError> {
        let command = config.command.clone().ok_or_else(|| {
            AppError::ConfigError("BULWARK_EXTRACTOR_COMMAND is not set".to_string())
        })?;
        Ok(Self {
            command,
            config: Arc::new(config),
        })
    }

    async fn run(&self, url: &ValidatedUrl) -> Result<Vec<u8>, AppError> {
        tokio::fs::create_dir_all(&self.config.work_dir)
            .await
            .map_err(|e| AppError::ProcessError(format!("Cannot create work dir: {e}")))?;
        let output_path = self
            .config
            .work_dir
            .join(format!("{}.out", &compute_hash(url.as_str())[..24]));

        let mut child = Command::new(&self.command)
            .args(&self.config.args)
            .arg(url.as_str())
            .arg(&output_path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| AppError::ProcessError(format!("Failed to spawn {}: {e}", self.command)))?;

        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| AppError::ProcessError("stdout was not captured".to_string()))?;
        let max = self.config.max_output_bytes;

        // Owns the child: dropping this future on timeout kills the process.
        let run = async move {
            let mut buf = Vec::new();
            (&mut stdout)
                .take(max as u64 + 1)
                .read_to_end(&mut buf)
                .await
                .map_err(|e| AppError::ProcessError(format!("Failed to read output: {e}")))?;
            if buf.len() > max {
                return Err(AppError::ProcessError(format!(
                    "Output exceeded {max} bytes"
                )));
            }
            let status = child
                .wait()
                .await
                .map_err(|e| AppError::ProcessError(e.to_string()))?;
            if !status.success() {
                return Err(AppError::ProcessError(format!("Extractor exited with {status}")));
            }
            Ok(buf)
        };

        let result = match tokio::time::timeout(self.config.timeout, run).await {
            Ok(inner) => inner,
            Err(_) => Err(AppError::Timeout(self.config.timeout.as_secs())),
        };

        if let Err(e) = tokio::fs::remove_file(&output_path).await
            && e.kind() != std::io::ErrorKind::NotFound
        {
            tracing::debug!(path = %output_path.display(), error = %e, "Could not remove extractor output file");
        }

        result
    }
}

impl ExtractorPort for ProcessExtractor {
    async fn extract(&self, url: &ValidatedUrl) -> Result<ExtractionResult, AppError> {
        let stdout = self.run(url).await?;
        parse_last_line(&stdout)
    }
}

/// Parse the last non-empty line of `stdout` as an `ExtractionResult`.
pub fn parse_last_line(stdout: &[u8]) -> Result<ExtractionResult, AppError> {
    let text = String::from_utf8_lossy(stdout);
    let line = text
        .lines()
        .rev()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .ok_or_else(|| AppError::ParseError("Extractor produced no output".to_string()))?;

    serde_json::from_str(line)
        .map_err(|e| AppError::ParseError(format!("Extractor output is not a result: {e}")))
}
