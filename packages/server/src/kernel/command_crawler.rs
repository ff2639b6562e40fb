//! Crawl subsystem backed by an external crawl command.
//!
//! The command is invoked once per run as
//! `<command> --url U --max-pages N --max-depth D --settle-delay S --output F
//! [--pattern P]...` and must write the captured dataset to `F`.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tagcheck_core::{CrawlError, CrawlRequest, CrawlResult, CrawlSubsystem, Dataset, DatasetError};
use tokio::process::Command;
use uuid::Uuid;

/// Crawl output file, removed when dropped so a cancelled or failed run
/// leaves nothing behind.
struct OutputFile {
    path: PathBuf,
}

impl Drop for OutputFile {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Failed to remove crawl output"
                );
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct CommandCrawler {
    program: String,
    base_args: Vec<String>,
    patterns: Vec<String>,
    output_dir: PathBuf,
}

impl CommandCrawler {
    /// `command` is split on whitespace into program and leading arguments.
    pub fn new(command: &str, patterns: Vec<String>) -> Self {
        let mut parts = command.split_whitespace().map(String::from);
        Self {
            program: parts.next().unwrap_or_default(),
            base_args: parts.collect(),
            patterns,
            output_dir: std::env::temp_dir(),
        }
    }

    /// Directory for per-run output files (builder pattern).
    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    fn args(&self, request: &CrawlRequest, output: &Path) -> Vec<String> {
        let mut args = self.base_args.clone();
        args.extend([
            "--url".to_string(),
            request.url.clone(),
            "--max-pages".to_string(),
            request.bounds.max_pages.to_string(),
            "--max-depth".to_string(),
            request.bounds.max_depth.to_string(),
            "--settle-delay".to_string(),
            request.bounds.settle_delay_secs.to_string(),
            "--output".to_string(),
            output.display().to_string(),
        ]);
        for pattern in &self.patterns {
            args.push("--pattern".to_string());
            args.push(pattern.clone());
        }
        args
    }
}

#[async_trait]
impl CrawlSubsystem for CommandCrawler {
    async fn crawl(&self, request: &CrawlRequest) -> CrawlResult<Dataset> {
        let output = OutputFile {
            path: self
                .output_dir
                .join(format!("tagcheck-capture-{}.json", Uuid::new_v4())),
        };

        tracing::info!(
            program = %self.program,
            url = %request.url,
            max_pages = request.bounds.max_pages,
            max_depth = request.bounds.max_depth,
            output = %output.path.display(),
            "Launching crawl command"
        );

        // Dropping the future (cancellation) kills the crawler
        let result = Command::new(&self.program)
            .args(self.args(request, &output.path))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(CrawlError::Launch)?;

        if !result.status.success() {
            return Err(CrawlError::Failed {
                status: result.status.to_string(),
                stderr: String::from_utf8_lossy(&result.stderr).trim().to_string(),
            });
        }

        let content = tokio::fs::read_to_string(&output.path)
            .await
            .map_err(|source| DatasetError::Io {
                path: output.path.clone(),
                source,
            })?;
        drop(output);

        let dataset = Dataset::from_json_str(&content)?;
        tracing::info!(
            pages = dataset.page_count(),
            requests = dataset.request_count(),
            "Crawl command finished"
        );
        Ok(dataset)
    }

    fn name(&self) -> &str {
        &self.program
    }
}
