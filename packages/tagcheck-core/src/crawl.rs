//! Seam to the external crawl subsystem.
//!
//! Crawling pages and capturing their traffic is done elsewhere; the engine
//! only needs something that turns a URL and bounds into a [`Dataset`].

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::dataset::Dataset;
use crate::error::{CrawlResult, DatasetError, RegistryError, RegistryResult};

/// Limits passed to the crawler.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CrawlBounds {
    pub max_pages: usize,
    pub max_depth: usize,
    /// Seconds to wait on each page for late tracking calls
    pub settle_delay_secs: f64,
}

impl Default for CrawlBounds {
    fn default() -> Self {
        Self {
            max_pages: 4,
            max_depth: 2,
            settle_delay_secs: 5.0,
        }
    }
}

impl CrawlBounds {
    pub fn with_max_pages(mut self, max_pages: usize) -> Self {
        self.max_pages = max_pages;
        self
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn with_settle_delay(mut self, secs: f64) -> Self {
        self.settle_delay_secs = secs;
        self
    }

    pub fn validate(&self) -> RegistryResult<()> {
        if self.max_pages == 0 {
            return Err(RegistryError::InvalidSetting {
                name: "max_pages",
                reason: "must be at least 1".into(),
            });
        }
        if !self.settle_delay_secs.is_finite() || self.settle_delay_secs < 0.0 {
            return Err(RegistryError::InvalidSetting {
                name: "settle_delay",
                reason: format!("must be >= 0 seconds, got {}", self.settle_delay_secs),
            });
        }
        Ok(())
    }
}

/// What to crawl.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrawlRequest {
    pub url: String,
    pub bounds: CrawlBounds,
}

/// Produces a captured dataset for a crawl request.
#[async_trait]
pub trait CrawlSubsystem: Send + Sync {
    async fn crawl(&self, request: &CrawlRequest) -> CrawlResult<Dataset>;

    /// Name used in logs and progress messages.
    fn name(&self) -> &str;
}

/// Replays a previously captured dataset file instead of crawling.
#[derive(Debug, Clone)]
pub struct DatasetFileCrawler {
    path: PathBuf,
}

impl DatasetFileCrawler {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl CrawlSubsystem for DatasetFileCrawler {
    async fn crawl(&self, request: &CrawlRequest) -> CrawlResult<Dataset> {
        tracing::info!(
            url = %request.url,
            path = %self.path.display(),
            "Replaying captured dataset"
        );

        let content = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|source| DatasetError::Io {
                path: self.path.clone(),
                source,
            })?;

        Ok(Dataset::from_json_str(&content)?)
    }

    fn name(&self) -> &str {
        "dataset-file"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CrawlError;

    #[test]
    fn test_default_bounds() {
        let bounds = CrawlBounds::default();
        assert_eq!(bounds.max_pages, 4);
        assert_eq!(bounds.max_depth, 2);
        assert_eq!(bounds.settle_delay_secs, 5.0);
        assert!(bounds.validate().is_ok());
    }

    #[test]
    fn test_invalid_bounds() {
        assert!(CrawlBounds::default().with_max_pages(0).validate().is_err());
        assert!(CrawlBounds::default()
            .with_settle_delay(-1.0)
            .validate()
            .is_err());
        assert!(CrawlBounds::default().with_max_depth(0).validate().is_ok());
    }

    #[tokio::test]
    async fn test_dataset_file_crawler_missing_file() {
        let crawler = DatasetFileCrawler::new("/no/such/capture.json");
        let request = CrawlRequest {
            url: "https://a.test/".into(),
            bounds: CrawlBounds::default(),
        };

        let err = crawler.crawl(&request).await.unwrap_err();
        assert!(matches!(err, CrawlError::Output(DatasetError::Io { .. })));
    }

    #[tokio::test]
    async fn test_dataset_file_crawler_reads_capture() {
        let path = std::env::temp_dir().join(format!("tagcheck-{}.json", uuid::Uuid::new_v4()));
        std::fs::write(
            &path,
            r#"{"https://a.test/": {"html": "", "networkRequests": {}}}"#,
        )
        .unwrap();

        let crawler = DatasetFileCrawler::new(&path);
        let request = CrawlRequest {
            url: "https://a.test/".into(),
            bounds: CrawlBounds::default(),
        };
        let dataset = crawler.crawl(&request).await.unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(dataset.page_count(), 1);
    }
}
