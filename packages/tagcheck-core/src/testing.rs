//! Test doubles: a dataset builder, a mock crawler and faulty validators.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use crate::crawl::{CrawlRequest, CrawlSubsystem};
use crate::dataset::{CapturedPage, CapturedRequest, Dataset, NetworkExchange};
use crate::error::{CrawlError, CrawlResult, ValidatorError};
use crate::result::{ValidationResult, ValidatorDescriptor};
use crate::validator::Validator;

/// Fluent construction of small datasets.
///
/// ```rust
/// use tagcheck_core::testing::DatasetBuilder;
///
/// let dataset = DatasetBuilder::new()
///     .post("https://example.com/", "https://edge.example/ee", r#"{"a":1}"#, 1.0)
///     .build();
/// assert_eq!(dataset.post_events().len(), 1);
/// ```
#[derive(Debug, Default, Clone)]
pub struct DatasetBuilder {
    dataset: Dataset,
}

impl DatasetBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ensure a page exists, even without traffic.
    pub fn page(mut self, page_url: &str) -> Self {
        self.dataset.pages.entry(page_url.to_string()).or_default();
        self
    }

    pub fn exchange(
        mut self,
        page_url: &str,
        request_url: &str,
        exchange: NetworkExchange,
    ) -> Self {
        self.dataset
            .pages
            .entry(page_url.to_string())
            .or_insert_with(CapturedPage::default)
            .network_requests
            .insert(request_url.to_string(), exchange);
        self
    }

    pub fn request(self, page_url: &str, request_url: &str, request: CapturedRequest) -> Self {
        self.exchange(
            page_url,
            request_url,
            NetworkExchange {
                request: Some(request),
                ..Default::default()
            },
        )
    }

    pub fn post(self, page_url: &str, request_url: &str, body: &str, timestamp: f64) -> Self {
        self.request(
            page_url,
            request_url,
            CapturedRequest {
                method: "POST".into(),
                post_data: Some(body.to_string()),
                timestamp,
                ..Default::default()
            },
        )
    }

    pub fn get(self, page_url: &str, request_url: &str, timestamp: f64) -> Self {
        self.request(
            page_url,
            request_url,
            CapturedRequest {
                method: "GET".into(),
                timestamp,
                ..Default::default()
            },
        )
    }

    pub fn build(self) -> Dataset {
        self.dataset
    }
}

#[derive(Debug, Clone)]
enum MockOutcome {
    Dataset(Dataset),
    Failure(String),
    Panic(String),
}

/// Crawl subsystem returning a canned dataset or failure.
#[derive(Debug, Clone)]
pub struct MockCrawler {
    outcome: MockOutcome,
    delay: Option<Duration>,
    calls: Arc<Mutex<Vec<CrawlRequest>>>,
}

impl MockCrawler {
    pub fn new(dataset: Dataset) -> Self {
        Self {
            outcome: MockOutcome::Dataset(dataset),
            delay: None,
            calls: Arc::default(),
        }
    }

    /// Crawler that always fails with a transport error.
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            outcome: MockOutcome::Failure(message.into()),
            delay: None,
            calls: Arc::default(),
        }
    }

    /// Crawler that panics mid-crawl.
    pub fn panicking(message: impl Into<String>) -> Self {
        Self {
            outcome: MockOutcome::Panic(message.into()),
            delay: None,
            calls: Arc::default(),
        }
    }

    /// Sleep before answering (builder pattern).
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn calls(&self) -> Vec<CrawlRequest> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

#[async_trait]
impl CrawlSubsystem for MockCrawler {
    async fn crawl(&self, request: &CrawlRequest) -> CrawlResult<Dataset> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request.clone());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        match &self.outcome {
            MockOutcome::Dataset(dataset) => Ok(dataset.clone()),
            MockOutcome::Failure(message) => Err(CrawlError::Transport(message.clone())),
            MockOutcome::Panic(message) => panic!("{}", message),
        }
    }

    fn name(&self) -> &str {
        "mock"
    }
}

/// How a [`FaultyValidator`] misbehaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    Panic,
    Error,
}

/// Validator that always fails internally.
#[derive(Debug, Clone, Copy)]
pub struct FaultyValidator {
    id: &'static str,
    fault: Fault,
}

impl FaultyValidator {
    pub fn new(id: &'static str, fault: Fault) -> Self {
        Self { id, fault }
    }
}

impl Validator for FaultyValidator {
    fn descriptor(&self) -> ValidatorDescriptor {
        ValidatorDescriptor {
            id: self.id,
            name: "Faulty",
            description: "Fails on every run",
            default_enabled: false,
        }
    }

    fn validate(&self, _dataset: &Dataset) -> Result<ValidationResult, ValidatorError> {
        match self.fault {
            Fault::Panic => panic!("validator {} blew up", self.id),
            Fault::Error => Err(ValidatorError::MalformedInput(format!(
                "validator {} cannot read this dataset",
                self.id
            ))),
        }
    }
}
