//! Run orchestration: crawl, then each selected validator, then a summary.
//!
//! A run moves through
//! `Idle -> Crawling -> RunningValidators(i) -> Summarizing -> Complete`,
//! or to `Error` when the crawl fails or the run is cancelled. Every
//! transition is published on the session's [`ProgressBus`].
//!
//! Validators run one at a time, in the order they were selected. Each runs
//! on the blocking pool so a panic or an `Err` is contained and recorded as
//! a failed result; the remaining validators still run.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use serde_json::json;
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::crawl::{CrawlBounds, CrawlRequest, CrawlSubsystem};
use crate::dataset::Dataset;
use crate::error::{CrawlError, RegistryResult, RunError};
use crate::progress::{EventStatus, ProgressBus, ProgressUpdate};
use crate::registry::ValidatorRegistry;
use crate::result::ValidationResult;
use crate::validator::Validator;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Crawling,
    /// Index into the session's validator list
    RunningValidators(usize),
    Summarizing,
    Complete,
    Error,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Complete | RunState::Error)
    }

    pub fn can_transition_to(&self, next: RunState) -> bool {
        use RunState::*;
        match (*self, next) {
            (Idle, Crawling) => true,
            (Crawling, RunningValidators(0)) | (Crawling, Summarizing) => true,
            (RunningValidators(i), RunningValidators(j)) => j == i + 1,
            (RunningValidators(_), Summarizing) => true,
            (Summarizing, Complete) => true,
            (state, Error) => !state.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunState::Idle => f.write_str("idle"),
            RunState::Crawling => f.write_str("crawling"),
            RunState::RunningValidators(i) => write!(f, "running_validators({})", i),
            RunState::Summarizing => f.write_str("summarizing"),
            RunState::Complete => f.write_str("complete"),
            RunState::Error => f.write_str("error"),
        }
    }
}

/// Caller's request to start a run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunRequest {
    pub url: String,
    /// Explicit selection in execution order; `None` runs the defaults
    pub validators: Option<Vec<String>>,
    pub bounds: CrawlBounds,
}

impl RunRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            validators: None,
            bounds: CrawlBounds::default(),
        }
    }

    pub fn with_validators<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.validators = Some(ids.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_bounds(mut self, bounds: CrawlBounds) -> Self {
        self.bounds = bounds;
        self
    }
}

/// State of one run, owned by the controller while it executes.
#[derive(Debug, Clone)]
pub struct RunSession {
    pub id: String,
    pub url: String,
    pub validator_ids: Vec<&'static str>,
    pub bounds: CrawlBounds,
    state: RunState,
}

impl RunSession {
    pub fn state(&self) -> RunState {
        self.state
    }

    fn advance(&mut self, next: RunState) {
        if !self.state.can_transition_to(next) {
            tracing::error!(
                session_id = %self.id,
                from = %self.state,
                to = %next,
                "Unexpected run state transition"
            );
        }
        tracing::debug!(session_id = %self.id, from = %self.state, to = %next, "Run state changed");
        self.state = next;
    }
}

/// Aggregated outcome of a completed run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub session_id: String,
    pub passed: usize,
    pub failed: usize,
    pub total: usize,
    pub results: Vec<ValidationResult>,
}

impl RunSummary {
    pub fn new(session_id: impl Into<String>, results: Vec<ValidationResult>) -> Self {
        let passed = results.iter().filter(|r| r.passed).count();
        Self {
            session_id: session_id.into(),
            passed,
            failed: results.len() - passed,
            total: results.len(),
            results,
        }
    }

    pub fn all_passed(&self) -> bool {
        self.failed == 0
    }
}

/// A run whose selection is resolved and whose session exists, ready to
/// execute.
pub struct PreparedRun {
    session: RunSession,
    validators: Vec<Arc<dyn Validator>>,
    bus: ProgressBus,
    cancel: CancellationToken,
}

impl fmt::Debug for PreparedRun {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PreparedRun")
            .field("session", &self.session)
            .finish_non_exhaustive()
    }
}

impl PreparedRun {
    pub fn session(&self) -> &RunSession {
        &self.session
    }

    pub fn session_id(&self) -> &str {
        &self.session.id
    }

    pub fn bus(&self) -> &ProgressBus {
        &self.bus
    }

    /// Token that stops the run at the next step boundary.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

/// Sequences crawl, validators and summary for each run.
#[derive(Clone)]
pub struct RunController {
    registry: Arc<ValidatorRegistry>,
    crawler: Arc<dyn CrawlSubsystem>,
}

impl RunController {
    pub fn new(registry: Arc<ValidatorRegistry>, crawler: Arc<dyn CrawlSubsystem>) -> Self {
        Self { registry, crawler }
    }

    pub fn registry(&self) -> &ValidatorRegistry {
        &self.registry
    }

    /// Resolve the selection, create a session and publish its `pending`
    /// event.
    ///
    /// Bad bounds or an unknown validator id are rejected before any
    /// session exists.
    pub async fn prepare(&self, request: RunRequest) -> RegistryResult<PreparedRun> {
        request.bounds.validate()?;
        let validators = self.registry.resolve(request.validators.as_deref())?;

        let session = RunSession {
            id: Uuid::new_v4().to_string(),
            url: request.url,
            validator_ids: validators.iter().map(|v| v.id()).collect(),
            bounds: request.bounds,
            state: RunState::Idle,
        };
        let bus = ProgressBus::new(session.id.clone());

        // The bus is new, so it cannot be closed yet
        let queued = ProgressUpdate::crawling(EventStatus::Pending, "Crawl queued")
            .with_details(json!({ "url": session.url, "validators": session.validator_ids }));
        if let Err(err) = bus.publish(queued).await {
            tracing::warn!(error = %err, "Failed to publish queued event");
        }

        tracing::info!(
            session_id = %session.id,
            url = %session.url,
            validators = ?session.validator_ids,
            "Run prepared"
        );

        Ok(PreparedRun {
            session,
            validators,
            bus,
            cancel: CancellationToken::new(),
        })
    }

    /// Prepare and execute in one step.
    pub async fn run(&self, request: RunRequest) -> Result<RunSummary, RunError> {
        let prepared = self.prepare(request).await?;
        self.execute(prepared).await
    }

    /// Drive a prepared run to its terminal event.
    pub async fn execute(&self, run: PreparedRun) -> Result<RunSummary, RunError> {
        let PreparedRun {
            mut session,
            validators,
            bus,
            cancel,
        } = run;

        session.advance(RunState::Crawling);
        bus.publish(ProgressUpdate::crawling(
            EventStatus::Running,
            format!("Crawling {} with {}", session.url, self.crawler.name()),
        ))
        .await?;

        let crawl_request = CrawlRequest {
            url: session.url.clone(),
            bounds: session.bounds,
        };
        // Own task so a panicking crawler still ends the session
        let crawler = Arc::clone(&self.crawler);
        let mut crawl_task = tokio::spawn(async move { crawler.crawl(&crawl_request).await });
        let crawled = tokio::select! {
            joined = &mut crawl_task => joined.unwrap_or_else(|err| Err(crawl_fault(err))),
            _ = cancel.cancelled() => {
                crawl_task.abort();
                return Self::abort(&mut session, &bus, "crawling").await;
            }
        };

        let dataset = match crawled {
            Ok(dataset) => Arc::new(dataset),
            Err(err) => {
                tracing::error!(session_id = %session.id, error = %err, "Crawl failed");
                session.advance(RunState::Error);
                bus.publish(ProgressUpdate::error(
                    "crawling",
                    format!("Crawl failed: {}", err),
                ))
                .await?;
                return Err(RunError::Crawl(err));
            }
        };

        bus.publish(
            ProgressUpdate::crawling(
                EventStatus::Success,
                format!(
                    "Crawled {} page(s), captured {} request(s)",
                    dataset.page_count(),
                    dataset.request_count()
                ),
            )
            .with_details(json!({
                "pages": dataset.page_count(),
                "requests": dataset.request_count(),
                "post_events": dataset.post_events().len(),
            })),
        )
        .await?;

        let mut results = Vec::with_capacity(validators.len());
        for (index, validator) in validators.iter().enumerate() {
            let descriptor = validator.descriptor();
            if cancel.is_cancelled() {
                return Self::abort(&mut session, &bus, descriptor.id).await;
            }

            session.advance(RunState::RunningValidators(index));
            bus.publish(ProgressUpdate::validator(
                descriptor.id,
                EventStatus::Running,
                format!("Running {}...", descriptor.name),
            ))
            .await?;

            let result = run_isolated(Arc::clone(validator), Arc::clone(&dataset)).await;

            tracing::info!(
                session_id = %session.id,
                validator = descriptor.id,
                passed = result.passed,
                "Validator finished"
            );

            let status = if result.passed {
                EventStatus::Success
            } else {
                EventStatus::Failed
            };
            let mut update =
                ProgressUpdate::validator(descriptor.id, status, result.message.clone());
            update.details = serde_json::to_value(&result).ok();
            bus.publish(update).await?;

            results.push(result);
        }

        session.advance(RunState::Summarizing);
        let summary = RunSummary::new(session.id.clone(), results);

        let mut complete = ProgressUpdate::complete(format!(
            "{}/{} validators passed",
            summary.passed, summary.total
        ));
        complete.details = serde_json::to_value(&summary).ok();
        bus.publish(complete).await?;
        session.advance(RunState::Complete);

        tracing::info!(
            session_id = %session.id,
            passed = summary.passed,
            failed = summary.failed,
            "Run complete"
        );

        Ok(summary)
    }

    async fn abort(
        session: &mut RunSession,
        bus: &ProgressBus,
        stage: &str,
    ) -> Result<RunSummary, RunError> {
        tracing::info!(session_id = %session.id, stage, "Run cancelled");
        session.advance(RunState::Error);
        bus.publish(ProgressUpdate::error(stage, "run cancelled")).await?;
        Err(RunError::Cancelled)
    }
}

/// Run one validator on the blocking pool, turning faults into a failed
/// result.
async fn run_isolated(validator: Arc<dyn Validator>, dataset: Arc<Dataset>) -> ValidationResult {
    let id = validator.id();
    let outcome = tokio::task::spawn_blocking(move || validator.validate(&dataset)).await;

    match outcome {
        Ok(Ok(result)) => result,
        Ok(Err(err)) => {
            tracing::warn!(validator = id, error = %err, "Validator returned an error");
            ValidationResult::execution_fault(id, err.to_string())
        }
        Err(join_err) => {
            let diagnostic = if join_err.is_panic() {
                format!("panicked: {}", panic_message(join_err.into_panic()))
            } else {
                "task was cancelled".to_string()
            };
            tracing::error!(validator = id, %diagnostic, "Validator crashed");
            ValidationResult::execution_fault(id, diagnostic)
        }
    }
}

fn crawl_fault(err: JoinError) -> CrawlError {
    if err.is_panic() {
        CrawlError::Transport(format!(
            "crawler panicked: {}",
            panic_message(err.into_panic())
        ))
    } else {
        CrawlError::Transport("crawl task was cancelled".to_string())
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::{EventType, ProgressEvent};
    use crate::registry::ValidatorSettings;
    use crate::testing::{DatasetBuilder, Fault, FaultyValidator, MockCrawler};
    use std::time::Duration;

    const PAGE_VIEW: &str = r#"{"event":{"xdm":{
        "eventType":"web.webpagedetails.pageViews",
        "timestamp":"2024-05-01T10:00:00Z",
        "identityMap":{"ECID":[{"id":"123"}]}
    }}}"#;

    fn dataset() -> Dataset {
        DatasetBuilder::new()
            .post("https://a.test/", "https://edge.test/1", PAGE_VIEW, 1.0)
            .post("https://a.test/", "https://edge.test/2", PAGE_VIEW, 1.2)
            .build()
    }

    fn controller_with(registry: ValidatorRegistry, crawler: MockCrawler) -> RunController {
        RunController::new(Arc::new(registry), Arc::new(crawler))
    }

    fn default_registry() -> ValidatorRegistry {
        ValidatorRegistry::with_defaults(&ValidatorSettings::default()).unwrap()
    }

    fn stages(events: &[ProgressEvent]) -> Vec<String> {
        events
            .iter()
            .map(|e| {
                format!(
                    "{}/{}/{}",
                    e.event_type.as_str(),
                    e.stage,
                    serde_json::to_value(e.status).unwrap().as_str().unwrap()
                )
            })
            .collect()
    }

    #[test]
    fn test_state_transitions() {
        assert!(RunState::Idle.can_transition_to(RunState::Crawling));
        assert!(RunState::Crawling.can_transition_to(RunState::Error));
        assert!(RunState::RunningValidators(0).can_transition_to(RunState::RunningValidators(1)));
        assert!(!RunState::RunningValidators(0).can_transition_to(RunState::RunningValidators(2)));
        assert!(!RunState::Complete.can_transition_to(RunState::Error));
        assert!(!RunState::Idle.can_transition_to(RunState::Complete));
    }

    #[tokio::test]
    async fn test_full_run_event_script() {
        let controller = controller_with(default_registry(), MockCrawler::new(dataset()));
        let request = RunRequest::new("https://a.test/")
            .with_validators(["required_fields", "no_duplicate_events"]);

        let prepared = controller.prepare(request).await.unwrap();
        let bus = prepared.bus().clone();
        let summary = controller.execute(prepared).await.unwrap();

        let events = bus.snapshot().await;
        assert_eq!(
            stages(&events),
            vec![
                "crawling/crawling/pending",
                "crawling/crawling/running",
                "crawling/crawling/success",
                "validator/required_fields/running",
                "validator/required_fields/success",
                "validator/no_duplicate_events/running",
                "validator/no_duplicate_events/failed",
                "complete/complete/success",
            ]
        );
        let sequences: Vec<_> = events.iter().map(|e| e.sequence).collect();
        assert_eq!(sequences, (1..=8).collect::<Vec<u64>>());

        assert_eq!(summary.total, 2);
        assert_eq!(summary.passed, 1);
        assert_eq!(summary.failed, 1);
        assert!(bus.is_closed().await);
    }

    #[tokio::test]
    async fn test_unknown_validator_never_starts_a_run() {
        let crawler = MockCrawler::new(dataset());
        let controller = controller_with(default_registry(), crawler.clone());

        let err = controller
            .prepare(RunRequest::new("https://a.test/").with_validators(["bogus"]))
            .await
            .unwrap_err();

        assert!(err.to_string().contains("bogus"));
        assert_eq!(crawler.call_count(), 0);
    }

    #[tokio::test]
    async fn test_invalid_bounds_are_rejected() {
        let controller = controller_with(default_registry(), MockCrawler::new(dataset()));
        let request = RunRequest::new("https://a.test/")
            .with_bounds(CrawlBounds::default().with_max_pages(0));

        assert!(controller.prepare(request).await.is_err());
    }

    #[tokio::test]
    async fn test_crawl_failure_skips_validators() {
        let crawler = MockCrawler::failing("browser crashed");
        let controller = controller_with(default_registry(), crawler);

        let prepared = controller
            .prepare(RunRequest::new("https://a.test/"))
            .await
            .unwrap();
        let bus = prepared.bus().clone();
        let err = controller.execute(prepared).await.unwrap_err();

        assert!(matches!(err, RunError::Crawl(_)));
        let events = bus.snapshot().await;
        let last = events.last().unwrap();
        assert_eq!(last.event_type, EventType::Error);
        assert_eq!(last.stage, "crawling");
        assert!(last.message.contains("browser crashed"));
        assert!(events.iter().all(|e| e.event_type != EventType::Validator));
    }

    #[tokio::test]
    async fn test_faulty_validators_are_isolated() {
        let mut registry = default_registry();
        registry
            .register(Arc::new(FaultyValidator::new("explodes", Fault::Panic)))
            .unwrap();
        registry
            .register(Arc::new(FaultyValidator::new("errors", Fault::Error)))
            .unwrap();
        let controller = controller_with(registry, MockCrawler::new(dataset()));

        let summary = controller
            .run(RunRequest::new("https://a.test/").with_validators([
                "explodes",
                "required_fields",
                "errors",
                "payload_size",
            ]))
            .await
            .unwrap();

        assert_eq!(summary.total, 4);
        assert_eq!(summary.passed + summary.failed, summary.total);
        assert_eq!(summary.failed, 2);

        let exploded = &summary.results[0];
        assert!(!exploded.passed);
        assert!(exploded.message.contains("blew up"));
        assert_eq!(exploded.details.violations[0].kind, "execution_fault");

        assert!(summary.results[1].passed);
        assert!(!summary.results[2].passed);
        assert!(summary.results[3].passed);
    }

    #[tokio::test]
    async fn test_empty_selection_completes_with_zero_total() {
        let controller = controller_with(default_registry(), MockCrawler::new(dataset()));
        let summary = controller
            .run(RunRequest::new("https://a.test/").with_validators(Vec::<String>::new()))
            .await
            .unwrap();

        assert_eq!(summary.total, 0);
        assert!(summary.all_passed());
    }

    #[tokio::test]
    async fn test_panicking_crawler_ends_the_session() {
        let crawler = MockCrawler::panicking("renderer crashed");
        let controller = controller_with(default_registry(), crawler);

        let prepared = controller
            .prepare(RunRequest::new("https://a.test/"))
            .await
            .unwrap();
        let bus = prepared.bus().clone();
        let mut observer = bus.subscribe();

        let handle = tokio::spawn({
            let controller = controller.clone();
            async move { controller.execute(prepared).await }
        });

        let err = handle.await.unwrap().unwrap_err();
        assert!(matches!(err, RunError::Crawl(CrawlError::Transport(_))));
        assert!(bus.is_closed().await);

        let events = bus.snapshot().await;
        let last = events.last().unwrap();
        assert_eq!(last.event_type, EventType::Error);
        assert_eq!(last.stage, "crawling");
        assert!(last.message.contains("crawler panicked: renderer crashed"));
        assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);

        let mut seen = 0;
        while observer.next().await.is_some() {
            seen += 1;
        }
        assert_eq!(seen, events.len());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_crawl() {
        let crawler = MockCrawler::new(dataset()).with_delay(Duration::from_secs(30));
        let controller = controller_with(default_registry(), crawler);

        let prepared = controller
            .prepare(RunRequest::new("https://a.test/"))
            .await
            .unwrap();
        let bus = prepared.bus().clone();
        let token = prepared.cancellation_token();

        let handle = tokio::spawn({
            let controller = controller.clone();
            async move { controller.execute(prepared).await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        token.cancel();

        let err = handle.await.unwrap().unwrap_err();
        assert!(matches!(err, RunError::Cancelled));

        let events = bus.snapshot().await;
        let last = events.last().unwrap();
        assert_eq!(last.event_type, EventType::Error);
        assert_eq!(last.message, "run cancelled");
        assert!(events.iter().all(|e| e.event_type != EventType::Validator));
    }

    #[tokio::test]
    async fn test_cancel_before_validators_run() {
        let controller = controller_with(default_registry(), MockCrawler::new(dataset()));
        let prepared = controller
            .prepare(RunRequest::new("https://a.test/"))
            .await
            .unwrap();
        let bus = prepared.bus().clone();
        prepared.cancellation_token().cancel();

        let err = controller.execute(prepared).await.unwrap_err();
        assert!(matches!(err, RunError::Cancelled));
        assert_eq!(bus.snapshot().await.last().unwrap().message, "run cancelled");
    }

    #[tokio::test]
    async fn test_each_run_gets_its_own_session() {
        let controller = controller_with(default_registry(), MockCrawler::new(dataset()));
        let a = controller.prepare(RunRequest::new("https://a.test/")).await.unwrap();
        let b = controller.prepare(RunRequest::new("https://a.test/")).await.unwrap();

        assert_ne!(a.session_id(), b.session_id());
        assert_eq!(a.session().state(), RunState::Idle);
    }
}
