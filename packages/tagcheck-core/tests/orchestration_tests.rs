//! End-to-end runs over a captured fixture.

use std::path::PathBuf;
use std::sync::Arc;

use futures::StreamExt;
use tagcheck_core::{
    Dataset, DatasetFileCrawler, EventType, RunController, RunRequest, ValidatorRegistry,
    ValidatorSettings,
};

fn fixture() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/capture.json")
}

fn controller() -> RunController {
    let registry = ValidatorRegistry::with_defaults(&ValidatorSettings::default()).unwrap();
    RunController::new(Arc::new(registry), Arc::new(DatasetFileCrawler::new(fixture())))
}

#[tokio::test]
async fn full_suite_over_fixture() {
    let summary = controller()
        .run(RunRequest::new("https://shop.test/"))
        .await
        .unwrap();

    assert_eq!(summary.total, 5);
    assert_eq!(summary.passed + summary.failed, summary.total);

    let by_id = |id: &str| {
        summary
            .results
            .iter()
            .find(|r| r.validator_id == id)
            .unwrap()
            .clone()
    };

    let required = by_id("required_fields");
    assert!(!required.passed);
    assert_eq!(required.metric_u64("missing"), Some(1));
    assert_eq!(required.metric_u64("present"), Some(4));

    let ecid = by_id("ecid_consistency");
    assert!(!ecid.passed);
    assert_eq!(ecid.metric_u64("total_ecids"), Some(2));

    let page_views = by_id("page_view_integrity");
    assert!(!page_views.passed);
    assert_eq!(page_views.metric_u64("pages_with_zero_events"), Some(1));
    assert_eq!(
        page_views.details.violations[0].page_url.as_deref(),
        Some("https://shop.test/about")
    );

    let duplicates = by_id("no_duplicate_events");
    assert!(!duplicates.passed);
    assert_eq!(duplicates.metric_u64("duplicate_groups"), Some(1));
    let span = duplicates.details.violations[0].context["time_span_seconds"]
        .as_f64()
        .unwrap();
    assert!((span - 0.342).abs() < 1e-6);

    assert!(by_id("payload_size").passed);
    assert_eq!(summary.passed, 1);
}

#[tokio::test]
async fn observer_attached_mid_run_sees_every_event() {
    let controller = controller();
    let prepared = controller
        .prepare(RunRequest::new("https://shop.test/"))
        .await
        .unwrap();

    let early = prepared.bus().subscribe();
    let bus = prepared.bus().clone();

    let run = tokio::spawn({
        let controller = controller.clone();
        async move { controller.execute(prepared).await }
    });

    let early_events: Vec<_> = early.into_stream().collect().await;
    run.await.unwrap().unwrap();

    let late_events: Vec<_> = bus.subscribe().into_stream().collect().await;

    assert_eq!(early_events, late_events);
    assert_eq!(early_events.first().unwrap().sequence, 1);
    assert_eq!(
        early_events
            .iter()
            .filter(|e| e.event_type.is_terminal())
            .count(),
        1
    );
    assert_eq!(
        early_events.last().unwrap().event_type,
        EventType::Complete
    );
    // pending, running, success, 5 x (running, result), complete
    assert_eq!(early_events.len(), 14);
}

#[tokio::test]
async fn validators_are_idempotent() {
    let dataset = Dataset::from_path(fixture()).unwrap();
    let registry = ValidatorRegistry::with_defaults(&ValidatorSettings::default()).unwrap();

    for validator in registry.default_selection() {
        let first = serde_json::to_vec(&validator.validate(&dataset).unwrap().details).unwrap();
        let second = serde_json::to_vec(&validator.validate(&dataset).unwrap().details).unwrap();
        assert_eq!(first, second, "{} is not deterministic", validator.id());
    }
}

#[tokio::test]
async fn missing_capture_fails_the_crawl_stage() {
    let registry = ValidatorRegistry::with_defaults(&ValidatorSettings::default()).unwrap();
    let controller = RunController::new(
        Arc::new(registry),
        Arc::new(DatasetFileCrawler::new("/no/such/capture.json")),
    );

    let prepared = controller
        .prepare(RunRequest::new("https://shop.test/"))
        .await
        .unwrap();
    let bus = prepared.bus().clone();
    assert!(controller.execute(prepared).await.is_err());

    let events = bus.snapshot().await;
    let last = events.last().unwrap();
    assert_eq!(last.event_type, EventType::Error);
    assert_eq!(last.stage, "crawling");
}
