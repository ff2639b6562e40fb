use serde::Serialize;

use super::truncate_url;
use crate::dataset::Dataset;
use crate::duplicate::{DuplicateCluster, DuplicateDetector};
use crate::error::ValidatorError;
use crate::payload;
use crate::result::{Details, ValidationResult, ValidatorDescriptor, Violation};
use crate::validator::Validator;

/// Identical payloads must not be sent twice within the duplicate window.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoDuplicateEventsValidator {
    detector: DuplicateDetector,
}

impl NoDuplicateEventsValidator {
    pub fn new(detector: DuplicateDetector) -> Self {
        Self { detector }
    }

    pub fn window_secs(&self) -> f64 {
        self.detector.window_secs()
    }
}

#[derive(Debug, Serialize)]
struct ClusterMember<'a> {
    page_url: &'a str,
    request_url: String,
    timestamp: f64,
    event_type: String,
}

#[derive(Debug, Serialize)]
struct ClusterReport<'a> {
    event_type: &'a str,
    count: usize,
    first_seen: f64,
    time_span_seconds: f64,
    hash_prefix: &'a str,
    payload_hash: &'a str,
    events: Vec<ClusterMember<'a>>,
}

impl<'a> From<&'a DuplicateCluster<'a>> for ClusterReport<'a> {
    fn from(cluster: &'a DuplicateCluster<'a>) -> Self {
        Self {
            event_type: &cluster.event_type,
            count: cluster.count(),
            first_seen: cluster.first_seen(),
            time_span_seconds: cluster.span(),
            hash_prefix: cluster.hash_prefix(),
            payload_hash: &cluster.digest,
            events: cluster
                .members
                .iter()
                .map(|member| ClusterMember {
                    page_url: member.page_url,
                    request_url: truncate_url(member.request_url),
                    timestamp: member.timestamp,
                    event_type: member
                        .post_data
                        .and_then(payload::event_type_of)
                        .unwrap_or_else(|| "unknown".to_string()),
                })
                .collect(),
        }
    }
}

#[derive(Debug, Serialize)]
struct PageReport<'a> {
    page_url: &'a str,
    post_requests: usize,
}

impl Validator for NoDuplicateEventsValidator {
    fn descriptor(&self) -> ValidatorDescriptor {
        ValidatorDescriptor {
            id: "no_duplicate_events",
            name: "No Duplicate Events",
            description: "Validates that no duplicate events occur within a time window",
            default_enabled: true,
        }
    }

    fn validate(&self, dataset: &Dataset) -> Result<ValidationResult, ValidatorError> {
        let events = dataset.post_events();
        let clusters = self.detector.detect(&events);
        let window = self.detector.window_secs();

        let mut violations = Vec::with_capacity(clusters.len());
        for cluster in &clusters {
            let report = ClusterReport::from(cluster);
            let message = format!(
                "{} identical '{}' events within {:.3}s (hash {}...)",
                report.count, report.event_type, report.time_span_seconds, report.hash_prefix
            );
            violations.push(
                Violation::new("duplicate_cluster", message)
                    .on_page(report.events.first().map(|e| e.page_url).unwrap_or_default())
                    .with_context(serde_json::to_value(&report)?),
            );
        }

        let breakdown = dataset
            .records_by_page()
            .into_iter()
            .map(|(page_url, records)| {
                serde_json::to_value(PageReport {
                    page_url,
                    post_requests: records.iter().filter(|r| r.is_post_event()).count(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let total_duplicates: usize = clusters.iter().map(|c| c.count() - 1).sum();
        let message = if clusters.is_empty() {
            format!(
                "No duplicate events found (checked {} POST requests)",
                events.len()
            )
        } else {
            format!(
                "Found {} duplicate group(s) with {} duplicate event(s) within {}s window",
                clusters.len(),
                total_duplicates,
                window
            )
        };

        Ok(
            ValidationResult::new(self.id(), message, Details::new(violations, breakdown))
                .with_metric("total_post_requests", events.len())
                .with_metric("duplicate_groups", clusters.len())
                .with_metric("total_duplicates", total_duplicates)
                .with_metric("time_window_seconds", window),
        )
    }
}
