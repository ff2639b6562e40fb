use serde::Serialize;
use serde_json::json;

use crate::dataset::Dataset;
use crate::error::ValidatorError;
use crate::payload::{self, PAGE_VIEW_EVENT};
use crate::result::{Details, ValidationResult, ValidatorDescriptor, Violation};
use crate::validator::Validator;

/// Each crawled page must fire exactly one page-view event.
#[derive(Debug, Clone, Copy, Default)]
pub struct PageViewIntegrityValidator;

#[derive(Debug, Serialize)]
struct PageViewEvent<'a> {
    request_url: &'a str,
    /// `web.webPageDetails.URL` reported by the event itself
    event_page_url: Option<String>,
    timestamp: f64,
}

#[derive(Debug, Serialize)]
struct PageReport<'a> {
    page_url: &'a str,
    page_view_count: usize,
    total_post_requests: usize,
    page_view_events: Vec<PageViewEvent<'a>>,
}

impl Validator for PageViewIntegrityValidator {
    fn descriptor(&self) -> ValidatorDescriptor {
        ValidatorDescriptor {
            id: "page_view_integrity",
            name: "Page View Integrity",
            description: "Validates that each page has exactly 1 page view event",
            default_enabled: true,
        }
    }

    fn validate(&self, dataset: &Dataset) -> Result<ValidationResult, ValidatorError> {
        let mut with_one = 0usize;
        let mut with_zero = 0usize;
        let mut with_many = 0usize;
        let mut violations = Vec::new();
        let mut breakdown = Vec::new();

        for (page_url, records) in dataset.records_by_page() {
            let mut total_post_requests = 0;
            let mut page_view_events = Vec::new();

            for record in records.iter().filter(|r| r.is_post_event()) {
                total_post_requests += 1;

                let Some(doc) = record.post_data.and_then(payload::parse) else {
                    continue;
                };
                if payload::event_type(&doc).as_deref() == Some(PAGE_VIEW_EVENT) {
                    page_view_events.push(PageViewEvent {
                        request_url: record.request_url,
                        event_page_url: payload::page_url(&doc),
                        timestamp: record.timestamp,
                    });
                }
            }

            let count = page_view_events.len();
            match count {
                1 => with_one += 1,
                0 => {
                    with_zero += 1;
                    violations.push(
                        Violation::new("missing_page_view", "No page view event")
                            .on_page(page_url)
                            .with_context(json!({ "page_view_count": 0 })),
                    );
                }
                n => {
                    with_many += 1;
                    violations.push(
                        Violation::new(
                            "multiple_page_views",
                            format!("{} page view events (expected 1)", n),
                        )
                        .on_page(page_url)
                        .with_context(json!({ "page_view_count": n })),
                    );
                }
            }

            breakdown.push(serde_json::to_value(PageReport {
                page_url,
                page_view_count: count,
                total_post_requests,
                page_view_events,
            })?);
        }

        let total_pages = dataset.page_count();
        let message = if violations.is_empty() {
            format!("All {} pages have exactly 1 page view event", total_pages)
        } else {
            format!(
                "Page view integrity check failed: {}/{} pages have correct count",
                with_one, total_pages
            )
        };

        Ok(
            ValidationResult::new(self.id(), message, Details::new(violations, breakdown))
                .with_metric("total_pages", total_pages)
                .with_metric("pages_with_one_event", with_one)
                .with_metric("pages_with_zero_events", with_zero)
                .with_metric("pages_with_multiple_events", with_many),
        )
    }
}
