use std::collections::BTreeMap;

use serde::Serialize;

use super::truncate_url;
use crate::dataset::{Dataset, NetworkRequestRecord};
use crate::error::ValidatorError;
use crate::payload::{self, EVENT_TYPE, IDENTITY_MAP, TIMESTAMP};
use crate::result::{Details, ValidationResult, ValidatorDescriptor, Violation};
use crate::validator::Validator;

const REQUIRED: [&str; 3] = [EVENT_TYPE, TIMESTAMP, IDENTITY_MAP];

/// Every POST event must carry `eventType`, `timestamp` and `identityMap`.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequiredFieldsValidator;

#[derive(Debug)]
struct FieldCheck {
    missing: Vec<&'static str>,
    event_type: Option<String>,
    parse_error: bool,
}

fn check(body: &str) -> FieldCheck {
    match payload::parse(body) {
        Some(doc) => FieldCheck {
            missing: REQUIRED
                .iter()
                .copied()
                .filter(|name| payload::field(&doc, name).is_none())
                .collect(),
            event_type: payload::event_type(&doc),
            parse_error: false,
        },
        None => FieldCheck {
            missing: REQUIRED.to_vec(),
            event_type: None,
            parse_error: true,
        },
    }
}

#[derive(Debug, Serialize)]
struct MissingEvent {
    request_url: String,
    timestamp: f64,
    missing_fields: Vec<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    event_type: Option<String>,
    parse_error: bool,
}

#[derive(Debug, Serialize)]
struct PageReport<'a> {
    page_url: &'a str,
    post_requests: usize,
    events_with_all_fields: usize,
    events_missing_fields: usize,
    missing_events: Vec<MissingEvent>,
}

impl Validator for RequiredFieldsValidator {
    fn descriptor(&self) -> ValidatorDescriptor {
        ValidatorDescriptor {
            id: "required_fields",
            name: "Required Fields",
            description: "Validates that all events contain eventType, timestamp, and identityMap",
            default_enabled: true,
        }
    }

    fn validate(&self, dataset: &Dataset) -> Result<ValidationResult, ValidatorError> {
        let mut total = 0usize;
        let mut complete = 0usize;
        let mut missing_by_field: BTreeMap<&'static str, usize> =
            REQUIRED.iter().map(|name| (*name, 0)).collect();

        let mut violations = Vec::new();
        let mut breakdown = Vec::new();

        for (page_url, records) in dataset.records_by_page() {
            let events: Vec<NetworkRequestRecord<'_>> =
                records.into_iter().filter(|r| r.is_post_event()).collect();

            let mut report = PageReport {
                page_url,
                post_requests: events.len(),
                events_with_all_fields: 0,
                events_missing_fields: 0,
                missing_events: Vec::new(),
            };

            for event in &events {
                let fields = check(event.post_data.unwrap_or_default());
                total += 1;

                if fields.missing.is_empty() {
                    complete += 1;
                    report.events_with_all_fields += 1;
                    continue;
                }

                report.events_missing_fields += 1;
                for name in &fields.missing {
                    *missing_by_field.entry(*name).or_default() += 1;
                }

                let missing = MissingEvent {
                    request_url: truncate_url(event.request_url),
                    timestamp: event.timestamp,
                    missing_fields: fields.missing,
                    event_type: fields.event_type,
                    parse_error: fields.parse_error,
                };

                let message = if missing.parse_error {
                    "payload could not be parsed".to_string()
                } else {
                    format!("missing {}", missing.missing_fields.join(", "))
                };
                violations.push(
                    Violation::new("missing_fields", message)
                        .on_page(page_url)
                        .with_context(serde_json::to_value(&missing)?),
                );
                report.missing_events.push(missing);
            }

            breakdown.push(serde_json::to_value(&report)?);
        }

        let incomplete = total - complete;
        let message = if incomplete == 0 {
            format!(
                "All {} events have required fields (eventType, timestamp, identityMap)",
                total
            )
        } else {
            format!(
                "Required fields validation failed: {}/{} event(s) missing required fields",
                incomplete, total
            )
        };

        let mut result =
            ValidationResult::new(self.id(), message, Details::new(violations, breakdown))
                .with_metric("total_post_requests", total)
                .with_metric("present", complete)
                .with_metric("missing", incomplete);

        for (name, missing) in missing_by_field {
            result = result
                .with_metric(format!("{}_missing", name), missing)
                .with_metric(format!("{}_present", name), total - missing);
        }

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::DatasetBuilder;

    const COMPLETE: &str = r#"{"event":{"xdm":{
        "eventType":"web.webpagedetails.pageViews",
        "timestamp":"2024-05-01T10:00:00Z",
        "identityMap":{"ECID":[{"id":"123"}]}
    }}}"#;

    const NO_IDENTITY: &str = r#"{"event":{"xdm":{
        "eventType":"web.webinteraction.linkClicks",
        "timestamp":"2024-05-01T10:00:01Z"
    }}}"#;

    #[test]
    fn test_two_of_four_missing_identity_map() {
        let dataset = DatasetBuilder::new()
            .post("https://a.test/", "r1", COMPLETE, 1.0)
            .post("https://a.test/", "r2", NO_IDENTITY, 2.0)
            .post("https://a.test/b", "r3", COMPLETE, 3.0)
            .post("https://a.test/b", "r4", NO_IDENTITY, 4.0)
            .build();

        let result = RequiredFieldsValidator.validate(&dataset).unwrap();

        assert!(!result.passed);
        assert_eq!(result.metric_u64("missing"), Some(2));
        assert_eq!(result.metric_u64("present"), Some(2));
        assert_eq!(result.metric_u64("total_post_requests"), Some(4));
        assert_eq!(result.metric_u64("identityMap_missing"), Some(2));
        assert_eq!(result.metric_u64("eventType_missing"), Some(0));
        assert_eq!(result.details.violations.len(), 2);
        assert_eq!(result.details.breakdown.len(), 2);
    }

    #[test]
    fn test_all_complete_passes() {
        let dataset = DatasetBuilder::new()
            .post("https://a.test/", "r1", COMPLETE, 1.0)
            .get("https://a.test/", "r2", 1.5)
            .build();

        let result = RequiredFieldsValidator.validate(&dataset).unwrap();
        assert!(result.passed);
        assert_eq!(result.metric_u64("total_post_requests"), Some(1));
    }

    #[test]
    fn test_top_level_fields_are_accepted() {
        let body = r#"{"eventType":"x","timestamp":"t","identityMap":{"ECID":[]},"event":{"xdm":{}}}"#;
        let dataset = DatasetBuilder::new().post("p", "r", body, 0.0).build();

        assert!(RequiredFieldsValidator.validate(&dataset).unwrap().passed);
    }

    #[test]
    fn test_empty_values_count_as_missing() {
        let body = r#"{"eventType":"","timestamp":"t","identityMap":{}}"#;
        let dataset = DatasetBuilder::new().post("p", "r", body, 0.0).build();

        let result = RequiredFieldsValidator.validate(&dataset).unwrap();
        assert_eq!(result.metric_u64("eventType_missing"), Some(1));
        assert_eq!(result.metric_u64("identityMap_missing"), Some(1));
        assert_eq!(result.metric_u64("timestamp_missing"), Some(0));
    }

    #[test]
    fn test_unparsable_payload_is_a_violation_not_an_error() {
        let dataset = DatasetBuilder::new().post("p", "r", "garbage{", 0.0).build();

        let result = RequiredFieldsValidator.validate(&dataset).unwrap();
        assert!(!result.passed);
        assert_eq!(result.details.violations[0].context["parse_error"], true);
        assert_eq!(result.metric_u64("timestamp_missing"), Some(1));
    }

    #[test]
    fn test_no_events_passes() {
        let dataset = DatasetBuilder::new().page("https://a.test/").build();
        let result = RequiredFieldsValidator.validate(&dataset).unwrap();
        assert!(result.passed);
        assert_eq!(result.metric_u64("total_post_requests"), Some(0));
    }
}
