use serde::Serialize;

use super::truncate_url;
use crate::dataset::Dataset;
use crate::error::{RegistryError, RegistryResult, ValidatorError};
use crate::payload;
use crate::result::{Details, ValidationResult, ValidatorDescriptor, Violation};
use crate::validator::Validator;

/// Human-readable size: KB below one megabyte, MB above.
pub fn format_size(size_bytes: usize) -> String {
    let kb = size_bytes as f64 / 1024.0;
    if kb < 1024.0 {
        format!("{:.2} KB", kb)
    } else {
        format!("{:.2} MB", kb / 1024.0)
    }
}

/// POST bodies must not exceed a size limit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PayloadSizeValidator {
    limit_kb: f64,
    limit_bytes: usize,
}

#[derive(Debug, Serialize)]
struct OversizedPayload {
    request_url: String,
    timestamp: f64,
    event_type: Option<String>,
    size_bytes: usize,
    size_formatted: String,
    exceeds_by: usize,
    exceeds_by_formatted: String,
    percentage: f64,
}

#[derive(Debug, Serialize)]
struct PageReport<'a> {
    page_url: &'a str,
    post_requests: usize,
    payloads_under_limit: usize,
    payloads_over_limit: usize,
}

impl Default for PayloadSizeValidator {
    fn default() -> Self {
        Self {
            limit_kb: Self::DEFAULT_LIMIT_KB,
            limit_bytes: (Self::DEFAULT_LIMIT_KB * 1024.0) as usize,
        }
    }
}

impl PayloadSizeValidator {
    pub const DEFAULT_LIMIT_KB: f64 = 32.0;

    /// `limit_kb` must be finite and at least one byte once converted.
    pub fn new(limit_kb: f64) -> RegistryResult<Self> {
        let limit_bytes = (limit_kb * 1024.0).floor();
        if !limit_kb.is_finite() || limit_bytes < 1.0 {
            return Err(RegistryError::InvalidSetting {
                name: "payload_limit_kb",
                reason: format!("must be a positive size of at least 1 byte, got {}", limit_kb),
            });
        }
        Ok(Self {
            limit_kb,
            limit_bytes: limit_bytes as usize,
        })
    }

    pub fn limit_kb(&self) -> f64 {
        self.limit_kb
    }

    pub fn limit_bytes(&self) -> usize {
        self.limit_bytes
    }
}

impl Validator for PayloadSizeValidator {
    fn descriptor(&self) -> ValidatorDescriptor {
        ValidatorDescriptor {
            id: "payload_size",
            name: "Payload Size",
            description: "Validates that all payloads are under the size limit (default 32 KB)",
            default_enabled: true,
        }
    }

    fn validate(&self, dataset: &Dataset) -> Result<ValidationResult, ValidatorError> {
        let mut sizes = Vec::new();
        let mut violations = Vec::new();
        let mut breakdown = Vec::new();

        for (page_url, records) in dataset.records_by_page() {
            let mut report = PageReport {
                page_url,
                post_requests: 0,
                payloads_under_limit: 0,
                payloads_over_limit: 0,
            };

            for record in &records {
                let Some(body) = record.event_payload() else {
                    continue;
                };
                let size_bytes = body.len();
                sizes.push(size_bytes);
                report.post_requests += 1;

                if size_bytes <= self.limit_bytes {
                    report.payloads_under_limit += 1;
                    continue;
                }
                report.payloads_over_limit += 1;

                let exceeds_by = size_bytes - self.limit_bytes;
                let oversized = OversizedPayload {
                    request_url: truncate_url(record.request_url),
                    timestamp: record.timestamp,
                    event_type: payload::event_type_of(body),
                    size_bytes,
                    size_formatted: format_size(size_bytes),
                    exceeds_by,
                    exceeds_by_formatted: format_size(exceeds_by),
                    percentage: size_bytes as f64 / self.limit_bytes as f64 * 100.0,
                };

                violations.push(
                    Violation::new(
                        "payload_too_large",
                        format!(
                            "{} exceeds limit by {} ({:.1}% of limit)",
                            oversized.size_formatted,
                            oversized.exceeds_by_formatted,
                            oversized.percentage
                        ),
                    )
                    .on_page(page_url)
                    .with_context(serde_json::to_value(&oversized)?),
                );
            }

            breakdown.push(serde_json::to_value(&report)?);
        }

        let total = sizes.len();
        let over = violations.len();
        let largest = sizes.iter().copied().max().unwrap_or(0);
        let smallest = sizes.iter().copied().min().unwrap_or(0);
        let average = if total == 0 {
            0.0
        } else {
            sizes.iter().sum::<usize>() as f64 / total as f64
        };

        let message = if over == 0 {
            format!("All {} payloads are under {} KB limit", total, self.limit_kb)
        } else {
            format!(
                "Payload size validation failed: {}/{} payload(s) exceed {} KB limit",
                over, total, self.limit_kb
            )
        };

        Ok(
            ValidationResult::new(self.id(), message, Details::new(violations, breakdown))
                .with_metric("total_post_requests", total)
                .with_metric("payloads_under_limit", total - over)
                .with_metric("payloads_over_limit", over)
                .with_metric("max_size_kb", self.limit_kb)
                .with_metric("max_size_bytes", self.limit_bytes)
                .with_metric("largest_payload_size", largest)
                .with_metric("smallest_payload_size", smallest)
                .with_metric("average_payload_size", average),
        )
    }
}
