use std::collections::{BTreeMap, BTreeSet};

use regex::Regex;
use serde::Serialize;
use serde_json::{json, Value};

use crate::dataset::{Dataset, NetworkRequestRecord};
use crate::error::ValidatorError;
use crate::payload;
use crate::registry::EcidScope;
use crate::result::{Details, ValidationResult, ValidatorDescriptor, Violation};
use crate::validator::Validator;

/// Searched in order; the first pattern that matches a text wins.
const ECID_PATTERNS: [&str; 3] = [
    r#"(?i)"ecid"\s*:\s*"([^"]+)""#,
    r#"(?i)ecid=([^&\s"]+)"#,
    r#"(?i)experienceCloud\.ecid["\s:]+([^",\s]+)"#,
];

/// All tracking events in a session must share one ECID.
#[derive(Debug, Clone, Copy, Default)]
pub struct EcidConsistencyValidator {
    scope: EcidScope,
}

#[derive(Debug, Serialize)]
struct RequestEcid<'a> {
    request_url: &'a str,
    ecid: String,
}

#[derive(Debug, Serialize)]
struct PageReport<'a> {
    page_url: &'a str,
    ecids: BTreeSet<String>,
    requests_checked: usize,
    requests_with_ecid: usize,
    request_details: Vec<RequestEcid<'a>>,
}

impl EcidConsistencyValidator {
    pub fn new(scope: EcidScope) -> Self {
        Self { scope }
    }

    pub fn scope(&self) -> EcidScope {
        self.scope
    }
}

/// Scans free text for ECIDs with the pattern list.
struct TextScanner {
    patterns: Vec<Regex>,
}

impl TextScanner {
    fn compile() -> Result<Self, ValidatorError> {
        let patterns = ECID_PATTERNS
            .iter()
            .map(|p| Regex::new(p))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| ValidatorError::Internal(format!("invalid ECID pattern: {}", e)))?;
        Ok(Self { patterns })
    }

    fn find(&self, text: &str) -> Option<String> {
        if text.is_empty() {
            return None;
        }
        self.patterns.iter().find_map(|pattern| {
            pattern
                .captures(text)
                .and_then(|caps| caps.get(1))
                .map(|m| m.as_str().to_string())
        })
    }

    fn scan_headers(&self, headers: Option<&Value>, found: &mut BTreeSet<String>) {
        let Some(Value::Object(headers)) = headers else {
            return;
        };
        for value in headers.values() {
            if let Some(ecid) = value.as_str().and_then(|text| self.find(text)) {
                found.insert(ecid);
            }
        }
    }

    /// ECIDs anywhere in one exchange: URL, headers and bodies.
    fn scan_exchange(&self, record: &NetworkRequestRecord<'_>) -> BTreeSet<String> {
        let mut found = BTreeSet::new();

        if let Some(request) = record.request {
            let url = request.url.as_deref().unwrap_or(record.request_url);
            found.extend(self.find(url));

            for value in request.headers.values() {
                found.extend(value.as_str().and_then(|text| self.find(text)));
            }

            if let Some(body) = request.body() {
                found.extend(self.find(body));
            }
        }

        if let Some(response) = record.response {
            self.scan_headers(response.get("headers"), &mut found);

            match response.get("body") {
                Some(Value::Object(body)) => {
                    if let Some(text) = body.get("text").and_then(Value::as_str) {
                        found.extend(self.find(text));
                    }
                }
                Some(Value::String(text)) => found.extend(self.find(text)),
                _ => {}
            }
        }

        found
    }
}

impl EcidConsistencyValidator {
    fn record_ecids(
        &self,
        record: &NetworkRequestRecord<'_>,
        scanner: Option<&TextScanner>,
    ) -> Option<BTreeSet<String>> {
        match (self.scope, scanner) {
            (EcidScope::All, Some(scanner)) => Some(scanner.scan_exchange(record)),
            _ => {
                let body = record.event_payload()?;
                let ecid = payload::parse(body).as_ref().and_then(payload::ecid);
                Some(ecid.into_iter().collect())
            }
        }
    }
}

impl Validator for EcidConsistencyValidator {
    fn descriptor(&self) -> ValidatorDescriptor {
        ValidatorDescriptor {
            id: "ecid_consistency",
            name: "ECID Consistency",
            description: "Validates that all events share the same ECID",
            default_enabled: true,
        }
    }

    fn validate(&self, dataset: &Dataset) -> Result<ValidationResult, ValidatorError> {
        let scanner = match self.scope {
            EcidScope::All => Some(TextScanner::compile()?),
            EcidScope::PostData => None,
        };

        let mut all_ecids: BTreeSet<String> = BTreeSet::new();
        let mut pages_by_ecid: BTreeMap<String, BTreeSet<&str>> = BTreeMap::new();
        let mut total_checked = 0usize;
        let mut with_ecid = 0usize;
        let mut breakdown = Vec::new();

        for (page_url, records) in dataset.records_by_page() {
            let mut report = PageReport {
                page_url,
                ecids: BTreeSet::new(),
                requests_checked: 0,
                requests_with_ecid: 0,
                request_details: Vec::new(),
            };

            for record in &records {
                let Some(ecids) = self.record_ecids(record, scanner.as_ref()) else {
                    continue;
                };
                total_checked += 1;
                report.requests_checked += 1;

                if ecids.is_empty() {
                    continue;
                }
                with_ecid += 1;
                report.requests_with_ecid += 1;

                for ecid in ecids {
                    pages_by_ecid.entry(ecid.clone()).or_default().insert(page_url);
                    all_ecids.insert(ecid.clone());
                    report.ecids.insert(ecid.clone());
                    report.request_details.push(RequestEcid {
                        request_url: record.request_url,
                        ecid,
                    });
                }
            }

            breakdown.push(serde_json::to_value(&report)?);
        }

        let source = match self.scope {
            EcidScope::PostData => " in POST data",
            EcidScope::All => "",
        };

        let mut violations = Vec::new();
        let message = match all_ecids.len() {
            0 => format!("Warning: no ECID found{}", source),
            1 => format!(
                "All requests{} share the same ECID: {}",
                source,
                all_ecids.iter().next().map(String::as_str).unwrap_or_default()
            ),
            n => {
                let listed: Vec<&str> = all_ecids.iter().map(String::as_str).collect();
                violations.push(
                    Violation::new(
                        "multiple_ecids",
                        format!("{} distinct ECIDs observed: {}", n, listed.join(", ")),
                    )
                    .with_context(json!({ "ecids": pages_by_ecid })),
                );
                format!("Multiple ECIDs found{}: {}", source, listed.join(", "))
            }
        };

        tracing::debug!(
            scope = %self.scope,
            distinct = all_ecids.len(),
            checked = total_checked,
            "ECID scan finished"
        );

        Ok(
            ValidationResult::new(self.id(), message, Details::new(violations, breakdown))
                .with_metric("total_ecids", all_ecids.len())
                .with_metric("requests_with_ecid", with_ecid)
                .with_metric("total_checked", total_checked)
                .with_metric("scope", self.scope.as_str())
                .with_metric("ecids_found", all_ecids.into_iter().collect::<Vec<_>>()),
        )
    }
}
