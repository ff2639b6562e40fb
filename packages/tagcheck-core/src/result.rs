//! Validator catalog entries and validation results.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Static catalog entry for one validator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ValidatorDescriptor {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub default_enabled: bool,
}

/// One rule violation found by a validator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Violation {
    /// Machine-readable category, e.g. `missing_fields` or `duplicate_cluster`
    pub kind: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_url: Option<String>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub context: Value,
}

impl Violation {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            page_url: None,
            context: Value::Null,
        }
    }

    pub fn on_page(mut self, page_url: impl Into<String>) -> Self {
        self.page_url = Some(page_url.into());
        self
    }

    pub fn with_context(mut self, context: Value) -> Self {
        self.context = context;
        self
    }
}

/// Structured breakdown attached to a result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Details {
    pub violations: Vec<Violation>,
    /// Per-page or per-event records, in capture order
    pub breakdown: Vec<Value>,
}

impl Details {
    pub fn new(violations: Vec<Violation>, breakdown: Vec<Value>) -> Self {
        Self {
            violations,
            breakdown,
        }
    }
}

/// Outcome of one validator over one dataset.
///
/// `passed` is false exactly when `details.violations` is non-empty; the
/// constructors derive it so the two cannot disagree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub validator_id: String,
    pub passed: bool,
    pub message: String,
    pub details: Details,
    pub metrics: BTreeMap<String, Value>,
}

impl ValidationResult {
    pub fn new(
        validator_id: impl Into<String>,
        message: impl Into<String>,
        details: Details,
    ) -> Self {
        Self {
            validator_id: validator_id.into(),
            passed: details.violations.is_empty(),
            message: message.into(),
            details,
            metrics: BTreeMap::new(),
        }
    }

    pub fn with_metric(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metrics.insert(name.into(), value.into());
        self
    }

    /// Failed result standing in for a validator that crashed or errored.
    pub fn execution_fault(validator_id: impl Into<String>, diagnostic: impl Into<String>) -> Self {
        let diagnostic = diagnostic.into();
        let violation = Violation::new("execution_fault", diagnostic.clone());

        Self::new(
            validator_id,
            format!("Validator execution failed: {}", diagnostic),
            Details::new(vec![violation], Vec::new()),
        )
    }

    pub fn metric(&self, name: &str) -> Option<&Value> {
        self.metrics.get(name)
    }

    pub fn metric_u64(&self, name: &str) -> Option<u64> {
        self.metric(name).and_then(Value::as_u64)
    }

    pub fn metric_f64(&self, name: &str) -> Option<f64> {
        self.metric(name).and_then(Value::as_f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_passed_follows_violations() {
        let clean = ValidationResult::new("x", "ok", Details::default());
        assert!(clean.passed);

        let dirty = ValidationResult::new(
            "x",
            "bad",
            Details::new(vec![Violation::new("k", "m")], Vec::new()),
        );
        assert!(!dirty.passed);
    }

    #[test]
    fn test_execution_fault_is_failed() {
        let result = ValidationResult::execution_fault("payload_size", "boom");
        assert!(!result.passed);
        assert_eq!(result.details.violations[0].kind, "execution_fault");
        assert!(result.message.contains("boom"));
    }

    #[test]
    fn test_violation_serialization_omits_empty_parts() {
        let json = serde_json::to_value(Violation::new("k", "m")).unwrap();
        assert_eq!(json, serde_json::json!({"kind": "k", "message": "m"}));
    }
}
