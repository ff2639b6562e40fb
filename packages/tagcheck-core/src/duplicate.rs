//! Near-duplicate event detection.
//!
//! Payloads are canonicalized (object keys sorted, compact JSON) and hashed
//! with SHA-256. Events sharing a digest are chained into clusters in
//! timestamp order: an event joins its digest's current cluster when it
//! arrived within `window` seconds of that cluster's latest member, and
//! starts a new cluster otherwise.

use std::cmp::Ordering;
use std::collections::HashMap;

use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::dataset::NetworkRequestRecord;
use crate::error::{RegistryError, RegistryResult};
use crate::payload;

/// Length of the digest prefix used to identify a cluster in reports.
pub const HASH_PREFIX_LEN: usize = 16;

/// Canonical byte form of a payload.
///
/// JSON payloads are re-serialized with sorted keys and no whitespace so key
/// order does not change the result. Anything unparsable is used verbatim.
pub fn canonicalize(body: &str) -> Vec<u8> {
    match serde_json::from_str::<Value>(body) {
        Ok(value) => {
            let mut out = String::with_capacity(body.len());
            write_canonical(&value, &mut out);
            out.into_bytes()
        }
        Err(_) => body.as_bytes().to_vec(),
    }
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));

            out.push('{');
            for (i, (key, value)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(value, out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// Hex SHA-256 of the canonical payload bytes.
pub fn payload_digest(body: &str) -> String {
    hex::encode(Sha256::digest(canonicalize(body)))
}

/// Events with identical payloads sent within the window of each other.
#[derive(Debug, Clone)]
pub struct DuplicateCluster<'a> {
    pub digest: String,
    pub event_type: String,
    /// Members in timestamp order, ties broken by capture order
    pub members: Vec<NetworkRequestRecord<'a>>,
}

impl DuplicateCluster<'_> {
    pub fn count(&self) -> usize {
        self.members.len()
    }

    pub fn first_seen(&self) -> f64 {
        self.members.first().map(|m| m.timestamp).unwrap_or(0.0)
    }

    pub fn last_seen(&self) -> f64 {
        self.members.last().map(|m| m.timestamp).unwrap_or(0.0)
    }

    /// Seconds between the first and last member.
    pub fn span(&self) -> f64 {
        self.last_seen() - self.first_seen()
    }

    pub fn hash_prefix(&self) -> &str {
        &self.digest[..HASH_PREFIX_LEN.min(self.digest.len())]
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DuplicateDetector {
    window_secs: f64,
}

impl Default for DuplicateDetector {
    fn default() -> Self {
        Self {
            window_secs: Self::DEFAULT_WINDOW_SECS,
        }
    }
}

impl DuplicateDetector {
    pub const DEFAULT_WINDOW_SECS: f64 = 1.0;

    /// Window must be a finite, non-negative number of seconds.
    pub fn new(window_secs: f64) -> RegistryResult<Self> {
        if !window_secs.is_finite() || window_secs < 0.0 {
            return Err(RegistryError::InvalidSetting {
                name: "duplicate_window_secs",
                reason: format!("must be a finite number >= 0, got {}", window_secs),
            });
        }
        Ok(Self { window_secs })
    }

    pub fn window_secs(&self) -> f64 {
        self.window_secs
    }

    /// Find duplicate clusters among `records`.
    ///
    /// Records that are not POST events with a non-empty body are ignored.
    /// Clusters are returned largest first, then by earliest first member.
    pub fn detect<'a>(&self, records: &[NetworkRequestRecord<'a>]) -> Vec<DuplicateCluster<'a>> {
        let mut events: Vec<(NetworkRequestRecord<'a>, String)> = records
            .iter()
            .filter_map(|record| {
                record
                    .event_payload()
                    .map(|body| (*record, payload_digest(body)))
            })
            .collect();

        events.sort_by(|(a, _), (b, _)| capture_order(a, b));

        let mut by_digest: HashMap<String, Vec<Vec<NetworkRequestRecord<'a>>>> = HashMap::new();
        for (record, digest) in events {
            let clusters = by_digest.entry(digest).or_default();
            match clusters.last_mut() {
                Some(current) if self.joins(current, &record) => current.push(record),
                _ => clusters.push(vec![record]),
            }
        }

        let mut duplicates: Vec<DuplicateCluster<'a>> = by_digest
            .into_iter()
            .flat_map(|(digest, clusters)| {
                clusters
                    .into_iter()
                    .filter(|members| members.len() >= 2)
                    .map(move |members| DuplicateCluster {
                        event_type: members
                            .first()
                            .and_then(|m| m.post_data)
                            .and_then(payload::event_type_of)
                            .unwrap_or_else(|| "unknown".to_string()),
                        digest: digest.clone(),
                        members,
                    })
            })
            .collect();

        duplicates.sort_by(|a, b| {
            b.count()
                .cmp(&a.count())
                .then_with(|| a.first_seen().total_cmp(&b.first_seen()))
                .then_with(|| first_index(a).cmp(&first_index(b)))
        });

        tracing::debug!(
            candidates = records.len(),
            clusters = duplicates.len(),
            window_secs = self.window_secs,
            "Duplicate detection finished"
        );

        duplicates
    }

    fn joins(
        &self,
        cluster: &[NetworkRequestRecord<'_>],
        record: &NetworkRequestRecord<'_>,
    ) -> bool {
        cluster
            .last()
            .is_some_and(|latest| record.timestamp - latest.timestamp <= self.window_secs)
    }
}

fn capture_order(a: &NetworkRequestRecord<'_>, b: &NetworkRequestRecord<'_>) -> Ordering {
    a.timestamp
        .total_cmp(&b.timestamp)
        .then_with(|| a.capture_index.cmp(&b.capture_index))
}

fn first_index(cluster: &DuplicateCluster<'_>) -> usize {
    cluster.members.first().map(|m| m.capture_index).unwrap_or(usize::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::DatasetBuilder;

    #[test]
    fn test_key_order_does_not_change_digest() {
        let a = r#"{"event":{"xdm":{"eventType":"click","timestamp":"t"}},"meta":{"x":1}}"#;
        let b = r#"{"meta":{"x":1},"event":{"xdm":{"timestamp":"t","eventType":"click"}}}"#;
        assert_eq!(payload_digest(a), payload_digest(b));
    }

    #[test]
    fn test_whitespace_does_not_change_digest() {
        assert_eq!(payload_digest(r#"{"a": [1, 2]}"#), payload_digest(r#"{"a":[1,2]}"#));
    }

    #[test]
    fn test_unparsable_payload_hashes_raw_bytes() {
        assert_eq!(canonicalize("not{json"), b"not{json".to_vec());
        assert_eq!(payload_digest("not{json"), payload_digest("not{json"));
        assert_ne!(payload_digest("not{json"), payload_digest("not{json "));
    }

    #[test]
    fn test_canonical_form_is_compact_and_sorted() {
        let bytes = canonicalize(r#"{"b": {"d": 1, "c": "x"}, "a": null}"#);
        assert_eq!(String::from_utf8(bytes).unwrap(), r#"{"a":null,"b":{"c":"x","d":1}}"#);
    }

    #[test]
    fn test_rejects_negative_or_non_finite_window() {
        assert!(DuplicateDetector::new(-0.1).is_err());
        assert!(DuplicateDetector::new(f64::NAN).is_err());
        assert!(DuplicateDetector::new(f64::INFINITY).is_err());
        assert!(DuplicateDetector::new(0.0).is_ok());
    }

    #[test]
    fn test_two_identical_payloads_inside_window() {
        let dataset = DatasetBuilder::new()
            .post("https://a.test/", "https://edge.test/1", r#"{"eventType":"click"}"#, 0.0)
            .post("https://a.test/", "https://edge.test/2", r#"{"eventType":"click"}"#, 0.342)
            .build();

        let clusters = DuplicateDetector::default().detect(&dataset.post_events());
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].count(), 2);
        assert!((clusters[0].span() - 0.342).abs() < 1e-9);
        assert_eq!(clusters[0].event_type, "click");
        assert_eq!(clusters[0].hash_prefix().len(), HASH_PREFIX_LEN);
    }

    #[test]
    fn test_chain_breaks_on_gap_larger_than_window() {
        let dataset = DatasetBuilder::new()
            .post("p", "r1", "{}", 0.0)
            .post("p", "r2", "{}", 0.8)
            .post("p", "r3", "{}", 1.6)
            .post("p", "r4", "{}", 3.0)
            .post("p", "r5", "{}", 3.5)
            .build();

        let clusters = DuplicateDetector::new(1.0).unwrap().detect(&dataset.post_events());

        // 0.0 -> 0.8 -> 1.6 chains pairwise; 3.0 is 1.4s after 1.6
        assert_eq!(clusters.len(), 2);
        assert_eq!(clusters[0].count(), 3);
        assert!((clusters[0].span() - 1.6).abs() < 1e-9);
        assert_eq!(clusters[1].count(), 2);
        assert_eq!(clusters[1].first_seen(), 3.0);
    }

    #[test]
    fn test_zero_window_matches_only_simultaneous_events() {
        let dataset = DatasetBuilder::new()
            .post("p", "r1", "{}", 5.0)
            .post("p", "r2", "{}", 5.0)
            .post("p", "r3", "{}", 5.001)
            .build();

        let clusters = DuplicateDetector::new(0.0).unwrap().detect(&dataset.post_events());
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].count(), 2);
        assert_eq!(clusters[0].span(), 0.0);
    }

    #[test]
    fn test_different_payloads_never_cluster() {
        let dataset = DatasetBuilder::new()
            .post("p", "r1", r#"{"n":1}"#, 0.0)
            .post("p", "r2", r#"{"n":2}"#, 0.0)
            .build();

        assert!(DuplicateDetector::default().detect(&dataset.post_events()).is_empty());
    }

    #[test]
    fn test_ties_keep_capture_order() {
        let dataset = DatasetBuilder::new()
            .post("p", "first", "{}", 1.0)
            .post("p", "second", "{}", 1.0)
            .build();

        let clusters = DuplicateDetector::default().detect(&dataset.post_events());
        let urls: Vec<_> = clusters[0].members.iter().map(|m| m.request_url).collect();
        assert_eq!(urls, vec!["first", "second"]);
    }

    #[test]
    fn test_clusters_sorted_by_size_then_first_seen() {
        let dataset = DatasetBuilder::new()
            .post("p", "a1", r#"{"a":1}"#, 10.0)
            .post("p", "a2", r#"{"a":1}"#, 10.1)
            .post("p", "b1", r#"{"b":1}"#, 20.0)
            .post("p", "b2", r#"{"b":1}"#, 20.1)
            .post("p", "b3", r#"{"b":1}"#, 20.2)
            .post("p", "c1", r#"{"c":1}"#, 5.0)
            .post("p", "c2", r#"{"c":1}"#, 5.1)
            .build();

        let clusters = DuplicateDetector::default().detect(&dataset.post_events());
        let firsts: Vec<_> = clusters.iter().map(|c| c.members[0].request_url).collect();
        assert_eq!(firsts, vec!["b1", "c1", "a1"]);
    }

    #[test]
    fn test_non_post_and_empty_bodies_are_ignored() {
        let dataset = DatasetBuilder::new()
            .get("p", "g1", 0.0)
            .get("p", "g2", 0.0)
            .post("p", "e1", "", 0.0)
            .post("p", "e2", "", 0.0)
            .build();

        assert!(DuplicateDetector::default().detect(&dataset.records()).is_empty());
    }
}
