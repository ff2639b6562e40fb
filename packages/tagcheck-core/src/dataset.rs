//! Captured network-trace dataset.
//!
//! The on-disk format is the one the capture proxy writes:
//!
//! ```text
//! {
//!   "<page url>": {
//!     "html": "...",
//!     "networkRequests": {
//!       "<request url>": {
//!         "request": {"method", "post_data" | "payload", "timestamp", ...},
//!         "response": {...},
//!         "response_failure": {...}
//!       }
//!     }
//!   }
//! }
//! ```
//!
//! Key order is preserved on load, which defines capture order.

use std::path::Path;

use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::{DatasetError, DatasetResult};

/// Full captured dataset: page URL -> captured page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Dataset {
    pub pages: IndexMap<String, CapturedPage>,
}

/// One crawled page and the tracking traffic it produced.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CapturedPage {
    #[serde(default, deserialize_with = "null_as_default")]
    pub html: String,

    #[serde(
        rename = "networkRequests",
        default,
        deserialize_with = "null_as_default"
    )]
    pub network_requests: IndexMap<String, NetworkExchange>,
}

/// Request/response pair captured for one request URL.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkExchange {
    #[serde(default)]
    pub request: Option<CapturedRequest>,
    #[serde(default)]
    pub response: Option<Value>,
    #[serde(default)]
    pub response_failure: Option<Value>,
}

/// Captured request line, headers and body.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CapturedRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    #[serde(default, deserialize_with = "null_as_default")]
    pub method: String,

    #[serde(
        default,
        deserialize_with = "null_as_default",
        skip_serializing_if = "IndexMap::is_empty"
    )]
    pub headers: IndexMap<String, Value>,

    /// Body as read by the validators.
    #[serde(
        default,
        deserialize_with = "body_text",
        skip_serializing_if = "Option::is_none"
    )]
    pub post_data: Option<String>,

    /// Body as written by the capture proxy.
    #[serde(
        default,
        deserialize_with = "body_text",
        skip_serializing_if = "Option::is_none"
    )]
    pub payload: Option<String>,

    /// Seconds since the epoch.
    #[serde(default, deserialize_with = "null_as_default")]
    pub timestamp: f64,
}

impl CapturedRequest {
    /// Request body, preferring `post_data` over `payload`.
    pub fn body(&self) -> Option<&str> {
        self.post_data.as_deref().or(self.payload.as_deref())
    }
}

/// Flattened, immutable view of one captured request.
#[derive(Debug, Clone, Copy)]
pub struct NetworkRequestRecord<'a> {
    /// Position in capture order across the whole dataset.
    pub capture_index: usize,
    pub page_url: &'a str,
    pub request_url: &'a str,
    pub method: &'a str,
    pub post_data: Option<&'a str>,
    pub timestamp: f64,
    pub request: Option<&'a CapturedRequest>,
    pub response: Option<&'a Value>,
    pub failure: Option<&'a Value>,
}

impl<'a> NetworkRequestRecord<'a> {
    fn new(
        capture_index: usize,
        page_url: &'a str,
        request_url: &'a str,
        exchange: &'a NetworkExchange,
    ) -> Self {
        let request = exchange.request.as_ref();
        Self {
            capture_index,
            page_url,
            request_url,
            method: request.map(|r| r.method.as_str()).unwrap_or(""),
            post_data: request.and_then(CapturedRequest::body),
            timestamp: request.map(|r| r.timestamp).unwrap_or(0.0),
            request,
            response: exchange.response.as_ref(),
            failure: exchange.response_failure.as_ref(),
        }
    }

    /// POST request carrying a non-empty body.
    pub fn is_post_event(&self) -> bool {
        self.method == "POST" && self.post_data.is_some_and(|body| !body.is_empty())
    }

    /// Non-empty POST body, if this record is a POST event.
    pub fn event_payload(&self) -> Option<&'a str> {
        if self.is_post_event() {
            self.post_data
        } else {
            None
        }
    }
}

impl Dataset {
    /// Load a dataset from a JSON file.
    pub fn from_path(path: impl AsRef<Path>) -> DatasetResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| DatasetError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let dataset = Self::from_json_str(&content)?;

        tracing::debug!(
            path = %path.display(),
            pages = dataset.page_count(),
            requests = dataset.request_count(),
            "Loaded dataset"
        );

        Ok(dataset)
    }

    /// Parse a dataset from JSON text.
    pub fn from_json_str(content: &str) -> DatasetResult<Self> {
        Ok(serde_json::from_str(content)?)
    }

    /// Pretty-printed JSON in the capture format.
    pub fn to_json_string_pretty(&self) -> DatasetResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Write the dataset to a JSON file.
    pub fn write_to_path(&self, path: impl AsRef<Path>) -> DatasetResult<()> {
        let path = path.as_ref();
        let json = self.to_json_string_pretty()?;
        std::fs::write(path, json).map_err(|source| DatasetError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    pub fn request_count(&self) -> usize {
        self.pages.values().map(|p| p.network_requests.len()).sum()
    }

    /// Records grouped by page, in capture order. Pages without traffic
    /// are included with an empty list.
    pub fn records_by_page(&self) -> Vec<(&str, Vec<NetworkRequestRecord<'_>>)> {
        let mut next_index = 0;
        let mut grouped = Vec::with_capacity(self.pages.len());

        for (page_url, page) in &self.pages {
            let mut records = Vec::with_capacity(page.network_requests.len());
            for (request_url, exchange) in &page.network_requests {
                records.push(NetworkRequestRecord::new(
                    next_index,
                    page_url,
                    request_url,
                    exchange,
                ));
                next_index += 1;
            }
            grouped.push((page_url.as_str(), records));
        }

        grouped
    }

    /// Every captured request, in capture order.
    pub fn records(&self) -> Vec<NetworkRequestRecord<'_>> {
        self.records_by_page()
            .into_iter()
            .flat_map(|(_, records)| records)
            .collect()
    }

    /// POST requests with a non-empty body, in capture order.
    pub fn post_events(&self) -> Vec<NetworkRequestRecord<'_>> {
        self.records()
            .into_iter()
            .filter(NetworkRequestRecord::is_post_event)
            .collect()
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Accept a body as a string, or keep any other JSON value as its text.
fn body_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => None,
        Some(Value::String(text)) => Some(text),
        Some(other) => Some(other.to_string()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "https://example.com/": {
            "html": "",
            "networkRequests": {
                "https://edge.adobedc.net/ee/v1/interact?a=1": {
                    "request": {
                        "method": "POST",
                        "post_data": "{\"event\":{}}",
                        "timestamp": 1700000000.5
                    },
                    "response": null
                },
                "https://edge.adobedc.net/ee/v1/collect": {
                    "request": {"method": "GET", "timestamp": 1700000001}
                }
            }
        },
        "https://example.com/about": {
            "html": null,
            "networkRequests": {
                "https://edge.adobedc.net/ee/v1/interact?b=2": {
                    "request": {"method": "POST", "payload": "{}", "timestamp": null}
                }
            }
        }
    }"#;

    #[test]
    fn test_parses_capture_format() {
        let dataset = Dataset::from_json_str(SAMPLE).unwrap();
        assert_eq!(dataset.page_count(), 2);
        assert_eq!(dataset.request_count(), 3);

        let about = &dataset.pages["https://example.com/about"];
        assert_eq!(about.html, "");
    }

    #[test]
    fn test_records_preserve_capture_order() {
        let dataset = Dataset::from_json_str(SAMPLE).unwrap();
        let records = dataset.records();

        let indices: Vec<_> = records.iter().map(|r| r.capture_index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
        assert_eq!(records[0].page_url, "https://example.com/");
        assert_eq!(records[2].page_url, "https://example.com/about");
    }

    #[test]
    fn test_payload_key_is_accepted_as_body() {
        let dataset = Dataset::from_json_str(SAMPLE).unwrap();
        let events = dataset.post_events();

        assert_eq!(events.len(), 2);
        assert_eq!(events[1].post_data, Some("{}"));
        assert_eq!(events[1].timestamp, 0.0);
    }

    #[test]
    fn test_post_data_wins_over_payload() {
        let request = CapturedRequest {
            method: "POST".into(),
            post_data: Some("a".into()),
            payload: Some("b".into()),
            ..Default::default()
        };
        assert_eq!(request.body(), Some("a"));
    }

    #[test]
    fn test_non_string_body_is_kept_as_json_text() {
        let json = r#"{"p": {"networkRequests": {"r": {"request": {
            "method": "POST", "post_data": {"b": 1, "a": 2}, "timestamp": 1.0
        }}}}}"#;
        let dataset = Dataset::from_json_str(json).unwrap();
        let events = dataset.post_events();
        assert_eq!(events.len(), 1);
        assert!(events[0].post_data.unwrap().contains("\"b\":1"));
    }

    #[test]
    fn test_empty_body_is_not_an_event() {
        let json = r#"{"p": {"networkRequests": {"r": {"request": {
            "method": "POST", "post_data": "", "timestamp": 1.0
        }}}}}"#;
        let dataset = Dataset::from_json_str(json).unwrap();
        assert!(dataset.post_events().is_empty());
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = Dataset::from_path("/definitely/not/here.json").unwrap_err();
        assert!(matches!(err, DatasetError::Io { .. }));
    }

    #[test]
    fn test_malformed_content_is_rejected() {
        let err = Dataset::from_json_str("[1, 2, 3]").unwrap_err();
        assert!(matches!(err, DatasetError::Malformed(_)));
    }

    #[test]
    fn test_write_and_reload() {
        let dataset = Dataset::from_json_str(SAMPLE).unwrap();
        let path = std::env::temp_dir().join(format!("tagcheck-{}.json", uuid::Uuid::new_v4()));

        dataset.write_to_path(&path).unwrap();
        let reloaded = Dataset::from_path(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(reloaded.records().len(), dataset.records().len());
        assert_eq!(
            reloaded.post_events()[1].post_data,
            dataset.post_events()[1].post_data
        );
    }
}
