//! Built-in validators.

mod ecid_consistency;
mod no_duplicate_events;
mod page_view_integrity;
mod payload_size;
mod required_fields;

pub use ecid_consistency::EcidConsistencyValidator;
pub use no_duplicate_events::NoDuplicateEventsValidator;
pub use page_view_integrity::PageViewIntegrityValidator;
pub use payload_size::{format_size, PayloadSizeValidator};
pub use required_fields::RequiredFieldsValidator;

const MAX_REPORTED_URL_CHARS: usize = 100;

/// Request URL shortened for reports.
pub(crate) fn truncate_url(url: &str) -> String {
    match url.char_indices().nth(MAX_REPORTED_URL_CHARS) {
        Some((cut, _)) => format!("{}...", &url[..cut]),
        None => url.to_string(),
    }
}
