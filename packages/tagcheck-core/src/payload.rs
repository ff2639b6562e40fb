//! Lookups into tracking-event payloads.
//!
//! Edge payloads usually nest the event under `event.xdm`; older beacons put
//! the same fields at the top level. Every lookup here tries `event.xdm`
//! first and falls back to the top level.

use serde_json::Value;

pub const EVENT_TYPE: &str = "eventType";
pub const TIMESTAMP: &str = "timestamp";
pub const IDENTITY_MAP: &str = "identityMap";

/// Event type that marks a page view.
pub const PAGE_VIEW_EVENT: &str = "web.webpagedetails.pageViews";

/// Parse a body as JSON, returning `None` for anything unparsable.
pub fn parse(body: &str) -> Option<Value> {
    serde_json::from_str(body).ok()
}

/// Whether a value counts as present: not null, false, zero, or empty.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

/// The `event.xdm` object, when the payload has one.
pub fn xdm(doc: &Value) -> Option<&Value> {
    doc.get("event")?.get("xdm").filter(|xdm| xdm.is_object())
}

/// A field under `event.xdm`, or at the top level when the nested value
/// is missing or falsy. Only truthy values are returned.
pub fn field<'a>(doc: &'a Value, name: &str) -> Option<&'a Value> {
    xdm(doc)
        .and_then(|xdm| xdm.get(name))
        .filter(|v| is_truthy(v))
        .or_else(|| doc.get(name).filter(|v| is_truthy(v)))
}

/// Event type of a parsed payload.
pub fn event_type(doc: &Value) -> Option<String> {
    field(doc, EVENT_TYPE).map(value_text)
}

/// Event type of a raw body; `None` when unparsable or absent.
pub fn event_type_of(body: &str) -> Option<String> {
    parse(body).as_ref().and_then(event_type)
}

/// `web.webPageDetails.URL` from the nested event.
pub fn page_url(doc: &Value) -> Option<String> {
    xdm(doc)?
        .pointer("/web/webPageDetails/URL")
        .filter(|v| is_truthy(v))
        .map(value_text)
}

/// First ECID in `identityMap`, nested or top level.
pub fn ecid(doc: &Value) -> Option<String> {
    const POINTER: &str = "/identityMap/ECID/0/id";

    xdm(doc)
        .and_then(|xdm| xdm.pointer(POINTER))
        .or_else(|| doc.pointer(POINTER))
        .filter(|v| is_truthy(v))
        .map(value_text)
}

/// Plain text of a value: strings unquoted, everything else as JSON.
pub fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
