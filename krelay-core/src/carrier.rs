//! Trace carrier: the closed set of propagation headers.
//!
//! Only the six B3 header names below ever cross into the tracing layer.
//! Reads and writes of any other key are ignored.

use crate::message::{Header, Message};

/// Single-header B3 encoding.
pub const B3_SINGLE_HEADER: &str = "b3";
/// Multi-header B3: trace id.
pub const B3_TRACE_ID_HEADER: &str = "x-b3-traceid";
/// Multi-header B3: span id.
pub const B3_SPAN_ID_HEADER: &str = "x-b3-spanid";
/// Multi-header B3: parent span id.
pub const B3_PARENT_SPAN_ID_HEADER: &str = "x-b3-parentspanid";
/// Multi-header B3: sampling decision.
pub const B3_SAMPLED_HEADER: &str = "x-b3-sampled";
/// Multi-header B3: debug flag.
pub const B3_FLAGS_HEADER: &str = "x-b3-flags";

const KEYS: [&str; 6] = [
    B3_SINGLE_HEADER,
    B3_TRACE_ID_HEADER,
    B3_SPAN_ID_HEADER,
    B3_PARENT_SPAN_ID_HEADER,
    B3_SAMPLED_HEADER,
    B3_FLAGS_HEADER,
];

/// In-memory key/value carrier between message headers and the propagator.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TraceCarrier {
    values: [Option<String>; 6],
}

impl TraceCarrier {
    /// Create an empty carrier.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The recognized header names.
    #[must_use]
    pub const fn keys() -> &'static [&'static str; 6] {
        &KEYS
    }

    fn slot(key: &str) -> Option<usize> {
        KEYS.iter().position(|k| k.eq_ignore_ascii_case(key))
    }

    /// Value for `key`, or the empty string if unset or unrecognized.
    #[must_use]
    pub fn get(&self, key: &str) -> &str {
        Self::slot(key)
            .and_then(|i| self.values[i].as_deref())
            .unwrap_or("")
    }

    /// Store `value` under `key`. Unrecognized keys are dropped.
    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        if let Some(i) = Self::slot(key) {
            self.values[i] = Some(value.into());
        }
    }

    /// All values that were set, as headers. `None` when nothing was ever set,
    /// which means "no trace context".
    #[must_use]
    pub fn get_all_values(&self) -> Option<Vec<Header>> {
        let headers: Vec<Header> = KEYS
            .iter()
            .zip(self.values.iter())
            .filter_map(|(key, value)| value.as_ref().map(|v| Header::new(*key, v.clone())))
            .collect();

        if headers.is_empty() {
            None
        } else {
            Some(headers)
        }
    }

    /// Collect the recognized headers of a consumed message.
    #[must_use]
    pub fn from_message(message: &Message) -> Self {
        let mut carrier = Self::new();
        for header in &message.headers {
            carrier.set(&header.key, header.value.clone());
        }
        carrier
    }

    /// Whether any propagation header is present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.iter().all(Option::is_none)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_are_the_six_b3_headers() {
        let keys = TraceCarrier::keys();
        assert_eq!(keys.len(), 6);
        assert!(keys.contains(&"x-b3-traceid"));
        assert!(keys.contains(&"b3"));
    }

    #[test]
    fn test_recognized_keys_roundtrip() {
        let mut carrier = TraceCarrier::new();
        for (i, key) in TraceCarrier::keys().iter().enumerate() {
            carrier.set(key, format!("value-{i}"));
        }
        for (i, key) in TraceCarrier::keys().iter().enumerate() {
            assert_eq!(carrier.get(key), format!("value-{i}"));
        }
    }

    #[test]
    fn test_unrecognized_keys_are_ignored() {
        let mut carrier = TraceCarrier::new();
        carrier.set("x-request-id", "abc");
        carrier.set("traceparent", "00-abc");

        assert_eq!(carrier.get("x-request-id"), "");
        assert_eq!(carrier, TraceCarrier::new());
        assert!(carrier.get_all_values().is_none());
    }

    #[test]
    fn test_get_all_values_only_returns_set_keys() {
        let mut carrier = TraceCarrier::new();
        carrier.set(B3_TRACE_ID_HEADER, "463ac35c9f6413ad48485a3953bb6124");
        carrier.set(B3_SAMPLED_HEADER, "1");

        let values = carrier.get_all_values().unwrap();
        assert_eq!(values.len(), 2);
        assert!(values.iter().any(|h| h.key == B3_SAMPLED_HEADER && h.value == "1"));
    }

    #[test]
    fn test_from_message_filters_headers() {
        let msg = Message::new("t", "k", "v").with_headers(vec![
            Header::new("x-user-id", "u1"),
            Header::new(B3_SPAN_ID_HEADER, "a2fb4a1d1a96d312"),
        ]);

        let carrier = TraceCarrier::from_message(&msg);
        assert_eq!(carrier.get(B3_SPAN_ID_HEADER), "a2fb4a1d1a96d312");
        assert_eq!(carrier.get("x-user-id"), "");
        assert_eq!(carrier.get_all_values().unwrap().len(), 1);
    }
}
