//! Canonical representation of one captured HTTP transaction

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One captured inbound HTTP transaction, immutable once constructed.
///
/// Exactly one of `json`/`raw` is populated, unless the body was empty, in
/// which case both are absent. Serialized as one JSON object per line in the
/// saved event log; the same schema is consumed by the replay engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Capture instant, millisecond precision
    #[serde(with = "timestamp")]
    pub timestamp: DateTime<Utc>,
    /// Uppercase HTTP verb
    pub method: String,
    /// Request path, no query string
    pub path: String,
    /// Ordered headers; duplicates preserved, lookups case-insensitive
    pub headers: Vec<(String, String)>,
    /// Query parameters in order of appearance; repeats preserved
    pub query: Vec<(String, String)>,
    /// Parsed body, when the content type indicates JSON and parsing succeeds
    pub json: Option<Value>,
    /// Raw body otherwise; non-UTF-8 bodies are base64 encoded
    pub raw: Option<String>,
    /// Caller address as seen by the listener
    pub ip: String,
}

impl Event {
    /// Build an event from the pieces delivered by the HTTP listener.
    ///
    /// A body with a JSON content type that fails to parse is not an error;
    /// it falls back to raw capture.
    #[must_use]
    pub fn from_parts(
        method: &str,
        path: &str,
        headers: Vec<(String, String)>,
        query: Vec<(String, String)>,
        body: &[u8],
        ip: &str,
    ) -> Self {
        let (json, raw) = classify_body(&headers, body);

        Self {
            timestamp: truncate_to_millis(Utc::now()),
            method: method.to_ascii_uppercase(),
            path: path.to_string(),
            headers,
            query,
            json,
            raw,
            ip: ip.to_string(),
        }
    }

    /// Look up the first header with the given name, case-insensitively
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Split a body into the `json`/`raw` pair per the event invariant
fn classify_body(headers: &[(String, String)], body: &[u8]) -> (Option<Value>, Option<String>) {
    if body.is_empty() {
        return (None, None);
    }

    if has_json_content_type(headers) {
        if let Ok(value) = serde_json::from_slice::<Value>(body) {
            return (Some(value), None);
        }
    }

    let raw = match std::str::from_utf8(body) {
        Ok(text) => text.to_string(),
        Err(_) => BASE64.encode(body),
    };

    (None, Some(raw))
}

fn has_json_content_type(headers: &[(String, String)]) -> bool {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case("content-type"))
        .is_some_and(|(_, v)| v.to_ascii_lowercase().contains("json"))
}

/// Parse a raw query string into ordered key/value pairs.
///
/// Percent-encoding is decoded; pairs that fail to decode are kept verbatim.
#[must_use]
pub fn parse_query(raw: Option<&str>) -> Vec<(String, String)> {
    let Some(raw) = raw else {
        return Vec::new();
    };

    raw.split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            (decode_component(key), decode_component(value))
        })
        .collect()
}

fn decode_component(component: &str) -> String {
    urlencoding::decode(component)
        .map(std::borrow::Cow::into_owned)
        .unwrap_or_else(|_| component.to_string())
}

fn truncate_to_millis(instant: DateTime<Utc>) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(instant.timestamp_millis())
        .single()
        .unwrap_or(instant)
}

mod timestamp {
    //! Millisecond-precision ISO 8601 timestamps (`2024-01-15T10:30:00.123Z`)

    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(instant: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&instant.to_rfc3339_opts(SecondsFormat::Millis, true))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let text = String::deserialize(deserializer)?;
        DateTime::parse_from_rfc3339(&text)
            .map(|parsed| parsed.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn json_headers() -> Vec<(String, String)> {
        vec![("Content-Type".to_string(), "application/json".to_string())]
    }

    #[test]
    fn test_json_body_populates_json_only() {
        let event = Event::from_parts(
            "post",
            "/webhook",
            json_headers(),
            vec![],
            br#"{"id": 7}"#,
            "127.0.0.1",
        );

        assert_eq!(event.method, "POST");
        assert_eq!(event.json, Some(json!({"id": 7})));
        assert_eq!(event.raw, None);
    }

    #[test]
    fn test_invalid_json_falls_back_to_raw() {
        let event = Event::from_parts(
            "POST",
            "/webhook",
            json_headers(),
            vec![],
            b"{not json",
            "127.0.0.1",
        );

        assert_eq!(event.json, None);
        assert_eq!(event.raw, Some("{not json".to_string()));
    }

    #[test]
    fn test_non_json_content_type_is_raw() {
        let headers = vec![("Content-Type".to_string(), "text/plain".to_string())];
        let event = Event::from_parts("POST", "/webhook", headers, vec![], b"[1,2]", "127.0.0.1");

        // Would parse as JSON, but the content type says otherwise
        assert_eq!(event.json, None);
        assert_eq!(event.raw, Some("[1,2]".to_string()));
    }

    #[test]
    fn test_empty_body_leaves_both_absent() {
        let event = Event::from_parts("GET", "/ping", vec![], vec![], b"", "127.0.0.1");

        assert_eq!(event.json, None);
        assert_eq!(event.raw, None);
    }

    #[test]
    fn test_binary_body_base64_encoded() {
        let event = Event::from_parts(
            "POST",
            "/upload",
            vec![],
            vec![],
            &[0xff, 0xfe, 0x00],
            "127.0.0.1",
        );

        assert_eq!(event.raw, Some(BASE64.encode([0xff, 0xfe, 0x00])));
    }

    #[test]
    fn test_header_lookup_case_insensitive() {
        let event = Event::from_parts(
            "GET",
            "/",
            vec![("X-Hook-Sig".to_string(), "abc".to_string())],
            vec![],
            b"",
            "127.0.0.1",
        );

        assert_eq!(event.header("x-hook-sig"), Some("abc"));
        assert_eq!(event.header("missing"), None);
    }

    #[test]
    fn test_parse_query_order_and_repeats() {
        let query = parse_query(Some("a=1&b=two%20words&a=3&flag"));

        assert_eq!(
            query,
            vec![
                ("a".to_string(), "1".to_string()),
                ("b".to_string(), "two words".to_string()),
                ("a".to_string(), "3".to_string()),
                ("flag".to_string(), String::new()),
            ]
        );
    }

    #[test]
    fn test_round_trip_through_log_schema() {
        let event = Event::from_parts(
            "PUT",
            "/api/users",
            vec![
                ("Content-Type".to_string(), "application/json".to_string()),
                ("X-Tag".to_string(), "a".to_string()),
                ("X-Tag".to_string(), "b".to_string()),
            ],
            vec![("page".to_string(), "2".to_string())],
            br#"{"name": "ada"}"#,
            "10.0.0.9",
        );

        let line = serde_json::to_string(&event).unwrap();
        let parsed: Event = serde_json::from_str(&line).unwrap();

        assert_eq!(parsed, event);
    }

    #[test]
    fn test_timestamp_millisecond_precision() {
        let event = Event::from_parts("GET", "/", vec![], vec![], b"", "127.0.0.1");
        let line = serde_json::to_string(&event).unwrap();

        // Exactly three fractional digits, UTC designator
        let ts = line.split("\"timestamp\":\"").nth(1).unwrap();
        let ts = ts.split('"').next().unwrap();
        assert!(ts.ends_with('Z'));
        let fraction = ts.split('.').nth(1).unwrap();
        assert_eq!(fraction.len(), 4); // "123Z"
    }
}
