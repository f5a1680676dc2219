//! Mock specification document: loading and load-time validation

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;
use serde_json::Value;

use crate::{HooksinkError, Result};

/// A loaded mock specification document.
///
/// Malformed documents are rejected here, at load time; request handling
/// never sees an invalid spec.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MockSpec {
    /// Fallback response used when no route matches
    #[serde(default)]
    pub defaults: ResponseDefaults,
    /// Path pattern -> method (or `ANY`) -> response rule
    #[serde(default)]
    pub routes: BTreeMap<String, BTreeMap<String, ResponseRule>>,
}

/// Fallback `status`/`delay`/`body` for unmatched requests and omitted fields
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResponseDefaults {
    /// Fallback status code
    #[serde(default = "default_status")]
    pub status: u16,
    /// Fallback delay in seconds
    #[serde(default)]
    pub delay: f64,
    /// Fallback response body
    #[serde(default = "default_body")]
    pub body: Value,
}

impl Default for ResponseDefaults {
    fn default() -> Self {
        Self {
            status: default_status(),
            delay: 0.0,
            body: default_body(),
        }
    }
}

fn default_status() -> u16 {
    200
}

fn default_body() -> Value {
    serde_json::json!({"status": "ok"})
}

/// A scripted response: one entry, or an ordered sequence cycled across calls
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ResponseRule {
    /// Every matching call gets the same response
    Single(ResponseEntry),
    /// Successive calls cycle through the entries in order
    Sequence(Vec<ResponseEntry>),
}

/// One scripted response; omitted fields fall back to the spec defaults
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResponseEntry {
    /// Response status code
    pub status: Option<u16>,
    /// Literal JSON response body
    pub body: Option<Value>,
    /// Delay in seconds applied before this response is returned
    pub delay: Option<f64>,
}

impl MockSpec {
    /// Load and validate a specification from a JSON file
    ///
    /// # Errors
    ///
    /// Returns `Config` error if the file cannot be read, parsed, or validated
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| HooksinkError::Config(format!("Failed to read mock spec: {e}")))?;

        let spec: Self = serde_json::from_str(&content)
            .map_err(|e| HooksinkError::Config(format!("Invalid mock spec JSON: {e}")))?;

        let spec = spec.normalized()?;
        spec.validate()?;
        Ok(spec)
    }

    /// Uppercase method keys, rejecting entries that collide afterwards
    fn normalized(mut self) -> Result<Self> {
        let mut routes = BTreeMap::new();

        for (pattern, methods) in std::mem::take(&mut self.routes) {
            let mut normalized: BTreeMap<String, ResponseRule> = BTreeMap::new();
            for (method, rule) in methods {
                let upper = method.to_ascii_uppercase();
                if normalized.insert(upper.clone(), rule).is_some() {
                    return Err(HooksinkError::Config(format!(
                        "route '{pattern}' defines method '{upper}' more than once"
                    )));
                }
            }
            routes.insert(pattern, normalized);
        }

        self.routes = routes;
        Ok(self)
    }

    /// Validate patterns, methods, and response entries
    ///
    /// # Errors
    ///
    /// Returns `Config` error describing the first invalid entry
    pub fn validate(&self) -> Result<()> {
        validate_entry_fields("defaults", Some(self.defaults.status), Some(self.defaults.delay))?;

        for (pattern, methods) in &self.routes {
            validate_pattern(pattern)?;

            for (method, rule) in methods {
                validate_method(pattern, method)?;

                let entries: &[ResponseEntry] = match rule {
                    ResponseRule::Single(entry) => std::slice::from_ref(entry),
                    ResponseRule::Sequence(entries) => {
                        if entries.is_empty() {
                            return Err(HooksinkError::Config(format!(
                                "route '{pattern}' {method}: sequence cannot be empty"
                            )));
                        }
                        entries
                    }
                };

                for entry in entries {
                    validate_entry_fields(
                        &format!("route '{pattern}' {method}"),
                        entry.status,
                        entry.delay,
                    )?;
                }
            }
        }

        Ok(())
    }
}

/// Patterns are literal paths or end in a single trailing wildcard segment
fn validate_pattern(pattern: &str) -> Result<()> {
    if !pattern.starts_with('/') {
        return Err(HooksinkError::Config(format!(
            "route pattern must start with '/': '{pattern}'"
        )));
    }

    let stars = pattern.matches('*').count();
    match stars {
        0 => Ok(()),
        1 if pattern.ends_with("/*") => Ok(()),
        _ => Err(HooksinkError::Config(format!(
            "route pattern may only end in a single trailing '/*' segment: '{pattern}'"
        ))),
    }
}

fn validate_method(pattern: &str, method: &str) -> Result<()> {
    let valid = !method.is_empty() && method.bytes().all(|b| b.is_ascii_uppercase());
    if valid {
        Ok(())
    } else {
        Err(HooksinkError::Config(format!(
            "route '{pattern}': invalid method '{method}'"
        )))
    }
}

fn validate_entry_fields(context: &str, status: Option<u16>, delay: Option<f64>) -> Result<()> {
    if let Some(status) = status {
        if !(100..=599).contains(&status) {
            return Err(HooksinkError::Config(format!(
                "{context}: status {status} out of range"
            )));
        }
    }

    if let Some(delay) = delay {
        if !(delay.is_finite() && delay >= 0.0) {
            return Err(HooksinkError::Config(format!(
                "{context}: delay must be a non-negative number"
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn parse(spec: &str) -> Result<MockSpec> {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(spec.as_bytes()).unwrap();
        MockSpec::from_file(file.path())
    }

    #[test]
    fn test_minimal_spec_parses() {
        let spec = parse("{}").unwrap();

        assert_eq!(spec.defaults.status, 200);
        assert_eq!(spec.defaults.delay, 0.0);
        assert!(spec.routes.is_empty());
    }

    #[test]
    fn test_full_spec_parses() {
        let spec = parse(
            r#"{
                "defaults": {"status": 200, "delay": 0, "body": {"ok": true}},
                "routes": {
                    "/webhook": {
                        "post": {"status": 201, "body": {"created": true}, "delay": 0.5}
                    },
                    "/api/*": {
                        "ANY": [
                            {"status": 200},
                            {"status": 503}
                        ]
                    }
                }
            }"#,
        )
        .unwrap();

        // Method keys are normalized to uppercase
        assert!(spec.routes["/webhook"].contains_key("POST"));
        assert!(matches!(
            spec.routes["/api/*"]["ANY"],
            ResponseRule::Sequence(ref seq) if seq.len() == 2
        ));
    }

    #[test]
    fn test_invalid_wildcard_rejected() {
        for pattern in ["/api/*/users", "/api*", "/a/**", "api/*"] {
            let doc = format!(r#"{{"routes": {{"{pattern}": {{"ANY": {{"status": 200}}}}}}}}"#);
            assert!(parse(&doc).is_err(), "pattern {pattern} should be rejected");
        }
    }

    #[test]
    fn test_empty_sequence_rejected() {
        let result = parse(r#"{"routes": {"/a": {"GET": []}}}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_negative_delay_rejected() {
        let result = parse(r#"{"routes": {"/a": {"GET": {"delay": -1}}}}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_status_out_of_range_rejected() {
        let result = parse(r#"{"routes": {"/a": {"GET": {"status": 99}}}}"#);
        assert!(result.is_err());

        let result = parse(r#"{"routes": {"/a": {"GET": {"status": 600}}}}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_duplicate_method_after_normalization_rejected() {
        let result = parse(
            r#"{"routes": {"/a": {"get": {"status": 200}, "GET": {"status": 201}}}}"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_unknown_top_level_key_rejected() {
        let result = parse(r#"{"defaults": {}, "routez": {}}"#);
        assert!(result.is_err());
    }
}
