//! Per-request template context.

use crate::funcs::random_alphanumeric;
use crate::template::Value;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

/// Length of the generated `request_id`.
const REQUEST_ID_LEN: usize = 16;

/// Dynamic values exposed to templates as `.context.*`.
///
/// A fresh context is built at the start of every request and shared
/// read-only by all stages of that request. Nothing carries over between
/// requests.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TemplateContext {
    values: BTreeMap<String, Value>,
}

impl TemplateContext {
    /// Create a context stamped with the current time:
    ///
    /// - `unixtime` - epoch seconds
    /// - `unixnano` - epoch nanoseconds
    /// - `timestamp` - RFC 3339
    /// - `request_id` - random alphanumeric id
    pub fn new() -> Self {
        Self::at(Utc::now())
    }

    /// Create a context stamped with a given time.
    pub fn at(now: DateTime<Utc>) -> Self {
        Self::empty()
            .with("unixtime", now.timestamp())
            .with(
                "unixnano",
                now.timestamp_nanos_opt().unwrap_or(now.timestamp() * 1_000_000_000),
            )
            .with("timestamp", now.to_rfc3339())
            .with("request_id", random_alphanumeric(REQUEST_ID_LEN))
    }

    /// Create a context with no values.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Add a value.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    /// Look up a context value.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// The context as a template value.
    pub fn to_value(&self) -> Value {
        Value::Map(self.values.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_new_context_fields() {
        let now = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let ctx = TemplateContext::at(now);

        assert_eq!(ctx.get("unixtime"), Some(&Value::Int(1_704_164_645)));
        assert_eq!(
            ctx.get("unixnano"),
            Some(&Value::Int(1_704_164_645_000_000_000))
        );
        assert_eq!(
            ctx.get("timestamp"),
            Some(&Value::from("2024-01-02T03:04:05+00:00"))
        );
        match ctx.get("request_id") {
            Some(Value::String(id)) => assert_eq!(id.len(), REQUEST_ID_LEN),
            other => panic!("unexpected request_id {:?}", other),
        }
    }

    #[test]
    fn test_contexts_are_independent() {
        let first = TemplateContext::new().with("tenant", "a");
        let second = TemplateContext::new();

        assert_ne!(first.get("request_id"), second.get("request_id"));
        assert!(second.get("tenant").is_none());
    }

    #[test]
    fn test_to_value() {
        let ctx = TemplateContext::empty().with("k", "v");
        assert_eq!(ctx.to_value().get("k"), Some(&Value::from("v")));
    }
}
