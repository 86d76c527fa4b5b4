//! Redaction of secret-bearing keys in diagnostic output.
//!
//! Config summaries and error contexts pass through [`redact_value`] before
//! being logged or exposed, so connection strings and credentials never
//! leave the process in clear text.

use serde_json::Value;

const REDACTED: &str = "****";

/// True when the key names a credential or connection string.
pub fn is_sensitive_key(key: &str) -> bool {
    let upper = key.to_ascii_uppercase();
    upper == "POSTGRES_DSN"
        || upper == "REDIS_URL"
        || ["PASSWORD", "SECRET", "TOKEN", "DSN"]
            .iter()
            .any(|needle| upper.contains(needle))
}

/// Replaces the values of sensitive keys with `"****"`, recursively.
pub fn redact_value(value: &mut Value) {
    match value {
        Value::Object(map) => {
            for (key, entry) in map.iter_mut() {
                if is_sensitive_key(key) {
                    *entry = Value::from(REDACTED);
                } else {
                    redact_value(entry);
                }
            }
        }
        Value::Array(items) => {
            for item in items.iter_mut() {
                redact_value(item);
            }
        }
        _ => {}
    }
}
