//! Field-level value plumbing shared by both sides of the sync.
//!
//! Remote columns are conventionally snake_case while local objects are
//! often camelCase; every field read here tolerates both spellings so
//! neither side is forced to rename. Timestamps are coerced from whatever
//! shape they arrive in (integer, numeric string, ISO-8601 string) into
//! integer milliseconds, with `0` as the total fallback.

use crate::TimestampMs;
use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde_json::{Map, Value};

/// Convert a snake_case name to camelCase. Names without underscores pass
/// through unchanged.
pub fn to_camel_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut upper_next = false;
    for ch in name.chars() {
        if ch == '_' {
            upper_next = true;
        } else if upper_next {
            out.extend(ch.to_uppercase());
            upper_next = false;
        } else {
            out.push(ch);
        }
    }
    out
}

/// Convert a camelCase name to snake_case.
pub fn to_snake_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    for ch in name.chars() {
        if ch.is_uppercase() {
            if !out.is_empty() && !out.ends_with('_') {
                out.push('_');
            }
            out.extend(ch.to_lowercase());
        } else {
            out.push(ch);
        }
    }
    out
}

/// Read a field by name: exact spelling first, then camelCase, then
/// snake_case.
pub fn read_field<'a>(fields: &'a Map<String, Value>, name: &str) -> Option<&'a Value> {
    if let Some(value) = fields.get(name) {
        return Some(value);
    }
    let camel = to_camel_case(name);
    if camel != name {
        if let Some(value) = fields.get(&camel) {
            return Some(value);
        }
    }
    let snake = to_snake_case(name);
    if snake != name {
        if let Some(value) = fields.get(&snake) {
            return Some(value);
        }
    }
    None
}

/// [`read_field`] over a JSON value, which must be an object to match.
pub fn read_value_field<'a>(value: &'a Value, name: &str) -> Option<&'a Value> {
    value.as_object().and_then(|fields| read_field(fields, name))
}

/// Coerce a value to integer milliseconds.
///
/// Accepts numbers, numeric strings and ISO-8601 strings; anything else
/// (including a missing value) coerces to `0`.
pub fn timestamp_ms(value: Option<&Value>) -> TimestampMs {
    match value {
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .unwrap_or(0),
        Some(Value::String(s)) => {
            if let Ok(ms) = s.parse::<i64>() {
                ms
            } else if let Ok(ms) = s.parse::<f64>() {
                ms as i64
            } else {
                ms_from_iso(s).unwrap_or(0)
            }
        }
        _ => 0,
    }
}

/// Parse an ISO-8601 / RFC 3339 string to milliseconds.
///
/// Also accepts the timezone-less variant some gateways emit
/// (`2025-01-01T00:00:00.000000`), interpreted as UTC.
pub fn ms_from_iso(text: &str) -> Option<TimestampMs> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.timestamp_millis());
    }
    NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|dt| dt.and_utc().timestamp_millis())
}

/// Render milliseconds as an RFC 3339 string with millisecond precision.
pub fn iso_from_ms(ms: TimestampMs) -> String {
    match DateTime::<Utc>::from_timestamp_millis(ms) {
        Some(dt) => dt.to_rfc3339_opts(SecondsFormat::Millis, true),
        None => String::from("1970-01-01T00:00:00.000Z"),
    }
}

/// Extract a value at a dotted path.
///
/// The head segment is read with name-style fallback; if its value is a
/// JSON-encoded string and more segments remain, it is parsed before
/// traversal. Missing or unparseable values yield `None`.
pub fn extract_path(fields: &Map<String, Value>, path: &str) -> Option<Value> {
    let mut segments = path.split('.');
    let head = segments.next()?;
    let first = read_field(fields, head)?;
    let rest: Vec<&str> = segments.collect();
    if rest.is_empty() {
        return Some(first.clone());
    }

    let mut current: Value = match first {
        Value::String(text) => serde_json::from_str(text).ok()?,
        other => other.clone(),
    };
    for segment in rest {
        current = current.get(segment)?.clone();
    }
    Some(current)
}

/// [`extract_path`] over a JSON value, which must be an object to match.
pub fn extract_value_path(value: &Value, path: &str) -> Option<Value> {
    value.as_object().and_then(|fields| extract_path(fields, path))
}

/// Serialize an ordered list of unique-key values into a comparable string.
///
/// Both sides of any unique-key comparison must go through this same
/// function; the encoding is a JSON array.
pub fn unique_key_string(values: &[Value]) -> String {
    Value::Array(values.to_vec()).to_string()
}

/// Soft-delete predicate: true iff the field is boolean `true`.
pub fn soft_deleted(fields: &Map<String, Value>, field: &str) -> bool {
    matches!(read_field(fields, field), Some(Value::Bool(true)))
}

/// Render a value usable as a row identifier. Strings pass through, numbers
/// are stringified, everything else is rejected.
pub fn value_to_id(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn name_style_fallback() {
        let record = fields(json!({"updatedAt": 1, "remote_id": "R1"}));
        assert_eq!(read_field(&record, "updated_at"), Some(&json!(1)));
        assert_eq!(read_field(&record, "updatedAt"), Some(&json!(1)));
        assert_eq!(read_field(&record, "remoteId"), Some(&json!("R1")));
        assert_eq!(read_field(&record, "missing"), None);
    }

    #[test]
    fn exact_spelling_wins_over_fallback() {
        let record = fields(json!({"updated_at": 1, "updatedAt": 2}));
        assert_eq!(read_field(&record, "updated_at"), Some(&json!(1)));
        assert_eq!(read_field(&record, "updatedAt"), Some(&json!(2)));
    }

    #[test]
    fn case_conversions() {
        assert_eq!(to_camel_case("updated_at"), "updatedAt");
        assert_eq!(to_camel_case("a_b_c"), "aBC");
        assert_eq!(to_camel_case("plain"), "plain");
        assert_eq!(to_snake_case("updatedAt"), "updated_at");
        assert_eq!(to_snake_case("aBC"), "a_b_c");
        assert_eq!(to_snake_case("plain"), "plain");
    }

    #[test]
    fn timestamp_coercion() {
        assert_eq!(timestamp_ms(Some(&json!(1500))), 1500);
        assert_eq!(timestamp_ms(Some(&json!(1500.9))), 1500);
        assert_eq!(timestamp_ms(Some(&json!("1500"))), 1500);
        assert_eq!(
            timestamp_ms(Some(&json!("2025-01-01T00:00:00Z"))),
            1_735_689_600_000
        );
        assert_eq!(timestamp_ms(Some(&json!("not a date"))), 0);
        assert_eq!(timestamp_ms(Some(&json!(null))), 0);
        assert_eq!(timestamp_ms(Some(&json!(true))), 0);
        assert_eq!(timestamp_ms(None), 0);
    }

    #[test]
    fn iso_round_trip() {
        let ms = 1_735_689_600_123;
        assert_eq!(ms_from_iso(&iso_from_ms(ms)), Some(ms));
    }

    #[test]
    fn iso_accepts_timezone_less_strings() {
        assert_eq!(
            ms_from_iso("2025-01-01T00:00:00.500"),
            Some(1_735_689_600_500)
        );
    }

    #[test]
    fn path_extraction_flat() {
        let record = fields(json!({"title": "Alpha"}));
        assert_eq!(extract_path(&record, "title"), Some(json!("Alpha")));
        assert_eq!(extract_path(&record, "missing"), None);
    }

    #[test]
    fn path_extraction_into_json_object() {
        let record = fields(json!({"meta": {"slug": "a-1", "nested": {"x": 7}}}));
        assert_eq!(extract_path(&record, "meta.slug"), Some(json!("a-1")));
        assert_eq!(extract_path(&record, "meta.nested.x"), Some(json!(7)));
        assert_eq!(extract_path(&record, "meta.absent"), None);
    }

    #[test]
    fn path_extraction_parses_json_text_heads() {
        let record = fields(json!({"meta": "{\"slug\":\"a-1\"}"}));
        assert_eq!(extract_path(&record, "meta.slug"), Some(json!("a-1")));

        let broken = fields(json!({"meta": "not json"}));
        assert_eq!(extract_path(&broken, "meta.slug"), None);
    }

    #[test]
    fn unique_key_encoding_is_shared_shape() {
        assert_eq!(
            unique_key_string(&[json!("Alpha"), json!(null)]),
            "[\"Alpha\",null]"
        );
    }

    #[test]
    fn soft_delete_is_strict_boolean() {
        assert!(soft_deleted(&fields(json!({"is_deleted": true})), "is_deleted"));
        assert!(!soft_deleted(&fields(json!({"is_deleted": false})), "is_deleted"));
        assert!(!soft_deleted(&fields(json!({"is_deleted": 1})), "is_deleted"));
        assert!(!soft_deleted(&fields(json!({})), "is_deleted"));
    }

    #[test]
    fn id_rendering() {
        assert_eq!(value_to_id(&json!("R1")).as_deref(), Some("R1"));
        assert_eq!(value_to_id(&json!(42)).as_deref(), Some("42"));
        assert_eq!(value_to_id(&json!(null)), None);
        assert_eq!(value_to_id(&json!({"id": 1})), None);
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn timestamp_coercion_is_total(value in proptest::arbitrary::any::<i64>()) {
                // Any integer input coerces to itself, never panics.
                prop_assert_eq!(timestamp_ms(Some(&Value::from(value))), value);
            }

            #[test]
            fn snake_camel_snake_is_stable(name in "[a-z][a-z0-9]{0,6}(_[a-z][a-z0-9]{0,6}){0,3}") {
                prop_assert_eq!(to_snake_case(&to_camel_case(&name)), name);
            }

            #[test]
            fn unique_key_string_is_deterministic(a in "[a-zA-Z0-9]{0,12}", b in proptest::option::of(0i64..1000)) {
                let values = vec![
                    Value::from(a.clone()),
                    b.map(Value::from).unwrap_or(Value::Null),
                ];
                prop_assert_eq!(unique_key_string(&values), unique_key_string(&values.clone()));
            }
        }
    }
}
