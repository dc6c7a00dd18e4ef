//! Field normalization shared by the source fetchers.

use chrono::NaiveDate;
use serde_json::{Map, Value};

/// Collapse every run of whitespace to a single space and trim the ends.
pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Render a scalar JSON value as text. `null` is treated as absent.
pub fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Look up `field` on an API record, preferring `preprint_{field}` when that
/// key is present and non-null. Missing in both places yields an empty string.
pub fn field_text(record: &Map<String, Value>, field: &str) -> String {
    optional_field_text(record, field).unwrap_or_default()
}

/// Like [`field_text`] but keeps absence visible.
pub fn optional_field_text(record: &Map<String, Value>, field: &str) -> Option<String> {
    record
        .get(&format!("preprint_{}", field))
        .and_then(value_text)
        .or_else(|| record.get(field).and_then(value_text))
}

/// First of `fields` that resolves to a value, or an empty string.
pub fn first_field_text(record: &Map<String, Value>, fields: &[&str]) -> String {
    fields
        .iter()
        .find_map(|field| optional_field_text(record, field))
        .unwrap_or_default()
}

/// `Some(s)` unless `s` is empty.
pub fn non_empty(s: String) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

/// Parse the calendar date at the start of an ISO-8601 date or datetime.
pub fn parse_date_prefix(text: &str) -> Option<NaiveDate> {
    let prefix = text.trim().get(..10)?;
    NaiveDate::parse_from_str(prefix, "%Y-%m-%d").ok()
}

/// Parse a strict `YYYY-MM-DD` date argument.
pub fn parse_date_arg(text: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .map_err(|e| format!("Invalid date '{}' (expected YYYY-MM-DD): {}", text, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn test_normalize_whitespace() {
        assert_eq!(normalize_whitespace(" a   b\n c "), "a b c");
        assert_eq!(normalize_whitespace("\t\n"), "");
    }

    #[test]
    fn test_prefixed_field_wins() {
        let record = object(json!({"preprint_title": "P", "title": "T"}));
        assert_eq!(field_text(&record, "title"), "P");
    }

    #[test]
    fn test_null_prefixed_field_falls_back() {
        let record = object(json!({"preprint_title": null, "title": "T"}));
        assert_eq!(field_text(&record, "title"), "T");
    }

    #[test]
    fn test_missing_field_is_empty() {
        let record = object(json!({}));
        assert_eq!(field_text(&record, "doi"), "");
        assert_eq!(optional_field_text(&record, "license"), None);
    }

    #[test]
    fn test_first_field_text_order() {
        let record = object(json!({"abstract": "second"}));
        assert_eq!(first_field_text(&record, &["description", "abstract"]), "second");
    }

    #[test]
    fn test_date_prefix() {
        let expected = NaiveDate::from_ymd_opt(2024, 3, 5).unwrap();
        assert_eq!(parse_date_prefix("2024-03-05"), Some(expected));
        assert_eq!(parse_date_prefix("2024-03-05T10:11:12.000Z"), Some(expected));
        assert_eq!(parse_date_prefix("yesterday"), None);
    }

    #[test]
    fn test_date_arg_is_strict() {
        assert!(parse_date_arg("2024-01-01").is_ok());
        assert!(parse_date_arg("2024/01/01").is_err());
    }
}
