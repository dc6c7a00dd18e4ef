//! Structured payload filters.
//!
//! A [`Filter`] is a conjunction of field conditions. It serializes to the JSON
//! shape the Qdrant REST API expects (`{"must": [{"key": .., "match": ..}]}`)
//! and can also be evaluated directly against a payload, which is what the
//! in-memory store does.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Conjunction of field conditions.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Filter {
    /// Every condition must hold
    pub must: Vec<Condition>,
}

/// A single condition on one payload field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    /// Payload field name
    pub key: String,

    /// What the field must satisfy
    #[serde(flatten)]
    pub test: FieldTest,
}

/// Kinds of field test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldTest {
    /// Value, text or set match
    Match(MatchCondition),
    /// Datetime range
    Range(DatetimeRange),
}

/// Match variants, distinguished by their single key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MatchCondition {
    /// Exact equality
    Value { value: Value },
    /// Full-text: every query token appears in the field
    Text { text: String },
    /// Field shares at least one value with the set
    Any { any: Vec<String> },
}

/// Inclusive datetime bounds; at least one is set.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DatetimeRange {
    /// Lower bound
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gte: Option<String>,

    /// Upper bound
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lte: Option<String>,
}

impl Condition {
    /// Field equals `value` exactly.
    pub fn exact(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            key: key.into(),
            test: FieldTest::Match(MatchCondition::Value {
                value: value.into(),
            }),
        }
    }

    /// Field contains every token of `text`.
    pub fn text(key: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            test: FieldTest::Match(MatchCondition::Text { text: text.into() }),
        }
    }

    /// Field matches any of `values`.
    pub fn any(key: impl Into<String>, values: Vec<String>) -> Self {
        Self {
            key: key.into(),
            test: FieldTest::Match(MatchCondition::Any { any: values }),
        }
    }

    /// Field lies within the inclusive datetime bounds.
    pub fn datetime_range(
        key: impl Into<String>,
        gte: Option<String>,
        lte: Option<String>,
    ) -> Self {
        Self {
            key: key.into(),
            test: FieldTest::Range(DatetimeRange { gte, lte }),
        }
    }

    /// Evaluate against a payload. A missing field never matches.
    pub fn matches(&self, payload: &Map<String, Value>) -> bool {
        let Some(field) = payload.get(&self.key) else {
            return false;
        };
        match &self.test {
            FieldTest::Match(MatchCondition::Value { value }) => match field {
                Value::Array(items) => items.iter().any(|item| item == value),
                other => other == value,
            },
            FieldTest::Match(MatchCondition::Text { text }) => {
                let haystack = tokenize(&field_strings(field).join(" "));
                tokenize(text).iter().all(|token| haystack.contains(token))
            }
            FieldTest::Match(MatchCondition::Any { any }) => field_strings(field)
                .iter()
                .any(|value| any.iter().any(|wanted| wanted == value)),
            FieldTest::Range(range) => {
                let Some(at) = field.as_str().and_then(parse_timestamp) else {
                    return false;
                };
                let lower_ok = match range.gte.as_deref() {
                    Some(bound) => parse_timestamp(bound).is_some_and(|b| at >= b),
                    None => true,
                };
                let upper_ok = match range.lte.as_deref() {
                    Some(bound) => parse_timestamp(bound).is_some_and(|b| at <= b),
                    None => true,
                };
                lower_ok && upper_ok
            }
        }
    }
}

impl Filter {
    /// Filter with the given conditions.
    pub fn new(must: Vec<Condition>) -> Self {
        Self { must }
    }

    /// True when there are no conditions.
    pub fn is_empty(&self) -> bool {
        self.must.is_empty()
    }

    /// Evaluate every condition against a payload.
    pub fn matches(&self, payload: &Map<String, Value>) -> bool {
        self.must.iter().all(|condition| condition.matches(payload))
    }
}

fn field_strings(field: &Value) -> Vec<String> {
    match field {
        Value::String(s) => vec![s.clone()],
        Value::Array(items) => items
            .iter()
            .filter_map(|item| item.as_str().map(String::from))
            .collect(),
        Value::Null => vec![],
        other => vec![other.to_string()],
    }
}

fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(|token| token.to_lowercase())
        .collect()
}

/// Parse an RFC 3339 timestamp, a naive datetime, or a plain date (at midnight).
pub fn parse_timestamp(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.naive_utc());
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(text, format) {
            return Some(dt);
        }
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}
