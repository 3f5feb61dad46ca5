//! Runtime values and ordered records

use std::fmt;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

use crate::ast::Expression;

const DATE_FORMAT: &str = "%Y-%m-%d";
const TIME_FORMAT: &str = "%H:%M:%S%.3f";
const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";

/// A single scalar value read from or sent to the remote platform
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Boolean(bool),
    Integer(i64),
    Double(f64),
    String(String),
    Date(NaiveDate),
    Time(NaiveTime),
    Timestamp(NaiveDateTime),
}

impl Value {
    /// Runtime kind name, as reported in evaluation errors
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Boolean(_) => "boolean",
            Value::Integer(_) => "integer",
            Value::Double(_) => "double",
            Value::String(_) => "string",
            Value::Date(_) => "date",
            Value::Time(_) => "time",
            Value::Timestamp(_) => "timestamp",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Convert a JSON value from a remote record, using the declared remote
    /// type to recover temporal values that travel as strings
    pub fn from_json(json: &serde_json::Value, remote_type: &str) -> Value {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Boolean(*b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) if !remote_type.eq_ignore_ascii_case("double") => Value::Integer(i),
                _ => n.as_f64().map(Value::Double).unwrap_or(Value::Null),
            },
            serde_json::Value::String(s) => parse_typed_string(s, remote_type),
            other => Value::String(other.to_string()),
        }
    }

    /// Convert to the JSON representation sent to the remote platform
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Boolean(b) => serde_json::Value::Bool(*b),
            Value::Integer(i) => serde_json::Value::from(*i),
            Value::Double(d) => serde_json::Value::from(*d),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Date(d) => serde_json::Value::String(d.format(DATE_FORMAT).to_string()),
            Value::Time(t) => serde_json::Value::String(t.format(TIME_FORMAT).to_string()),
            Value::Timestamp(ts) => {
                serde_json::Value::String(ts.format(TIMESTAMP_FORMAT).to_string())
            }
        }
    }

    /// Rough in-memory footprint, used to weigh cache entries
    pub fn approximate_size(&self) -> usize {
        std::mem::size_of::<Value>()
            + match self {
                Value::String(s) => s.len(),
                _ => 0,
            }
    }
}

fn parse_typed_string(s: &str, remote_type: &str) -> Value {
    let parsed = match remote_type.to_ascii_lowercase().as_str() {
        "date" => NaiveDate::parse_from_str(s, DATE_FORMAT).ok().map(Value::Date),
        "time" => NaiveTime::parse_from_str(s.trim_end_matches('Z'), "%H:%M:%S%.f")
            .ok()
            .map(Value::Time),
        "datetime" => parse_timestamp(s).map(Value::Timestamp),
        _ => None,
    };
    parsed.unwrap_or_else(|| Value::String(s.to_string()))
}

/// Parse the timestamp shapes the remote platform emits
pub fn parse_timestamp(s: &str) -> Option<NaiveDateTime> {
    if let Ok(dt) = chrono::DateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f%z") {
        return Some(dt.naive_utc());
    }
    let trimmed = s.trim_end_matches('Z');
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(trimmed, format).ok())
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Double(d) => write!(f, "{:?}", d),
            Value::String(s) => f.write_str(s),
            Value::Date(d) => write!(f, "{}", d.format(DATE_FORMAT)),
            Value::Time(t) => write!(f, "{}", t.format("%H:%M:%S")),
            Value::Timestamp(ts) => write!(f, "{}", ts.format("%Y-%m-%dT%H:%M:%S")),
        }
    }
}

impl From<&Value> for Expression {
    fn from(value: &Value) -> Self {
        match value {
            Value::Null => Expression::Null,
            Value::Boolean(b) => Expression::Boolean(*b),
            Value::Integer(i) => Expression::Integer(*i),
            Value::Double(d) => Expression::Double(*d),
            Value::String(s) => Expression::String(s.clone()),
            Value::Date(d) => Expression::Date(*d),
            Value::Time(t) => Expression::Time(*t),
            Value::Timestamp(ts) => Expression::Timestamp(*ts),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<f64> for Value {
    fn from(d: f64) -> Self {
        Value::Double(d)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

/// Ordered field map. Keeps insertion order and the caller's spelling of each
/// field name; lookups ignore ASCII case.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Record {
    fields: Vec<(String, Value)>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a field by name (case-insensitive)
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v)
    }

    /// Insert a field, replacing the value of an existing field with the same name
    pub fn insert(&mut self, name: impl Into<String>, value: Value) {
        let name = name.into();
        match self
            .fields
            .iter_mut()
            .find(|(k, _)| k.eq_ignore_ascii_case(&name))
        {
            Some((_, slot)) => *slot = value,
            None => self.fields.push((name, value)),
        }
    }

    /// Builder-style insert
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(name, value.into());
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(k, _)| k.as_str())
    }

    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.fields.iter().map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// JSON object sent to the remote mutation calls
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Object(
            self.fields
                .iter()
                .map(|(k, v)| (k.clone(), v.to_json()))
                .collect(),
        )
    }
}

impl FromIterator<(String, Value)> for Record {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        let mut record = Record::new();
        for (k, v) in iter {
            record.insert(k, v);
        }
        record
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_preserves_order_and_case() {
        let record = Record::new()
            .with("Name", "Acme")
            .with("OwnerId", "005x")
            .with("id", "001a");
        let names: Vec<_> = record.names().collect();
        assert_eq!(names, vec!["Name", "OwnerId", "id"]);
        assert_eq!(record.get("ID"), Some(&Value::from("001a")));
    }

    #[test]
    fn test_record_insert_replaces() {
        let mut record = Record::new().with("Name", "Old");
        record.insert("NAME", Value::from("New"));
        assert_eq!(record.len(), 1);
        assert_eq!(record.get("name"), Some(&Value::from("New")));
        assert_eq!(record.names().next(), Some("Name"));
    }

    #[test]
    fn test_from_json_temporal() {
        let date = Value::from_json(&serde_json::json!("2024-02-29"), "date");
        assert_eq!(date, Value::Date(NaiveDate::from_ymd_opt(2024, 2, 29).unwrap()));

        let ts = Value::from_json(&serde_json::json!("2024-01-05T10:30:00.000+0000"), "datetime");
        assert_eq!(
            ts,
            Value::Timestamp(
                NaiveDate::from_ymd_opt(2024, 1, 5)
                    .unwrap()
                    .and_hms_opt(10, 30, 0)
                    .unwrap()
            )
        );

        let plain = Value::from_json(&serde_json::json!("2024-02-29"), "string");
        assert_eq!(plain, Value::from("2024-02-29"));
    }

    #[test]
    fn test_from_json_numbers() {
        assert_eq!(Value::from_json(&serde_json::json!(5), "int"), Value::Integer(5));
        assert_eq!(Value::from_json(&serde_json::json!(5), "double"), Value::Double(5.0));
        assert_eq!(Value::from_json(&serde_json::json!(2.5), "currency"), Value::Double(2.5));
    }

    #[test]
    fn test_display_null() {
        assert_eq!(Value::Null.to_string(), "null");
        assert_eq!(Value::Double(3.0).to_string(), "3.0");
    }
}
