//! Dynamic SQL values.
//!
//! Rows cross the migrator as maps of `SqlValue` so the pipeline stays
//! generic over entity types while the store implementations handle the
//! engine-specific encode/decode.
use std::fmt;

use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

/// A single column value read from the source store.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Decimal(BigDecimal),
    Text(String),
    Bytes(Vec<u8>),
    Uuid(Uuid),
    Timestamp(DateTime<Utc>),
    Date(NaiveDate),
    Json(serde_json::Value),
}

impl SqlValue {
    /// True for NULL, the empty string, and empty byte strings.
    ///
    /// Drives the deferred-pass candidate check: a deferred field counts as
    /// present only when it is non-empty.
    pub fn is_empty(&self) -> bool {
        match self {
            SqlValue::Null => true,
            SqlValue::Text(s) => s.is_empty(),
            SqlValue::Bytes(b) => b.is_empty(),
            _ => false,
        }
    }

    /// Integer view of the value, when it has one.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            SqlValue::Int(v) => Some(*v),
            _ => None,
        }
    }
}

impl fmt::Display for SqlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlValue::Null => write!(f, "NULL"),
            SqlValue::Bool(v) => write!(f, "{v}"),
            SqlValue::Int(v) => write!(f, "{v}"),
            SqlValue::Float(v) => write!(f, "{v}"),
            SqlValue::Decimal(v) => write!(f, "{v}"),
            SqlValue::Text(v) => write!(f, "{v}"),
            SqlValue::Bytes(v) => write!(f, "<{} bytes>", v.len()),
            SqlValue::Uuid(v) => write!(f, "{v}"),
            SqlValue::Timestamp(v) => write!(f, "{}", v.to_rfc3339()),
            SqlValue::Date(v) => write!(f, "{v}"),
            SqlValue::Json(v) => write!(f, "{v}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_and_empty_strings_are_empty() {
        assert!(SqlValue::Null.is_empty());
        assert!(SqlValue::Text(String::new()).is_empty());
        assert!(SqlValue::Bytes(vec![]).is_empty());
    }

    #[test]
    fn populated_values_are_not_empty() {
        assert!(!SqlValue::Text("uploads/photo.jpg".to_string()).is_empty());
        assert!(!SqlValue::Int(0).is_empty());
        assert!(!SqlValue::Bool(false).is_empty());
        assert!(!SqlValue::Bytes(vec![0x01]).is_empty());
    }

    #[test]
    fn as_int_only_matches_integers() {
        assert_eq!(SqlValue::Int(42).as_int(), Some(42));
        assert_eq!(SqlValue::Text("42".to_string()).as_int(), None);
    }
}
