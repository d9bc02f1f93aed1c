//! Field values and their index types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single value of a document field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldValue {
    /// Analyzed full text.
    Text(String),
    /// Exact value, indexed as one term with sorted-set doc values.
    Keyword(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    DateTime(DateTime<Utc>),
    Geo { lat: f64, lon: f64 },
}

impl FieldValue {
    pub fn field_type(&self) -> FieldType {
        match self {
            FieldValue::Text(_) => FieldType::Text,
            FieldValue::Keyword(_) => FieldType::Keyword,
            FieldValue::Integer(_) => FieldType::Integer,
            FieldValue::Float(_) => FieldType::Float,
            FieldValue::Boolean(_) => FieldType::Boolean,
            FieldValue::DateTime(_) => FieldType::DateTime,
            FieldValue::Geo { .. } => FieldType::Geo,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) | FieldValue::Keyword(s) => Some(s),
            _ => None,
        }
    }

    /// Numeric view used by doc values and function scores.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Integer(v) => Some(*v as f64),
            FieldValue::Float(v) => Some(*v),
            FieldValue::DateTime(v) => Some(v.timestamp_millis() as f64),
            FieldValue::Boolean(v) => Some(if *v { 1.0 } else { 0.0 }),
            _ => None,
        }
    }
}

/// Index type of a field, fixed by the first value seen for that field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Text,
    Keyword,
    Integer,
    Float,
    Boolean,
    DateTime,
    Geo,
}

impl FieldType {
    /// True for types indexed into the term dictionary and postings.
    pub fn is_indexed_terms(&self) -> bool {
        matches!(self, FieldType::Text | FieldType::Keyword | FieldType::Boolean)
    }

    /// True for types indexed into the point store.
    pub fn is_point(&self) -> bool {
        matches!(
            self,
            FieldType::Integer | FieldType::Float | FieldType::DateTime | FieldType::Geo
        )
    }

    /// Point dimensions for point-indexed types.
    pub fn point_dims(&self) -> usize {
        match self {
            FieldType::Geo => 2,
            t if t.is_point() => 1,
            _ => 0,
        }
    }

    pub fn has_positions(&self) -> bool {
        matches!(self, FieldType::Text)
    }

    pub fn as_u8(&self) -> u8 {
        match self {
            FieldType::Text => 0,
            FieldType::Keyword => 1,
            FieldType::Integer => 2,
            FieldType::Float => 3,
            FieldType::Boolean => 4,
            FieldType::DateTime => 5,
            FieldType::Geo => 6,
        }
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            0 => FieldType::Text,
            1 => FieldType::Keyword,
            2 => FieldType::Integer,
            3 => FieldType::Float,
            4 => FieldType::Boolean,
            5 => FieldType::DateTime,
            6 => FieldType::Geo,
            _ => return None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_type_properties() {
        assert!(FieldType::Text.has_positions());
        assert!(!FieldType::Keyword.has_positions());
        assert_eq!(FieldType::Geo.point_dims(), 2);
        assert_eq!(FieldType::DateTime.point_dims(), 1);
        assert_eq!(FieldType::Keyword.point_dims(), 0);
        for t in [FieldType::Text, FieldType::Geo, FieldType::Boolean] {
            assert_eq!(FieldType::from_u8(t.as_u8()), Some(t));
        }
        assert_eq!(FieldType::from_u8(99), None);
    }

    #[test]
    fn test_numeric_views() {
        assert_eq!(FieldValue::Integer(3).as_f64(), Some(3.0));
        assert_eq!(FieldValue::Text("x".into()).as_f64(), None);
        assert_eq!(FieldValue::Keyword("k".into()).as_text(), Some("k"));
    }
}
