//! Documents as they arrive from the ingest layer.
//!
//! A [`Document`] is an external id plus `field name -> [values]`, already normalized
//! upstream. Nested objects are carried as child documents under a path and are indexed
//! as a block directly before their parent.
//!
//! # Examples
//!
//! ```
//! use xiphos::document::Document;
//!
//! let doc = Document::builder("42")
//!     .add_text("title", "The quick brown fox")
//!     .add_keyword("color", "brown")
//!     .add_integer("year", 2024)
//!     .build();
//!
//! assert_eq!(doc.id(), "42");
//! assert_eq!(doc.values("year").len(), 1);
//! ```

pub mod field;

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use field::{FieldType, FieldValue};

/// Field names starting with this prefix are reserved for internal use.
pub const RESERVED_FIELD_PREFIX: char = '_';

/// Reserved keyword field holding the external id.
pub const ID_FIELD: &str = "_id";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Document {
    id: String,
    fields: BTreeMap<String, Vec<FieldValue>>,
    nested: BTreeMap<String, Vec<Document>>,
}

impl Document {
    pub fn new<S: Into<String>>(id: S) -> Self {
        Document {
            id: id.into(),
            fields: BTreeMap::new(),
            nested: BTreeMap::new(),
        }
    }

    pub fn builder<S: Into<String>>(id: S) -> DocumentBuilder {
        DocumentBuilder {
            document: Document::new(id),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn add_field<S: Into<String>>(&mut self, name: S, value: FieldValue) {
        self.fields.entry(name.into()).or_default().push(value);
    }

    pub fn add_nested<S: Into<String>>(&mut self, path: S, child: Document) {
        self.nested.entry(path.into()).or_default().push(child);
    }

    pub fn values(&self, name: &str) -> &[FieldValue] {
        self.fields.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.values(name).first()
    }

    pub fn fields(&self) -> &BTreeMap<String, Vec<FieldValue>> {
        &self.fields
    }

    pub fn nested(&self) -> &BTreeMap<String, Vec<Document>> {
        &self.nested
    }

    /// Number of documents this one occupies in a segment (children plus itself).
    pub fn block_len(&self) -> usize {
        1 + self
            .nested
            .values()
            .flatten()
            .map(Document::block_len)
            .sum::<usize>()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty() && self.nested.is_empty()
    }
}

pub struct DocumentBuilder {
    document: Document,
}

impl DocumentBuilder {
    pub fn add_text<S: Into<String>, T: Into<String>>(mut self, name: S, text: T) -> Self {
        self.document.add_field(name, FieldValue::Text(text.into()));
        self
    }

    pub fn add_keyword<S: Into<String>, T: Into<String>>(mut self, name: S, value: T) -> Self {
        self.document.add_field(name, FieldValue::Keyword(value.into()));
        self
    }

    pub fn add_integer<S: Into<String>>(mut self, name: S, value: i64) -> Self {
        self.document.add_field(name, FieldValue::Integer(value));
        self
    }

    pub fn add_float<S: Into<String>>(mut self, name: S, value: f64) -> Self {
        self.document.add_field(name, FieldValue::Float(value));
        self
    }

    pub fn add_boolean<S: Into<String>>(mut self, name: S, value: bool) -> Self {
        self.document.add_field(name, FieldValue::Boolean(value));
        self
    }

    pub fn add_datetime<S: Into<String>>(mut self, name: S, value: DateTime<Utc>) -> Self {
        self.document.add_field(name, FieldValue::DateTime(value));
        self
    }

    pub fn add_geo<S: Into<String>>(mut self, name: S, lat: f64, lon: f64) -> Self {
        self.document.add_field(name, FieldValue::Geo { lat, lon });
        self
    }

    pub fn add_field<S: Into<String>>(mut self, name: S, value: FieldValue) -> Self {
        self.document.add_field(name, value);
        self
    }

    pub fn add_nested<S: Into<String>>(mut self, path: S, child: Document) -> Self {
        self.document.add_nested(path, child);
        self
    }

    pub fn build(self) -> Document {
        self.document
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_and_accessors() {
        let doc = Document::builder("1")
            .add_text("body", "a b")
            .add_text("body", "c")
            .add_geo("loc", 35.0, 139.0)
            .build();

        assert_eq!(doc.values("body").len(), 2);
        assert!(doc.values("missing").is_empty());
        assert_eq!(doc.get("loc"), Some(&FieldValue::Geo { lat: 35.0, lon: 139.0 }));
        assert_eq!(doc.block_len(), 1);
    }

    #[test]
    fn test_block_len_counts_nested_children() {
        let child = Document::builder("").add_keyword("name", "x").build();
        let grandchild = Document::builder("").add_integer("n", 1).build();
        let mut child_with_kid = child.clone();
        child_with_kid.add_nested("inner", grandchild);

        let doc = Document::builder("p")
            .add_nested("items", child)
            .add_nested("items", child_with_kid)
            .build();
        assert_eq!(doc.block_len(), 4);
    }
}
