//! Document and metadata records flowing through the index.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Source document: an ordered mapping of field name to optional text.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Document {
    fields: IndexMap<String, Option<String>>,
}

impl Document {
    /// Creates an empty document.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a field, keeping the position of an existing key.
    pub fn insert(&mut self, name: impl Into<String>, value: Option<String>) {
        self.fields.insert(name.into(), value);
    }

    /// Returns the field's text when present and non-null.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(|value| value.as_deref())
    }

    /// Text of the indexed field, or `None` when it is missing, null, or empty.
    pub fn indexed_text(&self, field: &str) -> Option<&str> {
        self.get(field).filter(|text| !text.is_empty())
    }

    /// Iterates over every field in source order, including nulls.
    pub fn fields(&self) -> impl Iterator<Item = (&str, Option<&str>)> {
        self.fields
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_deref()))
    }

    /// Copies every non-null field in source order.
    pub fn non_null_fields(&self) -> IndexMap<String, String> {
        self.fields
            .iter()
            .filter_map(|(name, value)| value.as_ref().map(|v| (name.clone(), v.clone())))
            .collect()
    }

    /// Number of fields, including nulls.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether the document has no fields at all.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl<K, V> FromIterator<(K, Option<V>)> for Document
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, Option<V>)>>(iter: I) -> Self {
        Self {
            fields: iter
                .into_iter()
                .map(|(name, value)| (name.into(), value.map(Into::into)))
                .collect(),
        }
    }
}

/// Per-row metadata stored alongside each embedding in a shard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataRecord {
    /// 0-based position of the row inside its shard.
    pub id: u64,
    /// Text of the indexed field that was embedded.
    pub indexed_field_value: String,
    /// Every non-null field of the source document, in source order.
    pub fields: IndexMap<String, String>,
}

impl MetadataRecord {
    /// Builds the record for row `id` of a shard.
    pub fn from_document(id: u64, indexed_field_value: &str, document: &Document) -> Self {
        Self {
            id,
            indexed_field_value: indexed_field_value.to_string(),
            fields: document.non_null_fields(),
        }
    }

    /// Looks up one of the stored source fields.
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn posting() -> Document {
        Document::from_iter([
            ("title", Some("Data Engineer")),
            ("company", None),
            ("city", Some("Berlin")),
        ])
    }

    #[test]
    fn indexed_text_treats_empty_and_null_as_missing() {
        let doc = Document::from_iter([("title", Some("")), ("summary", None::<&str>)]);
        assert_eq!(doc.indexed_text("title"), None);
        assert_eq!(doc.indexed_text("summary"), None);
        assert_eq!(doc.indexed_text("absent"), None);
        assert_eq!(posting().indexed_text("title"), Some("Data Engineer"));
    }

    #[test]
    fn metadata_keeps_non_null_fields_in_order() {
        let record = MetadataRecord::from_document(3, "Data Engineer", &posting());
        let keys: Vec<&str> = record.fields.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["title", "city"]);
        assert_eq!(record.field("city"), Some("Berlin"));
        assert_eq!(record.id, 3);
    }

    #[test]
    fn document_deserializes_from_json_object() {
        let doc: Document =
            serde_json::from_str(r#"{"title":"Nurse","ward":null}"#).expect("parse document");
        assert_eq!(doc.len(), 2);
        assert_eq!(doc.get("title"), Some("Nurse"));
        assert_eq!(doc.get("ward"), None);
    }
}
