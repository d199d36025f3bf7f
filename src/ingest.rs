//! JSON Lines document ingestion for the indexer binary.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use anyhow::{Context, Result};
use serde_json::Value;

use crate::document::Document;

/// Reads one document per non-blank line from a JSONL file.
pub fn load_documents(path: &Path) -> Result<Vec<Document>> {
    let file = File::open(path).with_context(|| format!("failed to open {:?}", path))?;
    read_documents(BufReader::new(file))
        .with_context(|| format!("failed to read documents from {:?}", path))
}

/// Parses documents from JSONL; every line must hold a JSON object.
///
/// String values are kept verbatim, `null` becomes a missing value, other
/// scalars are stringified, and nested arrays/objects keep their compact JSON.
pub fn read_documents<R: BufRead>(reader: R) -> Result<Vec<Document>> {
    let mut documents = Vec::new();
    for (line_no, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("failed to read line {}", line_no + 1))?;
        if line.trim().is_empty() {
            continue;
        }
        let value: Value = serde_json::from_str(&line)
            .with_context(|| format!("invalid JSON at line {}", line_no + 1))?;
        let Value::Object(object) = value else {
            anyhow::bail!("line {} is not a JSON object", line_no + 1);
        };
        documents.push(
            object
                .into_iter()
                .map(|(name, value)| (name, field_text(value)))
                .collect::<Document>(),
        );
    }
    Ok(documents)
}

fn field_text(value: Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(text) => Some(text),
        Value::Bool(flag) => Some(flag.to_string()),
        Value::Number(number) => Some(number.to_string()),
        nested @ (Value::Array(_) | Value::Object(_)) => Some(nested.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_objects_and_skips_blank_lines() {
        let input = concat!(
            "{\"title\":\"Welder\",\"salary\":42000,\"remote\":false,\"tags\":[\"a\"]}\n",
            "\n",
            "{\"title\":null,\"city\":\"Graz\"}\n",
        );
        let docs = read_documents(input.as_bytes()).expect("documents");
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].get("salary"), Some("42000"));
        assert_eq!(docs[0].get("remote"), Some("false"));
        assert_eq!(docs[0].get("tags"), Some("[\"a\"]"));
        assert_eq!(docs[1].get("title"), None);
        assert_eq!(docs[1].len(), 2);
    }

    #[test]
    fn rejects_non_object_lines() {
        let err = read_documents("[1,2]\n".as_bytes()).expect_err("array rejected");
        assert!(err.to_string().contains("line 1"));
    }
}
