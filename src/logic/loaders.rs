use anyhow::Result;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::PipelineError;

/// A parsed input row: column name to verbatim cell value.
pub type Row = HashMap<String, serde_json::Value>;

/// Parses one supported file format into uniform rows.
pub type LoaderFn = dyn Fn(&[u8]) -> Result<Vec<Row>> + Send + Sync;

/// Registry of spreadsheet loaders keyed by content type. Delimited formats
/// are built in; callers may register loaders for further formats (xlsx,
/// ods) without the pipeline knowing their internals.
pub struct LoaderRegistry {
    loaders: RwLock<HashMap<String, Arc<LoaderFn>>>,
}

impl LoaderRegistry {
    pub fn new() -> Self {
        let registry = Self {
            loaders: RwLock::new(HashMap::new()),
        };
        registry.register("text/csv", |bytes| read_delimited(bytes, b','));
        registry.register("text/tab-separated-values", |bytes| {
            read_delimited(bytes, b'\t')
        });
        registry
    }

    pub fn register<F>(&self, content_type: &str, loader: F)
    where
        F: Fn(&[u8]) -> Result<Vec<Row>> + Send + Sync + 'static,
    {
        self.loaders
            .write()
            .insert(content_type.to_string(), Arc::new(loader));
    }

    /// Parse the file, rejecting unknown content types and empty row sets.
    pub fn load(&self, content_type: &str, bytes: &[u8]) -> Result<Vec<Row>> {
        let loader = self
            .loaders
            .read()
            .get(content_type)
            .cloned()
            .ok_or_else(|| PipelineError::UnsupportedContentType(content_type.to_string()))?;
        let rows = loader(bytes)?;
        if rows.is_empty() {
            return Err(PipelineError::EmptyFile.into());
        }
        Ok(rows)
    }
}

impl Default for LoaderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Cells are kept as strings except integers, which spreadsheet tooling
/// produces as numbers; blank cells become null.
fn parse_cell(raw: &str) -> serde_json::Value {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return serde_json::Value::Null;
    }
    if let Ok(n) = trimmed.parse::<i64>() {
        return serde_json::Value::Number(n.into());
    }
    serde_json::Value::String(trimmed.to_string())
}

fn read_delimited(bytes: &[u8], delimiter: u8) -> Result<Vec<Row>> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(bytes);

    let headers: Vec<String> = reader
        .headers()?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();

    let mut rows = Vec::new();
    for result in reader.records() {
        let record = result?;
        let mut row = Row::new();
        for (index, header) in headers.iter().enumerate() {
            if header.is_empty() {
                continue;
            }
            let cell = record.get(index).unwrap_or("");
            row.insert(header.clone(), parse_cell(cell));
        }
        rows.push(row);
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_csv_with_typed_cells() {
        let registry = LoaderRegistry::new();
        let rows = registry
            .load(
                "text/csv",
                b"first_name,last_name,dob,recipient_info\nJane,Doe,1990-01-02,1\nJohn,Doe,1988-03-04,\n",
            )
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["first_name"], json!("Jane"));
        assert_eq!(rows[0]["recipient_info"], json!(1));
        assert_eq!(rows[1]["recipient_info"], serde_json::Value::Null);
    }

    #[test]
    fn rejects_unknown_content_type() {
        let registry = LoaderRegistry::new();
        let err = registry
            .load("application/pdf", b"whatever")
            .unwrap_err()
            .to_string();
        assert!(err.contains("Unsupported content type"));
    }

    #[test]
    fn rejects_header_only_file_as_empty() {
        let registry = LoaderRegistry::new();
        let err = registry
            .load("text/csv", b"first_name,last_name,dob\n")
            .unwrap_err()
            .to_string();
        assert_eq!(err, "empty file");
    }
}
