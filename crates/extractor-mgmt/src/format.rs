//! Row encoders for exported files.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Written in place of a value the document does not have.
pub const MISSING_VALUE: &str = "--";
pub const CSV_DELIMITER: u8 = b';';

#[derive(Debug, Error)]
pub enum FormatError {
    #[error("csv encoding failed: {0}")]
    Csv(#[from] csv::Error),
    #[error("json encoding failed: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Csv,
    #[serde(rename = "json")]
    JsonLines,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Csv => "csv",
            ExportFormat::JsonLines => "json",
        }
    }
}

fn quoted(text: &str) -> String {
    let cleaned: String = text.chars().filter(|c| *c != '\n' && *c != '\r').collect();
    format!("\"{}\"", cleaned.replace('"', "\"\""))
}

fn plain(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => MISSING_VALUE.to_string(),
        other => other.to_string(),
    }
}

/// One CSV cell: strings and lists quoted, scalars bare, absent values `--`.
pub fn csv_cell(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => MISSING_VALUE.to_string(),
        Some(Value::String(s)) => quoted(s),
        Some(Value::Array(items)) => {
            let joined = items.iter().map(plain).collect::<Vec<_>>().join(", ");
            quoted(&joined)
        }
        Some(object @ Value::Object(_)) => quoted(&object.to_string()),
        Some(other) => other.to_string(),
    }
}

/// Looks a column up in a document: exact key first, then a dotted path.
pub fn lookup<'a>(doc: &'a Map<String, Value>, column: &str) -> Option<&'a Value> {
    if let Some(value) = doc.get(column) {
        return Some(value);
    }
    let mut parts = column.split('.');
    let mut current = doc.get(parts.next()?)?;
    for part in parts {
        current = current.as_object()?.get(part)?;
    }
    Some(current)
}

/// Turns one document into encoded bytes, one line per row.
pub enum RowEncoder {
    Csv { columns: Vec<String> },
    JsonLines { columns: Vec<String> },
}

impl RowEncoder {
    /// `columns` is the full output order: time field first when there is one.
    pub fn new(format: ExportFormat, columns: Vec<String>) -> Self {
        match format {
            ExportFormat::Csv => RowEncoder::Csv { columns },
            ExportFormat::JsonLines => RowEncoder::JsonLines { columns },
        }
    }

    pub fn columns(&self) -> &[String] {
        match self {
            RowEncoder::Csv { columns } | RowEncoder::JsonLines { columns } => columns,
        }
    }

    fn csv_line(cells: Vec<String>) -> Result<Vec<u8>, FormatError> {
        // cells are pre-quoted, the writer only joins and terminates them
        let mut writer = csv::WriterBuilder::new()
            .delimiter(CSV_DELIMITER)
            .quote_style(csv::QuoteStyle::Never)
            .has_headers(false)
            .from_writer(Vec::new());
        writer.write_record(&cells)?;
        writer
            .into_inner()
            .map_err(|e| FormatError::Csv(csv::Error::from(e.into_error())))
    }

    pub fn header(&self) -> Result<Option<Vec<u8>>, FormatError> {
        match self {
            RowEncoder::Csv { columns } => Self::csv_line(columns.clone()).map(Some),
            RowEncoder::JsonLines { .. } => Ok(None),
        }
    }

    pub fn encode(&self, doc: &Map<String, Value>) -> Result<Vec<u8>, FormatError> {
        match self {
            RowEncoder::Csv { columns } => {
                let cells = columns.iter().map(|c| csv_cell(lookup(doc, c))).collect();
                Self::csv_line(cells)
            }
            RowEncoder::JsonLines { columns } => {
                let mut row = Map::new();
                for column in columns {
                    let value = lookup(doc, column)
                        .filter(|v| !v.is_null())
                        .cloned()
                        .unwrap_or_else(|| Value::String(MISSING_VALUE.to_string()));
                    row.insert(column.clone(), value);
                }
                let mut line = serde_json::to_vec(&Value::Object(row))?;
                line.push(b'\n');
                Ok(line)
            }
        }
    }
}
