//! Index group listing and field mapping helpers for the search form.

use chrono::NaiveDate;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::OnceLock;

pub const CAT_INDICES_PATH: &str = "_cat/indices?format=json&h=index";

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IndexGroup {
    pub index: String,
}

fn date_suffix() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"-(\d{4}\.\d{2}\.\d{2}|\d{2}-\d{2}-\d{4}|\d{4}-\d{2}-\d{2})$").expect("static pattern")
    })
}

/// Strips a trailing `-YYYY.MM.DD`, `-DD-MM-YYYY` or `-YYYY-MM-DD`.
pub fn group_name(index: &str) -> &str {
    match date_suffix().find(index) {
        Some(m) => &index[..m.start()],
        None => index,
    }
}

/// Collapses dated indices into unique, sorted groups. System indices are dropped.
pub fn group_indices(body: &[u8]) -> Result<Vec<IndexGroup>, serde_json::Error> {
    let rows: Vec<IndexGroup> = serde_json::from_slice(body)?;
    let groups: BTreeSet<&str> = rows
        .iter()
        .map(|row| row.index.as_str())
        .filter(|name| !name.starts_with('.') && !name.is_empty())
        .map(group_name)
        .collect();
    Ok(groups
        .into_iter()
        .map(|index| IndexGroup {
            index: index.to_string(),
        })
        .collect())
}

/// Mapping request covering today's indices of a group in both date styles.
pub fn mapping_path(index: &str, today: NaiveDate) -> String {
    format!(
        "{index}*{}*,{index}*{}*/_mapping",
        today.format("%Y.%m.%d"),
        today.format("%d-%m-%Y")
    )
}

fn flatten_properties(prefix: &str, properties: &Map<String, Value>, out: &mut BTreeMap<String, String>) {
    for (name, definition) in properties {
        let path = if prefix.is_empty() {
            name.clone()
        } else {
            format!("{prefix}.{name}")
        };
        match definition.get("properties").and_then(Value::as_object) {
            Some(children) => flatten_properties(&path, children, out),
            None => {
                let kind = definition.get("type").and_then(Value::as_str).unwrap_or("object");
                out.insert(path, kind.to_string());
            }
        }
    }
}

/// Flattens a `_mapping` response into `{"a.b.c": "<type>"}` across all indices.
///
/// Handles both untyped mappings and the older `mappings.<doc_type>.properties` shape.
pub fn flatten_mapping(doc: &Value) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    let Some(indices) = doc.as_object() else {
        return out;
    };
    for index in indices.values() {
        let Some(mappings) = index.get("mappings").and_then(Value::as_object) else {
            continue;
        };
        if let Some(properties) = mappings.get("properties").and_then(Value::as_object) {
            flatten_properties("", properties, &mut out);
            continue;
        }
        for typed in mappings.values() {
            if let Some(properties) = typed.get("properties").and_then(Value::as_object) {
                flatten_properties("", properties, &mut out);
            }
        }
    }
    out
}
