//! Builds search-engine query bodies from the UI's search form.

use chrono::{DateTime, FixedOffset, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use thiserror::Error;

pub const PICKER_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
pub const RANGE_FORMAT: &str = "strict_date_optional_time";
pub const SEARCH_PAGE_SIZE: u64 = 500;

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("invalid date {value:?}, expected YYYY-MM-DD HH:MM:SS")]
    InvalidDate { value: String },
    #[error("date range start {start} is after end {end}")]
    InvertedRange { start: String, end: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOp {
    Is,
    Exists,
    IsNot,
    DoesNotExists,
    #[default]
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldFilter {
    pub field: String,
    pub operation: FilterOp,
    pub value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    /// Parses picker dates entered in `offset` local time.
    pub fn parse(start: &str, end: &str, offset: FixedOffset) -> Result<Self, QueryError> {
        let range = Self {
            start: parse_picker_time(start, offset)?,
            end: parse_picker_time(end, offset)?,
        };
        if range.start > range.end {
            return Err(QueryError::InvertedRange {
                start: start.to_string(),
                end: end.to_string(),
            });
        }
        Ok(range)
    }
}

pub fn parse_picker_time(value: &str, offset: FixedOffset) -> Result<DateTime<Utc>, QueryError> {
    let naive = NaiveDateTime::parse_from_str(value.trim(), PICKER_FORMAT).map_err(|_| QueryError::InvalidDate {
        value: value.to_string(),
    })?;
    naive
        .and_local_timezone(offset)
        .single()
        .map(|t| t.with_timezone(&Utc))
        .ok_or_else(|| QueryError::InvalidDate {
            value: value.to_string(),
        })
}

fn utc_stamp(t: &DateTime<Utc>) -> String {
    t.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchQuery {
    /// Explicit projection. Empty means whole documents from `_source`.
    pub fields: Vec<String>,
    /// Known index fields, used as the projection when `fields` is empty.
    pub mapping: Vec<String>,
    pub filters: Vec<FieldFilter>,
    pub text: Option<String>,
    pub time_field: Option<String>,
    pub range: Option<TimeRange>,
}

impl SearchQuery {
    pub fn uses_source(&self) -> bool {
        self.fields.is_empty()
    }

    /// Columns written per row, not counting the time field.
    pub fn projection(&self) -> &[String] {
        if self.uses_source() {
            &self.mapping
        } else {
            &self.fields
        }
    }

    pub fn bool_query(&self) -> Value {
        let mut must = Vec::new();
        let mut filter = Vec::new();
        let mut must_not = Vec::new();

        if let Some(text) = self.text.as_deref().filter(|t| !t.trim().is_empty()) {
            must.push(json!({ "simple_query_string": { "query": text } }));
        }
        if let (Some(field), Some(range)) = (&self.time_field, &self.range) {
            filter.push(json!({
                "range": {
                    field.as_str(): {
                        "gte": utc_stamp(&range.start),
                        "lt": utc_stamp(&range.end),
                        "format": RANGE_FORMAT,
                    }
                }
            }));
        }
        for f in &self.filters {
            match f.operation {
                FilterOp::Is => filter.push(json!({
                    "wildcard": { format!("{}.keyword", f.field): { "value": f.value } }
                })),
                FilterOp::Exists => filter.push(json!({ "exists": { "field": f.field } })),
                FilterOp::IsNot => must_not.push(json!({ "match_phrase": { f.field.as_str(): f.value } })),
                FilterOp::DoesNotExists => must_not.push(json!({ "exists": { "field": f.field } })),
                FilterOp::Unknown => {}
            }
        }
        filter.push(json!({ "match_all": {} }));

        json!({
            "bool": {
                "must": must,
                "filter": filter,
                "should": [],
                "must_not": must_not,
            }
        })
    }

    pub fn search_body(&self, size: u64) -> Value {
        let mut body = Map::new();
        body.insert("size".into(), json!(size));
        if let Some(field) = &self.time_field {
            body.insert("sort".into(), json!([{ field.as_str(): "desc" }]));
        }
        body.insert("_source".into(), json!(self.uses_source()));

        let fields: Vec<&str> = self
            .time_field
            .iter()
            .chain(self.fields.iter())
            .map(String::as_str)
            .collect();
        if !fields.is_empty() {
            body.insert("fields".into(), json!(fields));
        }
        body.insert("query".into(), self.bool_query());
        Value::Object(body)
    }

    pub fn count_body(&self) -> Value {
        json!({ "query": self.bool_query() })
    }
}
