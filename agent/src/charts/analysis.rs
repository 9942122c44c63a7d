//! Result set analysis
//!
//! Turns raw query rows into a structure-neutral description: the detected
//! shape (flat, series, hierarchical), per-field type and role, and a small
//! sample for prompting. Only the sample ever leaves the process; the full
//! rows stay on the description for deterministic execution.

use std::collections::HashSet;

use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::models::{ChartType, QueryResult};

pub type Row = Map<String, Value>;

/// Name of the synthetic field carrying the series name
pub const SERIES_KEY_FIELD: &str = "seriesKey";

const SERIES_SAMPLE_SIZE: usize = 3;
const FLAT_SAMPLE_SIZE: usize = 5;
const FIELD_SAMPLE_SIZE: usize = 3;
const GROUPING_CARDINALITY: usize = 20;

static FULL_DATE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[0-9]{4}-[0-9]{2}-[0-9]{2}").unwrap());
static US_DATE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[0-9]{2}/[0-9]{2}/[0-9]{4}").unwrap());
static YEAR_MONTH: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[0-9]{4}-[0-9]{2}$").unwrap());
static YEAR_ONLY: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[0-9]{4}$").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Numeric,
    Categorical,
    Temporal,
    Text,
    Boolean,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldRole {
    Dimension,
    Measure,
    Identifier,
    Grouping,
    Temporal,
}

/// Inferred description of one field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldMetadata {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    pub role: FieldRole,
    pub samples: Vec<Value>,
    pub unique_values: usize,
    pub null_count: usize,
}

impl FieldMetadata {
    /// Dimensions in the broad sense used for mapping: free dimensions and
    /// low-cardinality groupings
    pub fn is_dimension(&self) -> bool {
        matches!(self.role, FieldRole::Dimension | FieldRole::Grouping)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StructureKind {
    Flat,
    Series,
    Hierarchical,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Relationship {
    #[serde(rename = "type")]
    pub kind: String,
    pub source_field: String,
    pub description: String,
}

/// How rows were pre-grouped before field analysis
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultProfile {
    pub total_rows: usize,
    pub columns: Vec<String>,
    pub entity_column: Option<String>,
    pub time_column: Option<String>,
    pub value_columns: Vec<String>,
    pub unique_entities: usize,
}

impl ResultProfile {
    /// Column aggregated when series are collapsed to a single value
    pub fn value_field(&self) -> Option<&str> {
        self.value_columns.first().map(String::as_str)
    }
}

/// Structure-neutral description of a result set
#[derive(Debug, Clone)]
pub struct DataStructure {
    pub kind: StructureKind,
    pub fields: Vec<FieldMetadata>,
    pub relationships: Vec<Relationship>,
    pub sample_data: Value,
    pub total_rows: usize,

    /// Every row, flattened, for flat and hierarchical data
    pub rows: Vec<Row>,

    /// Rows per series in order of first appearance, for series data
    pub series: Vec<(String, Vec<Row>)>,

    /// Column summed when series are collapsed to one value each
    pub value_field: Option<String>,
}

impl DataStructure {
    pub fn measures(&self) -> Vec<&FieldMetadata> {
        self.fields.iter().filter(|f| f.role == FieldRole::Measure).collect()
    }

    pub fn dimensions(&self) -> Vec<&FieldMetadata> {
        self.fields.iter().filter(|f| f.is_dimension()).collect()
    }

    pub fn temporals(&self) -> Vec<&FieldMetadata> {
        self.fields.iter().filter(|f| f.role == FieldRole::Temporal).collect()
    }

    pub fn identifiers(&self) -> Vec<&FieldMetadata> {
        self.fields.iter().filter(|f| f.role == FieldRole::Identifier).collect()
    }
}

/// Whether results of this chart type are split into one series per entity
fn groups_entities(chart_type: ChartType) -> bool {
    matches!(
        chart_type,
        ChartType::Line | ChartType::Scatter | ChartType::Bar | ChartType::Treemap
    )
}

/// Detect entity, time and value columns over the combined rows
pub fn profile_rows(rows: &[Row]) -> ResultProfile {
    let Some(first) = rows.first() else {
        return ResultProfile::default();
    };
    let columns: Vec<String> = first.keys().cloned().collect();

    let time_column = columns
        .iter()
        .find(|col| {
            let lower = col.to_lowercase();
            ["date", "month", "year", "time"].iter().any(|k| lower.contains(k))
        })
        .cloned();

    let id_column = columns
        .iter()
        .find(|col| {
            let lower = col.to_lowercase();
            lower.contains("id") && !lower.contains("order")
        })
        .cloned();

    let numeric_columns: Vec<&String> = columns
        .iter()
        .filter(|col| first.get(*col).is_some_and(Value::is_number))
        .collect();

    // Fallback entity is the first column that is neither the time axis nor a value
    let entity_column = id_column.or_else(|| {
        columns
            .iter()
            .find(|col| {
                Some(*col) != time_column.as_ref()
                    && !(numeric_columns.contains(col) && !col.to_lowercase().contains("id"))
            })
            .cloned()
    });

    let value_columns: Vec<String> = numeric_columns
        .into_iter()
        .filter(|col| !col.to_lowercase().contains("id") && Some(*col) != entity_column.as_ref())
        .cloned()
        .collect();

    let unique_entities = entity_column
        .as_ref()
        .map(|col| {
            rows.iter()
                .map(|row| value_key(row.get(col).unwrap_or(&Value::Null)))
                .collect::<HashSet<_>>()
                .len()
        })
        .unwrap_or(0);

    ResultProfile {
        total_rows: rows.len(),
        columns,
        entity_column,
        time_column,
        value_columns,
        unique_entities,
    }
}

/// Combine step results and describe them for the given chart type
pub fn analyze_results(results: &[QueryResult], chart_type: ChartType) -> (ResultProfile, DataStructure) {
    let rows: Vec<Row> = results.iter().flat_map(|r| r.data.iter().cloned()).collect();
    let profile = profile_rows(&rows);

    let nested = rows
        .iter()
        .any(|row| row.values().any(|v| v.is_object()));
    if nested {
        let flattened: Vec<Row> = rows.iter().map(flatten_row).collect();
        let mut structure = analyze_flat(flattened, FLAT_SAMPLE_SIZE);
        structure.kind = StructureKind::Hierarchical;
        structure.value_field = profile.value_field().map(str::to_string);
        return (profile, structure);
    }

    let mut structure = match &profile.entity_column {
        Some(entity) if profile.unique_entities > 1 && groups_entities(chart_type) => {
            analyze_series(group_rows(&rows, entity))
        }
        _ => analyze_flat(rows, FLAT_SAMPLE_SIZE),
    };
    structure.value_field = profile.value_field().map(str::to_string);

    debug!(
        "Analyzed {} rows as {:?} with {} fields (entity: {:?}, time: {:?})",
        structure.total_rows,
        structure.kind,
        structure.fields.len(),
        profile.entity_column,
        profile.time_column
    );
    (profile, structure)
}

/// Split rows by the value of `field`, keeping first-appearance order
pub fn group_rows(rows: &[Row], field: &str) -> Vec<(String, Vec<Row>)> {
    let mut groups: Vec<(String, Vec<Row>)> = Vec::new();
    for row in rows {
        let key = display_value(row.get(field).unwrap_or(&Value::Null));
        match groups.iter_mut().find(|(k, _)| *k == key) {
            Some((_, members)) => members.push(row.clone()),
            None => groups.push((key, vec![row.clone()])),
        }
    }
    groups
}

fn analyze_flat(rows: Vec<Row>, sample_size: usize) -> DataStructure {
    let sample: Vec<Row> = rows.iter().take(sample_size).cloned().collect();
    let fields = analyze_fields(&sample);
    DataStructure {
        kind: StructureKind::Flat,
        fields,
        relationships: Vec::new(),
        sample_data: Value::Array(sample.into_iter().map(Value::Object).collect()),
        total_rows: rows.len(),
        rows,
        series: Vec::new(),
        value_field: None,
    }
}

fn analyze_series(series: Vec<(String, Vec<Row>)>) -> DataStructure {
    let first: Vec<Row> = series
        .first()
        .map(|(_, rows)| rows.iter().take(SERIES_SAMPLE_SIZE).cloned().collect())
        .unwrap_or_default();

    let mut fields = analyze_fields(&first);
    fields.push(FieldMetadata {
        name: SERIES_KEY_FIELD.to_string(),
        field_type: FieldType::Categorical,
        role: FieldRole::Grouping,
        samples: series
            .iter()
            .take(SERIES_SAMPLE_SIZE)
            .map(|(key, _)| Value::String(key.clone()))
            .collect(),
        unique_values: series.len(),
        null_count: 0,
    });

    let mut sample = Map::new();
    for (key, rows) in series.iter().take(SERIES_SAMPLE_SIZE) {
        let rows: Vec<Value> = rows
            .iter()
            .take(SERIES_SAMPLE_SIZE)
            .cloned()
            .map(Value::Object)
            .collect();
        sample.insert(key.clone(), Value::Array(rows));
    }

    let total_rows = series.iter().map(|(_, rows)| rows.len()).sum();
    DataStructure {
        kind: StructureKind::Series,
        fields,
        relationships: vec![Relationship {
            kind: "grouping".to_string(),
            source_field: SERIES_KEY_FIELD.to_string(),
            description: format!("Data grouped by {} series", series.len()),
        }],
        sample_data: Value::Object(sample),
        total_rows,
        rows: Vec::new(),
        series,
        value_field: None,
    }
}

fn analyze_fields(sample: &[Row]) -> Vec<FieldMetadata> {
    let Some(first) = sample.first() else {
        return Vec::new();
    };
    first
        .keys()
        .map(|name| {
            let samples: Vec<Value> = sample
                .iter()
                .map(|row| row.get(name).cloned().unwrap_or(Value::Null))
                .collect();
            analyze_field(name, &samples)
        })
        .collect()
}

/// Infer type and role of a field from sampled values
pub fn analyze_field(name: &str, samples: &[Value]) -> FieldMetadata {
    let non_null: Vec<&Value> = samples.iter().filter(|v| !v.is_null()).collect();
    let unique_values = non_null
        .iter()
        .map(|v| value_key(v))
        .collect::<HashSet<_>>()
        .len();
    let null_count = samples.len() - non_null.len();

    let field_type = match non_null.first() {
        Some(Value::Number(_)) => FieldType::Numeric,
        Some(Value::Bool(_)) => FieldType::Boolean,
        Some(Value::String(s)) if is_date_string(s) => FieldType::Temporal,
        Some(Value::String(_)) if (unique_values as f64) < samples.len() as f64 * 0.5 => {
            FieldType::Categorical
        }
        _ => FieldType::Text,
    };

    let lower = name.to_lowercase();
    let role = match field_type {
        FieldType::Numeric => FieldRole::Measure,
        FieldType::Temporal => FieldRole::Temporal,
        _ if lower.contains("id") => FieldRole::Identifier,
        FieldType::Categorical if unique_values < GROUPING_CARDINALITY => FieldRole::Grouping,
        _ => FieldRole::Dimension,
    };

    if field_type == FieldType::Temporal || lower.contains("year") || lower.contains("month") {
        let duplicates = samples.len().saturating_sub(unique_values);
        let ratio = duplicates as f64 / samples.len().max(1) as f64;
        if duplicates > 0 && ratio > 0.5 && lower.contains("month") {
            warn!(
                "High duplicate ratio ({:.0}%) in time field '{}', possible year-only formatting",
                ratio * 100.0,
                name
            );
        } else if duplicates > 0 {
            debug!("Duplicate time values in '{}' ({} of {})", name, duplicates, samples.len());
        }
    }

    FieldMetadata {
        name: name.to_string(),
        field_type,
        role,
        samples: non_null.into_iter().take(FIELD_SAMPLE_SIZE).cloned().collect(),
        unique_values,
        null_count,
    }
}

/// Recognize dates written as `YYYY-MM-DD…`, `MM/DD/YYYY`, `YYYY-MM` or `YYYY`
pub fn is_date_string(value: &str) -> bool {
    if FULL_DATE.is_match(value) {
        return value
            .get(..10)
            .is_some_and(|day| NaiveDate::parse_from_str(day, "%Y-%m-%d").is_ok());
    }
    if US_DATE.is_match(value) {
        return value
            .get(..10)
            .is_some_and(|day| NaiveDate::parse_from_str(day, "%m/%d/%Y").is_ok());
    }
    if YEAR_MONTH.is_match(value) {
        return NaiveDate::parse_from_str(&format!("{}-01", value), "%Y-%m-%d").is_ok();
    }
    YEAR_ONLY.is_match(value)
}

pub fn is_year_only(value: &str) -> bool {
    YEAR_ONLY.is_match(value)
}

/// Nested objects become dotted keys
pub fn flatten_row(row: &Row) -> Row {
    let mut flat = Map::new();
    flatten_into(&mut flat, "", row);
    flat
}

fn flatten_into(out: &mut Row, prefix: &str, object: &Row) {
    for (key, value) in object {
        let name = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{}.{}", prefix, key)
        };
        match value {
            Value::Object(inner) => flatten_into(out, &name, inner),
            other => {
                out.insert(name, other.clone());
            }
        }
    }
}

/// Text form of a value used for series names and chart labels
pub fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}

fn value_key(value: &Value) -> String {
    value.to_string()
}
