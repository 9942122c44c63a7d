//! Chart data transformation
//!
//! A mapping plan (field renames, filters, aggregations, groupings, sorting)
//! is requested from the model using only the sampled structure description,
//! falling back to fixed rules per chart type. The plan is then executed
//! against the full rows and the output is checked against the registry,
//! correcting shape violations instead of failing.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{debug, error, info, warn};

use crate::charts::analysis::{
    analyze_results, display_value, group_rows, is_year_only, DataStructure, FieldMetadata, Row,
    StructureKind, SERIES_KEY_FIELD,
};
use crate::charts::registry::{self, ChartRequirement};
use crate::errors::AgentError;
use crate::llm::parser::{parse_json_value, require_fields};
use crate::llm::{ChatMessage, CompletionOptions, LlmClient};
use crate::models::{ChartData, ChartType, QueryResult};
use crate::utils::generate_uuid;

const INSTRUCTION_TEMPERATURE: f32 = 0.1;

/// Share of repeated x values above which year-only axes are reported
const YEAR_DUPLICATE_RATIO: f64 = 0.3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregateOp {
    Sum,
    Avg,
    Count,
    Min,
    Max,
    First,
    Last,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Aggregation {
    pub field: String,
    pub operation: AggregateOp,
    #[serde(default)]
    pub group_by: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FilterOp {
    Equals,
    Contains,
    GreaterThan,
    LessThan,
    In,
    NotNull,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub field: String,
    pub operation: FilterOp,
    #[serde(default)]
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Grouping {
    pub field: String,
    #[serde(default)]
    pub create_series: bool,
    #[serde(default)]
    pub series_name_field: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sorting {
    pub field: String,
    #[serde(default)]
    pub direction: SortDirection,
}

/// Mapping plan from result fields to chart fields
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransformInstructions {
    /// Source field to chart field
    pub field_mappings: BTreeMap<String, String>,
    #[serde(default)]
    pub aggregations: Vec<Aggregation>,
    #[serde(default)]
    pub filters: Vec<Filter>,
    #[serde(default)]
    pub groupings: Vec<Grouping>,
    #[serde(default)]
    pub sorting: Vec<Sorting>,
}

impl TransformInstructions {
    /// Source field mapped onto `target`
    pub fn source_for(&self, target: &str) -> Option<&str> {
        self.field_mappings
            .iter()
            .find(|(_, t)| t.as_str() == target)
            .map(|(source, _)| source.as_str())
    }

    fn map(&mut self, source: &str, target: &str) {
        self.field_mappings
            .insert(source.to_string(), target.to_string());
    }
}

/// Transform step results into a payload for `chart_type`, asking the model
/// for the mapping plan
pub async fn transform(
    llm: &dyn LlmClient,
    results: &[QueryResult],
    chart_type: ChartType,
) -> Result<ChartData, AgentError> {
    let requirement = registry::requirement(chart_type)
        .ok_or_else(|| AgentError::UnsupportedChartType(chart_type.to_string()))?;
    let (_, structure) = analyze_results(results, chart_type);
    let instructions = generate_instructions(llm, &structure, requirement).await;
    execute(&structure, &instructions, requirement)
}

/// Transform using only the fixed mapping rules
pub fn transform_with_fallback(
    results: &[QueryResult],
    chart_type: ChartType,
) -> Result<ChartData, AgentError> {
    let requirement = registry::requirement(chart_type)
        .ok_or_else(|| AgentError::UnsupportedChartType(chart_type.to_string()))?;
    let (_, structure) = analyze_results(results, chart_type);
    let instructions = fallback_instructions(&structure, chart_type);
    execute(&structure, &instructions, requirement)
}

fn instruction_prompt(structure: &DataStructure, requirement: &ChartRequirement) -> String {
    format!(
        r#"You are a data transformation expert. Analyze the data structure and generate transformation instructions to convert it to the required chart format.

DATA STRUCTURE ANALYSIS:
- Type: {kind}
- Total Rows: {total}
- Fields: {fields}
- Relationships: {relationships}
- Sample Data: {sample}

CHART REQUIREMENTS:
- Chart Type: {chart}
- Required Structure: {structure_text}
- Required Fields: {required}
- Example Output: {example}

Your response MUST be ONLY a valid JSON object, no explanatory text:
{{
  "fieldMappings": {{ "sourceField": "targetField" }},
  "aggregations": [{{ "field": "fieldToAggregate", "operation": "sum|avg|count|min|max|first|last", "groupBy": ["groupField"] }}],
  "filters": [{{ "field": "fieldName", "operation": "equals|contains|greaterThan|lessThan|in|notNull", "value": "filterValue" }}],
  "groupings": [{{ "field": "groupingField", "createSeries": true, "seriesNameField": "fieldForSeriesName" }}],
  "sorting": [{{ "field": "sortField", "direction": "asc|desc" }}]
}}

Guidelines:
1. Map source fields to the required chart fields
2. Include only the aggregations, groupings and sorting the chart needs
3. The output must match the required structure exactly"#,
        kind = pretty(&structure.kind),
        total = structure.total_rows,
        fields = pretty(&structure.fields),
        relationships = pretty(&structure.relationships),
        sample = pretty(&structure.sample_data),
        chart = requirement.chart_type,
        structure_text = requirement.required_structure,
        required = requirement.required_fields.join(", "),
        example = requirement.example_structure(),
    )
}

fn pretty<T: Serialize>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_default()
}

/// Ask the model for a mapping plan, falling back to fixed rules on any failure
pub async fn generate_instructions(
    llm: &dyn LlmClient,
    structure: &DataStructure,
    requirement: &ChartRequirement,
) -> TransformInstructions {
    let messages = vec![
        ChatMessage::system(instruction_prompt(structure, requirement)),
        ChatMessage::user(format!(
            "Generate transformation instructions for {} chart",
            requirement.chart_type
        )),
    ];

    let parsed = async {
        let reply = llm
            .complete(&messages, CompletionOptions::with_temperature(INSTRUCTION_TEMPERATURE))
            .await?;
        let value = parse_json_value(&reply, "transformation instructions")?;
        require_fields(&value, &["fieldMappings"], "transformation instructions")?;
        serde_json::from_value::<TransformInstructions>(value).map_err(|e| {
            AgentError::ParseError(format!("Invalid transformation instructions: {}", e))
        })
    }
    .await;

    match parsed {
        Ok(instructions) if !instructions.field_mappings.is_empty() => instructions,
        Ok(_) => {
            warn!("Model returned no field mappings, using fallback instructions");
            fallback_instructions(structure, requirement.chart_type)
        }
        Err(e) => {
            warn!("Failed to generate transformation instructions: {}", e);
            fallback_instructions(structure, requirement.chart_type)
        }
    }
}

/// Candidate fields for category axes, most suitable first
fn axis_candidates(structure: &DataStructure, time_first: bool) -> Vec<&FieldMetadata> {
    let dims = structure.dimensions();
    let temporals = structure.temporals();
    let identifiers = structure.identifiers();
    let ordered = if time_first {
        [temporals, dims, identifiers]
    } else {
        [dims, identifiers, temporals]
    };
    ordered
        .into_iter()
        .flatten()
        .filter(|f| f.name != SERIES_KEY_FIELD)
        .collect()
}

/// Fixed mapping rules keyed by chart type
pub fn fallback_instructions(structure: &DataStructure, chart_type: ChartType) -> TransformInstructions {
    let mut instructions = TransformInstructions::default();
    let measures = structure.measures();
    let axes = axis_candidates(structure, chart_type.is_time_series());

    match chart_type {
        ChartType::Pie | ChartType::Bar => {
            if let (Some(axis), Some(measure)) = (axes.first(), measures.first()) {
                instructions.map(&axis.name, "id");
                instructions.map(&measure.name, "value");
            }
        }
        ChartType::Line | ChartType::Scatter => match (axes.first(), measures.as_slice()) {
            (Some(axis), [measure, ..]) => {
                instructions.map(&axis.name, "x");
                instructions.map(&measure.name, "y");
            }
            (None, [x, y, ..]) => {
                instructions.map(&x.name, "x");
                instructions.map(&y.name, "y");
            }
            _ => {}
        },
        ChartType::Heatmap => {
            if let [x, y, ..] = axes.as_slice() {
                instructions.map(&x.name, "x");
                instructions.map(&y.name, "y");
            }
            if let Some(measure) = measures.first() {
                instructions.map(&measure.name, "v");
            }
        }
        ChartType::Treemap => {
            if let (Some(axis), Some(measure)) = (axes.first(), measures.first()) {
                instructions.map(&axis.name, "name");
                instructions.map(&measure.name, "value");
                if let Some(parent) = axes.get(1) {
                    instructions.groupings.push(Grouping {
                        field: parent.name.clone(),
                        create_series: false,
                        series_name_field: Some(parent.name.clone()),
                    });
                }
            }
        }
        _ => {}
    }

    debug!(
        "Fallback instructions for {}: {:?}",
        chart_type, instructions.field_mappings
    );
    instructions
}

/// Run a mapping plan over the full data and shape-check the output
pub fn execute(
    structure: &DataStructure,
    instructions: &TransformInstructions,
    requirement: &ChartRequirement,
) -> Result<ChartData, AgentError> {
    let chart_type = requirement.chart_type;
    debug!(
        "Executing transformation: {:?} data into {} with {} mappings",
        structure.kind,
        chart_type,
        instructions.field_mappings.len()
    );

    let completed;
    let instructions = if requirement.is_hierarchical() {
        completed = complete_tree_mappings(structure, instructions, chart_type);
        &completed
    } else {
        instructions
    };

    let mut data = match structure.kind {
        StructureKind::Series if chart_type != ChartType::Heatmap => {
            transform_series(structure, instructions, chart_type)?
        }
        StructureKind::Series => {
            let rows: Vec<Row> = structure
                .series
                .iter()
                .flat_map(|(_, rows)| rows.iter().cloned())
                .collect();
            transform_flat(rows, instructions, chart_type)?
        }
        StructureKind::Flat | StructureKind::Hierarchical => {
            transform_flat(structure.rows.clone(), instructions, chart_type)?
        }
    };

    if !validate_chart_data(&data, requirement) {
        warn!("Transformed data does not match {} requirements, applying corrections", chart_type);
        data = correct_chart_data(data, requirement);
    }

    if chart_type.is_time_series() {
        check_time_series(&data);
    }

    let chart = ChartData {
        chart_type,
        data,
        config: None,
        title: Some(chart_title(structure)),
        description: Some(chart_description(structure, instructions)),
    };
    info!(
        "Transformation completed: {} chart '{}'",
        chart.chart_type,
        chart.title.as_deref().unwrap_or_default()
    );
    Ok(chart)
}

/// Fill a missing `name` or `value` mapping from the fixed rules, then from
/// the unmapped dimension and measure columns
fn complete_tree_mappings(
    structure: &DataStructure,
    instructions: &TransformInstructions,
    chart_type: ChartType,
) -> TransformInstructions {
    let mut completed = instructions.clone();
    let fallback = fallback_instructions(structure, chart_type);
    let measures = structure.measures();
    let axes = axis_candidates(structure, false);

    for target in ["name", "value"] {
        if completed.source_for(target).is_some() {
            continue;
        }
        let inferred = match target {
            "value" => measures.iter().map(|f| f.name.as_str()).collect::<Vec<_>>(),
            _ => axes.iter().map(|f| f.name.as_str()).collect(),
        };
        let source = fallback
            .source_for(target)
            .into_iter()
            .chain(inferred)
            .find(|source| !completed.field_mappings.contains_key(*source))
            .map(str::to_string);
        match source {
            Some(source) => {
                warn!("Tree mapping for '{}' missing, using '{}'", target, source);
                completed.map(&source, target);
            }
            None => warn!("No source for tree field '{}', using placeholders", target),
        }
    }
    completed
}

/// Rows that pass every filter of the plan
fn filtered_rows(rows: &[Row], instructions: &TransformInstructions) -> Vec<Row> {
    rows.iter()
        .filter(|row| instructions.filters.iter().all(|f| filter_matches(row, f)))
        .cloned()
        .collect()
}

fn transform_series(
    structure: &DataStructure,
    instructions: &TransformInstructions,
    chart_type: ChartType,
) -> Result<Value, AgentError> {
    // Series emptied by the filters are dropped
    let series: Vec<(&String, Vec<Row>)> = structure
        .series
        .iter()
        .map(|(key, rows)| (key, filtered_rows(rows, instructions)))
        .filter(|(_, rows)| !rows.is_empty())
        .collect();

    match chart_type {
        ChartType::Line | ChartType::Scatter => {
            let series = series
                .iter()
                .map(|(key, rows)| {
                    let mut points: Vec<Row> = rows
                        .iter()
                        .map(|row| map_row(row, instructions, None))
                        .collect();
                    sort_rows(&mut points, instructions);
                    json!({ "id": key, "data": to_array(points) })
                })
                .collect();
            Ok(Value::Array(series))
        }
        ChartType::Treemap => {
            let children: Vec<Value> = series
                .iter()
                .map(|(key, rows)| {
                    let value = series_value(rows, instructions, structure.value_field.as_deref());
                    json!({ "name": key, "value": value, "loc": value })
                })
                .collect();
            Ok(treemap_root(children))
        }
        ChartType::Bar | ChartType::Pie => {
            let items = series
                .iter()
                .map(|(key, rows)| {
                    let value = series_value(rows, instructions, structure.value_field.as_deref());
                    json!({ "id": key, "label": key, "value": value })
                })
                .collect();
            Ok(Value::Array(items))
        }
        other => Err(AgentError::UnsupportedChartType(other.to_string())),
    }
}

/// One number per series: the first aggregation, else the sum of the value
/// column, else the row count
fn series_value(rows: &[Row], instructions: &TransformInstructions, value_field: Option<&str>) -> Value {
    let members: Vec<&Row> = rows.iter().collect();
    match (instructions.aggregations.first(), value_field) {
        (Some(agg), _) => aggregate(&members, &agg.field, agg.operation),
        (None, Some(field)) => aggregate(&members, field, AggregateOp::Sum),
        (None, None) => number(rows.len() as f64),
    }
}

fn transform_flat(
    rows: Vec<Row>,
    instructions: &TransformInstructions,
    chart_type: ChartType,
) -> Result<Value, AgentError> {
    let mut rows = filtered_rows(&rows, instructions);

    if chart_type == ChartType::Treemap {
        return treemap_from_rows(&rows, instructions);
    }

    if !instructions.aggregations.is_empty() {
        rows = aggregate_rows(&rows, &instructions.aggregations);
    }

    if chart_type.is_time_series() {
        if let Some(grouping) = instructions.groupings.first() {
            let series = group_rows(&rows, &grouping.field)
                .into_iter()
                .map(|(key, members)| {
                    let mut points: Vec<Row> = members
                        .iter()
                        .map(|row| map_row(row, instructions, Some(grouping.field.as_str())))
                        .collect();
                    sort_rows(&mut points, instructions);
                    json!({ "id": key, "data": to_array(points) })
                })
                .collect();
            return Ok(Value::Array(series));
        }
    }

    let mut mapped: Vec<Row> = rows
        .iter()
        .map(|row| map_row(row, instructions, None))
        .collect();
    sort_rows(&mut mapped, instructions);

    if chart_type.is_time_series() && !mapped.iter().any(|row| row.contains_key("data")) {
        let id = instructions.source_for("y").unwrap_or("series");
        return Ok(json!([{ "id": id, "data": to_array(mapped) }]));
    }
    Ok(to_array(mapped))
}

/// Leaves without a name source take `placeholder`; without a value source they are 0
fn treemap_from_rows(rows: &[Row], instructions: &TransformInstructions) -> Result<Value, AgentError> {
    let name_field = instructions.source_for("name");
    let value_field = instructions.source_for("value");

    let leaf = |placeholder: String, row: &Row| {
        let value = value_field
            .and_then(|field| row.get(field))
            .and_then(as_number)
            .unwrap_or(0.0);
        let name = match name_field.and_then(|field| row.get(field)) {
            Some(name) if is_present(Some(name)) => display_value(name),
            _ => placeholder,
        };
        json!({ "name": name, "value": number(value), "loc": number(value) })
    };

    let children: Vec<Value> = match instructions.groupings.first() {
        Some(grouping) => group_rows(rows, &grouping.field)
            .into_iter()
            .map(|(key, members)| match members.as_slice() {
                [single] => leaf(key, single),
                _ => {
                    let leaves: Vec<Value> = members
                        .iter()
                        .enumerate()
                        .map(|(i, row)| leaf(format!("Item {}", i + 1), row))
                        .collect();
                    let total = sum_values(&leaves);
                    json!({ "name": key, "value": number(total), "loc": number(total), "children": leaves })
                }
            })
            .collect(),
        None => rows
            .iter()
            .enumerate()
            .map(|(i, row)| leaf(format!("Item {}", i + 1), row))
            .collect(),
    };
    Ok(treemap_root(children))
}

fn treemap_root(children: Vec<Value>) -> Value {
    let total = sum_values(&children);
    json!({ "name": "root", "value": number(total), "loc": number(total), "children": children })
}

fn sum_values(nodes: &[Value]) -> f64 {
    nodes
        .iter()
        .filter_map(|node| node.get("value").and_then(Value::as_f64))
        .sum()
}

/// Collapse rows to one row per group of the first aggregation's `groupBy`
fn aggregate_rows(rows: &[Row], aggregations: &[Aggregation]) -> Vec<Row> {
    let group_by = aggregations
        .first()
        .map(|a| a.group_by.clone())
        .unwrap_or_default();

    let mut groups: Vec<(String, Vec<&Row>)> = Vec::new();
    for row in rows {
        let key = group_by
            .iter()
            .map(|field| display_value(row.get(field).unwrap_or(&Value::Null)))
            .collect::<Vec<_>>()
            .join("\u{1f}");
        match groups.iter_mut().find(|(k, _)| *k == key) {
            Some((_, members)) => members.push(row),
            None => groups.push((key, vec![row])),
        }
    }

    groups
        .into_iter()
        .map(|(_, members)| {
            let mut out = Map::new();
            if let Some(first) = members.first() {
                for field in &group_by {
                    out.insert(field.clone(), first.get(field).cloned().unwrap_or(Value::Null));
                }
            }
            for agg in aggregations {
                out.insert(agg.field.clone(), aggregate(&members, &agg.field, agg.operation));
            }
            out
        })
        .collect()
}

fn aggregate(rows: &[&Row], field: &str, op: AggregateOp) -> Value {
    let values: Vec<f64> = rows
        .iter()
        .filter_map(|row| row.get(field).and_then(as_number))
        .collect();
    let result = match op {
        AggregateOp::Sum => values.iter().sum(),
        AggregateOp::Avg if values.is_empty() => 0.0,
        AggregateOp::Avg => values.iter().sum::<f64>() / values.len() as f64,
        AggregateOp::Count => rows.len() as f64,
        AggregateOp::Min => values.iter().copied().reduce(f64::min).unwrap_or(0.0),
        AggregateOp::Max => values.iter().copied().reduce(f64::max).unwrap_or(0.0),
        AggregateOp::First => values.first().copied().unwrap_or(0.0),
        AggregateOp::Last => values.last().copied().unwrap_or(0.0),
    };
    number(result)
}

fn map_row(row: &Row, instructions: &TransformInstructions, skip: Option<&str>) -> Row {
    let mut out = Map::new();
    for (source, target) in &instructions.field_mappings {
        if Some(source.as_str()) == skip {
            continue;
        }
        if let Some(value) = row.get(source) {
            out.insert(target.clone(), value.clone());
        }
    }
    out
}

/// Sort mapped rows; a sort field naming a source column is resolved to its target
fn sort_rows(rows: &mut [Row], instructions: &TransformInstructions) {
    if instructions.sorting.is_empty() {
        return;
    }
    let keys: Vec<(String, SortDirection)> = instructions
        .sorting
        .iter()
        .map(|sort| {
            let present = rows.iter().any(|row| row.contains_key(&sort.field));
            let field = match instructions.field_mappings.get(&sort.field) {
                Some(target) if !present => target.clone(),
                _ => sort.field.clone(),
            };
            (field, sort.direction)
        })
        .collect();

    rows.sort_by(|a, b| {
        keys.iter()
            .map(|(field, direction)| {
                let ordering = compare_values(a.get(field), b.get(field));
                match direction {
                    SortDirection::Asc => ordering,
                    SortDirection::Desc => ordering.reverse(),
                }
            })
            .find(|ordering| *ordering != Ordering::Equal)
            .unwrap_or(Ordering::Equal)
    });
}

fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (None | Some(Value::Null), None | Some(Value::Null)) => Ordering::Equal,
        (None | Some(Value::Null), _) => Ordering::Less,
        (_, None | Some(Value::Null)) => Ordering::Greater,
        (Some(Value::Number(x)), Some(Value::Number(y))) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(x), Some(y)) => display_value(x).cmp(&display_value(y)),
    }
}

fn filter_matches(row: &Row, filter: &Filter) -> bool {
    let value = row.get(&filter.field).unwrap_or(&Value::Null);
    match filter.operation {
        FilterOp::Equals => loose_eq(value, &filter.value),
        FilterOp::Contains => display_value(value).contains(&display_value(&filter.value)),
        FilterOp::GreaterThan => match (as_number(value), as_number(&filter.value)) {
            (Some(a), Some(b)) => a > b,
            _ => false,
        },
        FilterOp::LessThan => match (as_number(value), as_number(&filter.value)) {
            (Some(a), Some(b)) => a < b,
            _ => false,
        },
        FilterOp::In => filter
            .value
            .as_array()
            .is_some_and(|items| items.iter().any(|item| loose_eq(value, item))),
        FilterOp::NotNull => !value.is_null(),
    }
}

fn loose_eq(a: &Value, b: &Value) -> bool {
    if a == b {
        return true;
    }
    match (as_number(a), as_number(b)) {
        (Some(x), Some(y)) => x == y,
        _ => false,
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Integral results are emitted as integers
fn number(value: f64) -> Value {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        json!(value as i64)
    } else {
        json!(value)
    }
}

fn to_array(rows: Vec<Row>) -> Value {
    Value::Array(rows.into_iter().map(Value::Object).collect())
}

fn is_present(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::String(s)) => !s.is_empty(),
        Some(_) => true,
    }
}

fn has_numeric_value(node: &Value) -> bool {
    node.get("value").is_some_and(Value::is_number)
}

/// Every node down the tree has a name and a numeric value
fn valid_tree_node(node: &Value) -> bool {
    if !is_present(node.get("name")) || !has_numeric_value(node) {
        return false;
    }
    match node.get("children") {
        None => true,
        Some(Value::Array(children)) => children.iter().all(valid_tree_node),
        Some(_) => false,
    }
}

/// Whether the payload has the shape the chart type requires
pub fn validate_chart_data(data: &Value, requirement: &ChartRequirement) -> bool {
    if requirement.is_hierarchical() {
        return data.is_object() && valid_tree_node(data);
    }

    match data.as_array() {
        Some(items) => match items.first() {
            Some(Value::Object(first)) => requirement
                .required_fields
                .iter()
                .all(|field| first.contains_key(*field)),
            Some(_) => false,
            None => true,
        },
        None => false,
    }
}

/// Fill missing required fields with defaults
pub fn correct_chart_data(data: Value, requirement: &ChartRequirement) -> Value {
    if requirement.is_hierarchical() {
        let Value::Object(mut root) = data else {
            return json!({ "name": "root", "value": 0, "loc": 0, "children": [] });
        };
        if !is_present(root.get("name")) {
            root.insert("name".to_string(), json!("root"));
        }
        if !root.get("value").is_some_and(Value::is_number) {
            root.insert("value".to_string(), json!(0));
        }
        if !root.get("loc").is_some_and(Value::is_number) {
            let value = root.get("value").cloned().unwrap_or(json!(0));
            root.insert("loc".to_string(), value);
        }
        if let Some(Value::Array(children)) = root.remove("children") {
            let corrected: Vec<Value> = children.into_iter().map(correct_tree_node).collect();
            root.insert("children".to_string(), Value::Array(corrected));
        }
        return Value::Object(root);
    }

    match data {
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(|item| correct_item(item, requirement))
                .collect(),
        ),
        other => other,
    }
}

fn correct_tree_node(node: Value) -> Value {
    let name = node
        .get("name")
        .filter(|v| is_present(Some(*v)))
        .cloned()
        .unwrap_or_else(|| json!("Unknown"));
    let value = node
        .get("value")
        .filter(|v| v.is_number())
        .cloned()
        .unwrap_or_else(|| json!(0));
    let loc = node
        .get("loc")
        .filter(|v| v.is_number())
        .cloned()
        .unwrap_or_else(|| value.clone());

    let mut out = Map::new();
    out.insert("name".to_string(), name);
    out.insert("value".to_string(), value);
    out.insert("loc".to_string(), loc);
    if let Some(Value::Array(children)) = node.get("children") {
        let corrected: Vec<Value> = children.iter().cloned().map(correct_tree_node).collect();
        out.insert("children".to_string(), Value::Array(corrected));
    }
    Value::Object(out)
}

fn correct_item(item: Value, requirement: &ChartRequirement) -> Value {
    let mut object = match item {
        Value::Object(object) => object,
        _ => Map::new(),
    };
    for field in requirement.required_fields {
        if object.contains_key(*field) {
            continue;
        }
        let default = match *field {
            "id" => json!(format!("item_{}", &generate_uuid()[..9])),
            "value" => json!(0),
            "label" => object.get("id").cloned().unwrap_or_else(|| json!("Unknown")),
            _ => Value::Null,
        };
        object.insert(field.to_string(), default);
    }
    Value::Object(object)
}

/// Report repeated x values in series data, loudly when they look like
/// year-only timestamps
fn check_time_series(data: &Value) {
    let Some(series) = data.as_array() else {
        return;
    };
    for item in series {
        let Some(points) = item.get("data").and_then(Value::as_array) else {
            continue;
        };
        let xs: Vec<String> = points
            .iter()
            .map(|p| display_value(p.get("x").unwrap_or(&Value::Null)))
            .collect();
        let mut unique = xs.clone();
        unique.sort();
        unique.dedup();
        if unique.len() == xs.len() {
            continue;
        }

        let ratio = (xs.len() - unique.len()) as f64 / xs.len() as f64;
        let series_id = item.get("id").map(display_value).unwrap_or_default();
        if xs.iter().any(|x| is_year_only(x)) && ratio > YEAR_DUPLICATE_RATIO {
            error!(
                "Series '{}' has year-only x values with {:.0}% duplicates ({} points, {} unique); monthly formatting may have been intended",
                series_id,
                ratio * 100.0,
                xs.len(),
                unique.len()
            );
        } else {
            debug!(
                "Series '{}' has duplicate x values ({} points, {} unique)",
                series_id,
                xs.len(),
                unique.len()
            );
        }
    }
}

fn chart_title(structure: &DataStructure) -> String {
    let measure = structure.measures().first().map(|f| f.name.clone());
    let dimension = structure.dimensions().first().map(|f| f.name.clone());
    match (measure, dimension) {
        (Some(m), Some(d)) => format!("{} by {}", m, d),
        (Some(m), None) => m,
        (None, Some(d)) => d,
        (None, None) => "Data Visualization".to_string(),
    }
}

fn chart_description(structure: &DataStructure, instructions: &TransformInstructions) -> String {
    format!(
        "Chart showing {} data points with {} field mappings",
        structure.total_rows,
        instructions.field_mappings.len()
    )
}
