//! Chart requirement registry
//!
//! Static description of the data shape each renderable chart type expects.
//! Planning lists the supported types, transformation maps results onto the
//! required fields, and correction fills whatever is still missing.

use serde_json::{json, Value};

use crate::models::ChartType;

/// Structural requirement of one chart type
#[derive(Debug)]
pub struct ChartRequirement {
    pub chart_type: ChartType,

    /// Human-readable description of the payload shape
    pub required_structure: &'static str,

    pub required_fields: &'static [&'static str],

    pub optional_fields: &'static [&'static str],

    pub validation_rules: &'static [&'static str],
}

impl ChartRequirement {
    /// Smallest payload that satisfies the requirement
    pub fn example_structure(&self) -> Value {
        match self.chart_type {
            ChartType::Line => json!([{ "id": "series1", "data": [{ "x": "A", "y": 10 }] }]),
            ChartType::Bar => json!([{ "id": "A", "value": 10, "label": "Category A" }]),
            ChartType::Pie => json!([{ "id": "slice1", "label": "Slice 1", "value": 25 }]),
            ChartType::Scatter => json!([{ "id": "series1", "data": [{ "x": 10, "y": 20 }] }]),
            ChartType::Heatmap => json!([{ "x": "A", "y": "B", "v": 10 }]),
            ChartType::Treemap => json!({
                "name": "root",
                "children": [{ "name": "A", "value": 100 }, { "name": "B", "value": 200 }]
            }),
            _ => Value::Null,
        }
    }

    /// Payloads of hierarchical charts are a single rooted object
    pub fn is_hierarchical(&self) -> bool {
        self.chart_type == ChartType::Treemap
    }
}

static REQUIREMENTS: [ChartRequirement; 6] = [
    ChartRequirement {
        chart_type: ChartType::Line,
        required_structure: "Array of series objects with id and data array",
        required_fields: &["id", "data"],
        optional_fields: &["color"],
        validation_rules: &[
            "Each series must have id and data array",
            "Data points must have x and y values",
        ],
    },
    ChartRequirement {
        chart_type: ChartType::Bar,
        required_structure: "Array of objects with category and value fields",
        required_fields: &["id", "value"],
        optional_fields: &["color", "label"],
        validation_rules: &["Each item must have id and numeric value"],
    },
    ChartRequirement {
        chart_type: ChartType::Pie,
        required_structure: "Array of objects with id, label, and value",
        required_fields: &["id", "value"],
        optional_fields: &["label", "color"],
        validation_rules: &[
            "Each slice must have id and numeric value",
            "Values should sum to meaningful total",
        ],
    },
    ChartRequirement {
        chart_type: ChartType::Scatter,
        required_structure: "Array of series with data points having x, y coordinates",
        required_fields: &["id", "data"],
        optional_fields: &["color", "size"],
        validation_rules: &["Data points must have numeric x and y values"],
    },
    ChartRequirement {
        chart_type: ChartType::Heatmap,
        required_structure: "Array of objects with x, y, and value properties",
        required_fields: &["x", "y", "v"],
        optional_fields: &["color"],
        validation_rules: &["Each cell must have x, y coordinates and numeric value"],
    },
    ChartRequirement {
        chart_type: ChartType::Treemap,
        required_structure: "Hierarchical object with name, value, and optional children",
        required_fields: &["name", "value"],
        optional_fields: &["children", "color", "loc"],
        validation_rules: &[
            "Root must have name and children array",
            "Leaf nodes must have name and numeric value",
            "Can have nested children for hierarchical data",
        ],
    },
];

/// Requirement for a chart type, `None` when the type cannot be rendered
pub fn requirement(chart_type: ChartType) -> Option<&'static ChartRequirement> {
    REQUIREMENTS.iter().find(|r| r.chart_type == chart_type)
}

pub fn supported_chart_types() -> Vec<ChartType> {
    REQUIREMENTS.iter().map(|r| r.chart_type).collect()
}
