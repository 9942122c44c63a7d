//! Chart plan and payload models

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Chart types the planner may choose
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChartType {
    Line,
    Bar,
    Pie,
    Scatter,
    Heatmap,
    Treemap,
    Radar,
    Sankey,
    Funnel,
    Calendar,
    Choropleth,
    Network,
}

impl ChartType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChartType::Line => "line",
            ChartType::Bar => "bar",
            ChartType::Pie => "pie",
            ChartType::Scatter => "scatter",
            ChartType::Heatmap => "heatmap",
            ChartType::Treemap => "treemap",
            ChartType::Radar => "radar",
            ChartType::Sankey => "sankey",
            ChartType::Funnel => "funnel",
            ChartType::Calendar => "calendar",
            ChartType::Choropleth => "choropleth",
            ChartType::Network => "network",
        }
    }

    /// Charts whose x axis is usually a time coordinate
    pub fn is_time_series(&self) -> bool {
        matches!(self, ChartType::Line | ChartType::Scatter)
    }
}

impl fmt::Display for ChartType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChartType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "line" => Ok(ChartType::Line),
            "bar" => Ok(ChartType::Bar),
            "pie" => Ok(ChartType::Pie),
            "scatter" => Ok(ChartType::Scatter),
            "heatmap" => Ok(ChartType::Heatmap),
            "treemap" => Ok(ChartType::Treemap),
            "radar" => Ok(ChartType::Radar),
            "sankey" => Ok(ChartType::Sankey),
            "funnel" => Ok(ChartType::Funnel),
            "calendar" => Ok(ChartType::Calendar),
            "choropleth" => Ok(ChartType::Choropleth),
            "network" => Ok(ChartType::Network),
            other => Err(format!("Unknown chart type: {}", other)),
        }
    }
}

/// A piece of data the chart needs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataRequirement {
    pub name: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub required: bool,

    /// numeric, categorical, datetime or text
    #[serde(default)]
    pub data_type: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sql_hint: Option<String>,
}

/// One query in the execution plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryInstruction {
    /// Step number as written by the planner (1-based)
    #[serde(default)]
    pub step: u32,

    pub description: String,

    #[serde(default)]
    pub tables: Vec<String>,

    #[serde(default)]
    pub expected_output: String,

    #[serde(default)]
    pub depends_on: Vec<u32>,
}

/// SQL produced for one plan step
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SqlQuery {
    #[serde(default)]
    pub step: usize,

    pub query: String,

    #[serde(default)]
    pub explanation: String,

    /// Schema adherence issues found for this query
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub schema_issues: Vec<String>,
}

/// Rows returned for one plan step
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResult {
    pub step: usize,
    pub data: Vec<Map<String, Value>>,
    pub row_count: usize,
    pub execution_time_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl QueryResult {
    pub fn failed(step: usize, error: impl Into<String>) -> Self {
        Self {
            step,
            data: Vec::new(),
            row_count: 0,
            execution_time_ms: 0,
            error: Some(error.into()),
        }
    }
}

/// Outcome of validating a step's result
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResult {
    #[serde(default)]
    pub step: usize,

    pub is_valid: bool,

    #[serde(default)]
    pub issues: Vec<String>,

    #[serde(default)]
    pub suggestions: Vec<String>,
}

impl ValidationResult {
    pub fn valid(step: usize) -> Self {
        Self {
            step,
            is_valid: true,
            issues: Vec::new(),
            suggestions: Vec::new(),
        }
    }

    pub fn invalid(step: usize, issues: Vec<String>, suggestions: Vec<String>) -> Self {
        Self {
            step,
            is_valid: false,
            issues,
            suggestions,
        }
    }
}

/// Chart-ready payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartData {
    #[serde(rename = "type")]
    pub chart_type: ChartType,

    pub data: Value,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<Map<String, Value>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Question put back to the user when the request is ambiguous
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClarificationRequest {
    pub question: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

impl ClarificationRequest {
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            options: None,
            context: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_chart_type_parse() {
        assert_eq!("Pie".parse::<ChartType>(), Ok(ChartType::Pie));
        assert_eq!(" treemap ".parse::<ChartType>(), Ok(ChartType::Treemap));
        assert!("donut".parse::<ChartType>().is_err());
        assert_eq!(ChartType::Heatmap.to_string(), "heatmap");
    }

    #[test]
    fn test_instruction_from_planner_json() {
        let instruction: QueryInstruction = serde_json::from_value(json!({
            "step": 1,
            "description": "Total revenue per region",
            "tables": ["Orders"],
            "expectedOutput": "region, revenue",
            "dependsOn": []
        }))
        .unwrap();
        assert_eq!(instruction.tables, vec!["Orders"]);
        assert_eq!(instruction.expected_output, "region, revenue");
    }

    #[test]
    fn test_chart_data_serializes_type_tag() {
        let chart = ChartData {
            chart_type: ChartType::Bar,
            data: json!([]),
            config: None,
            title: Some("Revenue".to_string()),
            description: None,
        };
        let value = serde_json::to_value(&chart).unwrap();
        assert_eq!(value["type"], "bar");
        assert!(value.get("description").is_none());
    }
}
