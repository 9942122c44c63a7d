//! Schema adherence checks for generated SQL
//!
//! Textual heuristics, not a SQL parser. Declared tables and columns are read
//! from free-form schema documentation; referenced tables and columns are
//! pulled out of the query with regular expressions. Both sides are compared
//! case-insensitively. False positives are expected and absorbed by the retry
//! budget of the query generation step.

use std::collections::BTreeSet;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// `## Orders Table`
static TABLE_HEADING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)##[ \t]+([^#\n]+?)[ \t]+Table\b").unwrap());

/// ``Table Name: `orders` ``
static TABLE_NAME_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)Table Name[^`\n]*`([^`]+)`").unwrap());

/// `Orders(region, revenue)`
static TABLE_SIGNATURE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b([A-Za-z_][A-Za-z0-9_]*)\(([A-Za-z_][A-Za-z0-9_ \t,]*)\)").unwrap()
});

static BACKTICK_IDENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"`([A-Za-z_][A-Za-z0-9_]*)`").unwrap());

static LEADING_IDENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[*`\s]*([A-Za-z_][A-Za-z0-9_]*)").unwrap());

static STRING_LITERAL: Lazy<Regex> = Lazy::new(|| Regex::new(r"'[^']*'").unwrap());

static TABLE_REFERENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?i)\b(?:FROM|JOIN)\s+(?:"([^"]+)"|`([^`]+)`|\[([^\]]+)\]|([A-Za-z_][A-Za-z0-9_]*))"#,
    )
    .unwrap()
});

static QUALIFIED_COLUMN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b[A-Za-z_][A-Za-z0-9_]*\.([A-Za-z_][A-Za-z0-9_]*)\b").unwrap());

static CLAUSE_COLUMN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:SELECT|WHERE|GROUP\s+BY|ORDER\s+BY|HAVING|ON)\s+([A-Za-z_][A-Za-z0-9_]*)")
        .unwrap()
});

static COLUMN_ALIAS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bAS\s+([A-Za-z_][A-Za-z0-9_]*)").unwrap());

static TABLE_ISSUE: Lazy<Regex> = Lazy::new(|| Regex::new(r"Table '([^']+)'").unwrap());

static COLUMN_ISSUE: Lazy<Regex> = Lazy::new(|| Regex::new(r"Column '([^']+)'").unwrap());

/// Identifiers that follow a clause keyword without being columns
const NON_COLUMNS: &[&str] = &[
    "count", "sum", "avg", "min", "max", "strftime", "date", "datetime", "julianday", "total",
    "round", "cast", "coalesce", "ifnull", "abs", "length", "upper", "lower", "substr",
    "distinct", "all", "case", "when", "not", "null", "exists", "from", "as",
];

/// Result of checking one query against the schema text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaValidation {
    pub is_valid: bool,
    pub issues: Vec<String>,
    pub tables_found: Vec<String>,
    pub columns_checked: usize,
}

impl SchemaValidation {
    pub fn has_table_issues(&self) -> bool {
        self.issues.iter().any(|issue| is_table_issue(issue))
    }

    pub fn has_column_issues(&self) -> bool {
        self.issues.iter().any(|issue| is_column_issue(issue))
    }
}

/// Tables and columns declared in schema documentation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaCatalog {
    /// Declared table names in order of first appearance
    pub tables: Vec<String>,

    /// Lowercased column names
    pub columns: BTreeSet<String>,
}

impl SchemaCatalog {
    pub fn parse(schema: &str) -> Self {
        let mut catalog = SchemaCatalog::default();

        for caps in TABLE_HEADING.captures_iter(schema) {
            catalog.add_table(&caps[1]);
        }
        for caps in TABLE_NAME_MARKER.captures_iter(schema) {
            catalog.add_table(&caps[1]);
        }
        for caps in TABLE_SIGNATURE.captures_iter(schema) {
            if is_non_column(&caps[1]) {
                continue;
            }
            catalog.add_table(&caps[1]);
            for column in caps[2].split(',') {
                if let Some(name) = column.split_whitespace().next() {
                    catalog.columns.insert(name.to_lowercase());
                }
            }
        }
        for section in column_sections(schema) {
            collect_section_columns(section, &mut catalog.columns);
        }

        catalog
    }

    fn add_table(&mut self, name: &str) {
        let name = name.trim();
        if name.is_empty() {
            return;
        }
        if !self.tables.iter().any(|t| t.eq_ignore_ascii_case(name)) {
            self.tables.push(name.to_string());
        }
    }

    /// Case-insensitive match that tolerates either name containing the other
    pub fn has_table(&self, name: &str) -> bool {
        let name = name.to_lowercase();
        self.tables.iter().any(|table| {
            let table = table.to_lowercase();
            table == name || table.contains(&name) || name.contains(&table)
        })
    }
}

/// Text following each `Columns:` marker up to the next `##` heading
fn column_sections(schema: &str) -> Vec<&str> {
    let mut sections = Vec::new();
    let mut rest = schema;
    while let Some(start) = rest.find("Columns:") {
        let body = &rest[start + "Columns:".len()..];
        let end = body.find("##").unwrap_or(body.len());
        sections.push(&body[..end]);
        rest = &body[end..];
    }
    sections
}

fn collect_section_columns(section: &str, columns: &mut BTreeSet<String>) {
    for caps in BACKTICK_IDENT.captures_iter(section) {
        columns.insert(caps[1].to_lowercase());
    }

    for line in section.lines() {
        let line = line.trim();
        if let Some(item) = line.strip_prefix('-').or_else(|| line.strip_prefix("* ")) {
            if let Some(caps) = LEADING_IDENT.captures(item) {
                columns.insert(caps[1].to_lowercase());
            }
        } else if line.starts_with('|') {
            let cell = line.trim_matches('|').split('|').next().unwrap_or("").trim();
            if cell.is_empty() || cell.starts_with('-') || cell.starts_with(':') {
                continue;
            }
            if let Some(caps) = LEADING_IDENT.captures(cell) {
                let name = caps[1].to_lowercase();
                if !matches!(name.as_str(), "column" | "name" | "field") {
                    columns.insert(name);
                }
            }
        }
    }
}

fn is_non_column(name: &str) -> bool {
    NON_COLUMNS.contains(&name.to_lowercase().as_str())
}

fn push_unique(list: &mut Vec<String>, value: String) {
    if !list.contains(&value) {
        list.push(value);
    }
}

/// Table names referenced by FROM and JOIN clauses, quotes removed
pub fn referenced_tables(sql: &str) -> Vec<String> {
    let sql = STRING_LITERAL.replace_all(sql, "''");
    let mut tables = Vec::new();
    for caps in TABLE_REFERENCE.captures_iter(&sql) {
        let name = (1..=4)
            .filter_map(|i| caps.get(i))
            .map(|m| m.as_str().trim().to_string())
            .next();
        if let Some(name) = name.filter(|n| !n.is_empty()) {
            push_unique(&mut tables, name);
        }
    }
    tables
}

/// Lowercased column names referenced by the query
///
/// Identifiers directly followed by `(` or `.` are function calls or table
/// qualifiers. Names introduced with `AS` are aliases and are skipped.
pub fn referenced_columns(sql: &str) -> Vec<String> {
    let sql = STRING_LITERAL.replace_all(sql, "''");
    let aliases: BTreeSet<String> = COLUMN_ALIAS
        .captures_iter(&sql)
        .map(|caps| caps[1].to_lowercase())
        .collect();

    let mut columns = Vec::new();
    for caps in QUALIFIED_COLUMN.captures_iter(&sql) {
        push_unique(&mut columns, caps[1].to_lowercase());
    }
    for caps in CLAUSE_COLUMN.captures_iter(&sql) {
        let Some(ident) = caps.get(1) else { continue };
        let next = sql[ident.end()..].trim_start().chars().next();
        if matches!(next, Some('(') | Some('.')) {
            continue;
        }
        let name = ident.as_str().to_lowercase();
        if is_non_column(&name) || aliases.contains(&name) {
            continue;
        }
        push_unique(&mut columns, name);
    }
    columns
}

/// Check that the query only uses tables and columns declared in the schema
pub fn validate(sql: &str, schema: &str) -> SchemaValidation {
    let catalog = SchemaCatalog::parse(schema);
    let mut issues = Vec::new();
    let mut tables_found = Vec::new();

    let query_tables = referenced_tables(sql);
    debug!(
        "Schema validation: query tables {:?}, schema tables {:?}",
        query_tables,
        catalog.tables.iter().take(10).collect::<Vec<_>>()
    );

    for table in query_tables {
        if catalog.has_table(&table) {
            tables_found.push(table);
        } else {
            let available: Vec<&str> = catalog.tables.iter().take(5).map(String::as_str).collect();
            issues.push(format!(
                "Table '{}' not found in schema. Available tables: {}",
                table,
                available.join(", ")
            ));
        }
    }

    let query_columns = referenced_columns(sql);
    if catalog.columns.is_empty() {
        warn!("Could not extract columns from schema for validation");
    } else {
        for column in &query_columns {
            if !catalog.columns.contains(column) {
                issues.push(format!("Column '{}' not found in schema.", column));
            }
        }
    }

    SchemaValidation {
        is_valid: issues.is_empty(),
        issues,
        tables_found,
        columns_checked: query_columns.len(),
    }
}

pub fn is_table_issue(issue: &str) -> bool {
    issue.starts_with("Table '") && issue.contains("not found in schema")
}

pub fn is_column_issue(issue: &str) -> bool {
    issue.starts_with("Column '") && issue.contains("not found in schema")
}

/// Turn validator issues into a message fit for the end user
pub fn friendly_error_message(issues: &[String], schema: &str) -> String {
    if issues.is_empty() {
        return "I encountered an error with the SQL query generation.".to_string();
    }

    let table_names: Vec<&str> = issues
        .iter()
        .filter(|issue| is_table_issue(issue))
        .filter_map(|issue| TABLE_ISSUE.captures(issue))
        .filter_map(|caps| caps.get(1).map(|m| m.as_str()))
        .collect();
    if !table_names.is_empty() {
        let catalog = SchemaCatalog::parse(schema);
        let available = if catalog.tables.is_empty() {
            String::new()
        } else {
            format!(" Available tables are: {}.", catalog.tables.join(", "))
        };
        return format!(
            "I couldn't find the table \"{}\" in your database schema.{} Please verify the table name or provide additional schema information.",
            table_names.join(", "),
            available
        );
    }

    let column_names: Vec<&str> = issues
        .iter()
        .filter(|issue| is_column_issue(issue))
        .filter_map(|issue| COLUMN_ISSUE.captures(issue))
        .filter_map(|caps| caps.get(1).map(|m| m.as_str()))
        .collect();
    if !column_names.is_empty() {
        return format!(
            "I couldn't find these columns in your database schema: {}. Please verify the column names or provide additional schema information.",
            column_names.join(", ")
        );
    }

    format!(
        "I encountered an error with the SQL query: {}",
        issues.join(", ")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    const MARKDOWN_SCHEMA: &str = "\
## Orders Table
Table Name: `orders`
Columns:
- order_id: INTEGER primary key
- region: TEXT
- revenue: REAL
- OrderDate: TEXT

## Order Details Table
Columns:
| Column | Type |
|--------|------|
| OrderID | INTEGER |
| Quantity | INTEGER |
";

    #[test]
    fn test_catalog_from_markdown() {
        let catalog = SchemaCatalog::parse(MARKDOWN_SCHEMA);
        assert_eq!(catalog.tables, vec!["Orders", "Order Details"]);
        for column in ["order_id", "region", "revenue", "orderdate", "orderid", "quantity"] {
            assert!(catalog.columns.contains(column), "missing {}", column);
        }
        assert!(!catalog.columns.contains("column"));
    }

    #[test]
    fn test_catalog_from_signature() {
        let catalog = SchemaCatalog::parse("Tables: Orders(region, revenue)");
        assert_eq!(catalog.tables, vec!["Orders"]);
        assert!(catalog.columns.contains("region"));
        assert!(catalog.columns.contains("revenue"));
    }

    #[test]
    fn test_valid_query_passes() {
        let result = validate(
            "SELECT region, SUM(revenue) AS revenue FROM Orders GROUP BY region",
            "Orders(region, revenue)",
        );
        assert!(result.is_valid, "{:?}", result.issues);
        assert_eq!(result.tables_found, vec!["Orders"]);
        assert_eq!(result.columns_checked, 1);
    }

    #[test]
    fn test_unknown_table_reported() {
        let result = validate(
            "SELECT region FROM Purchases GROUP BY region",
            "Orders(region, revenue)",
        );
        assert!(!result.is_valid);
        assert!(result.has_table_issues());
        assert_eq!(
            result.issues[0],
            "Table 'Purchases' not found in schema. Available tables: Orders"
        );
    }

    #[test]
    fn test_unknown_column_reported() {
        let result = validate(
            "SELECT o.country, SUM(o.revenue) FROM Orders o GROUP BY o.country",
            MARKDOWN_SCHEMA,
        );
        assert!(!result.has_table_issues());
        assert!(result.has_column_issues());
        assert_eq!(result.issues, vec!["Column 'country' not found in schema."]);
    }

    #[test]
    fn test_quoted_tables_and_joins() {
        let sql = r#"SELECT o.region, SUM(d.Quantity) FROM "Order Details" d JOIN Orders o ON o.order_id = d.OrderID GROUP BY o.region"#;
        assert_eq!(referenced_tables(sql), vec!["Order Details", "Orders"]);
        let result = validate(sql, MARKDOWN_SCHEMA);
        assert!(result.is_valid, "{:?}", result.issues);
    }

    #[test]
    fn test_functions_aliases_and_literals_skipped() {
        let sql = "SELECT strftime('%Y-%m', OrderDate) AS month_year, COUNT(*) AS total \
                   FROM Orders WHERE region = 'on hold' GROUP BY month_year ORDER BY total DESC";
        let columns = referenced_columns(sql);
        assert_eq!(columns, vec!["region"]);
    }

    #[test]
    fn test_column_check_skipped_without_declared_columns() {
        let result = validate("SELECT anything FROM Orders", "## Orders Table\nno columns here");
        assert!(result.is_valid);
        assert_eq!(result.columns_checked, 1);
    }

    #[test]
    fn test_validation_is_idempotent() {
        let sql = "SELECT ghost, region FROM Purchases p JOIN Orders o ON o.region = p.region";
        let first = validate(sql, MARKDOWN_SCHEMA);
        let second = validate(sql, MARKDOWN_SCHEMA);
        assert_eq!(first, second);
        assert!(!first.is_valid);
    }

    #[test]
    fn test_friendly_table_message_lists_tables() {
        let result = validate("SELECT region FROM Purchases", "Orders(region, revenue)");
        let message = friendly_error_message(&result.issues, "Orders(region, revenue)");
        assert!(message.contains("\"Purchases\""));
        assert!(message.contains("Available tables are: Orders."));
    }

    #[test]
    fn test_friendly_column_and_generic_messages() {
        let issues = vec!["Column 'country' not found in schema.".to_string()];
        assert_eq!(
            friendly_error_message(&issues, ""),
            "I couldn't find these columns in your database schema: country. Please verify the column names or provide additional schema information."
        );
        assert_eq!(
            friendly_error_message(&[], ""),
            "I encountered an error with the SQL query generation."
        );
        let other = vec!["syntax error".to_string()];
        assert_eq!(
            friendly_error_message(&other, ""),
            "I encountered an error with the SQL query: syntax error"
        );
    }
}
