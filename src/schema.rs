//! Schema validators applied at node boundaries
//!
//! A validator either returns the (possibly coerced) dataset or fails with
//! [`PipelineError::ValidationFailed`] naming the violated constraint. Nodes
//! apply one to their output; connections apply one to what they hand to
//! their consumer.

use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use std::rc::Rc;

use jsonschema::JSONSchema;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};

use crate::dataset::Dataset;
use crate::error::{PipelineError, Result};

/// Predicate/coercion over a dataset
pub trait SchemaValidator: fmt::Debug {
    /// Validate and return the dataset, possibly coerced
    fn validate(&self, data: Dataset) -> Result<Dataset>;

    /// Name used in error messages and graph exports
    fn name(&self) -> String;
}

/// Validators are shared between connections and nodes
pub type SharedValidator = Rc<dyn SchemaValidator>;

/// Accepts every dataset unchanged
#[derive(Debug, Clone, Copy, Default)]
pub struct AnyDataset;

impl SchemaValidator for AnyDataset {
    fn validate(&self, data: Dataset) -> Result<Dataset> {
        Ok(data)
    }

    fn name(&self) -> String {
        "AnyDataset".to_string()
    }
}

/// The default validator for nodes and connections
pub fn any_dataset() -> SharedValidator {
    Rc::new(AnyDataset)
}

// =============================================================================
// Column schemas
// =============================================================================

/// Declared cell type of a column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Any,
    Bool,
    Int,
    Float,
    String,
}

impl ColumnType {
    /// Does a non-null cell already have this type?
    fn accepts(&self, cell: &Value) -> bool {
        match self {
            ColumnType::Any => true,
            ColumnType::Bool => cell.is_boolean(),
            ColumnType::Int => cell.is_i64() || cell.is_u64(),
            ColumnType::Float => cell.is_number(),
            ColumnType::String => cell.is_string(),
        }
    }

    /// Cast a non-null cell to this type
    fn coerce(&self, cell: &Value) -> Option<Value> {
        match (self, cell) {
            (ColumnType::Any, v) => Some(v.clone()),

            (ColumnType::Bool, Value::Bool(_)) => Some(cell.clone()),
            (ColumnType::Bool, Value::String(s)) => match s.to_ascii_lowercase().as_str() {
                "true" => Some(Value::Bool(true)),
                "false" => Some(Value::Bool(false)),
                _ => None,
            },
            (ColumnType::Bool, Value::Number(n)) => match n.as_i64() {
                Some(0) => Some(Value::Bool(false)),
                Some(1) => Some(Value::Bool(true)),
                _ => None,
            },

            (ColumnType::Int, Value::Number(n)) if n.is_i64() || n.is_u64() => Some(cell.clone()),
            (ColumnType::Int, Value::Number(n)) => n
                .as_f64()
                .filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64)
                .map(|f| Value::from(f as i64)),
            (ColumnType::Int, Value::String(s)) => s.trim().parse::<i64>().ok().map(Value::from),
            (ColumnType::Int, Value::Bool(b)) => Some(Value::from(i64::from(*b))),

            (ColumnType::Float, Value::Number(_)) => Some(cell.clone()),
            (ColumnType::Float, Value::String(s)) => s
                .trim()
                .parse::<f64>()
                .ok()
                .and_then(Number::from_f64)
                .map(Value::Number),

            (ColumnType::String, Value::String(_)) => Some(cell.clone()),
            (ColumnType::String, Value::Number(n)) => Some(Value::String(n.to_string())),
            (ColumnType::String, Value::Bool(b)) => Some(Value::String(b.to_string())),

            _ => None,
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ColumnType::Any => "any",
            ColumnType::Bool => "bool",
            ColumnType::Int => "int",
            ColumnType::Float => "float",
            ColumnType::String => "string",
        };
        write!(f, "{}", name)
    }
}

/// Value-level check on a column; nulls are never checked
#[derive(Debug, Clone)]
pub enum Check {
    /// Numeric cell >= bound
    Ge(f64),
    /// Numeric cell <= bound
    Le(f64),
    /// Cell is one of the listed values
    InSet(Vec<Value>),
    /// String cell matches the pattern
    Matches(Regex),
    /// No two non-null cells are equal
    Unique,
}

impl Check {
    /// Compile a regex check
    pub fn matches(pattern: &str) -> Result<Self> {
        Regex::new(pattern)
            .map(Check::Matches)
            .map_err(|e| PipelineError::InvalidSchema(e.to_string()))
    }

    fn describe(&self) -> String {
        match self {
            Check::Ge(bound) => format!("greater_than_or_equal_to({})", bound),
            Check::Le(bound) => format!("less_than_or_equal_to({})", bound),
            Check::InSet(values) => format!("isin({})", Value::Array(values.clone())),
            Check::Matches(re) => format!("str_matches('{}')", re.as_str()),
            Check::Unique => "unique".to_string(),
        }
    }

    /// Row index of the first violating cell
    fn first_violation<'a>(&self, cells: impl Iterator<Item = &'a Value>) -> Option<usize> {
        let mut seen = HashSet::new();
        for (row, cell) in cells.enumerate() {
            if cell.is_null() {
                continue;
            }
            let ok = match self {
                Check::Ge(bound) => cell.as_f64().map(|v| v >= *bound).unwrap_or(false),
                Check::Le(bound) => cell.as_f64().map(|v| v <= *bound).unwrap_or(false),
                Check::InSet(values) => values.contains(cell),
                Check::Matches(re) => cell.as_str().map(|s| re.is_match(s)).unwrap_or(false),
                Check::Unique => seen.insert(cell.to_string()),
            };
            if !ok {
                return Some(row);
            }
        }
        None
    }
}

/// Declaration of one column
#[derive(Debug, Clone)]
pub struct ColumnSchema {
    pub name: String,
    pub dtype: ColumnType,
    pub nullable: bool,
    pub required: bool,
    pub checks: Vec<Check>,
}

impl ColumnSchema {
    /// A required, non-nullable column
    pub fn new(name: impl Into<String>, dtype: ColumnType) -> Self {
        Self {
            name: name.into(),
            dtype,
            nullable: false,
            required: true,
            checks: Vec::new(),
        }
    }

    pub fn nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }

    /// The column may be absent
    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn check(mut self, check: Check) -> Self {
        self.checks.push(check);
        self
    }
}

/// Column-level schema over a dataset
#[derive(Debug, Clone)]
pub struct DatasetSchema {
    name: String,
    columns: Vec<ColumnSchema>,
    strict: bool,
    coerce: bool,
    min_rows: Option<usize>,
}

impl DatasetSchema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            strict: false,
            coerce: false,
            min_rows: None,
        }
    }

    pub fn column(mut self, column: ColumnSchema) -> Self {
        self.columns.push(column);
        self
    }

    /// Reject columns that are not declared
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Cast cells to the declared column types before checking them
    pub fn coerce(mut self, coerce: bool) -> Self {
        self.coerce = coerce;
        self
    }

    pub fn min_rows(mut self, min_rows: usize) -> Self {
        self.min_rows = Some(min_rows);
        self
    }

    pub fn shared(self) -> SharedValidator {
        Rc::new(self)
    }

    fn fail(&self, constraint: String) -> PipelineError {
        PipelineError::validation(&self.name, constraint)
    }

    fn validate_column(&self, data: &mut Dataset, column: &ColumnSchema) -> Result<()> {
        if self.coerce {
            if let Some(cells) = data.column_mut(&column.name) {
                for (row, cell) in cells.enumerate() {
                    if cell.is_null() {
                        continue;
                    }
                    let coerced = column.dtype.coerce(cell).ok_or_else(|| {
                        self.fail(format!(
                            "column '{}' row {}: cannot coerce {} to {}",
                            column.name, row, cell, column.dtype
                        ))
                    })?;
                    *cell = coerced;
                }
            }
        }

        let Some(cells) = data.column(&column.name) else {
            return Ok(());
        };
        for (row, cell) in cells.enumerate() {
            if cell.is_null() {
                if !column.nullable {
                    return Err(self.fail(format!(
                        "column '{}' row {}: null values are not allowed",
                        column.name, row
                    )));
                }
            } else if !column.dtype.accepts(cell) {
                return Err(self.fail(format!(
                    "column '{}' row {}: expected {}, found {}",
                    column.name, row, column.dtype, cell
                )));
            }
        }

        for check in &column.checks {
            let cells = data.column(&column.name).into_iter().flatten();
            if let Some(row) = check.first_violation(cells) {
                return Err(self.fail(format!(
                    "column '{}' row {}: check {} failed",
                    column.name,
                    row,
                    check.describe()
                )));
            }
        }
        Ok(())
    }
}

impl SchemaValidator for DatasetSchema {
    fn validate(&self, mut data: Dataset) -> Result<Dataset> {
        if let Some(min) = self.min_rows {
            if data.row_count() < min {
                return Err(self.fail(format!(
                    "expected at least {} rows, found {}",
                    min,
                    data.row_count()
                )));
            }
        }

        for column in &self.columns {
            if column.required && data.column_index(&column.name).is_none() {
                return Err(self.fail(format!("column '{}' is missing", column.name)));
            }
        }

        if self.strict {
            if let Some(extra) = data
                .columns()
                .iter()
                .find(|c| !self.columns.iter().any(|d| &d.name == *c))
            {
                return Err(self.fail(format!("column '{}' is not declared", extra)));
            }
        }

        for column in &self.columns {
            self.validate_column(&mut data, column)?;
        }
        Ok(data)
    }

    fn name(&self) -> String {
        self.name.clone()
    }
}

// =============================================================================
// JSON Schema rows
// =============================================================================

/// Validates every row, as a JSON object, against a JSON Schema document
pub struct JsonRowSchema {
    name: String,
    raw: Value,
    compiled: JSONSchema,
    max_reported: usize,
}

impl JsonRowSchema {
    pub fn new(name: impl Into<String>, schema: Value) -> Result<Self> {
        let compiled = JSONSchema::compile(&schema)
            .map_err(|e| PipelineError::InvalidSchema(format!("Invalid JSON Schema: {}", e)))?;
        Ok(Self {
            name: name.into(),
            raw: schema,
            compiled,
            max_reported: 5,
        })
    }

    /// Load a JSON Schema file; the file stem names the validator
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let schema: Value = serde_json::from_str(&content)?;
        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("json-schema")
            .to_string();
        Self::new(name, schema)
    }

    /// Cap the number of row errors included in a failure message
    pub fn with_max_reported(mut self, max_reported: usize) -> Self {
        self.max_reported = max_reported.max(1);
        self
    }

    pub fn schema(&self) -> &Value {
        &self.raw
    }

    pub fn shared(self) -> SharedValidator {
        Rc::new(self)
    }
}

impl fmt::Debug for JsonRowSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JsonRowSchema")
            .field("name", &self.name)
            .field("schema", &self.raw)
            .field("max_reported", &self.max_reported)
            .finish()
    }
}

impl SchemaValidator for JsonRowSchema {
    fn validate(&self, data: Dataset) -> Result<Dataset> {
        let mut messages = Vec::new();
        for (row, record) in data.to_records().iter().enumerate() {
            if let Err(errors) = self.compiled.validate(record) {
                messages.extend(
                    errors.map(|error| format!("row {} at '{}': {}", row, error.instance_path, error)),
                );
            }
            if messages.len() >= self.max_reported {
                break;
            }
        }

        if messages.is_empty() {
            Ok(data)
        } else {
            messages.truncate(self.max_reported);
            Err(PipelineError::validation(&self.name, messages.join("; ")))
        }
    }

    fn name(&self) -> String {
        self.name.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn orders() -> Dataset {
        Dataset::from_rows(
            ["id", "status", "amount"],
            vec![
                vec![json!(1), json!("paid"), json!(10.5)],
                vec![json!(2), json!("open"), json!(3)],
                vec![json!(3), json!("paid"), Value::Null],
            ],
        )
        .unwrap()
    }

    fn orders_schema() -> DatasetSchema {
        DatasetSchema::new("orders")
            .column(ColumnSchema::new("id", ColumnType::Int).check(Check::Unique))
            .column(
                ColumnSchema::new("status", ColumnType::String)
                    .check(Check::InSet(vec![json!("paid"), json!("open")])),
            )
            .column(
                ColumnSchema::new("amount", ColumnType::Float)
                    .nullable(true)
                    .check(Check::Ge(0.0)),
            )
    }

    fn constraint(err: PipelineError) -> String {
        match err {
            PipelineError::ValidationFailed { constraint, .. } => constraint,
            other => panic!("expected validation failure, got {:?}", other),
        }
    }

    #[test]
    fn test_any_dataset_passes_through() {
        assert_eq!(AnyDataset.validate(orders()).unwrap(), orders());
    }

    #[test]
    fn test_valid_dataset_passes() {
        assert_eq!(orders_schema().validate(orders()).unwrap(), orders());
    }

    #[test]
    fn test_missing_required_column() {
        let data = orders().select(&["id", "status"]).unwrap();
        let err = orders_schema().validate(data).unwrap_err();
        assert!(constraint(err).contains("'amount' is missing"));

        let relaxed = DatasetSchema::new("relaxed")
            .column(ColumnSchema::new("amount", ColumnType::Float).optional());
        assert!(relaxed.validate(orders().select(&["id"]).unwrap()).is_ok());
    }

    #[test]
    fn test_strict_rejects_undeclared() {
        let schema = DatasetSchema::new("ids")
            .column(ColumnSchema::new("id", ColumnType::Int))
            .strict(true);
        let err = schema.validate(orders()).unwrap_err();
        assert!(constraint(err).contains("'status' is not declared"));
    }

    #[test]
    fn test_nulls_and_types() {
        let schema = DatasetSchema::new("amounts")
            .column(ColumnSchema::new("amount", ColumnType::Float));
        assert!(constraint(schema.validate(orders()).unwrap_err()).contains("null values"));

        let schema = DatasetSchema::new("status")
            .column(ColumnSchema::new("status", ColumnType::Int));
        assert!(constraint(schema.validate(orders()).unwrap_err()).contains("expected int"));
    }

    #[test]
    fn test_checks_report_row() {
        let mut data = orders();
        data.push_row(vec![json!(1), json!("void"), json!(-1)]).unwrap();

        let unique = DatasetSchema::new("u")
            .column(ColumnSchema::new("id", ColumnType::Int).check(Check::Unique));
        assert!(constraint(unique.validate(data.clone()).unwrap_err()).contains("row 3: check unique"));

        let err = orders_schema().validate(data).unwrap_err();
        assert!(constraint(err).contains("row 3"));
    }

    #[test]
    fn test_regex_check() {
        let schema = DatasetSchema::new("status").column(
            ColumnSchema::new("status", ColumnType::String).check(Check::matches("^p").unwrap()),
        );
        let err = schema.validate(orders()).unwrap_err();
        assert!(constraint(err).contains("row 1: check str_matches('^p')"));
        assert!(Check::matches("(").is_err());
    }

    #[test]
    fn test_coercion() {
        let raw = Dataset::from_rows(
            ["id", "flag", "score"],
            vec![
                vec![json!("7"), json!("TRUE"), json!("1.5")],
                vec![json!(8.0), json!(0), Value::Null],
            ],
        )
        .unwrap();
        let schema = DatasetSchema::new("typed")
            .column(ColumnSchema::new("id", ColumnType::Int))
            .column(ColumnSchema::new("flag", ColumnType::Bool))
            .column(ColumnSchema::new("score", ColumnType::Float).nullable(true))
            .coerce(true);

        let typed = schema.validate(raw).unwrap();
        assert_eq!(typed.rows()[0], vec![json!(7), json!(true), json!(1.5)]);
        assert_eq!(typed.rows()[1], vec![json!(8), json!(false), Value::Null]);

        let bad = Dataset::from_rows(["id"], vec![vec![json!("seven")]]).unwrap();
        let schema = DatasetSchema::new("typed")
            .column(ColumnSchema::new("id", ColumnType::Int))
            .coerce(true);
        assert!(constraint(schema.validate(bad).unwrap_err()).contains("cannot coerce"));
    }

    #[test]
    fn test_min_rows() {
        let schema = DatasetSchema::new("nonempty").min_rows(4);
        assert!(constraint(schema.validate(orders()).unwrap_err()).contains("at least 4 rows"));
    }

    #[test]
    fn test_json_row_schema() {
        let schema = JsonRowSchema::new(
            "order-row",
            json!({
                "type": "object",
                "properties": {
                    "id": { "type": "integer" },
                    "amount": { "type": ["number", "null"], "minimum": 5 }
                },
                "required": ["id"]
            }),
        )
        .unwrap();

        let err = schema.validate(orders()).unwrap_err();
        match err {
            PipelineError::ValidationFailed { schema, constraint } => {
                assert_eq!(schema, "order-row");
                assert!(constraint.contains("row 1 at '/amount'"));
            }
            other => panic!("unexpected {:?}", other),
        }

        let ok = orders().filter_rows(|row| row[0] != json!(2));
        assert!(schema.validate(ok).is_ok());
    }

    #[test]
    fn test_invalid_json_schema() {
        let result = JsonRowSchema::new("bad", json!({"type": 12}));
        assert!(matches!(result, Err(PipelineError::InvalidSchema(_))));
    }
}
