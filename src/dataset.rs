//! In-memory tabular datasets
//!
//! A [`Dataset`] is an ordered list of named columns plus rows of
//! `serde_json::Value` cells. It is the only value that flows along
//! pipeline edges.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::checksum::Fingerprint;
use crate::error::{PipelineError, Result};

/// Rows × named columns
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawDataset")]
pub struct Dataset {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

/// Unchecked wire form, validated on deserialization
#[derive(Deserialize)]
struct RawDataset {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

impl TryFrom<RawDataset> for Dataset {
    type Error = PipelineError;

    fn try_from(raw: RawDataset) -> Result<Self> {
        Dataset::from_rows(raw.columns, raw.rows)
    }
}

impl Dataset {
    /// Create an empty dataset with the given columns
    pub fn new<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
        }
    }

    /// Create a dataset from columns and rows, checking row widths and column uniqueness
    pub fn from_rows<I, S>(columns: I, rows: Vec<Vec<Value>>) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut dataset = Self::new(columns);
        for (i, name) in dataset.columns.iter().enumerate() {
            if dataset.columns[..i].contains(name) {
                return Err(PipelineError::InvalidDataset(format!(
                    "duplicate column '{}'",
                    name
                )));
            }
        }
        dataset.rows.reserve(rows.len());
        for row in rows {
            dataset.push_row(row)?;
        }
        Ok(dataset)
    }

    /// Create a dataset from JSON objects; columns are collected in first-seen order
    /// and absent keys become nulls
    pub fn from_records(records: &[Value]) -> Result<Self> {
        let mut columns: Vec<String> = Vec::new();
        for (i, record) in records.iter().enumerate() {
            let object = record.as_object().ok_or_else(|| {
                PipelineError::InvalidDataset(format!("record {} is not a JSON object", i))
            })?;
            for key in object.keys() {
                if !columns.contains(key) {
                    columns.push(key.clone());
                }
            }
        }

        let rows = records
            .iter()
            .filter_map(Value::as_object)
            .map(|object| {
                columns
                    .iter()
                    .map(|c| object.get(c).cloned().unwrap_or(Value::Null))
                    .collect()
            })
            .collect();

        Ok(Self { columns, rows })
    }

    /// Append a row; its width must match the column count
    pub fn push_row(&mut self, row: Vec<Value>) -> Result<()> {
        if row.len() != self.columns.len() {
            return Err(PipelineError::InvalidDataset(format!(
                "row {} has {} cells, expected {}",
                self.rows.len(),
                row.len(),
                self.columns.len()
            )));
        }
        self.rows.push(row);
        Ok(())
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Position of a column by name
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Iterate the cells of one column
    pub fn column(&self, name: &str) -> Option<impl Iterator<Item = &Value> + '_> {
        let idx = self.column_index(name)?;
        Some(self.rows.iter().map(move |row| &row[idx]))
    }

    /// Mutable access to the cells of one column, used by coercing validators
    pub(crate) fn column_mut(&mut self, name: &str) -> Option<impl Iterator<Item = &mut Value> + '_> {
        let idx = self.column_index(name)?;
        Some(self.rows.iter_mut().map(move |row| &mut row[idx]))
    }

    /// Project onto a subset of columns, in the order given
    pub fn select(&self, names: &[&str]) -> Result<Dataset> {
        let indices = names
            .iter()
            .map(|name| {
                self.column_index(name).ok_or_else(|| {
                    PipelineError::InvalidDataset(format!("unknown column '{}'", name))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Dataset::from_rows(
            names.iter().copied(),
            self.rows
                .iter()
                .map(|row| indices.iter().map(|&i| row[i].clone()).collect())
                .collect(),
        )
    }

    /// Keep rows for which the predicate holds
    pub fn filter_rows<F>(&self, mut predicate: F) -> Dataset
    where
        F: FnMut(&[Value]) -> bool,
    {
        Self {
            columns: self.columns.clone(),
            rows: self.rows.iter().filter(|row| predicate(row)).cloned().collect(),
        }
    }

    /// Vertical concatenation. Columns are the union of both sides (this side's
    /// order first); cells missing on either side become nulls.
    pub fn concat(&self, other: &Dataset) -> Dataset {
        let mut columns = self.columns.clone();
        for c in &other.columns {
            if !columns.contains(c) {
                columns.push(c.clone());
            }
        }

        let mut rows = Vec::with_capacity(self.rows.len() + other.rows.len());
        for part in [self, other] {
            let mapping: Vec<Option<usize>> =
                columns.iter().map(|c| part.column_index(c)).collect();
            for row in &part.rows {
                rows.push(
                    mapping
                        .iter()
                        .map(|m| m.map(|i| row[i].clone()).unwrap_or(Value::Null))
                        .collect(),
                );
            }
        }

        Self { columns, rows }
    }

    /// Rows as JSON objects keyed by column name
    pub fn to_records(&self) -> Vec<Value> {
        self.rows
            .iter()
            .map(|row| {
                let object: Map<String, Value> = self
                    .columns
                    .iter()
                    .cloned()
                    .zip(row.iter().cloned())
                    .collect();
                Value::Object(object)
            })
            .collect()
    }

    /// Content fingerprint
    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::of_dataset(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn people() -> Dataset {
        Dataset::from_rows(
            ["id", "name"],
            vec![
                vec![json!(1), json!("ada")],
                vec![json!(2), json!("grace")],
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_row_width_checked() {
        let mut ds = people();
        assert!(ds.push_row(vec![json!(3)]).is_err());
        assert_eq!(ds.row_count(), 2);
    }

    #[test]
    fn test_duplicate_columns_rejected() {
        let result = Dataset::from_rows(["a", "a"], vec![]);
        assert!(matches!(result, Err(PipelineError::InvalidDataset(_))));
    }

    #[test]
    fn test_from_records_collects_columns() {
        let ds = Dataset::from_records(&[
            json!({"id": 1, "name": "ada"}),
            json!({"id": 2, "age": 36}),
        ])
        .unwrap();
        assert_eq!(ds.columns(), &["id", "name", "age"]);
        assert_eq!(ds.rows()[1], vec![json!(2), Value::Null, json!(36)]);
    }

    #[test]
    fn test_from_records_rejects_scalars() {
        assert!(Dataset::from_records(&[json!(1)]).is_err());
    }

    #[test]
    fn test_concat_unions_columns() {
        let other = Dataset::from_rows(["name", "team"], vec![vec![json!("linus"), json!("kernel")]])
            .unwrap();
        let combined = people().concat(&other);
        assert_eq!(combined.columns(), &["id", "name", "team"]);
        assert_eq!(combined.row_count(), 3);
        assert_eq!(combined.rows()[0][2], Value::Null);
        assert_eq!(combined.rows()[2], vec![Value::Null, json!("linus"), json!("kernel")]);
    }

    #[test]
    fn test_select_and_filter() {
        let names = people().select(&["name"]).unwrap();
        assert_eq!(names.columns(), &["name"]);
        assert!(people().select(&["missing"]).is_err());

        let filtered = people().filter_rows(|row| row[0] == json!(2));
        assert_eq!(filtered.row_count(), 1);
        assert_eq!(filtered.column("name").unwrap().next(), Some(&json!("grace")));
    }

    #[test]
    fn test_serde_roundtrip_checks_shape() {
        let encoded = serde_json::to_string(&people()).unwrap();
        let decoded: Dataset = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, people());

        let broken = r#"{"columns": ["a", "b"], "rows": [[1]]}"#;
        assert!(serde_json::from_str::<Dataset>(broken).is_err());
    }

    #[test]
    fn test_to_records() {
        let records = people().to_records();
        assert_eq!(records[0], json!({"id": 1, "name": "ada"}));
    }
}
