//! Leaf loaders
//!
//! Each loader knows how to produce one dataset and turns into a static
//! source node through [`DatasetLoader::into_node`]. Static sources keep
//! their result in memory after the first load, so files are read at most
//! once per invalidation.

use std::fs;
use std::path::{Path, PathBuf};

use csv::ReaderBuilder;
use serde_json::{Number, Value};
use tracing::debug;

use crate::config::PipelineConfig;
use crate::dataset::Dataset;
use crate::error::{PipelineError, Result};
use crate::node::NodeBuilder;

/// Something that can produce a dataset with no inputs
pub trait DatasetLoader: 'static {
    fn load(&self) -> Result<Dataset>;

    /// Static source node running this loader
    fn into_node(self, label: impl Into<String>) -> NodeBuilder
    where
        Self: Sized,
    {
        NodeBuilder::static_source(label, move || self.load())
    }
}

/// Wraps a dataset that already exists
#[derive(Debug, Clone)]
pub struct DatasetAdapter {
    dataset: Dataset,
}

impl DatasetAdapter {
    pub fn new(dataset: Dataset) -> Self {
        Self { dataset }
    }
}

impl DatasetLoader for DatasetAdapter {
    fn load(&self) -> Result<Dataset> {
        Ok(self.dataset.clone())
    }

    /// Adapters start cached
    fn into_node(self, label: impl Into<String>) -> NodeBuilder {
        NodeBuilder::adapter(label, self.dataset)
    }
}

/// Reads a delimited text file
#[derive(Debug, Clone)]
pub struct CsvLoader {
    path: PathBuf,
    delimiter: u8,
    has_headers: bool,
    infer_types: bool,
}

impl CsvLoader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            delimiter: b',',
            has_headers: true,
            infer_types: true,
        }
    }

    /// Loader using the `[loader]` defaults of a configuration
    pub fn from_config(path: impl Into<PathBuf>, config: &PipelineConfig) -> Self {
        Self::new(path)
            .delimiter(config.csv_delimiter())
            .has_headers(config.loader.has_headers)
            .infer_types(config.loader.infer_types)
    }

    pub fn delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }

    /// Without headers, columns are named `column_0`, `column_1`, ...
    pub fn has_headers(mut self, has_headers: bool) -> Self {
        self.has_headers = has_headers;
        self
    }

    pub fn infer_types(mut self, infer_types: bool) -> Self {
        self.infer_types = infer_types;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn cell(&self, raw: &str) -> Value {
        if self.infer_types {
            infer_cell(raw)
        } else {
            Value::String(raw.to_string())
        }
    }
}

impl DatasetLoader for CsvLoader {
    fn load(&self) -> Result<Dataset> {
        let mut reader = ReaderBuilder::new()
            .delimiter(self.delimiter)
            .has_headers(self.has_headers)
            .from_path(&self.path)?;

        let mut records = Vec::new();
        for record in reader.records() {
            records.push(record?);
        }

        let columns: Vec<String> = if self.has_headers {
            reader.headers()?.iter().map(str::to_string).collect()
        } else {
            let width = records.first().map(|r| r.len()).unwrap_or(0);
            (0..width).map(|i| format!("column_{}", i)).collect()
        };

        let rows = records
            .iter()
            .map(|record| record.iter().map(|raw| self.cell(raw)).collect())
            .collect();

        let dataset = Dataset::from_rows(columns, rows)?;
        debug!(path = %self.path.display(), rows = dataset.row_count(), "loaded csv");
        Ok(dataset)
    }
}

/// Empty cells become null, then integer, float and boolean parses are
/// tried in that order; anything else stays a string
fn infer_cell(raw: &str) -> Value {
    if raw.is_empty() {
        return Value::Null;
    }
    if let Ok(i) = raw.parse::<i64>() {
        return Value::from(i);
    }
    if let Some(n) = raw.parse::<f64>().ok().and_then(Number::from_f64) {
        return Value::Number(n);
    }
    match raw {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        _ => Value::String(raw.to_string()),
    }
}

/// Reads a JSON array of objects, or one object per line (JSON Lines)
#[derive(Debug, Clone)]
pub struct JsonLoader {
    path: PathBuf,
}

impl JsonLoader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl DatasetLoader for JsonLoader {
    fn load(&self) -> Result<Dataset> {
        let content = fs::read_to_string(&self.path)?;
        let records: Vec<Value> = if content.trim_start().starts_with('[') {
            serde_json::from_str(&content)?
        } else {
            content
                .lines()
                .filter(|line| !line.trim().is_empty())
                .map(serde_json::from_str)
                .collect::<std::result::Result<_, _>>()?
        };

        let dataset = Dataset::from_records(&records).map_err(|e| match e {
            PipelineError::InvalidDataset(msg) => {
                PipelineError::InvalidDataset(format!("{}: {}", self.path.display(), msg))
            }
            other => other,
        })?;
        debug!(path = %self.path.display(), rows = dataset.row_count(), "loaded json");
        Ok(dataset)
    }
}

/// Loader backed by an arbitrary closure; arguments are captured by the closure
pub struct FnLoader<F> {
    produce: F,
}

impl<F> FnLoader<F>
where
    F: Fn() -> Result<Dataset> + 'static,
{
    pub fn new(produce: F) -> Self {
        Self { produce }
    }
}

impl<F> DatasetLoader for FnLoader<F>
where
    F: Fn() -> Result<Dataset> + 'static,
{
    fn load(&self) -> Result<Dataset> {
        (self.produce)()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn test_infer_cell() {
        assert_eq!(infer_cell(""), Value::Null);
        assert_eq!(infer_cell("42"), json!(42));
        assert_eq!(infer_cell("-1.5"), json!(-1.5));
        assert_eq!(infer_cell("true"), json!(true));
        assert_eq!(infer_cell("NaN"), json!("NaN"));
        assert_eq!(infer_cell("Oslo"), json!("Oslo"));
    }

    #[test]
    fn test_csv_with_headers() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cities.csv");
        fs::write(&path, "city,population,coastal\nOslo,709000,true\nBern,,false\n").unwrap();

        let data = CsvLoader::new(&path).load().unwrap();
        assert_eq!(data.columns(), &["city", "population", "coastal"]);
        assert_eq!(data.row_count(), 2);
        assert_eq!(data.rows()[0], vec![json!("Oslo"), json!(709000), json!(true)]);
        assert_eq!(data.rows()[1][1], Value::Null);
    }

    #[test]
    fn test_csv_without_headers_or_inference() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("raw.csv");
        fs::write(&path, "1;a\n2;b\n").unwrap();

        let data = CsvLoader::new(&path)
            .delimiter(b';')
            .has_headers(false)
            .infer_types(false)
            .load()
            .unwrap();
        assert_eq!(data.columns(), &["column_0", "column_1"]);
        assert_eq!(data.rows()[1], vec![json!("2"), json!("b")]);
    }

    #[test]
    fn test_csv_ragged_rows_fail() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ragged.csv");
        fs::write(&path, "a,b\n1,2\n3\n").unwrap();
        assert!(matches!(CsvLoader::new(&path).load(), Err(PipelineError::Csv(_))));
    }

    #[test]
    fn test_csv_missing_file() {
        let dir = tempdir().unwrap();
        assert!(CsvLoader::new(dir.path().join("absent.csv")).load().is_err());
    }

    #[test]
    fn test_json_array_and_lines() {
        let dir = tempdir().unwrap();
        let array = dir.path().join("array.json");
        fs::write(&array, r#"[{"id": 1, "name": "a"}, {"id": 2}]"#).unwrap();
        let data = JsonLoader::new(&array).load().unwrap();
        assert_eq!(data.row_count(), 2);
        assert_eq!(data.rows()[1][data.column_index("name").unwrap()], Value::Null);

        let lines = dir.path().join("rows.jsonl");
        fs::write(&lines, "{\"id\": 1}\n\n{\"id\": 2}\n").unwrap();
        let data = JsonLoader::new(&lines).load().unwrap();
        assert_eq!(data.columns(), &["id"]);
        assert_eq!(data.row_count(), 2);
    }

    #[test]
    fn test_json_rejects_scalars() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.json");
        fs::write(&path, "[1, 2]").unwrap();
        let err = JsonLoader::new(&path).load().unwrap_err();
        assert!(matches!(err, PipelineError::InvalidDataset(_)));
        assert!(err.to_string().contains("bad.json"));
    }

    #[test]
    fn test_fn_loader() {
        let loader = FnLoader::new(|| Dataset::from_rows(["x"], vec![vec![json!(1)]]));
        assert_eq!(loader.load().unwrap().row_count(), 1);
    }
}
