//! Error types for the pipeline engine

use thiserror::Error;

use crate::graph::NodeId;

/// Result type for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Pipeline engine errors
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Looped graph detected at node {node}")]
    CycleDetected { node: NodeId },

    #[error("Duplicate name '{keyword}' for named connection on node {node}")]
    DuplicateConnectionKeyword { node: NodeId, keyword: String },

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Validation failed for {schema}: {constraint}")]
    ValidationFailed { schema: String, constraint: String },

    #[error("Cache storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Unknown node: {0}")]
    UnknownNode(NodeId),

    #[error("Connection not found on node {node}: {key}")]
    ConnectionNotFound { node: NodeId, key: String },

    #[error("Invalid dataset: {0}")]
    InvalidDataset(String),

    #[error("Invalid schema: {0}")]
    InvalidSchema(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl PipelineError {
    pub(crate) fn validation(schema: impl Into<String>, constraint: impl Into<String>) -> Self {
        Self::ValidationFailed {
            schema: schema.into(),
            constraint: constraint.into(),
        }
    }

    /// Returns true for errors raised by a cycle in the dependency graph
    pub fn is_cycle(&self) -> bool {
        matches!(self, Self::CycleDetected { .. })
    }
}
