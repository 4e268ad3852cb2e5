//! Framekeeper
//!
//! A lazy-evaluation DAG engine for tabular data pipelines.
//!
//! ## Features
//!
//! - **Lazy evaluation**: a node computes only when asked, pulling its parents on demand
//! - **Memoization**: at most one stored result per node, in memory or on disk
//! - **Transitive invalidation**: rewiring a node drops its cache and every descendant's
//! - **Edge validation**: each connection checks data against the consumer's expectations
//! - **Lazy cycle detection**: cycles are reported when a walk would loop, never at wiring time
//!
//! ## Architecture
//!
//! ```text
//! Pipeline
//! ├── nodes: Vec<Node>          arena addressed by NodeId
//! │   ├── kind                  source | transform | combiner
//! │   ├── connections           positional + named NodeConnections
//! │   ├── output validator
//! │   └── cache store           none | memory | file
//! └── registry: GraphRegistry   parent -> child edges
//! ```
//!
//! ## Example
//!
//! ```
//! use framekeeper::{Dataset, NodeBuilder, Pipeline};
//! use serde_json::json;
//!
//! let mut pipeline = Pipeline::new();
//! let orders = Dataset::from_rows(["id"], vec![vec![json!(1)], vec![json!(2)]]).unwrap();
//! let raw = pipeline.add_node(NodeBuilder::adapter("orders", orders)).unwrap();
//! let clean = pipeline
//!     .add_node(NodeBuilder::transform("clean").transform_with(|d| Ok(d.filter_rows(|r| r[0] != json!(2)))))
//!     .unwrap();
//! pipeline.connect_parent(clean, raw, Some("main")).unwrap();
//!
//! assert_eq!(pipeline.extract_data(clean).unwrap().row_count(), 1);
//! ```

pub mod cache;
pub mod checksum;
pub mod config;
pub mod dataset;
pub mod error;
pub mod graph;
pub mod loaders;
pub mod node;
pub mod pipeline;
pub mod schema;

pub use cache::{CachePolicy, CacheStore, FileCache, MemoryCache, NoCache};
pub use checksum::Fingerprint;
pub use config::PipelineConfig;
pub use dataset::Dataset;
pub use error::{PipelineError, Result};
pub use graph::{CycleGroup, GraphRegistry, NodeId, Walk};
pub use loaders::{CsvLoader, DatasetAdapter, DatasetLoader, FnLoader, JsonLoader};
pub use node::{ConnectionKey, Node, NodeBuilder, NodeConnection, NodeRole, ParentSet};
pub use pipeline::Pipeline;
pub use schema::{
    any_dataset, AnyDataset, Check, ColumnSchema, ColumnType, DatasetSchema, JsonRowSchema,
    SchemaValidator, SharedValidator,
};
