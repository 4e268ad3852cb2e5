//! Nodes, connections and node construction
//!
//! Nodes live in a [`Pipeline`](crate::Pipeline) arena and are addressed by
//! [`NodeId`]. A node is one of a closed set of kinds:
//!
//! - **source**: no parents; runs a zero-argument producer. A *static* source
//!   keeps its one result in memory and has an identity transform.
//! - **transform**: exactly one parent; forwards it to the node's transform step.
//! - **combiner**: any number of positional and named parents; hands all of
//!   them to a combine function.

use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use crate::cache::{CachePolicy, CacheStore, FileCache, MemoryCache, NoCache};
use crate::config::PipelineConfig;
use crate::dataset::Dataset;
use crate::error::{PipelineError, Result};
use crate::graph::NodeId;
use crate::pipeline::Pipeline;
use crate::schema::{any_dataset, SchemaValidator, SharedValidator};

/// Zero-argument producer of a source node
pub type ProduceFn = Box<dyn Fn() -> Result<Dataset>>;

/// Combine step of a combiner node: positional inputs, then named inputs
pub type CombineFn = Box<dyn Fn(Vec<Dataset>, BTreeMap<String, Dataset>) -> Result<Dataset>>;

/// Per-node transform applied after production and before output validation
pub type TransformFn = Box<dyn Fn(Dataset) -> Result<Dataset>>;

// =============================================================================
// Connections
// =============================================================================

/// Edge from a consumer to one producer, with the consumer's input validator
#[derive(Debug, Clone)]
pub struct NodeConnection {
    node: NodeId,
    input_validator: SharedValidator,
}

impl NodeConnection {
    pub fn new(node: NodeId, input_validator: SharedValidator) -> Self {
        Self {
            node,
            input_validator,
        }
    }

    /// Connection with its own validator type
    pub fn validated<V: SchemaValidator + 'static>(node: NodeId, validator: V) -> Self {
        Self::new(node, Rc::new(validator))
    }

    /// The producer
    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn input_validator(&self) -> &SharedValidator {
        &self.input_validator
    }

    /// Evaluate the producer, then check the result against this connection's
    /// input validator
    pub fn extract_data(&self, pipeline: &mut Pipeline) -> Result<Dataset> {
        let data = pipeline.extract_data(self.node)?;
        self.input_validator.validate(data)
    }
}

impl From<NodeId> for NodeConnection {
    fn from(node: NodeId) -> Self {
        Self::new(node, any_dataset())
    }
}

/// Address of one connection on a consumer
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ConnectionKey {
    Position(usize),
    Keyword(String),
}

impl fmt::Display for ConnectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionKey::Position(i) => write!(f, "position {}", i),
            ConnectionKey::Keyword(k) => write!(f, "keyword '{}'", k),
        }
    }
}

impl From<usize> for ConnectionKey {
    fn from(position: usize) -> Self {
        ConnectionKey::Position(position)
    }
}

impl From<&str> for ConnectionKey {
    fn from(keyword: &str) -> Self {
        ConnectionKey::Keyword(keyword.to_string())
    }
}

/// Batch of parents for [`Pipeline::connect_parents`]. Positional entries are
/// applied first, in insertion order, then named entries in insertion order.
#[derive(Debug, Clone, Default)]
pub struct ParentSet {
    positional: Vec<NodeConnection>,
    named: Vec<(String, NodeConnection)>,
}

impl ParentSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn positional(mut self, parent: impl Into<NodeConnection>) -> Self {
        self.positional.push(parent.into());
        self
    }

    pub fn named(mut self, keyword: impl Into<String>, parent: impl Into<NodeConnection>) -> Self {
        self.named.push((keyword.into(), parent.into()));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.positional.is_empty() && self.named.is_empty()
    }

    pub(crate) fn connections(&self) -> impl Iterator<Item = &NodeConnection> {
        self.positional.iter().chain(self.named.iter().map(|(_, c)| c))
    }

    pub(crate) fn into_entries(self) -> impl Iterator<Item = (Option<String>, NodeConnection)> {
        self.positional
            .into_iter()
            .map(|c| (None, c))
            .chain(self.named.into_iter().map(|(k, c)| (Some(k), c)))
    }
}

impl<C: Into<NodeConnection>> FromIterator<C> for ParentSet {
    fn from_iter<I: IntoIterator<Item = C>>(iter: I) -> Self {
        Self {
            positional: iter.into_iter().map(Into::into).collect(),
            named: Vec::new(),
        }
    }
}

/// Connections held by a processor node
#[derive(Debug, Default)]
pub(crate) struct Inputs {
    positional: Vec<NodeConnection>,
    named: BTreeMap<String, NodeConnection>,
}

impl Inputs {
    fn len(&self) -> usize {
        self.positional.len() + self.named.len()
    }

    fn ensure_keyword_free(&self, owner: NodeId, keyword: Option<&str>) -> Result<()> {
        match keyword {
            Some(keyword) if self.named.contains_key(keyword) => {
                Err(PipelineError::DuplicateConnectionKeyword {
                    node: owner,
                    keyword: keyword.to_string(),
                })
            }
            _ => Ok(()),
        }
    }

    fn insert(&mut self, owner: NodeId, connection: NodeConnection, keyword: Option<String>) -> Result<()> {
        self.ensure_keyword_free(owner, keyword.as_deref())?;
        match keyword {
            None => self.positional.push(connection),
            Some(keyword) => {
                self.named.insert(keyword, connection);
            }
        }
        Ok(())
    }

    fn contains(&self, key: &ConnectionKey) -> bool {
        match key {
            ConnectionKey::Position(i) => *i < self.positional.len(),
            ConnectionKey::Keyword(k) => self.named.contains_key(k),
        }
    }

    fn remove(&mut self, key: &ConnectionKey) -> Option<NodeConnection> {
        match key {
            ConnectionKey::Position(i) if *i < self.positional.len() => Some(self.positional.remove(*i)),
            ConnectionKey::Position(_) => None,
            ConnectionKey::Keyword(k) => self.named.remove(k),
        }
    }

    fn references(&self, parent: NodeId) -> bool {
        self.positional.iter().any(|c| c.node == parent)
            || self.named.values().any(|c| c.node == parent)
    }

    /// Owned copy of the wiring, so parents can be evaluated while the
    /// pipeline is mutably borrowed
    pub(crate) fn snapshot(&self) -> (Vec<NodeConnection>, Vec<(String, NodeConnection)>) {
        (
            self.positional.clone(),
            self.named.iter().map(|(k, c)| (k.clone(), c.clone())).collect(),
        )
    }
}

// =============================================================================
// Nodes
// =============================================================================

pub(crate) enum NodeKind {
    Source {
        produce: ProduceFn,
        is_static: bool,
        resident: Option<Dataset>,
    },
    Transform {
        inputs: Inputs,
    },
    Combiner {
        inputs: Inputs,
        combine: CombineFn,
    },
}

/// Kind of a node, as seen from outside
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeRole {
    Source,
    StaticSource,
    Transform,
    Combiner,
}

impl NodeRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeRole::Source => "source",
            NodeRole::StaticSource => "static_source",
            NodeRole::Transform => "transform",
            NodeRole::Combiner => "combiner",
        }
    }
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One unit of computation and its cache state
pub struct Node {
    pub(crate) id: NodeId,
    pub(crate) label: String,
    pub(crate) kind: NodeKind,
    transform: Option<TransformFn>,
    output_validator: SharedValidator,
    cache: Box<dyn CacheStore>,
    use_cached: bool,
    pub(crate) already_cached: bool,
    pub(crate) productions: usize,
}

impl Node {
    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn role(&self) -> NodeRole {
        match &self.kind {
            NodeKind::Source { is_static: true, .. } => NodeRole::StaticSource,
            NodeKind::Source { .. } => NodeRole::Source,
            NodeKind::Transform { .. } => NodeRole::Transform,
            NodeKind::Combiner { .. } => NodeRole::Combiner,
        }
    }

    /// True iff a cached result can be read back without recomputation
    pub fn is_cached(&self) -> bool {
        self.already_cached
    }

    /// Whether successful evaluations are persisted to the cache store
    pub fn uses_cache(&self) -> bool {
        self.use_cached || self.is_static()
    }

    /// Number of times the production step has run
    pub fn production_count(&self) -> usize {
        self.productions
    }

    pub fn output_validator(&self) -> &SharedValidator {
        &self.output_validator
    }

    pub fn positional_connections(&self) -> &[NodeConnection] {
        self.inputs().map(|i| i.positional.as_slice()).unwrap_or(&[])
    }

    /// Named connections in keyword order
    pub fn named_connections(&self) -> impl Iterator<Item = (&str, &NodeConnection)> {
        self.inputs()
            .into_iter()
            .flat_map(|i| i.named.iter().map(|(k, c)| (k.as_str(), c)))
    }

    fn is_static(&self) -> bool {
        matches!(self.kind, NodeKind::Source { is_static: true, .. })
    }

    pub(crate) fn inputs(&self) -> Option<&Inputs> {
        match &self.kind {
            NodeKind::Source { .. } => None,
            NodeKind::Transform { inputs } | NodeKind::Combiner { inputs, .. } => Some(inputs),
        }
    }

    /// Sources never take parents
    pub(crate) fn ensure_accepts_parents(&self) -> Result<()> {
        match self.kind {
            NodeKind::Source { .. } => Err(PipelineError::InvalidOperation(format!(
                "source node {} ('{}') cannot have parents",
                self.id, self.label
            ))),
            _ => Ok(()),
        }
    }

    pub(crate) fn has_connection(&self, key: &ConnectionKey) -> bool {
        self.inputs().map(|i| i.contains(key)).unwrap_or(false)
    }

    pub(crate) fn references(&self, parent: NodeId) -> bool {
        self.inputs().map(|i| i.references(parent)).unwrap_or(false)
    }

    pub(crate) fn attach(&mut self, connection: NodeConnection, keyword: Option<String>) -> Result<()> {
        let id = self.id;
        match &mut self.kind {
            NodeKind::Source { .. } => Err(PipelineError::InvalidOperation(format!(
                "source node {} ('{}') cannot have parents",
                id, self.label
            ))),
            NodeKind::Transform { inputs } => {
                inputs.ensure_keyword_free(id, keyword.as_deref())?;
                if inputs.len() >= 1 {
                    return Err(PipelineError::InvalidOperation(format!(
                        "transform node {} ('{}') already has a parent",
                        id, self.label
                    )));
                }
                inputs.insert(id, connection, keyword)
            }
            NodeKind::Combiner { inputs, .. } => inputs.insert(id, connection, keyword),
        }
    }

    pub(crate) fn detach(&mut self, key: &ConnectionKey) -> Result<NodeConnection> {
        let id = self.id;
        let removed = match &mut self.kind {
            NodeKind::Source { .. } => None,
            NodeKind::Transform { inputs } | NodeKind::Combiner { inputs, .. } => inputs.remove(key),
        };
        removed.ok_or_else(|| PipelineError::ConnectionNotFound {
            node: id,
            key: key.to_string(),
        })
    }

    /// Production step of a source
    pub(crate) fn load(&mut self) -> Result<Dataset> {
        self.productions += 1;
        match &self.kind {
            NodeKind::Source { produce, .. } => produce(),
            _ => Err(PipelineError::InvalidOperation(format!(
                "node {} is not a source",
                self.id
            ))),
        }
    }

    /// Production step of a processor, given its evaluated inputs
    pub(crate) fn combine(
        &mut self,
        mut positional: Vec<Dataset>,
        named: BTreeMap<String, Dataset>,
    ) -> Result<Dataset> {
        self.productions += 1;
        match &self.kind {
            NodeKind::Combiner { combine, .. } => combine(positional, named),
            NodeKind::Transform { .. } => positional
                .pop()
                .or_else(|| named.into_values().next())
                .ok_or_else(|| {
                    PipelineError::InvalidOperation(format!(
                        "transform node {} ('{}') has no parent",
                        self.id, self.label
                    ))
                }),
            NodeKind::Source { .. } => Err(PipelineError::InvalidOperation(format!(
                "source node {} has no inputs to combine",
                self.id
            ))),
        }
    }

    pub(crate) fn apply_transform(&self, data: Dataset) -> Result<Dataset> {
        match &self.transform {
            Some(transform) => transform(data),
            None => Ok(data),
        }
    }

    pub(crate) fn validate_output(&self, data: Dataset) -> Result<Dataset> {
        self.output_validator.validate(data)
    }

    /// Persist a validated result and mark the node cached
    pub(crate) fn store(&mut self, data: &Dataset) -> Result<()> {
        if let NodeKind::Source {
            is_static: true,
            resident,
            ..
        } = &mut self.kind
        {
            *resident = Some(data.clone());
            self.already_cached = true;
        } else if self.use_cached {
            self.cache.write(data)?;
            self.already_cached = true;
        }
        Ok(())
    }

    pub(crate) fn read_cached(&self) -> Result<Dataset> {
        match &self.kind {
            NodeKind::Source {
                is_static: true,
                resident,
                ..
            } => resident.clone().ok_or_else(|| {
                PipelineError::StorageUnavailable(format!("static node {} holds no result", self.id))
            }),
            _ => self.cache.read(),
        }
    }

    /// Empty the cache; the flag is lowered before the store is touched
    pub(crate) fn clear_cache(&mut self) -> Result<()> {
        self.already_cached = false;
        if let NodeKind::Source { resident, .. } = &mut self.kind {
            *resident = None;
        }
        self.cache.clear()
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("role", &self.role())
            .field("already_cached", &self.already_cached)
            .field("use_cached", &self.use_cached)
            .field("cache", &self.cache)
            .field("output_validator", &self.output_validator.name())
            .field("productions", &self.productions)
            .finish()
    }
}

// =============================================================================
// Builder
// =============================================================================

/// Describes a node before it is added to a pipeline
pub struct NodeBuilder {
    label: String,
    kind: NodeKind,
    transform: Option<TransformFn>,
    output_validator: SharedValidator,
    cache: Option<Box<dyn CacheStore>>,
    use_cached: Option<bool>,
    precomputed: bool,
}

impl NodeBuilder {
    fn with_kind(label: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            label: label.into(),
            kind,
            transform: None,
            output_validator: any_dataset(),
            cache: None,
            use_cached: None,
            precomputed: false,
        }
    }

    /// Leaf node running `produce` on every uncached evaluation
    pub fn source<F>(label: impl Into<String>, produce: F) -> Self
    where
        F: Fn() -> Result<Dataset> + 'static,
    {
        Self::with_kind(
            label,
            NodeKind::Source {
                produce: Box::new(produce),
                is_static: false,
                resident: None,
            },
        )
    }

    /// Leaf node that keeps its first successful result in memory
    pub fn static_source<F>(label: impl Into<String>, produce: F) -> Self
    where
        F: Fn() -> Result<Dataset> + 'static,
    {
        Self::with_kind(
            label,
            NodeKind::Source {
                produce: Box::new(produce),
                is_static: true,
                resident: None,
            },
        )
    }

    /// Static source over an existing dataset; starts cached
    pub fn adapter(label: impl Into<String>, dataset: Dataset) -> Self {
        let mut builder = Self::static_source(label, move || Ok(dataset.clone()));
        builder.precomputed = true;
        builder
    }

    /// Single-parent processor
    pub fn transform(label: impl Into<String>) -> Self {
        Self::with_kind(
            label,
            NodeKind::Transform {
                inputs: Inputs::default(),
            },
        )
    }

    /// Multi-parent processor
    pub fn combiner<F>(label: impl Into<String>, combine: F) -> Self
    where
        F: Fn(Vec<Dataset>, BTreeMap<String, Dataset>) -> Result<Dataset> + 'static,
    {
        Self::with_kind(
            label,
            NodeKind::Combiner {
                inputs: Inputs::default(),
                combine: Box::new(combine),
            },
        )
    }

    /// Transform step applied after production
    pub fn transform_with<F>(mut self, transform: F) -> Self
    where
        F: Fn(Dataset) -> Result<Dataset> + 'static,
    {
        self.transform = Some(Box::new(transform));
        self
    }

    pub fn output_validator(mut self, validator: SharedValidator) -> Self {
        self.output_validator = validator;
        self
    }

    /// Persist results between evaluations (defaults to the pipeline's cache policy)
    pub fn use_cached(mut self, use_cached: bool) -> Self {
        self.use_cached = Some(use_cached);
        self
    }

    /// Use a specific store instead of the one chosen by the cache policy
    pub fn cache_store(mut self, store: impl CacheStore + 'static) -> Self {
        self.cache = Some(Box::new(store));
        self
    }

    pub(crate) fn build(self, id: NodeId, config: &PipelineConfig) -> Result<Node> {
        let is_static = matches!(self.kind, NodeKind::Source { is_static: true, .. });
        if is_static && self.transform.is_some() {
            return Err(PipelineError::InvalidOperation(format!(
                "static source '{}' cannot have a transform step",
                self.label
            )));
        }

        let policy = config.cache.policy;
        // an explicit store opts the node into caching
        let use_cached = !is_static
            && self
                .use_cached
                .unwrap_or(self.cache.is_some() || policy != CachePolicy::Disabled);
        let cache: Box<dyn CacheStore> = match self.cache {
            Some(store) => store,
            None if !use_cached => Box::new(NoCache),
            None if policy == CachePolicy::File => Box::new(FileCache::new(
                config
                    .cache_dir()
                    .join(format!("{}-{}.json", file_stem(&self.label), id.index())),
            )),
            None => Box::new(MemoryCache::new()),
        };

        let mut node = Node {
            id,
            label: self.label,
            kind: self.kind,
            transform: self.transform,
            output_validator: self.output_validator,
            cache,
            use_cached,
            already_cached: false,
            productions: 0,
        };

        if self.precomputed {
            let data = node.load()?;
            let data = node.validate_output(data)?;
            node.store(&data)?;
        }
        Ok(node)
    }
}

impl fmt::Debug for NodeBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeBuilder")
            .field("label", &self.label)
            .field("use_cached", &self.use_cached)
            .field("precomputed", &self.precomputed)
            .finish()
    }
}

fn file_stem(label: &str) -> String {
    label
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect()
}
