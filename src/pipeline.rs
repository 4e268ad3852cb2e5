//! Pipeline arena
//!
//! A [`Pipeline`] owns every node it creates together with the registry that
//! records who feeds whom. Evaluation is lazy and pulls parents on demand;
//! caches are invalidated downstream whenever a node's inputs are rewired.

use std::collections::BTreeMap;

use tracing::{debug, trace};

use crate::config::PipelineConfig;
use crate::dataset::Dataset;
use crate::error::{PipelineError, Result};
use crate::graph::{find_cycle_groups, CycleGroup, GraphRegistry, NodeId, Walk};
use crate::node::{ConnectionKey, Node, NodeBuilder, NodeConnection, NodeRole, ParentSet};

/// Arena of nodes plus their dependency registry
#[derive(Debug, Default)]
pub struct Pipeline {
    config: PipelineConfig,
    nodes: Vec<Node>,
    registry: GraphRegistry,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pipeline whose nodes take their default cache stores from `config`
    pub fn with_config(config: PipelineConfig) -> Self {
        Self {
            config,
            nodes: Vec::new(),
            registry: GraphRegistry::new(),
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn registry(&self) -> &GraphRegistry {
        &self.registry
    }

    /// Create a node and register it with no connections
    pub fn add_node(&mut self, builder: NodeBuilder) -> Result<NodeId> {
        let id = NodeId::from_index(self.nodes.len());
        let node = builder.build(id, &self.config)?;
        debug!(node = %id, label = %node.label(), role = %node.role(), "added node");
        self.nodes.push(node);
        self.registry.add_node(id);
        Ok(id)
    }

    pub fn node(&self, id: NodeId) -> Result<&Node> {
        self.nodes.get(id.index()).ok_or(PipelineError::UnknownNode(id))
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut Node> {
        self.nodes.get_mut(id.index()).ok_or(PipelineError::UnknownNode(id))
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn positional_connections(&self, id: NodeId) -> Result<&[NodeConnection]> {
        Ok(self.node(id)?.positional_connections())
    }

    /// Named connections of `id` in keyword order
    pub fn named_connections(&self, id: NodeId) -> Result<Vec<(&str, &NodeConnection)>> {
        Ok(self.node(id)?.named_connections().collect())
    }

    /// Direct producers of `id`
    pub fn parents_of(&self, id: NodeId) -> Vec<NodeId> {
        self.registry.parents_of(id)
    }

    /// Direct consumers of `id`
    pub fn children_of(&self, id: NodeId) -> Vec<NodeId> {
        self.registry.children_of(id)
    }

    pub fn is_cached(&self, id: NodeId) -> Result<bool> {
        Ok(self.node(id)?.is_cached())
    }

    // =========================================================================
    // Evaluation
    // =========================================================================

    /// Produce the node's validated dataset.
    ///
    /// A cached node returns its stored result without touching its parents.
    /// Otherwise the upstream graph is checked for cycles, the production
    /// step runs (pulling every parent through its connection), then the
    /// transform step and the output validator. A successful result is
    /// stored when the node caches. Any failure leaves the node uncached.
    pub fn extract_data(&mut self, id: NodeId) -> Result<Dataset> {
        let node = self.node(id)?;
        if node.is_cached() {
            trace!(node = %id, label = %node.label(), "cache hit");
            return node.read_cached();
        }

        self.registry.ensure_acyclic(id, Walk::Parents)?;
        debug!(node = %id, label = %node.label(), "evaluating");

        let produced = self.produce(id)?;
        let node = self.node_mut(id)?;
        let data = node.apply_transform(produced)?;
        let data = node.validate_output(data)?;
        node.store(&data)?;

        debug!(node = %id, rows = data.row_count(), cached = node.is_cached(), "evaluated");
        Ok(data)
    }

    fn produce(&mut self, id: NodeId) -> Result<Dataset> {
        let wiring = self.node(id)?.inputs().map(|inputs| inputs.snapshot());
        let Some((positional, named)) = wiring else {
            return self.node_mut(id)?.load();
        };

        let mut positional_data = Vec::with_capacity(positional.len());
        for connection in &positional {
            positional_data.push(connection.extract_data(self)?);
        }
        let mut named_data = BTreeMap::new();
        for (keyword, connection) in &named {
            named_data.insert(keyword.clone(), connection.extract_data(self)?);
        }

        self.node_mut(id)?.combine(positional_data, named_data)
    }

    /// Invalidate `id` and every node downstream of it.
    ///
    /// Descendants are cleared in discovery order. A cycle downstream stops
    /// the walk with `CycleDetected`; nodes reached before it stay cleared.
    pub fn drop_cache(&mut self, id: NodeId) -> Result<()> {
        self.node_mut(id)?.clear_cache()?;
        let nodes = &mut self.nodes;
        self.registry.walk(id, Walk::Children, |child| {
            trace!(node = %child, "dropping cache");
            match nodes.get_mut(child.index()) {
                Some(node) => node.clear_cache(),
                None => Err(PipelineError::UnknownNode(child)),
            }
        })?;
        debug!(node = %id, "dropped cache");
        Ok(())
    }

    // =========================================================================
    // Wiring
    // =========================================================================

    /// Add one parent to `consumer`, positionally or under `keyword`.
    ///
    /// Sources are rejected before anything changes. Otherwise the consumer's
    /// cache (and everything downstream) is dropped before the connection is
    /// attached, even if attaching then fails.
    pub fn connect_parent(
        &mut self,
        consumer: NodeId,
        parent: impl Into<NodeConnection>,
        keyword: Option<&str>,
    ) -> Result<()> {
        let connection = parent.into();
        self.node(consumer)?.ensure_accepts_parents()?;
        self.node(connection.node())?;

        self.drop_cache(consumer)?;
        self.attach(consumer, connection, keyword.map(str::to_string))
    }

    /// Add several parents with a single invalidation.
    ///
    /// An empty set does nothing. Entries are attached positional first; the
    /// first failure aborts, leaving earlier entries attached.
    pub fn connect_parents(&mut self, consumer: NodeId, parents: ParentSet) -> Result<()> {
        if parents.is_empty() {
            return Ok(());
        }
        self.node(consumer)?.ensure_accepts_parents()?;
        for connection in parents.connections() {
            self.node(connection.node())?;
        }

        self.drop_cache(consumer)?;
        for (keyword, connection) in parents.into_entries() {
            self.attach(consumer, connection, keyword)?;
        }
        Ok(())
    }

    fn attach(&mut self, consumer: NodeId, connection: NodeConnection, keyword: Option<String>) -> Result<()> {
        let parent = connection.node();
        self.node_mut(consumer)?.attach(connection, keyword.clone())?;
        self.registry.add_edge(parent, consumer);
        debug!(parent = %parent, child = %consumer, keyword = ?keyword, "connected");
        Ok(())
    }

    /// Remove one connection from `consumer` and return it.
    ///
    /// Positional connections after a removed one shift down by one. The
    /// registry edge is dropped only when no other connection of `consumer`
    /// still refers to the same parent. The consumer is uncached before the
    /// connection is removed; its descendants are invalidated afterwards, and
    /// a cycle that remains downstream is reported once the removal is done.
    pub fn disconnect_parent(
        &mut self,
        consumer: NodeId,
        key: impl Into<ConnectionKey>,
    ) -> Result<NodeConnection> {
        let key = key.into();
        let node = self.node(consumer)?;
        node.ensure_accepts_parents()?;
        if !node.has_connection(&key) {
            return Err(PipelineError::ConnectionNotFound {
                node: consumer,
                key: key.to_string(),
            });
        }

        let node = self.node_mut(consumer)?;
        node.clear_cache()?;
        let removed = node.detach(&key)?;
        let parent = removed.node();
        if !node.references(parent) {
            self.registry.remove_edge(parent, consumer);
        }
        debug!(parent = %parent, child = %consumer, key = %key, "disconnected");

        // descendants are invalidated after the edge is gone, so a loop
        // through the removed connection no longer blocks the walk
        self.drop_cache(consumer)?;
        Ok(removed)
    }

    // =========================================================================
    // Diagnostics
    // =========================================================================

    /// Every cycle currently wired into the pipeline
    pub fn cycle_groups(&self) -> Vec<CycleGroup> {
        find_cycle_groups(&self.registry)
    }

    /// Export the pipeline to GraphViz DOT format
    pub fn to_dot(&self) -> String {
        let mut output = String::new();

        output.push_str("digraph Pipeline {\n");
        output.push_str("  rankdir=LR;\n");
        output.push_str("  node [shape=box, style=\"filled,rounded\", fontname=\"Helvetica\", fontsize=10];\n");
        output.push_str("  edge [fontname=\"Helvetica\", fontsize=8, fontcolor=\"#808080\"];\n");
        output.push('\n');

        for node in &self.nodes {
            let color = match node.role() {
                NodeRole::Source => "#00BCD4",
                NodeRole::StaticSource => "#607D8B",
                NodeRole::Transform => "#FF9800",
                NodeRole::Combiner => "#4CAF50",
            };
            let style = if node.is_cached() { ", penwidth=2" } else { "" };
            output.push_str(&format!(
                "  n{} [label=\"{}\\n{}\", fillcolor=\"{}\"{}];\n",
                node.id().index(),
                escape(node.label()),
                node.role(),
                color,
                style
            ));
        }

        output.push('\n');

        for node in &self.nodes {
            let child = node.id().index();
            for (position, connection) in node.positional_connections().iter().enumerate() {
                output.push_str(&format!(
                    "  n{} -> n{} [label=\"{}\"];\n",
                    connection.node().index(),
                    child,
                    position
                ));
            }
            for (keyword, connection) in node.named_connections() {
                output.push_str(&format!(
                    "  n{} -> n{} [label=\"{}\", style=dashed];\n",
                    connection.node().index(),
                    child,
                    escape(keyword)
                ));
            }
        }

        output.push_str("}\n");
        output
    }
}

fn escape(text: &str) -> String {
    text.replace('\\', "\\\\").replace('"', "\\\"")
}
