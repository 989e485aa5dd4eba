//! Compiled chains.
//!
//! A `CompiledChain` is immutable once built: every node is instantiated and
//! initialized, and connections are folded into a routing table keyed by
//! source node and relation. Reloading produces a new chain; instances still
//! referenced by in-flight hops stay alive until those hops finish.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use rulechain_config::{CHAIN_REF_PREFIX, COMPONENT_REF_PREFIX, ChainDef, NodeDef};
use rulechain_node::{EngineConfig, Node};

use crate::error::EngineError;

/// A routing target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
  /// A node of the same chain.
  Node(String),
  /// The entry node of another chain, resolved by id at routing time.
  Chain(String),
}

/// A live node together with its definition and debug flag.
pub struct NodeCtx {
  def: NodeDef,
  node: Box<dyn Node>,
  debug: AtomicBool,
}

impl NodeCtx {
  /// Instantiate and initialize a node from its definition.
  ///
  /// The debug flag starts on when either the node or its chain enables it.
  pub(crate) fn build(
    def: NodeDef,
    config: &EngineConfig,
    chain_debug: bool,
  ) -> Result<Self, EngineError> {
    let node_type = def
      .node_type
      .strip_prefix(COMPONENT_REF_PREFIX)
      .unwrap_or(&def.node_type);

    let mut node = config
      .registry
      .new_node(node_type)
      .map_err(|_| EngineError::UnknownNodeType {
        node_id: def.id.clone(),
        node_type: def.node_type.clone(),
      })?;

    node
      .init(config, &def.configuration)
      .map_err(|source| EngineError::NodeInit {
        node_id: def.id.clone(),
        source,
      })?;

    Ok(Self {
      debug: AtomicBool::new(def.debug_mode || chain_debug),
      def,
      node,
    })
  }

  pub fn id(&self) -> &str {
    &self.def.id
  }

  pub fn node(&self) -> &dyn Node {
    self.node.as_ref()
  }

  pub fn debug_mode(&self) -> bool {
    self.debug.load(Ordering::Relaxed)
  }

  pub fn set_debug_mode(&self, enabled: bool) {
    self.debug.store(enabled, Ordering::Relaxed);
  }

  /// The node's definition with its current debug flag.
  pub fn definition(&self) -> NodeDef {
    let mut def = self.def.clone();
    def.debug_mode = self.debug_mode();
    def
  }
}

impl Drop for NodeCtx {
  fn drop(&mut self) {
    self.node.destroy();
  }
}

/// An immutable, executable version of a chain definition.
pub struct CompiledChain {
  id: String,
  def: ChainDef,
  nodes: HashMap<String, Arc<NodeCtx>>,
  relations: HashMap<String, HashMap<String, Vec<Target>>>,
  first_node: Option<String>,
}

impl CompiledChain {
  /// Validate `def` and build every node.
  ///
  /// The first failing node aborts the build; nodes built so far are destroyed.
  pub fn build(id: &str, def: ChainDef, config: &EngineConfig) -> Result<Self, EngineError> {
    def.validate()?;

    let mut nodes = HashMap::with_capacity(def.metadata.nodes.len());
    for node_def in &def.metadata.nodes {
      let node = NodeCtx::build(node_def.clone(), config, def.rule_chain.debug_mode)?;
      nodes.insert(node_def.id.clone(), Arc::new(node));
    }

    let mut relations: HashMap<String, HashMap<String, Vec<Target>>> = HashMap::new();
    for conn in &def.metadata.connections {
      let target = match conn.to_id.strip_prefix(CHAIN_REF_PREFIX) {
        Some(chain_id) => Target::Chain(chain_id.to_string()),
        None => Target::Node(conn.to_id.clone()),
      };
      relations
        .entry(conn.from_id.clone())
        .or_default()
        .entry(conn.relation_type.clone())
        .or_default()
        .push(target);
    }
    for conn in &def.metadata.rule_chain_connections {
      relations
        .entry(conn.from_id.clone())
        .or_default()
        .entry(conn.relation_type.clone())
        .or_default()
        .push(Target::Chain(conn.to_id.clone()));
    }

    let first_node = def
      .metadata
      .nodes
      .get(def.metadata.first_node_index)
      .map(|n| n.id.clone());

    Ok(Self {
      id: id.to_string(),
      def,
      nodes,
      relations,
      first_node,
    })
  }

  /// Copy of this chain with one node replaced; routing is unchanged.
  ///
  /// The other nodes are shared with `self`, including their debug flags.
  pub fn with_node(&self, def: NodeDef, config: &EngineConfig) -> Result<Self, EngineError> {
    if !self.nodes.contains_key(&def.id) {
      return Err(EngineError::NodeNotFound {
        chain_id: self.id.clone(),
        node_id: def.id,
      });
    }

    let node = Arc::new(NodeCtx::build(def.clone(), config, self.debug_mode())?);

    let mut chain_def = self.def.clone();
    if let Some(slot) = chain_def.metadata.nodes.iter_mut().find(|n| n.id == def.id) {
      *slot = def.clone();
    }
    let mut nodes = self.nodes.clone();
    nodes.insert(def.id, node);

    Ok(Self {
      id: self.id.clone(),
      def: chain_def,
      nodes,
      relations: self.relations.clone(),
      first_node: self.first_node.clone(),
    })
  }

  pub fn id(&self) -> &str {
    &self.id
  }

  pub fn name(&self) -> &str {
    &self.def.rule_chain.name
  }

  /// Chain-wide debug mode; seeds the debug flag of every node built for this chain.
  pub fn debug_mode(&self) -> bool {
    self.def.rule_chain.debug_mode
  }

  pub fn node(&self, node_id: &str) -> Option<&Arc<NodeCtx>> {
    self.nodes.get(node_id)
  }

  pub fn node_count(&self) -> usize {
    self.nodes.len()
  }

  pub fn first_node(&self) -> Option<&Arc<NodeCtx>> {
    self.first_node.as_deref().and_then(|id| self.nodes.get(id))
  }

  /// Targets connected to `from` on `relation`, in definition order.
  pub fn targets(&self, from: &str, relation: &str) -> &[Target] {
    self
      .relations
      .get(from)
      .and_then(|by_relation| by_relation.get(relation))
      .map(|v| v.as_slice())
      .unwrap_or(&[])
  }

  /// The chain's definition, reflecting reloaded nodes and current debug flags.
  pub fn definition(&self) -> ChainDef {
    let mut def = self.def.clone();
    for slot in &mut def.metadata.nodes {
      if let Some(node) = self.nodes.get(&slot.id) {
        *slot = node.definition();
      }
    }
    def
  }

  pub fn node_definition(&self, node_id: &str) -> Option<NodeDef> {
    self.nodes.get(node_id).map(|n| n.definition())
  }
}
