use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::CHAIN_REF_PREFIX;
use crate::error::DefinitionError;
use crate::node::NodeDef;

/// A complete rule chain definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainDef {
  pub rule_chain: ChainInfo,
  #[serde(default)]
  pub metadata: ChainMetadata,
}

/// Chain-level attributes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainInfo {
  #[serde(default)]
  pub id: String,
  #[serde(default)]
  pub name: String,
  /// When set, every node of the chain starts with debug events enabled.
  #[serde(default)]
  pub debug_mode: bool,
  #[serde(default)]
  pub root: bool,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub additional_info: Option<serde_json::Value>,
}

/// Nodes and the connections between them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainMetadata {
  /// Index into `nodes` of the entry node.
  #[serde(default)]
  pub first_node_index: usize,
  #[serde(default)]
  pub nodes: Vec<NodeDef>,
  #[serde(default)]
  pub connections: Vec<ConnectionDef>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub rule_chain_connections: Vec<ChainConnectionDef>,
}

/// A relation-tagged edge between two nodes.
///
/// A `to_id` of the form `chain:<id>` targets the entry node of another chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionDef {
  pub from_id: String,
  pub to_id: String,
  #[serde(rename = "type")]
  pub relation_type: String,
}

/// A relation-tagged edge from a node to another chain, by chain id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainConnectionDef {
  pub from_id: String,
  pub to_id: String,
  #[serde(rename = "type")]
  pub relation_type: String,
}

impl ChainDef {
  /// Parse and validate a chain definition.
  pub fn from_slice(bytes: &[u8]) -> Result<Self, DefinitionError> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
      return Err(DefinitionError::Empty);
    }

    let def: ChainDef = serde_json::from_slice(bytes)?;
    def.validate()?;
    Ok(def)
  }

  /// Serialize the definition back to its JSON form.
  pub fn to_json(&self) -> Result<String, DefinitionError> {
    Ok(serde_json::to_string_pretty(self)?)
  }

  /// Look up a node definition by id.
  pub fn node(&self, node_id: &str) -> Option<&NodeDef> {
    self.metadata.nodes.iter().find(|n| n.id == node_id)
  }

  /// Check node ids, node types, connections and the entry index.
  pub fn validate(&self) -> Result<(), DefinitionError> {
    let nodes = &self.metadata.nodes;
    let mut ids: HashSet<&str> = HashSet::with_capacity(nodes.len());

    for (index, node) in nodes.iter().enumerate() {
      if node.id.is_empty() {
        return Err(DefinitionError::MissingField {
          field: "id",
          location: format!("node at index {index}"),
        });
      }
      if node.node_type.is_empty() {
        return Err(DefinitionError::MissingField {
          field: "type",
          location: format!("node '{}'", node.id),
        });
      }
      if !ids.insert(node.id.as_str()) {
        return Err(DefinitionError::DuplicateNodeId {
          node_id: node.id.clone(),
        });
      }
    }

    for conn in &self.metadata.connections {
      let to_known = conn.to_id.starts_with(CHAIN_REF_PREFIX) || ids.contains(conn.to_id.as_str());
      if !ids.contains(conn.from_id.as_str()) || !to_known {
        return Err(DefinitionError::InvalidConnection {
          from: conn.from_id.clone(),
          to: conn.to_id.clone(),
        });
      }
    }

    for conn in &self.metadata.rule_chain_connections {
      if !ids.contains(conn.from_id.as_str()) || conn.to_id.is_empty() {
        return Err(DefinitionError::InvalidConnection {
          from: conn.from_id.clone(),
          to: conn.to_id.clone(),
        });
      }
    }

    if !nodes.is_empty() && self.metadata.first_node_index >= nodes.len() {
      return Err(DefinitionError::InvalidFirstNodeIndex {
        index: self.metadata.first_node_index,
        len: nodes.len(),
      });
    }

    Ok(())
  }
}
