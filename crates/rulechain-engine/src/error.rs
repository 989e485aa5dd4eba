//! Engine errors.

use std::path::PathBuf;

use rulechain_config::DefinitionError;
use rulechain_node::NodeError;

/// Errors returned synchronously by chain handles and the chain pool.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
  /// The chain or node definition is malformed.
  #[error(transparent)]
  Definition(#[from] DefinitionError),

  /// A node references a type missing from the registry.
  #[error("node '{node_id}' has unknown type '{node_type}'")]
  UnknownNodeType { node_id: String, node_type: String },

  /// A node's initializer rejected its configuration.
  #[error("failed to initialize node '{node_id}': {source}")]
  NodeInit {
    node_id: String,
    #[source]
    source: NodeError,
  },

  /// Node not found in the active chain.
  #[error("node '{node_id}' not found in chain '{chain_id}'")]
  NodeNotFound { chain_id: String, node_id: String },

  /// The chain handle was stopped.
  #[error("rule engine not initialized")]
  NotInitialized,

  /// Every hop of a waited invocation was dropped before a branch ended.
  #[error("message processing stopped before reaching the end of the chain")]
  Abandoned,

  /// The runner's channel is closed.
  #[error("chain runner channel closed")]
  RunnerClosed,

  /// Reading a definition from disk failed.
  #[error("failed to read '{}'", path.display())]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
}
