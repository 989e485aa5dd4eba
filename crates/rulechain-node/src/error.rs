use serde::{Serialize, Serializer};

/// Errors reported by nodes and by the routing machinery.
///
/// These never cross the engine boundary as `Err`; they travel alongside a
/// message on the `Failure` relation and end up in end callbacks.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum NodeError {
  /// A node failed to process a message.
  #[error("{0}")]
  Processing(String),

  /// A node id did not resolve within the current chain.
  #[error("node '{node_id}' not found")]
  NodeNotFound { node_id: String },

  /// A chain id did not resolve within the chain pool.
  #[error("rule chain '{chain_id}' not found")]
  ChainNotFound { chain_id: String },

  /// The invocation was cancelled.
  #[error("context canceled")]
  Cancelled,

  /// The invocation ran past its deadline.
  #[error("context deadline exceeded")]
  DeadlineExceeded,

  /// Node configuration could not be decoded or is invalid.
  #[error("invalid configuration: {0}")]
  Config(String),

  /// The node panicked while processing a message.
  #[error("node panicked: {0}")]
  Panicked(String),
}

impl NodeError {
  pub fn processing(message: impl std::fmt::Display) -> Self {
    Self::Processing(message.to_string())
  }

  pub fn config(message: impl std::fmt::Display) -> Self {
    Self::Config(message.to_string())
  }
}

impl Serialize for NodeError {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&self.to_string())
  }
}
