use thiserror::Error;

/// Errors raised while parsing or validating a chain or node definition.
#[derive(Debug, Error)]
pub enum DefinitionError {
  #[error("definition is empty")]
  Empty,

  #[error("failed to parse definition: {0}")]
  Parse(#[from] serde_json::Error),

  #[error("missing required field '{field}' in {location}")]
  MissingField {
    field: &'static str,
    location: String,
  },

  #[error("duplicate node id: {node_id}")]
  DuplicateNodeId { node_id: String },

  #[error("connection references unknown node: from={from}, to={to}")]
  InvalidConnection { from: String, to: String },

  #[error("first node index {index} is out of range for {len} nodes")]
  InvalidFirstNodeIndex { index: usize, len: usize },
}
