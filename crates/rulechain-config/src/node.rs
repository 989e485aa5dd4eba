use serde::{Deserialize, Serialize};

use crate::error::DefinitionError;

/// Free-form node configuration, decoded by each node type.
pub type Configuration = serde_json::Map<String, serde_json::Value>;

/// A single node of a rule chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeDef {
  /// Node id, unique within its chain. `Id` is accepted for compatibility.
  #[serde(default, alias = "Id")]
  pub id: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub additional_info: Option<serde_json::Value>,
  /// Registered node type, optionally prefixed with `component:`.
  #[serde(rename = "type", default)]
  pub node_type: String,
  #[serde(default)]
  pub name: String,
  #[serde(default)]
  pub debug_mode: bool,
  #[serde(default)]
  pub configuration: Configuration,
}

impl NodeDef {
  /// Parse a standalone node definition, as used by a child reload.
  ///
  /// The id may be omitted; callers that replace an existing node assign it.
  pub fn from_slice(bytes: &[u8]) -> Result<Self, DefinitionError> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
      return Err(DefinitionError::Empty);
    }

    let def: NodeDef = serde_json::from_slice(bytes)?;
    if def.node_type.is_empty() {
      return Err(DefinitionError::MissingField {
        field: "type",
        location: "node definition".to_string(),
      });
    }
    Ok(def)
  }

  /// Serialize this node back to its JSON form.
  pub fn to_json(&self) -> Result<String, DefinitionError> {
    Ok(serde_json::to_string_pretty(self)?)
  }
}
