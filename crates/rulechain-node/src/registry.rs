//! Node prototype registry.
//!
//! Prototypes are registered once per type name; compiling a chain asks the
//! registry for a fresh instance per node definition.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use crate::node::Node;

/// Errors that can occur when registering or instantiating node types.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
  #[error("node type '{node_type}' is already registered")]
  AlreadyRegistered { node_type: String },

  #[error("node type '{node_type}' is not registered")]
  UnknownType { node_type: String },
}

/// Maps node type names to prototype instances.
#[derive(Default)]
pub struct NodeRegistry {
  prototypes: RwLock<HashMap<String, Box<dyn Node>>>,
}

impl NodeRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// Register a prototype under its own [`Node::node_type`].
  pub fn register(&self, prototype: Box<dyn Node>) -> Result<(), RegistryError> {
    let mut prototypes = self.prototypes.write().unwrap_or_else(PoisonError::into_inner);
    let node_type = prototype.node_type().to_string();
    if prototypes.contains_key(&node_type) {
      return Err(RegistryError::AlreadyRegistered { node_type });
    }
    prototypes.insert(node_type, prototype);
    Ok(())
  }

  /// Remove a prototype. Chains already compiled keep their instances.
  pub fn unregister(&self, node_type: &str) -> Result<(), RegistryError> {
    let mut prototypes = self.prototypes.write().unwrap_or_else(PoisonError::into_inner);
    prototypes
      .remove(node_type)
      .map(|_| ())
      .ok_or_else(|| RegistryError::UnknownType {
        node_type: node_type.to_string(),
      })
  }

  /// Create a fresh, uninitialized instance of a registered type.
  pub fn new_node(&self, node_type: &str) -> Result<Box<dyn Node>, RegistryError> {
    let prototypes = self.prototypes.read().unwrap_or_else(PoisonError::into_inner);
    prototypes
      .get(node_type)
      .map(|prototype| prototype.new_instance())
      .ok_or_else(|| RegistryError::UnknownType {
        node_type: node_type.to_string(),
      })
  }

  pub fn contains(&self, node_type: &str) -> bool {
    let prototypes = self.prototypes.read().unwrap_or_else(PoisonError::into_inner);
    prototypes.contains_key(node_type)
  }

  /// Registered type names, sorted.
  pub fn types(&self) -> Vec<String> {
    let prototypes = self.prototypes.read().unwrap_or_else(PoisonError::into_inner);
    let mut types: Vec<String> = prototypes.keys().cloned().collect();
    types.sort();
    types
  }
}

#[cfg(test)]
mod tests {
  use std::sync::Arc;

  use async_trait::async_trait;

  use super::*;
  use crate::config::EngineConfig;
  use crate::context::RuleContext;
  use crate::error::NodeError;
  use crate::msg::RuleMsg;
  use rulechain_config::Configuration;

  struct EchoNode;

  #[async_trait]
  impl Node for EchoNode {
    fn node_type(&self) -> &str {
      "echo"
    }

    fn new_instance(&self) -> Box<dyn Node> {
      Box::new(EchoNode)
    }

    fn init(&mut self, _config: &EngineConfig, _configuration: &Configuration) -> Result<(), NodeError> {
      Ok(())
    }

    async fn on_msg(&self, ctx: Arc<dyn RuleContext>, msg: RuleMsg) {
      ctx.tell_success(msg);
    }
  }

  #[test]
  fn test_register_and_instantiate() {
    let registry = NodeRegistry::new();
    registry.register(Box::new(EchoNode)).unwrap();

    assert!(registry.contains("echo"));
    assert_eq!(registry.new_node("echo").unwrap().node_type(), "echo");
    assert_eq!(registry.types(), vec!["echo".to_string()]);
  }

  #[test]
  fn test_register_twice_fails() {
    let registry = NodeRegistry::new();
    registry.register(Box::new(EchoNode)).unwrap();

    let err = registry.register(Box::new(EchoNode)).unwrap_err();
    assert!(matches!(err, RegistryError::AlreadyRegistered { ref node_type } if node_type == "echo"));
  }

  #[test]
  fn test_unknown_type() {
    let registry = NodeRegistry::new();
    assert!(matches!(
      registry.new_node("missing"),
      Err(RegistryError::UnknownType { .. })
    ));
    assert!(registry.unregister("missing").is_err());
  }

  #[test]
  fn test_unregister() {
    let registry = NodeRegistry::new();
    registry.register(Box::new(EchoNode)).unwrap();
    registry.unregister("echo").unwrap();

    assert!(!registry.contains("echo"));
  }
}
