use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;

use crate::config::EngineConfig;
use crate::context::RuleContext;
use crate::error::NodeError;
use crate::msg::RuleMsg;
use rulechain_config::Configuration;

/// A unit of work in a rule chain.
///
/// Registered instances act as prototypes: the engine calls [`Node::new_instance`]
/// for every node definition of that type and then [`Node::init`] on the fresh
/// instance before publishing the chain.
#[async_trait]
pub trait Node: Send + Sync {
  /// The type name this node is registered under.
  fn node_type(&self) -> &str;

  /// Produce a fresh, uninitialized instance of the same type.
  fn new_instance(&self) -> Box<dyn Node>;

  /// One-time initialization from the node's configuration.
  ///
  /// An error aborts the build of the whole chain.
  fn init(&mut self, config: &EngineConfig, configuration: &Configuration) -> Result<(), NodeError>;

  /// Process one message.
  ///
  /// Implementations must call exactly one routing operation on `ctx`
  /// (`tell_next`, `tell_success` or `tell_failure`) exactly once.
  async fn on_msg(&self, ctx: Arc<dyn RuleContext>, msg: RuleMsg);

  /// Release resources. Called once the last in-flight user of the instance is gone.
  fn destroy(&self) {}
}

/// Decode a node configuration map into a typed config struct.
pub fn decode_config<T: DeserializeOwned>(configuration: &Configuration) -> Result<T, NodeError> {
  serde_json::from_value(serde_json::Value::Object(configuration.clone())).map_err(NodeError::config)
}
