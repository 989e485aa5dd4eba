//! Test support for node implementations.
//!
//! [`RecordingContext`] stands in for the engine: it records every routing
//! call a node makes so tests can assert on relations, messages and errors.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::config::EngineConfig;
use crate::context::{ChainEnd, OnEndFn, RuleContext};
use crate::error::NodeError;
use crate::msg::RuleMsg;
use crate::registry::NodeRegistry;
use crate::relation;

/// One recorded routing call.
#[derive(Debug, Clone, PartialEq)]
pub struct Told {
  pub msg: RuleMsg,
  pub relation: String,
  pub error: Option<NodeError>,
}

/// A [`RuleContext`] without a chain behind it.
///
/// `execute_node` reports `NodeNotFound` and `run_chain` reports
/// `ChainNotFound`; nodes that need a real chain are tested through the engine.
pub struct RecordingContext {
  config: EngineConfig,
  chain_id: String,
  self_id: String,
  cancel: CancellationToken,
  values: HashMap<String, serde_json::Value>,
  told: Mutex<Vec<Told>>,
}

impl RecordingContext {
  pub fn new() -> Self {
    Self::with_config(EngineConfig::new(Arc::new(NodeRegistry::new())))
  }

  pub fn with_config(config: EngineConfig) -> Self {
    Self {
      config,
      chain_id: "test-chain".to_string(),
      self_id: "test-node".to_string(),
      cancel: CancellationToken::new(),
      values: HashMap::new(),
      told: Mutex::new(Vec::new()),
    }
  }

  pub fn with_value(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
    self.values.insert(key.into(), value);
    self
  }

  pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
    self.cancel = cancel;
    self
  }

  /// Every routing call so far, in order.
  pub fn told(&self) -> Vec<Told> {
    self.told.lock().unwrap_or_else(PoisonError::into_inner).clone()
  }

  /// The single routing call a well-behaved node makes.
  ///
  /// Panics unless exactly one call was recorded.
  pub fn single(&self) -> Told {
    let mut told = self.told();
    assert_eq!(told.len(), 1, "expected exactly one routing call, got {told:?}");
    told.remove(0)
  }
}

impl Default for RecordingContext {
  fn default() -> Self {
    Self::new()
  }
}

#[async_trait]
impl RuleContext for RecordingContext {
  fn chain_id(&self) -> &str {
    &self.chain_id
  }

  fn self_id(&self) -> &str {
    &self.self_id
  }

  fn from_id(&self) -> Option<&str> {
    None
  }

  fn config(&self) -> &EngineConfig {
    &self.config
  }

  fn cancel_token(&self) -> &CancellationToken {
    &self.cancel
  }

  fn value(&self, key: &str) -> Option<&serde_json::Value> {
    self.values.get(key)
  }

  fn tell(&self, msg: RuleMsg, relation: &str, err: Option<NodeError>) {
    self.told.lock().unwrap_or_else(PoisonError::into_inner).push(Told {
      msg,
      relation: relation.to_string(),
      error: err,
    });
  }

  fn execute_node(
    &self,
    _cancel: CancellationToken,
    node_id: &str,
    msg: RuleMsg,
    _skip_self_debug: bool,
    on_end: OnEndFn,
  ) {
    let err = NodeError::NodeNotFound {
      node_id: node_id.to_string(),
    };
    on_end(self, msg, Some(err), relation::FAILURE);
  }

  async fn run_chain(&self, chain_id: &str, _msg: RuleMsg) -> Result<Vec<ChainEnd>, NodeError> {
    Err(NodeError::ChainNotFound {
      chain_id: chain_id.to_string(),
    })
  }
}
