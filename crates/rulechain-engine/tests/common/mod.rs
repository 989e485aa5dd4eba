//! Shared fixtures for engine integration tests.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use rulechain_components::{FunctionRegistry, register_builtins};
use rulechain_engine::ChainPool;
use rulechain_node::{
  ChannelDebugSink, Configuration, DebugEvent, EngineConfig, Metadata, Node, NodeError,
  NodeRegistry, RuleContext, RuleMsg, decode_config,
};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;

/// A pool with the built-in nodes plus the test nodes below.
pub struct Harness {
  pub pool: Arc<ChainPool>,
  pub functions: Arc<FunctionRegistry>,
  pub destroyed: Arc<AtomicUsize>,
  pub debug_events: mpsc::UnboundedReceiver<DebugEvent>,
}

impl Harness {
  pub fn new() -> Self {
    let functions = Arc::new(FunctionRegistry::new());
    let destroyed = Arc::new(AtomicUsize::new(0));

    let registry = NodeRegistry::new();
    register_builtins(&registry, functions.clone()).unwrap();
    registry.register(Box::new(DelayNode::default())).unwrap();
    registry.register(Box::new(PanicNode)).unwrap();
    registry.register(Box::new(SilentNode)).unwrap();
    registry.register(Box::new(DoubleTellNode)).unwrap();
    registry.register(Box::new(ValueNode)).unwrap();
    registry
      .register(Box::new(CountedNode {
        destroyed: destroyed.clone(),
      }))
      .unwrap();

    let (tx, rx) = mpsc::unbounded_channel();
    let config = EngineConfig::new(Arc::new(registry)).with_debug_sink(Arc::new(ChannelDebugSink::new(tx)));

    Self {
      pool: ChainPool::new(Arc::new(config)),
      functions,
      destroyed,
      debug_events: rx,
    }
  }

  /// Drain every debug event emitted so far.
  pub fn drain_debug(&mut self) -> Vec<DebugEvent> {
    let mut events = Vec::new();
    while let Ok(event) = self.debug_events.try_recv() {
      events.push(event);
    }
    events
  }
}

/// Serialize a chain definition.
pub fn chain(id: &str, nodes: serde_json::Value, connections: serde_json::Value) -> Vec<u8> {
  serde_json::to_vec(&json!({
    "ruleChain": { "id": id, "name": format!("chain {id}"), "root": true },
    "metadata": {
      "firstNodeIndex": 0,
      "nodes": nodes,
      "connections": connections
    }
  }))
  .unwrap()
}

/// A JSON message with `productType=test01` metadata.
pub fn msg(data: serde_json::Value) -> RuleMsg {
  let metadata: Metadata = [("productType", "test01")].into_iter().collect();
  RuleMsg::json("TEST_MSG_TYPE", metadata, &data)
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DelayConfig {
  #[serde(default)]
  delay_ms: u64,
  #[serde(default)]
  relation: Option<String>,
  #[serde(default)]
  metadata: BTreeMap<String, String>,
  #[serde(default)]
  fail: Option<String>,
}

/// Sleeps, stamps metadata, then reports. Honors cancellation while sleeping.
#[derive(Default)]
pub struct DelayNode {
  delay: Duration,
  relation: String,
  metadata: BTreeMap<String, String>,
  fail: Option<String>,
}

#[async_trait]
impl Node for DelayNode {
  fn node_type(&self) -> &str {
    "test/delay"
  }

  fn new_instance(&self) -> Box<dyn Node> {
    Box::new(DelayNode::default())
  }

  fn init(&mut self, _config: &EngineConfig, configuration: &Configuration) -> Result<(), NodeError> {
    let config: DelayConfig = decode_config(configuration)?;
    self.delay = Duration::from_millis(config.delay_ms);
    self.relation = config.relation.unwrap_or_else(|| "Success".to_string());
    self.metadata = config.metadata;
    self.fail = config.fail;
    Ok(())
  }

  async fn on_msg(&self, ctx: Arc<dyn RuleContext>, mut msg: RuleMsg) {
    tokio::select! {
      _ = tokio::time::sleep(self.delay) => {}
      _ = ctx.cancel_token().cancelled() => {
        ctx.tell_failure(msg, NodeError::Cancelled);
        return;
      }
    }

    for (k, v) in &self.metadata {
      msg.metadata.insert(k.clone(), v.clone());
    }
    match &self.fail {
      Some(reason) => ctx.tell_failure(msg, NodeError::processing(reason)),
      None => ctx.tell_next(msg, &self.relation),
    }
  }
}

pub struct PanicNode;

#[async_trait]
impl Node for PanicNode {
  fn node_type(&self) -> &str {
    "test/panic"
  }

  fn new_instance(&self) -> Box<dyn Node> {
    Box::new(PanicNode)
  }

  fn init(&mut self, _config: &EngineConfig, _configuration: &Configuration) -> Result<(), NodeError> {
    Ok(())
  }

  async fn on_msg(&self, _ctx: Arc<dyn RuleContext>, _msg: RuleMsg) {
    panic!("boom");
  }
}

/// Returns without reporting.
pub struct SilentNode;

#[async_trait]
impl Node for SilentNode {
  fn node_type(&self) -> &str {
    "test/silent"
  }

  fn new_instance(&self) -> Box<dyn Node> {
    Box::new(SilentNode)
  }

  fn init(&mut self, _config: &EngineConfig, _configuration: &Configuration) -> Result<(), NodeError> {
    Ok(())
  }

  async fn on_msg(&self, _ctx: Arc<dyn RuleContext>, _msg: RuleMsg) {}
}

/// Reports `Success` twice.
pub struct DoubleTellNode;

#[async_trait]
impl Node for DoubleTellNode {
  fn node_type(&self) -> &str {
    "test/double"
  }

  fn new_instance(&self) -> Box<dyn Node> {
    Box::new(DoubleTellNode)
  }

  fn init(&mut self, _config: &EngineConfig, _configuration: &Configuration) -> Result<(), NodeError> {
    Ok(())
  }

  async fn on_msg(&self, ctx: Arc<dyn RuleContext>, msg: RuleMsg) {
    ctx.tell_success(msg.clone());
    ctx.tell_success(msg);
  }
}

/// Copies the request value `tenant` and the previous node id into metadata.
pub struct ValueNode;

#[async_trait]
impl Node for ValueNode {
  fn node_type(&self) -> &str {
    "test/value"
  }

  fn new_instance(&self) -> Box<dyn Node> {
    Box::new(ValueNode)
  }

  fn init(&mut self, _config: &EngineConfig, _configuration: &Configuration) -> Result<(), NodeError> {
    Ok(())
  }

  async fn on_msg(&self, ctx: Arc<dyn RuleContext>, mut msg: RuleMsg) {
    if let Some(tenant) = ctx.value("tenant").and_then(|v| v.as_str()) {
      msg.metadata.insert("tenant", tenant);
    }
    msg
      .metadata
      .insert("fromId", ctx.from_id().unwrap_or_default());
    ctx.tell_success(msg);
  }
}

/// Counts `destroy` calls.
pub struct CountedNode {
  destroyed: Arc<AtomicUsize>,
}

#[async_trait]
impl Node for CountedNode {
  fn node_type(&self) -> &str {
    "test/counted"
  }

  fn new_instance(&self) -> Box<dyn Node> {
    Box::new(CountedNode {
      destroyed: self.destroyed.clone(),
    })
  }

  fn init(&mut self, _config: &EngineConfig, _configuration: &Configuration) -> Result<(), NodeError> {
    Ok(())
  }

  async fn on_msg(&self, ctx: Arc<dyn RuleContext>, msg: RuleMsg) {
    ctx.tell_success(msg);
  }

  fn destroy(&self) {
    self.destroyed.fetch_add(1, Ordering::SeqCst);
  }
}
