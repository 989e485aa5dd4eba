//! Debug events and sinks.
//!
//! When a node has debug mode enabled, the engine emits one event as the
//! message enters the node and one once the node has chosen a relation.
//! Sinks are observational only: whatever they do, routing is unaffected.

use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::NodeError;
use crate::msg::RuleMsg;

/// Whether an event was emitted on entering or leaving a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlowDirection {
  #[serde(rename = "IN")]
  In,
  #[serde(rename = "OUT")]
  Out,
}

impl fmt::Display for FlowDirection {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      FlowDirection::In => f.write_str("IN"),
      FlowDirection::Out => f.write_str("OUT"),
    }
  }
}

/// A single debug observation.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DebugEvent {
  pub chain_id: String,
  pub direction: FlowDirection,
  pub node_id: String,
  pub msg: RuleMsg,
  /// Empty for `In` events.
  pub relation: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub error: Option<NodeError>,
}

/// Receiver of debug events.
pub trait DebugSink: Send + Sync {
  fn on_debug(&self, event: DebugEvent);
}

/// Discards every event.
#[derive(Debug, Clone, Default)]
pub struct NoopDebugSink;

impl DebugSink for NoopDebugSink {
  fn on_debug(&self, _event: DebugEvent) {}
}

/// Forwards events to an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelDebugSink {
  sender: mpsc::UnboundedSender<DebugEvent>,
}

impl ChannelDebugSink {
  pub fn new(sender: mpsc::UnboundedSender<DebugEvent>) -> Self {
    Self { sender }
  }
}

impl DebugSink for ChannelDebugSink {
  fn on_debug(&self, event: DebugEvent) {
    // Receiver may have been dropped
    let _ = self.sender.send(event);
  }
}

/// Writes events to the `tracing` subscriber at debug level.
#[derive(Debug, Clone, Default)]
pub struct TracingDebugSink;

impl DebugSink for TracingDebugSink {
  fn on_debug(&self, event: DebugEvent) {
    debug!(
      chain_id = %event.chain_id,
      node_id = %event.node_id,
      direction = %event.direction,
      relation = %event.relation,
      msg_id = %event.msg.id,
      msg_type = %event.msg.msg_type,
      data = %event.msg.data,
      error = event.error.as_ref().map(tracing::field::display),
      "node_debug"
    );
  }
}
