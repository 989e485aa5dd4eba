use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::config::EngineConfig;
use crate::error::NodeError;
use crate::msg::RuleMsg;
use crate::relation;

/// Callback invoked when a branch ends or an out-of-band node execution completes.
///
/// Arguments are the context of the hop that produced the result, the final
/// message, the branch error (if any) and the relation it ended on.
pub type OnEndFn = Arc<dyn Fn(&dyn RuleContext, RuleMsg, Option<NodeError>, &str) + Send + Sync>;

/// The outcome of one terminal branch of a chain invocation.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainEnd {
  /// Node that ended the branch; empty when the chain had no entry node.
  pub node_id: String,
  pub msg: RuleMsg,
  pub relation: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub error: Option<NodeError>,
}

/// Per-hop view of a chain invocation, handed to [`crate::Node::on_msg`].
#[async_trait]
pub trait RuleContext: Send + Sync {
  /// Id of the chain the current node belongs to.
  fn chain_id(&self) -> &str;

  /// Id of the node currently processing the message.
  fn self_id(&self) -> &str;

  /// Id of the node the message arrived from, if any.
  fn from_id(&self) -> Option<&str>;

  fn config(&self) -> &EngineConfig;

  /// Cancellation shared by every hop of the invocation.
  fn cancel_token(&self) -> &CancellationToken;

  /// A request-scoped value supplied by the caller.
  fn value(&self, key: &str) -> Option<&serde_json::Value>;

  /// Report the outcome of the current node.
  ///
  /// The message continues to every node connected on `relation`; when there
  /// is none, the branch ends and the end callback receives it with `err`.
  fn tell(&self, msg: RuleMsg, relation: &str, err: Option<NodeError>);

  fn tell_next(&self, msg: RuleMsg, relation: &str) {
    self.tell(msg, relation, None)
  }

  fn tell_success(&self, msg: RuleMsg) {
    self.tell(msg, relation::SUCCESS, None)
  }

  fn tell_failure(&self, msg: RuleMsg, err: NodeError) {
    self.tell(msg, relation::FAILURE, Some(err))
  }

  /// Run a single node of the current chain out of band.
  ///
  /// The node's result is handed to `on_end` exactly once and is not routed
  /// to its downstream nodes. An unknown id reports `NodeNotFound` on the
  /// `Failure` relation.
  fn execute_node(
    &self,
    cancel: CancellationToken,
    node_id: &str,
    msg: RuleMsg,
    skip_self_debug: bool,
    on_end: OnEndFn,
  );

  /// Run another chain of the pool to completion and return its branch ends.
  async fn run_chain(&self, chain_id: &str, msg: RuleMsg) -> Result<Vec<ChainEnd>, NodeError>;
}
