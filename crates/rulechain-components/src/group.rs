//! Bounded fan-out/fan-in over a fixed set of nodes.
//!
//! The message is executed concurrently on every configured node of the
//! current chain. The group succeeds as soon as `matchCount` of them end on
//! `matchRelation`, and fails once all of them ended without reaching the
//! threshold, or when the deadline or the caller's cancellation fires first.
//!
//! On completion the outgoing message carries the metadata merged from every
//! branch that ended without error, and a JSON array of the branch results
//! (in configured order) as its payload:
//!
//! ```json
//! [{ "nodeId": "s1", "msg": { ... } }, { "nodeId": "s2", "msg": { ... }, "err": "..." }]
//! ```

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tracing::warn;

use rulechain_node::{
  Configuration, DataType, EngineConfig, Node, NodeError, OnEndFn, RuleContext, RuleMsg,
  decode_config, relation,
};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GroupConfig {
  #[serde(default, alias = "matchRelationType")]
  match_relation: String,
  #[serde(default, alias = "matchNum")]
  match_count: i64,
  #[serde(default)]
  node_ids: NodeIds,
  #[serde(default, alias = "timeout")]
  timeout_seconds: u64,
}

/// Node ids, as a JSON array or a comma-separated string.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum NodeIds {
  List(Vec<String>),
  Joined(String),
}

impl Default for NodeIds {
  fn default() -> Self {
    NodeIds::List(Vec::new())
  }
}

impl NodeIds {
  fn into_vec(self) -> Vec<String> {
    let ids = match self {
      NodeIds::List(ids) => ids,
      NodeIds::Joined(joined) => joined.split(',').map(str::to_string).collect(),
    };
    ids
      .into_iter()
      .map(|id| id.trim().to_string())
      .filter(|id| !id.is_empty())
      .collect()
  }
}

/// Executes several nodes concurrently and aggregates their outcomes.
///
/// Members run with their own debug flags and emit their own debug events.
#[derive(Debug, Clone, Default)]
pub struct GroupActionNode {
  match_relation: String,
  match_count: usize,
  node_ids: Vec<String>,
  timeout: Option<Duration>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BranchResult {
  node_id: String,
  msg: RuleMsg,
  #[serde(skip_serializing_if = "Option::is_none")]
  err: Option<NodeError>,
}

/// Shared between the dispatching task and every branch callback.
struct GroupState {
  merged: RuleMsg,
  results: Vec<Option<BranchResult>>,
  ended: usize,
  matched: usize,
  completed: bool,
  signal: Option<oneshot::Sender<bool>>,
}

impl GroupState {
  fn record(&mut self, index: usize, result: BranchResult, relation: &str, rule: &MatchRule) {
    if self.completed {
      return;
    }

    if result.err.is_none() {
      self.merged.metadata.merge(&result.msg.metadata);
    }
    self.results[index] = Some(result);
    self.ended += 1;
    if relation == rule.relation {
      self.matched += 1;
    }

    if self.matched >= rule.count {
      self.complete(true);
    } else if self.ended >= self.results.len() {
      self.complete(false);
    }
  }

  fn complete(&mut self, matched: bool) {
    self.completed = true;

    let results: Vec<&BranchResult> = self.results.iter().flatten().collect();
    match serde_json::to_string(&results) {
      Ok(data) => {
        self.merged.data = data;
        self.merged.data_type = DataType::Json;
      }
      Err(e) => warn!(error = %e, "failed to serialize group results"),
    }

    if let Some(signal) = self.signal.take() {
      // The dispatching task may already have given up on a deadline
      let _ = signal.send(matched);
    }
  }
}

struct MatchRule {
  relation: String,
  count: usize,
}

#[async_trait]
impl Node for GroupActionNode {
  fn node_type(&self) -> &str {
    "groupAction"
  }

  fn new_instance(&self) -> Box<dyn Node> {
    Box::new(Self::default())
  }

  fn init(&mut self, _config: &EngineConfig, configuration: &Configuration) -> Result<(), NodeError> {
    let config: GroupConfig = decode_config(configuration)?;
    let node_ids = config.node_ids.into_vec();

    self.match_relation = if config.match_relation.is_empty() {
      relation::SUCCESS.to_string()
    } else {
      config.match_relation
    };
    self.match_count = match usize::try_from(config.match_count) {
      Ok(n) if n > 0 && n <= node_ids.len() => n,
      _ => node_ids.len(),
    };
    self.timeout = (config.timeout_seconds > 0).then(|| Duration::from_secs(config.timeout_seconds));
    self.node_ids = node_ids;
    Ok(())
  }

  async fn on_msg(&self, ctx: Arc<dyn RuleContext>, msg: RuleMsg) {
    if self.node_ids.is_empty() {
      ctx.tell_failure(msg, NodeError::processing("node id list is empty"));
      return;
    }

    // Released on every return path, which also stops branches still running
    let cancel = ctx.cancel_token().child_token();
    let _guard = cancel.clone().drop_guard();

    let (signal, outcome) = oneshot::channel();
    let state = Arc::new(Mutex::new(GroupState {
      merged: msg.clone(),
      results: (0..self.node_ids.len()).map(|_| None).collect(),
      ended: 0,
      matched: 0,
      completed: false,
      signal: Some(signal),
    }));
    let rule = Arc::new(MatchRule {
      relation: self.match_relation.clone(),
      count: self.match_count,
    });

    for (index, node_id) in self.node_ids.iter().enumerate() {
      let state = state.clone();
      let rule = rule.clone();
      let branch_id = node_id.clone();
      let on_end: OnEndFn = Arc::new(
        move |_ctx: &dyn RuleContext, out: RuleMsg, err: Option<NodeError>, relation: &str| {
          let result = BranchResult {
            node_id: branch_id.clone(),
            msg: out,
            err,
          };
          state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .record(index, result, relation, &rule);
        },
      );
      ctx.execute_node(cancel.clone(), node_id, msg.clone(), false, on_end);
    }

    let deadline = async {
      match self.timeout {
        Some(timeout) => tokio::time::sleep(timeout).await,
        None => std::future::pending().await,
      }
    };

    // Carries the metadata of every member that succeeded so far, whatever the outcome
    let merged = || state.lock().unwrap_or_else(PoisonError::into_inner).merged.clone();

    tokio::select! {
      biased;
      outcome = outcome => match outcome {
        Ok(true) => ctx.tell_success(merged()),
        Ok(false) => ctx.tell_next(merged(), relation::FAILURE),
        Err(_) => ctx.tell_failure(merged(), NodeError::Cancelled),
      },
      _ = cancel.cancelled() => ctx.tell_failure(merged(), NodeError::Cancelled),
      _ = deadline => ctx.tell_failure(merged(), NodeError::DeadlineExceeded),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use rulechain_node::Metadata;
  use rulechain_node::testing::RecordingContext;
  use serde_json::json;

  fn init(configuration: serde_json::Value) -> GroupActionNode {
    let mut node = GroupActionNode::default();
    let ctx = RecordingContext::new();
    node
      .init(ctx.config(), configuration.as_object().unwrap())
      .unwrap();
    node
  }

  #[test]
  fn test_config_defaults_and_normalization() {
    let node = init(json!({ "nodeIds": ["s1", "s2", "s3"], "matchCount": 0 }));
    assert_eq!(node.match_relation, "Success");
    assert_eq!(node.match_count, 3);
    assert_eq!(node.timeout, None);

    let node = init(json!({ "nodeIds": ["s1", "s2"], "matchCount": 5 }));
    assert_eq!(node.match_count, 2);

    let node = init(json!({ "nodeIds": ["s1", "s2"], "matchCount": -1 }));
    assert_eq!(node.match_count, 2);
  }

  #[test]
  fn test_config_accepts_joined_ids_and_aliases() {
    let node = init(json!({
      "nodeIds": "s1, s2,,s3",
      "matchRelationType": "True",
      "matchNum": 1,
      "timeout": 2
    }));

    assert_eq!(node.node_ids, vec!["s1", "s2", "s3"]);
    assert_eq!(node.match_relation, "True");
    assert_eq!(node.match_count, 1);
    assert_eq!(node.timeout, Some(Duration::from_secs(2)));
  }

  #[tokio::test]
  async fn test_empty_node_ids_fail_without_dispatch() {
    let node = init(json!({}));
    let ctx = Arc::new(RecordingContext::new());
    node
      .on_msg(ctx.clone(), RuleMsg::json("T", Metadata::new(), &json!({})))
      .await;

    let told = ctx.single();
    assert_eq!(told.relation, "Failure");
    assert!(told.error.unwrap().to_string().contains("empty"));
  }

  #[tokio::test]
  async fn test_unknown_nodes_end_in_failure() {
    let node = init(json!({ "nodeIds": ["missing1", "missing2"] }));
    let ctx = Arc::new(RecordingContext::new());
    node
      .on_msg(ctx.clone(), RuleMsg::json("T", Metadata::new(), &json!({})))
      .await;

    let told = ctx.single();
    assert_eq!(told.relation, "Failure");
    assert_eq!(told.error, None);

    let results: serde_json::Value = told.msg.json_data().unwrap();
    assert_eq!(results[0]["nodeId"], "missing1");
    assert_eq!(results[1]["err"], "node 'missing2' not found");
  }
}
