use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use rulechain_node::{
  Configuration, EngineConfig, Node, NodeError, RuleContext, RuleMsg, decode_config, relation,
};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FlowConfig {
  #[serde(default)]
  target_id: String,
}

/// Runs another chain of the pool as a sub-flow and waits for it.
///
/// Succeeds with the message of the last ended branch, carrying the metadata
/// of every branch, when no branch failed. Otherwise fails with the first
/// branch error.
#[derive(Debug, Clone, Default)]
pub struct FlowNode {
  target_id: String,
}

#[async_trait]
impl Node for FlowNode {
  fn node_type(&self) -> &str {
    "flow"
  }

  fn new_instance(&self) -> Box<dyn Node> {
    Box::new(Self::default())
  }

  fn init(&mut self, _config: &EngineConfig, configuration: &Configuration) -> Result<(), NodeError> {
    let config: FlowConfig = decode_config(configuration)?;
    self.target_id = config.target_id.trim().to_string();
    Ok(())
  }

  async fn on_msg(&self, ctx: Arc<dyn RuleContext>, msg: RuleMsg) {
    if self.target_id.is_empty() {
      ctx.tell_failure(msg, NodeError::processing("targetId is empty"));
      return;
    }

    let ends = match ctx.run_chain(&self.target_id, msg.clone()).await {
      Ok(ends) => ends,
      Err(e) => {
        ctx.tell_failure(msg, e);
        return;
      }
    };

    if let Some(failed) = ends
      .iter()
      .find(|end| end.error.is_some() || end.relation == relation::FAILURE)
    {
      let err = failed
        .error
        .clone()
        .unwrap_or_else(|| NodeError::processing(format!("sub-chain '{}' failed", self.target_id)));
      ctx.tell_failure(failed.msg.clone(), err);
      return;
    }

    let mut out = ends.last().map(|end| end.msg.clone()).unwrap_or(msg);
    for end in &ends {
      out.metadata.merge(&end.msg.metadata);
    }
    ctx.tell_success(out);
  }
}
