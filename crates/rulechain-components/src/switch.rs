use std::sync::Arc;

use async_trait::async_trait;

use rulechain_node::{Configuration, EngineConfig, Node, NodeError, RuleContext, RuleMsg};

/// Routes a message along the relation named by its message type.
#[derive(Debug, Clone, Copy, Default)]
pub struct MsgTypeSwitchNode;

#[async_trait]
impl Node for MsgTypeSwitchNode {
  fn node_type(&self) -> &str {
    "msgTypeSwitch"
  }

  fn new_instance(&self) -> Box<dyn Node> {
    Box::new(MsgTypeSwitchNode)
  }

  fn init(&mut self, _config: &EngineConfig, _configuration: &Configuration) -> Result<(), NodeError> {
    Ok(())
  }

  async fn on_msg(&self, ctx: Arc<dyn RuleContext>, msg: RuleMsg) {
    let relation = msg.msg_type.clone();
    ctx.tell_next(msg, &relation);
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use rulechain_node::Metadata;
  use rulechain_node::testing::RecordingContext;
  use serde_json::json;

  #[tokio::test]
  async fn test_relation_is_msg_type() {
    let ctx = Arc::new(RecordingContext::new());
    MsgTypeSwitchNode
      .on_msg(ctx.clone(), RuleMsg::json("TEST_MSG_TYPE2", Metadata::new(), &json!({})))
      .await;

    assert_eq!(ctx.single().relation, "TEST_MSG_TYPE2");
  }
}
