use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use minijinja::Environment;
use serde::Deserialize;

use rulechain_node::{
  Configuration, EngineConfig, Node, NodeError, RuleContext, RuleMsg, decode_config,
};

use crate::expr;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TransformConfig {
  #[serde(default)]
  msg_type: Option<String>,
  #[serde(default)]
  metadata: BTreeMap<String, String>,
  #[serde(default)]
  data: Option<String>,
}

/// Rewrites the message type, metadata entries and payload with templates.
///
/// Every template renders against the incoming message, so a metadata
/// template never sees a payload rewritten by the same node.
pub struct ExprTransformNode {
  env: Environment<'static>,
  config: TransformConfig,
}

impl Default for ExprTransformNode {
  fn default() -> Self {
    Self {
      env: Environment::new(),
      config: TransformConfig::default(),
    }
  }
}

impl ExprTransformNode {
  fn transform(&self, mut msg: RuleMsg) -> Result<RuleMsg, String> {
    let ctx = expr::msg_context(&msg);

    let msg_type = match &self.config.msg_type {
      Some(template) => Some(expr::render(&self.env, template, &ctx)?),
      None => None,
    };
    let data = match &self.config.data {
      Some(template) => Some(expr::render(&self.env, template, &ctx)?),
      None => None,
    };
    let mut metadata = Vec::with_capacity(self.config.metadata.len());
    for (key, template) in &self.config.metadata {
      metadata.push((key, expr::render(&self.env, template, &ctx)?));
    }

    if let Some(msg_type) = msg_type {
      msg.msg_type = msg_type;
    }
    if let Some(data) = data {
      msg.data = data;
    }
    for (key, value) in metadata {
      msg.metadata.insert(key.clone(), value);
    }
    Ok(msg)
  }
}

#[async_trait]
impl Node for ExprTransformNode {
  fn node_type(&self) -> &str {
    "exprTransform"
  }

  fn new_instance(&self) -> Box<dyn Node> {
    Box::new(Self::default())
  }

  fn init(&mut self, _config: &EngineConfig, configuration: &Configuration) -> Result<(), NodeError> {
    let config: TransformConfig = decode_config(configuration)?;
    let templates = config
      .msg_type
      .iter()
      .chain(config.data.iter())
      .chain(config.metadata.values());
    for template in templates {
      expr::check_template(&self.env, template).map_err(NodeError::Config)?;
    }
    self.config = config;
    Ok(())
  }

  async fn on_msg(&self, ctx: Arc<dyn RuleContext>, msg: RuleMsg) {
    match self.transform(msg.clone()) {
      Ok(out) => ctx.tell_success(out),
      Err(e) => ctx.tell_failure(msg, NodeError::Processing(e)),
    }
  }
}
