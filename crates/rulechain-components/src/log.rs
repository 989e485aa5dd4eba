use std::sync::Arc;

use async_trait::async_trait;
use minijinja::Environment;
use serde::Deserialize;
use tracing::info;

use rulechain_node::{
  Configuration, EngineConfig, Node, NodeError, RuleContext, RuleMsg, decode_config,
};

use crate::expr;

/// Engine property holding the template used when a node configures none.
pub const LOG_TEMPLATE_PROPERTY: &str = "log.template";

const DEFAULT_TEMPLATE: &str = "{{ msgType }}: {{ data }}";

#[derive(Debug, Default, Deserialize)]
struct LogConfig {
  #[serde(default)]
  template: Option<String>,
}

/// Renders the message through a template and logs the result.
pub struct LogNode {
  env: Environment<'static>,
  template: String,
}

impl Default for LogNode {
  fn default() -> Self {
    Self {
      env: Environment::new(),
      template: DEFAULT_TEMPLATE.to_string(),
    }
  }
}

#[async_trait]
impl Node for LogNode {
  fn node_type(&self) -> &str {
    "log"
  }

  fn new_instance(&self) -> Box<dyn Node> {
    Box::new(Self::default())
  }

  fn init(&mut self, config: &EngineConfig, configuration: &Configuration) -> Result<(), NodeError> {
    let log_config: LogConfig = decode_config(configuration)?;
    let template = log_config
      .template
      .or_else(|| config.property(LOG_TEMPLATE_PROPERTY).map(str::to_string))
      .unwrap_or_else(|| DEFAULT_TEMPLATE.to_string());
    expr::check_template(&self.env, &template).map_err(NodeError::Config)?;
    self.template = template;
    Ok(())
  }

  async fn on_msg(&self, ctx: Arc<dyn RuleContext>, msg: RuleMsg) {
    match expr::render(&self.env, &self.template, &expr::msg_context(&msg)) {
      Ok(line) => {
        info!(chain_id = %ctx.chain_id(), node_id = %ctx.self_id(), msg_id = %msg.id, "{}", line);
        ctx.tell_success(msg);
      }
      Err(e) => ctx.tell_failure(msg, NodeError::Processing(e)),
    }
  }
}
