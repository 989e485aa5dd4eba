use std::sync::Arc;

use async_trait::async_trait;
use minijinja::Environment;
use serde::Deserialize;

use rulechain_node::{
  Configuration, EngineConfig, Node, NodeError, RuleContext, RuleMsg, decode_config, relation,
};

use crate::expr;

#[derive(Debug, Deserialize)]
struct FilterConfig {
  expr: String,
}

/// Routes a message along `True` or `False` depending on an expression.
///
/// Evaluation errors go to `Failure`.
pub struct ExprFilterNode {
  env: Environment<'static>,
  expr: String,
}

impl Default for ExprFilterNode {
  fn default() -> Self {
    Self {
      env: Environment::new(),
      expr: String::new(),
    }
  }
}

#[async_trait]
impl Node for ExprFilterNode {
  fn node_type(&self) -> &str {
    "exprFilter"
  }

  fn new_instance(&self) -> Box<dyn Node> {
    Box::new(Self::default())
  }

  fn init(&mut self, _config: &EngineConfig, configuration: &Configuration) -> Result<(), NodeError> {
    let config: FilterConfig = decode_config(configuration)?;
    let source = config.expr.trim();
    if source.is_empty() {
      return Err(NodeError::config("expr is empty"));
    }
    expr::check_expression(&self.env, source).map_err(NodeError::Config)?;
    self.expr = source.to_string();
    Ok(())
  }

  async fn on_msg(&self, ctx: Arc<dyn RuleContext>, msg: RuleMsg) {
    let result = expr::eval(&self.env, &self.expr, &expr::msg_context(&msg));
    match result {
      Ok(value) if value.is_true() => ctx.tell_next(msg, relation::TRUE),
      Ok(_) => ctx.tell_next(msg, relation::FALSE),
      Err(e) => ctx.tell_failure(msg, NodeError::Processing(e)),
    }
  }
}
