//! Expression and template evaluation against a message.
//!
//! Expressions and templates see the following variables:
//! - `msg`: the payload, parsed when the data type is JSON, otherwise the raw string
//! - `metadata`: the message metadata map
//! - `msgType`, `dataType`, `data`: message attributes as strings
//!
//! ```text
//! msg.temperature > 10 and metadata.productType == "test01"
//! ```

use minijinja::{Environment, Value};
use rulechain_node::{DataType, RuleMsg};

/// Build the evaluation context for a message.
pub(crate) fn msg_context(msg: &RuleMsg) -> Value {
  let payload = match msg.data_type {
    DataType::Json => msg
      .json_data()
      .unwrap_or_else(|_| serde_json::Value::String(msg.data.clone())),
    DataType::Text | DataType::Binary => serde_json::Value::String(msg.data.clone()),
  };

  let metadata: serde_json::Map<String, serde_json::Value> = msg
    .metadata
    .iter()
    .map(|(k, v)| (k.to_string(), serde_json::Value::String(v.to_string())))
    .collect();

  let mut ctx = serde_json::Map::new();
  ctx.insert("msg".to_string(), payload);
  ctx.insert("metadata".to_string(), serde_json::Value::Object(metadata));
  ctx.insert("msgType".to_string(), msg.msg_type.clone().into());
  ctx.insert("dataType".to_string(), msg.data_type.to_string().into());
  ctx.insert("data".to_string(), msg.data.clone().into());

  Value::from_serialize(&ctx)
}

/// Check that an expression compiles.
pub(crate) fn check_expression(env: &Environment<'_>, source: &str) -> Result<(), String> {
  env
    .compile_expression(source)
    .map(|_| ())
    .map_err(|e| format!("invalid expression '{}': {}", source, e))
}

/// Check that a template compiles.
pub(crate) fn check_template(env: &Environment<'_>, source: &str) -> Result<(), String> {
  env
    .template_from_str(source)
    .map(|_| ())
    .map_err(|e| format!("invalid template '{}': {}", source, e))
}

/// Evaluate an expression against a message context.
pub(crate) fn eval(env: &Environment<'_>, source: &str, ctx: &Value) -> Result<Value, String> {
  let expr = env
    .compile_expression(source)
    .map_err(|e| format!("invalid expression '{}': {}", source, e))?;
  expr
    .eval(ctx.clone())
    .map_err(|e| format!("failed to evaluate '{}': {}", source, e))
}

/// Render a template against a message context.
pub(crate) fn render(env: &Environment<'_>, source: &str, ctx: &Value) -> Result<String, String> {
  env
    .render_str(source, ctx.clone())
    .map_err(|e| format!("failed to render '{}': {}", source, e))
}
