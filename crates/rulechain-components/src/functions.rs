//! Named async functions invoked as nodes.
//!
//! A function receives the hop context and the message and routes the
//! message itself, exactly like a node's `on_msg`.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::Deserialize;

use rulechain_node::{
  Configuration, EngineConfig, Node, NodeError, RuleContext, RuleMsg, decode_config,
};

/// A registered function.
pub type NodeFunction = Arc<dyn Fn(Arc<dyn RuleContext>, RuleMsg) -> BoxFuture<'static, ()> + Send + Sync>;

/// Functions available to `functions` nodes, by name.
#[derive(Default)]
pub struct FunctionRegistry {
  functions: RwLock<HashMap<String, NodeFunction>>,
}

impl FunctionRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// Register or replace a function.
  pub fn register<F, Fut>(&self, name: impl Into<String>, f: F)
  where
    F: Fn(Arc<dyn RuleContext>, RuleMsg) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
  {
    let function: NodeFunction =
      Arc::new(move |ctx: Arc<dyn RuleContext>, msg: RuleMsg| -> BoxFuture<'static, ()> {
        Box::pin(f(ctx, msg))
      });
    self
      .functions
      .write()
      .unwrap_or_else(PoisonError::into_inner)
      .insert(name.into(), function);
  }

  pub fn unregister(&self, name: &str) -> bool {
    self
      .functions
      .write()
      .unwrap_or_else(PoisonError::into_inner)
      .remove(name)
      .is_some()
  }

  pub fn get(&self, name: &str) -> Option<NodeFunction> {
    self
      .functions
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .get(name)
      .cloned()
  }

  pub fn names(&self) -> Vec<String> {
    let mut names: Vec<String> = self
      .functions
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .keys()
      .cloned()
      .collect();
    names.sort();
    names
  }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FunctionsConfig {
  function_name: String,
}

/// Dispatches the message to a function looked up at processing time.
///
/// Functions registered after the chain was built are picked up; a missing
/// function routes to `Failure`.
pub struct FunctionsNode {
  functions: Arc<FunctionRegistry>,
  function_name: String,
}

impl FunctionsNode {
  pub fn new(functions: Arc<FunctionRegistry>) -> Self {
    Self {
      functions,
      function_name: String::new(),
    }
  }
}

#[async_trait]
impl Node for FunctionsNode {
  fn node_type(&self) -> &str {
    "functions"
  }

  fn new_instance(&self) -> Box<dyn Node> {
    Box::new(Self::new(self.functions.clone()))
  }

  fn init(&mut self, _config: &EngineConfig, configuration: &Configuration) -> Result<(), NodeError> {
    let config: FunctionsConfig = decode_config(configuration)?;
    if config.function_name.is_empty() {
      return Err(NodeError::config("functionName is empty"));
    }
    self.function_name = config.function_name;
    Ok(())
  }

  async fn on_msg(&self, ctx: Arc<dyn RuleContext>, msg: RuleMsg) {
    match self.functions.get(&self.function_name) {
      Some(function) => function(ctx, msg).await,
      None => {
        let err = NodeError::processing(format!("function '{}' not found", self.function_name));
        ctx.tell_failure(msg, err);
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use rulechain_node::Metadata;
  use rulechain_node::testing::RecordingContext;
  use serde_json::json;

  fn node(functions: &Arc<FunctionRegistry>, name: &str) -> Box<dyn Node> {
    let ctx = RecordingContext::new();
    let mut node = FunctionsNode::new(functions.clone()).new_instance();
    let configuration = json!({ "functionName": name });
    node.init(ctx.config(), configuration.as_object().unwrap()).unwrap();
    node
  }

  #[tokio::test]
  async fn test_calls_registered_function() {
    let functions = Arc::new(FunctionRegistry::new());
    functions.register("tag", |ctx: Arc<dyn RuleContext>, mut msg: RuleMsg| async move {
      msg.metadata.insert("aa", "aa");
      ctx.tell_success(msg);
    });
    let node = node(&functions, "tag");

    let ctx = Arc::new(RecordingContext::new());
    node
      .on_msg(ctx.clone(), RuleMsg::json("T", Metadata::new(), &json!({})))
      .await;

    let told = ctx.single();
    assert_eq!(told.relation, "Success");
    assert_eq!(told.msg.metadata.get("aa"), Some("aa"));
  }

  #[tokio::test]
  async fn test_function_registered_after_build() {
    let functions = Arc::new(FunctionRegistry::new());
    let node = node(&functions, "late");
    functions.register("late", |ctx: Arc<dyn RuleContext>, msg: RuleMsg| async move {
      ctx.tell_next(msg, "Custom");
    });

    let ctx = Arc::new(RecordingContext::new());
    node
      .on_msg(ctx.clone(), RuleMsg::json("T", Metadata::new(), &json!({})))
      .await;
    assert_eq!(ctx.single().relation, "Custom");
  }

  #[tokio::test]
  async fn test_missing_function_fails() {
    let functions = Arc::new(FunctionRegistry::new());
    let node = node(&functions, "nope");

    let ctx = Arc::new(RecordingContext::new());
    node
      .on_msg(ctx.clone(), RuleMsg::json("T", Metadata::new(), &json!({})))
      .await;

    let told = ctx.single();
    assert_eq!(told.relation, "Failure");
    assert!(told.error.unwrap().to_string().contains("nope"));
  }

  #[test]
  fn test_registry_names() {
    let functions = FunctionRegistry::new();
    functions.register("b", |_ctx: Arc<dyn RuleContext>, _msg: RuleMsg| async {});
    functions.register("a", |_ctx: Arc<dyn RuleContext>, _msg: RuleMsg| async {});

    assert_eq!(functions.names(), vec!["a", "b"]);
    assert!(functions.unregister("a"));
    assert!(!functions.unregister("a"));
  }
}
