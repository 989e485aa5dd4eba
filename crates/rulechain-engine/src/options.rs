use std::collections::HashMap;
use std::sync::Arc;

use rulechain_node::{NodeError, OnEndFn, RuleContext, RuleMsg};
use tokio_util::sync::CancellationToken;

/// Callback invoked once every branch of an invocation has ended.
pub type OnAllCompletedFn = Box<dyn FnOnce() + Send>;

/// Per-invocation options for [`crate::RuleEngine`] message entry points.
#[derive(Default)]
pub struct MsgOptions {
  pub(crate) cancel: Option<CancellationToken>,
  pub(crate) values: HashMap<String, serde_json::Value>,
  pub(crate) on_end: Option<OnEndFn>,
  pub(crate) on_all_completed: Option<OnAllCompletedFn>,
}

impl MsgOptions {
  pub fn new() -> Self {
    Self::default()
  }

  /// Cancel every hop of the invocation when `cancel` fires.
  pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
    self.cancel = Some(cancel);
    self
  }

  /// Attach a request-scoped value, readable through `RuleContext::value`.
  pub fn with_value(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
    self.values.insert(key.into(), value);
    self
  }

  pub fn with_values(mut self, values: HashMap<String, serde_json::Value>) -> Self {
    self.values.extend(values);
    self
  }

  /// Called once per ended branch.
  pub fn with_end_fn<F>(mut self, f: F) -> Self
  where
    F: Fn(&dyn RuleContext, RuleMsg, Option<NodeError>, &str) + Send + Sync + 'static,
  {
    self.on_end = Some(Arc::new(f));
    self
  }

  /// Called exactly once, after the last branch ended.
  pub fn with_all_completed<F>(mut self, f: F) -> Self
  where
    F: FnOnce() + Send + 'static,
  {
    self.on_all_completed = Some(Box::new(f));
    self
  }
}
