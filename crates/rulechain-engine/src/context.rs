//! Per-hop execution context.
//!
//! Every top-level invocation owns one [`Invocation`]: the end callbacks,
//! request values and the outstanding-branch counter. Each node hop gets its
//! own [`ChainContext`] pointing at that shared state and at the chain
//! snapshot the invocation started on, so a reload never changes the graph
//! under a running message.
//!
//! Branch accounting: the counter starts at one. A hop that routes to `n`
//! targets adds `n - 1`; a hop that routes nowhere ends its branch and
//! subtracts one. The all-completed callback runs when it reaches zero.

use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use async_trait::async_trait;
use futures::FutureExt;
use rulechain_node::{
  ChainEnd, DebugEvent, EngineConfig, FlowDirection, NodeError, OnEndFn, RuleContext, RuleMsg,
  relation,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::chain::{CompiledChain, NodeCtx, Target};
use crate::options::{MsgOptions, OnAllCompletedFn};
use crate::pool::ChainPool;

/// Outstanding-branch counter of one invocation.
struct Completion {
  outstanding: AtomicUsize,
  on_all: Mutex<Option<OnAllCompletedFn>>,
}

impl Completion {
  fn new(on_all: Option<OnAllCompletedFn>) -> Self {
    Self {
      outstanding: AtomicUsize::new(1),
      on_all: Mutex::new(on_all),
    }
  }

  fn fork(&self, extra: usize) {
    if extra > 0 {
      self.outstanding.fetch_add(extra, Ordering::AcqRel);
    }
  }

  fn finish(&self) {
    if self.outstanding.fetch_sub(1, Ordering::AcqRel) != 1 {
      return;
    }
    let on_all = self
      .on_all
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .take();
    if let Some(on_all) = on_all {
      if let Err(panic) = std::panic::catch_unwind(AssertUnwindSafe(on_all)) {
        warn!(panic = %panic_message(panic.as_ref()), "all-completed callback panicked");
      }
    }
  }
}

/// State shared by every hop of one top-level invocation.
pub(crate) struct Invocation {
  config: Arc<EngineConfig>,
  pool: Weak<ChainPool>,
  values: HashMap<String, serde_json::Value>,
  on_end: Option<OnEndFn>,
  completion: Completion,
}

impl Invocation {
  pub(crate) fn new(
    config: Arc<EngineConfig>,
    pool: Weak<ChainPool>,
    values: HashMap<String, serde_json::Value>,
    on_end: Option<OnEndFn>,
    on_all_completed: Option<OnAllCompletedFn>,
  ) -> Arc<Self> {
    Arc::new(Self {
      config,
      pool,
      values,
      on_end,
      completion: Completion::new(on_all_completed),
    })
  }
}

enum HopMode {
  /// Results follow the chain's connections.
  Routed,
  /// Results go straight to `on_end`; used by out-of-band node execution.
  Detached { on_end: OnEndFn, skip_debug: bool },
}

/// The [`RuleContext`] handed to a node for one hop.
pub(crate) struct ChainContext {
  invocation: Arc<Invocation>,
  chain: Arc<CompiledChain>,
  /// `None` only for a chain without entry node.
  node: Option<Arc<NodeCtx>>,
  from_id: Option<String>,
  cancel: CancellationToken,
  mode: HopMode,
  reported: AtomicBool,
}

/// Start an invocation at the entry node of `chain`.
///
/// A chain without entry node ends immediately with the original message.
/// Must be called from within a tokio runtime.
pub(crate) fn start(
  invocation: Arc<Invocation>,
  chain: Arc<CompiledChain>,
  cancel: CancellationToken,
  msg: RuleMsg,
) {
  let node = chain.first_node().cloned();
  let ctx = ChainContext {
    invocation,
    chain,
    node: node.clone(),
    from_id: None,
    cancel,
    mode: HopMode::Routed,
    reported: AtomicBool::new(false),
  };

  match node {
    Some(node) => {
      tokio::spawn(run_hop(Arc::new(ctx), node, msg));
    }
    None => {
      debug!(chain_id = %ctx.chain.id(), "chain has no entry node");
      ctx.end_branch(msg, None, relation::SUCCESS);
    }
  }
}

/// Run a single node of `chain` without routing its result.
pub(crate) fn execute_detached(
  invocation: Arc<Invocation>,
  chain: Arc<CompiledChain>,
  node: Arc<NodeCtx>,
  cancel: CancellationToken,
  msg: RuleMsg,
  on_end: OnEndFn,
) {
  let ctx = ChainContext {
    invocation,
    chain,
    node: Some(node.clone()),
    from_id: None,
    cancel,
    mode: HopMode::Detached {
      on_end,
      skip_debug: false,
    },
    reported: AtomicBool::new(false),
  };
  tokio::spawn(run_hop(Arc::new(ctx), node, msg));
}

async fn run_hop(ctx: Arc<ChainContext>, node: Arc<NodeCtx>, msg: RuleMsg) {
  if ctx.cancel.is_cancelled() {
    ctx.tell_failure(msg, NodeError::Cancelled);
    return;
  }

  ctx.emit_debug(FlowDirection::In, &msg, "", None);

  let fallback = msg.clone();
  let hop: Arc<dyn RuleContext> = ctx.clone();
  let result = AssertUnwindSafe(node.node().on_msg(hop, msg))
    .catch_unwind()
    .await;

  if let Err(panic) = result {
    let reason = panic_message(panic.as_ref());
    error!(
      chain_id = %ctx.chain.id(),
      node_id = %node.id(),
      panic = %reason,
      "node panicked"
    );
    if !ctx.reported.load(Ordering::Acquire) {
      ctx.tell_failure(fallback, NodeError::Panicked(reason));
    }
  }
}

impl ChainContext {
  /// A routed hop to `node` of `chain`, sharing this hop's invocation.
  fn next_hop(&self, chain: Arc<CompiledChain>, node: Arc<NodeCtx>) -> ChainContext {
    ChainContext {
      invocation: self.invocation.clone(),
      chain,
      node: Some(node),
      from_id: Some(self.self_id().to_string()),
      cancel: self.cancel.clone(),
      mode: HopMode::Routed,
      reported: AtomicBool::new(false),
    }
  }

  fn dispatch(&self, target: &Target, msg: RuleMsg) {
    match target {
      Target::Node(node_id) => match self.chain.node(node_id) {
        Some(node) => {
          let ctx = self.next_hop(self.chain.clone(), node.clone());
          tokio::spawn(run_hop(Arc::new(ctx), node.clone(), msg));
        }
        None => {
          let err = NodeError::NodeNotFound {
            node_id: node_id.clone(),
          };
          self.end_branch(msg, Some(err), relation::FAILURE);
        }
      },
      Target::Chain(chain_id) => {
        let sub = self
          .invocation
          .pool
          .upgrade()
          .and_then(|pool| pool.get(chain_id))
          .and_then(|engine| engine.chain());
        let Some(sub) = sub else {
          let err = NodeError::ChainNotFound {
            chain_id: chain_id.clone(),
          };
          self.end_branch(msg, Some(err), relation::FAILURE);
          return;
        };
        match sub.first_node().cloned() {
          Some(node) => {
            let ctx = self.next_hop(sub, node.clone());
            tokio::spawn(run_hop(Arc::new(ctx), node, msg));
          }
          None => self.end_branch(msg, None, relation::SUCCESS),
        }
      }
    }
  }

  fn end_branch(&self, msg: RuleMsg, err: Option<NodeError>, relation: &str) {
    if let Some(on_end) = &self.invocation.on_end {
      call_end(on_end, self, msg, err, relation);
    }
    self.invocation.completion.finish();
  }

  fn emit_debug(&self, direction: FlowDirection, msg: &RuleMsg, relation: &str, err: Option<&NodeError>) {
    let Some(node) = &self.node else {
      return;
    };
    if matches!(self.mode, HopMode::Detached { skip_debug: true, .. }) {
      return;
    }
    if !node.debug_mode() {
      return;
    }

    let event = DebugEvent {
      chain_id: self.chain.id().to_string(),
      direction,
      node_id: node.id().to_string(),
      msg: msg.clone(),
      relation: relation.to_string(),
      error: err.cloned(),
    };
    let sink = &self.invocation.config.debug_sink;
    if let Err(panic) = std::panic::catch_unwind(AssertUnwindSafe(|| sink.on_debug(event))) {
      warn!(
        chain_id = %self.chain.id(),
        node_id = %node.id(),
        panic = %panic_message(panic.as_ref()),
        "debug sink panicked"
      );
    }
  }
}

#[async_trait]
impl RuleContext for ChainContext {
  fn chain_id(&self) -> &str {
    self.chain.id()
  }

  fn self_id(&self) -> &str {
    self.node.as_ref().map(|n| n.id()).unwrap_or_default()
  }

  fn from_id(&self) -> Option<&str> {
    self.from_id.as_deref()
  }

  fn config(&self) -> &EngineConfig {
    &self.invocation.config
  }

  fn cancel_token(&self) -> &CancellationToken {
    &self.cancel
  }

  fn value(&self, key: &str) -> Option<&serde_json::Value> {
    self.invocation.values.get(key)
  }

  fn tell(&self, msg: RuleMsg, relation: &str, err: Option<NodeError>) {
    if self.reported.swap(true, Ordering::AcqRel) {
      warn!(
        chain_id = %self.chain.id(),
        node_id = %self.self_id(),
        relation = %relation,
        "node reported more than once, ignoring"
      );
      return;
    }

    self.emit_debug(FlowDirection::Out, &msg, relation, err.as_ref());

    match &self.mode {
      HopMode::Detached { on_end, .. } => call_end(on_end, self, msg, err, relation),
      HopMode::Routed => match self.chain.targets(self.self_id(), relation).split_last() {
        None => self.end_branch(msg, err, relation),
        Some((last, rest)) => {
          self.invocation.completion.fork(rest.len());
          for target in rest {
            self.dispatch(target, msg.clone());
          }
          self.dispatch(last, msg);
        }
      },
    }
  }

  fn execute_node(
    &self,
    cancel: CancellationToken,
    node_id: &str,
    msg: RuleMsg,
    skip_self_debug: bool,
    on_end: OnEndFn,
  ) {
    let Some(node) = self.chain.node(node_id).cloned() else {
      let err = NodeError::NodeNotFound {
        node_id: node_id.to_string(),
      };
      call_end(&on_end, self, msg, Some(err), relation::FAILURE);
      return;
    };

    let ctx = ChainContext {
      invocation: self.invocation.clone(),
      chain: self.chain.clone(),
      node: Some(node.clone()),
      from_id: Some(self.self_id().to_string()),
      cancel,
      mode: HopMode::Detached {
        on_end,
        skip_debug: skip_self_debug,
      },
      reported: AtomicBool::new(false),
    };
    tokio::spawn(run_hop(Arc::new(ctx), node, msg));
  }

  async fn run_chain(&self, chain_id: &str, msg: RuleMsg) -> Result<Vec<ChainEnd>, NodeError> {
    let engine = self
      .invocation
      .pool
      .upgrade()
      .and_then(|pool| pool.get(chain_id))
      .ok_or_else(|| NodeError::ChainNotFound {
        chain_id: chain_id.to_string(),
      })?;

    let options = MsgOptions::new()
      .with_cancel(self.cancel.child_token())
      .with_values(self.invocation.values.clone());
    engine
      .on_msg_and_wait(msg, options)
      .await
      .map_err(NodeError::processing)
  }
}

fn call_end(
  on_end: &OnEndFn,
  ctx: &dyn RuleContext,
  msg: RuleMsg,
  err: Option<NodeError>,
  relation: &str,
) {
  let result = std::panic::catch_unwind(AssertUnwindSafe(|| on_end(ctx, msg, err, relation)));
  if let Err(panic) = result {
    warn!(
      chain_id = %ctx.chain_id(),
      node_id = %ctx.self_id(),
      panic = %panic_message(panic.as_ref()),
      "end callback panicked"
    );
  }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
  if let Some(s) = panic.downcast_ref::<&str>() {
    s.to_string()
  } else if let Some(s) = panic.downcast_ref::<String>() {
    s.clone()
  } else {
    "unknown panic".to_string()
  }
}
