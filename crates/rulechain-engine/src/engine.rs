//! Chain handle.
//!
//! A `RuleEngine` owns the active [`CompiledChain`] of one chain id behind an
//! atomic pointer. Every invocation loads the pointer once and keeps that
//! snapshot for its whole traversal; reloads publish a new chain with a
//! single swap and never touch the one in use.

use std::sync::{Arc, Mutex, PoisonError, Weak};

use arc_swap::ArcSwapOption;
use rulechain_config::{ChainDef, NodeDef};
use rulechain_node::{ChainEnd, EngineConfig, NodeError, OnEndFn, RuleContext, RuleMsg};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use crate::chain::CompiledChain;
use crate::context::{self, Invocation};
use crate::error::EngineError;
use crate::options::MsgOptions;
use crate::pool::ChainPool;

/// Handle to one rule chain.
pub struct RuleEngine {
  id: String,
  config: Arc<EngineConfig>,
  pool: Weak<ChainPool>,
  chain: ArcSwapOption<CompiledChain>,
  /// Serializes reloads and stop; traversal never takes it.
  reload_lock: Mutex<()>,
}

impl RuleEngine {
  /// Build a standalone engine, outside of any pool.
  ///
  /// An empty `id` falls back to the definition's id. Sub-chain references
  /// and `run_chain` fail with `ChainNotFound`.
  pub fn new(id: &str, def: &[u8], config: Arc<EngineConfig>) -> Result<Self, EngineError> {
    let mut def = ChainDef::from_slice(def)?;
    let id = resolve_chain_id(id, &mut def);
    Self::from_def(&id, def, config, Weak::new())
  }

  pub(crate) fn from_def(
    id: &str,
    def: ChainDef,
    config: Arc<EngineConfig>,
    pool: Weak<ChainPool>,
  ) -> Result<Self, EngineError> {
    let chain = CompiledChain::build(id, def, &config)?;
    info!(
      chain_id = %id,
      chain_name = %chain.name(),
      nodes = chain.node_count(),
      "chain_loaded"
    );

    Ok(Self {
      id: id.to_string(),
      config,
      pool,
      chain: ArcSwapOption::from_pointee(chain),
      reload_lock: Mutex::new(()),
    })
  }

  pub fn id(&self) -> &str {
    &self.id
  }

  /// False once [`RuleEngine::stop`] has been called.
  pub fn initialized(&self) -> bool {
    self.chain.load().is_some()
  }

  /// Snapshot of the active chain.
  pub fn chain(&self) -> Option<Arc<CompiledChain>> {
    self.chain.load_full()
  }

  /// The active definition as JSON; empty once stopped.
  pub fn dsl(&self) -> String {
    self
      .chain
      .load_full()
      .and_then(|chain| chain.definition().to_json().ok())
      .unwrap_or_default()
  }

  /// A node definition as JSON, from this chain or, by id, another chain of the pool.
  pub fn node_dsl(&self, chain_id: &str, node_id: &str) -> Option<String> {
    let chain = if chain_id.is_empty() || chain_id == self.id {
      self.chain.load_full()
    } else {
      self
        .pool
        .upgrade()
        .and_then(|pool| pool.get(chain_id))
        .and_then(|engine| engine.chain())
    }?;
    chain.node_definition(node_id)?.to_json().ok()
  }

  /// Replace the whole chain.
  ///
  /// In-flight messages finish on the previous version. On error the active
  /// chain is left untouched.
  #[instrument(skip(self, def), fields(chain_id = %self.id))]
  pub fn reload_self(&self, def: &[u8]) -> Result<(), EngineError> {
    let _guard = self.reload_lock.lock().unwrap_or_else(PoisonError::into_inner);
    if !self.initialized() {
      return Err(EngineError::NotInitialized);
    }

    let mut def = ChainDef::from_slice(def)?;
    def.rule_chain.id = self.id.clone();
    let chain = CompiledChain::build(&self.id, def, &self.config)?;
    let nodes = chain.node_count();
    self.chain.store(Some(Arc::new(chain)));

    info!(chain_id = %self.id, nodes, "chain_reloaded");
    Ok(())
  }

  /// Replace one node, keeping the routing table.
  ///
  /// The id in `def`, if any, is ignored in favor of `node_id`.
  #[instrument(skip(self, def), fields(chain_id = %self.id))]
  pub fn reload_child(&self, node_id: &str, def: &[u8]) -> Result<(), EngineError> {
    let _guard = self.reload_lock.lock().unwrap_or_else(PoisonError::into_inner);
    let current = self.chain.load_full().ok_or(EngineError::NotInitialized)?;
    if current.node(node_id).is_none() {
      return Err(EngineError::NodeNotFound {
        chain_id: self.id.clone(),
        node_id: node_id.to_string(),
      });
    }

    let mut def = NodeDef::from_slice(def)?;
    def.id = node_id.to_string();
    let chain = current.with_node(def, &self.config)?;
    self.chain.store(Some(Arc::new(chain)));

    info!(chain_id = %self.id, node_id = %node_id, "node_reloaded");
    Ok(())
  }

  /// Toggle debug events for one node; takes effect on its next hop.
  pub fn set_node_debug_mode(&self, node_id: &str, enabled: bool) -> Result<(), EngineError> {
    let chain = self.chain.load_full().ok_or(EngineError::NotInitialized)?;
    let node = chain.node(node_id).ok_or_else(|| EngineError::NodeNotFound {
      chain_id: self.id.clone(),
      node_id: node_id.to_string(),
    })?;
    node.set_debug_mode(enabled);
    Ok(())
  }

  /// Unpublish the chain. Nodes are destroyed once in-flight hops release them.
  pub fn stop(&self) {
    let _guard = self.reload_lock.lock().unwrap_or_else(PoisonError::into_inner);
    if self.chain.swap(None).is_some() {
      info!(chain_id = %self.id, "chain_stopped");
    }
  }

  /// Process a message without waiting for it.
  pub fn on_msg(&self, msg: RuleMsg) -> Result<(), EngineError> {
    self.on_msg_with_options(msg, MsgOptions::new())
  }

  /// Process a message, calling `on_end` for every ended branch.
  pub fn on_msg_with_end_fn<F>(&self, msg: RuleMsg, on_end: F) -> Result<(), EngineError>
  where
    F: Fn(&dyn RuleContext, RuleMsg, Option<NodeError>, &str) + Send + Sync + 'static,
  {
    self.on_msg_with_options(msg, MsgOptions::new().with_end_fn(on_end))
  }

  /// Process a message without waiting for it.
  ///
  /// Returns once the entry hop is scheduled. Must be called from within a
  /// tokio runtime.
  pub fn on_msg_with_options(&self, msg: RuleMsg, options: MsgOptions) -> Result<(), EngineError> {
    let chain = self.chain.load_full().ok_or(EngineError::NotInitialized)?;
    let MsgOptions {
      cancel,
      values,
      on_end,
      on_all_completed,
    } = options;

    debug!(chain_id = %self.id, msg_id = %msg.id, msg_type = %msg.msg_type, "dispatching message");
    let invocation = Invocation::new(
      self.config.clone(),
      self.pool.clone(),
      values,
      on_end,
      on_all_completed,
    );
    context::start(invocation, chain, cancel.unwrap_or_default(), msg);
    Ok(())
  }

  /// Process a message and wait until every branch has ended.
  ///
  /// Returns the ended branches in the order they ended. Callbacks in
  /// `options` still run.
  pub async fn on_msg_and_wait(
    &self,
    msg: RuleMsg,
    options: MsgOptions,
  ) -> Result<Vec<ChainEnd>, EngineError> {
    let MsgOptions {
      cancel,
      values,
      on_end,
      on_all_completed,
    } = options;

    let ends: Arc<Mutex<Vec<ChainEnd>>> = Arc::new(Mutex::new(Vec::new()));
    let collected = ends.clone();
    let collector: OnEndFn = Arc::new(
      move |ctx: &dyn RuleContext, msg: RuleMsg, err: Option<NodeError>, relation: &str| {
        collected
          .lock()
          .unwrap_or_else(PoisonError::into_inner)
          .push(ChainEnd {
            node_id: ctx.self_id().to_string(),
            msg: msg.clone(),
            relation: relation.to_string(),
            error: err.clone(),
          });
        if let Some(on_end) = &on_end {
          on_end(ctx, msg, err, relation);
        }
      },
    );

    let (done, finished) = oneshot::channel();
    let mut options = MsgOptions::new()
      .with_values(values)
      .with_all_completed(move || {
        if let Some(on_all_completed) = on_all_completed {
          on_all_completed();
        }
        let _ = done.send(());
      });
    options.on_end = Some(collector);
    options.cancel = cancel;

    self.on_msg_with_options(msg, options)?;
    finished.await.map_err(|_| EngineError::Abandoned)?;

    let ends = std::mem::take(&mut *ends.lock().unwrap_or_else(PoisonError::into_inner));
    Ok(ends)
  }

  /// Run one node by id and return its result without routing it further.
  pub async fn execute_node(
    &self,
    node_id: &str,
    msg: RuleMsg,
    cancel: CancellationToken,
  ) -> Result<ChainEnd, EngineError> {
    let chain = self.chain.load_full().ok_or(EngineError::NotInitialized)?;
    let node = chain
      .node(node_id)
      .cloned()
      .ok_or_else(|| EngineError::NodeNotFound {
        chain_id: self.id.clone(),
        node_id: node_id.to_string(),
      })?;

    let (done, finished) = oneshot::channel();
    let done = Mutex::new(Some(done));
    let on_end: OnEndFn = Arc::new(
      move |ctx: &dyn RuleContext, msg: RuleMsg, err: Option<NodeError>, relation: &str| {
        let end = ChainEnd {
          node_id: ctx.self_id().to_string(),
          msg,
          relation: relation.to_string(),
          error: err,
        };
        if let Some(done) = done.lock().unwrap_or_else(PoisonError::into_inner).take() {
          let _ = done.send(end);
        }
      },
    );

    let invocation = Invocation::new(
      self.config.clone(),
      self.pool.clone(),
      Default::default(),
      None,
      None,
    );
    context::execute_detached(invocation, chain, node, cancel, msg, on_end);
    finished.await.map_err(|_| EngineError::Abandoned)
  }
}

/// Pick the chain id: explicit id, then the definition's id, then a fresh one.
///
/// The definition is updated to carry the chosen id.
pub(crate) fn resolve_chain_id(id: &str, def: &mut ChainDef) -> String {
  let id = if !id.is_empty() {
    id.to_string()
  } else if !def.rule_chain.id.is_empty() {
    def.rule_chain.id.clone()
  } else {
    uuid::Uuid::new_v4().to_string()
  };
  def.rule_chain.id = id.clone();
  id
}

impl std::fmt::Debug for RuleEngine {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("RuleEngine")
      .field("id", &self.id)
      .field("initialized", &self.initialized())
      .finish_non_exhaustive()
  }
}
