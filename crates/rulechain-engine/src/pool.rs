//! Chain pool.
//!
//! Owns every [`RuleEngine`] by chain id and is the lookup table used when
//! a message crosses into another chain. Engines hold a weak reference back
//! to the pool, so dropping the pool does not leak through them.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use rulechain_config::ChainDef;
use rulechain_node::EngineConfig;
use tokio::fs;
use tracing::info;

use crate::engine::{RuleEngine, resolve_chain_id};
use crate::error::EngineError;

/// Registry of running chains.
pub struct ChainPool {
  config: Arc<EngineConfig>,
  engines: RwLock<HashMap<String, Arc<RuleEngine>>>,
}

impl ChainPool {
  pub fn new(config: Arc<EngineConfig>) -> Arc<Self> {
    Arc::new(Self {
      config,
      engines: RwLock::new(HashMap::new()),
    })
  }

  pub fn config(&self) -> &Arc<EngineConfig> {
    &self.config
  }

  /// Build a chain and add it to the pool.
  ///
  /// An empty `id` falls back to the definition's id, then to a generated
  /// one. If the id is already in the pool, the existing engine is returned
  /// and `def` is not built.
  pub fn create(self: &Arc<Self>, id: &str, def: &[u8]) -> Result<Arc<RuleEngine>, EngineError> {
    let def = ChainDef::from_slice(def)?;
    self.create_from_def(id, def)
  }

  /// Like [`ChainPool::create`], from an already parsed definition.
  pub fn create_from_def(
    self: &Arc<Self>,
    id: &str,
    mut def: ChainDef,
  ) -> Result<Arc<RuleEngine>, EngineError> {
    let id = resolve_chain_id(id, &mut def);
    if let Some(existing) = self.get(&id) {
      return Ok(existing);
    }

    let engine = Arc::new(RuleEngine::from_def(
      &id,
      def,
      self.config.clone(),
      Arc::downgrade(self),
    )?);

    let mut engines = self.engines.write().unwrap_or_else(PoisonError::into_inner);
    Ok(engines.entry(id).or_insert(engine).clone())
  }

  pub fn get(&self, id: &str) -> Option<Arc<RuleEngine>> {
    let engines = self.engines.read().unwrap_or_else(PoisonError::into_inner);
    engines.get(id).cloned()
  }

  /// Stop a chain and remove it from the pool.
  pub fn remove(&self, id: &str) -> Option<Arc<RuleEngine>> {
    let removed = self
      .engines
      .write()
      .unwrap_or_else(PoisonError::into_inner)
      .remove(id);
    if let Some(engine) = &removed {
      engine.stop();
    }
    removed
  }

  /// Ids of every chain in the pool, sorted.
  pub fn ids(&self) -> Vec<String> {
    let engines = self.engines.read().unwrap_or_else(PoisonError::into_inner);
    let mut ids: Vec<String> = engines.keys().cloned().collect();
    ids.sort();
    ids
  }

  /// Stop and remove every chain.
  pub fn stop(&self) {
    let engines: Vec<Arc<RuleEngine>> = self
      .engines
      .write()
      .unwrap_or_else(PoisonError::into_inner)
      .drain()
      .map(|(_, engine)| engine)
      .collect();
    for engine in engines {
      engine.stop();
    }
  }

  /// Create one chain per `*.json` file of `dir`, in file name order.
  ///
  /// Definitions without id are named after their file stem. The first
  /// invalid file aborts loading; chains created before it stay in the pool.
  pub async fn load_dir(self: &Arc<Self>, dir: &Path) -> Result<Vec<Arc<RuleEngine>>, EngineError> {
    let mut entries = fs::read_dir(dir).await.map_err(io_error(dir))?;
    let mut paths: Vec<PathBuf> = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(io_error(dir))? {
      let path = entry.path();
      if path.is_file() && path.extension().is_some_and(|ext| ext == "json") {
        paths.push(path);
      }
    }
    paths.sort();

    let mut loaded = Vec::with_capacity(paths.len());
    for path in paths {
      let content = fs::read(&path).await.map_err(io_error(&path))?;
      let def = ChainDef::from_slice(&content)?;
      let fallback = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_string();
      let id = if def.rule_chain.id.is_empty() {
        fallback
      } else {
        String::new()
      };
      loaded.push(self.create_from_def(&id, def)?);
    }

    info!(dir = %dir.display(), chains = loaded.len(), "chains_loaded");
    Ok(loaded)
  }
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> EngineError {
  let path = path.to_path_buf();
  move |source| EngineError::Io { path, source }
}

impl std::fmt::Debug for ChainPool {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("ChainPool")
      .field("chains", &self.ids())
      .finish_non_exhaustive()
  }
}
