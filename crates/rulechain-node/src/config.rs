use std::collections::HashMap;
use std::sync::Arc;

use crate::debug::{DebugSink, NoopDebugSink};
use crate::registry::NodeRegistry;

/// Shared engine configuration, visible to every node.
#[derive(Clone)]
pub struct EngineConfig {
  /// Node prototypes used to instantiate chain definitions.
  pub registry: Arc<NodeRegistry>,
  /// Receives per-hop debug events for nodes with debug mode enabled.
  pub debug_sink: Arc<dyn DebugSink>,
  /// Free-form properties nodes may read.
  pub properties: HashMap<String, String>,
}

impl EngineConfig {
  pub fn new(registry: Arc<NodeRegistry>) -> Self {
    Self {
      registry,
      debug_sink: Arc::new(NoopDebugSink),
      properties: HashMap::new(),
    }
  }

  pub fn with_debug_sink(mut self, sink: Arc<dyn DebugSink>) -> Self {
    self.debug_sink = sink;
    self
  }

  pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
    self.properties.insert(key.into(), value.into());
    self
  }

  pub fn property(&self, key: &str) -> Option<&str> {
    self.properties.get(key).map(String::as_str)
  }
}

impl std::fmt::Debug for EngineConfig {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("EngineConfig")
      .field("node_types", &self.registry.types())
      .field("properties", &self.properties)
      .finish_non_exhaustive()
  }
}
