//! Rulechain Config
//!
//! This crate contains the serializable rule chain definition types. These
//! types describe a chain as it is written on disk or sent over the wire,
//! before the engine instantiates its nodes and compiles its routing table.
//!
//! Definitions can be loaded from:
//! - JSON files (via the CLI or `ChainPool::load_dir`)
//! - Raw bytes handed to `ChainPool::create` or a hot reload
//!
//! Parsing validates the structural invariants (unique node ids, connections
//! between existing nodes, a valid entry index). Resolving node types against
//! a registry is left to the engine.

mod chain;
mod error;
mod node;

pub use chain::{ChainConnectionDef, ChainDef, ChainInfo, ChainMetadata, ConnectionDef};
pub use error::DefinitionError;
pub use node::{Configuration, NodeDef};

/// Prefix marking a connection target as another rule chain.
pub const CHAIN_REF_PREFIX: &str = "chain:";

/// Prefix optionally marking a node type as a registered component.
pub const COMPONENT_REF_PREFIX: &str = "component:";
