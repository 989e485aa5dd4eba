//! Rulechain Engine
//!
//! Compiles chain definitions into routing tables and drives messages
//! through them.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        ChainPool                            │
//! │  - owns every RuleEngine by chain id                        │
//! │  - create / get / remove / load_dir                         │
//! │  - resolves sub-chain references at routing time            │
//! └─────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        RuleEngine                           │
//! │  - one active CompiledChain behind an atomic pointer        │
//! │  - on_msg / on_msg_and_wait / reload_self / reload_child    │
//! └─────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       ChainContext                          │
//! │  - one per hop, shares the invocation's callbacks/counter   │
//! │  - tell / execute_node / run_chain                          │
//! │  - one tokio task per dispatched node                       │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! let registry = Arc::new(NodeRegistry::new());
//! rulechain_components::register_builtins(&registry, Arc::new(FunctionRegistry::new()))?;
//!
//! let pool = ChainPool::new(Arc::new(EngineConfig::new(registry)));
//! let engine = pool.create("", &std::fs::read("chain.json")?)?;
//!
//! let ends = engine.on_msg_and_wait(msg, MsgOptions::new()).await?;
//! ```

mod chain;
mod context;
mod engine;
mod error;
mod options;
mod pool;
mod runner;

pub use chain::{CompiledChain, NodeCtx, Target};
pub use engine::RuleEngine;
pub use error::EngineError;
pub use options::{MsgOptions, OnAllCompletedFn};
pub use pool::ChainPool;
pub use runner::ChainRunner;

pub use rulechain_node::{ChainEnd, OnEndFn};
