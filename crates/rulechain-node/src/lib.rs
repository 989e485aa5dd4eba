//! Rulechain Node
//!
//! The contract between the engine and the units of work it routes messages
//! through. A node receives one message together with a [`RuleContext`] and
//! reports its outcome by calling exactly one routing operation on it. The
//! engine provides the context implementation; this crate only defines the
//! seams so that node libraries do not depend on the engine.
//!
//! Also provided here:
//! - [`RuleMsg`] and [`Metadata`], the message flowing through a chain
//! - [`NodeRegistry`], the prototype registry used when compiling a chain
//! - [`DebugSink`], the per-hop observation hook
//! - [`testing::RecordingContext`] for unit-testing nodes without an engine

mod config;
mod context;
mod debug;
mod error;
mod msg;
mod node;
mod registry;
pub mod relation;
pub mod testing;

pub use config::EngineConfig;
pub use context::{ChainEnd, OnEndFn, RuleContext};
pub use debug::{ChannelDebugSink, DebugEvent, DebugSink, FlowDirection, NoopDebugSink, TracingDebugSink};
pub use error::NodeError;
pub use msg::{DataType, Metadata, RuleMsg};
pub use node::{Node, decode_config};
pub use registry::{NodeRegistry, RegistryError};

pub use rulechain_config::Configuration;
