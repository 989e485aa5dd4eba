//! Rulechain Components
//!
//! Built-in node types. None of them perform I/O; they filter, reshape and
//! route messages, or compose other nodes and chains:
//!
//! | type | relations |
//! |---|---|
//! | `exprFilter` | `True`, `False`, `Failure` |
//! | `exprTransform` | `Success`, `Failure` |
//! | `groupAction` | `Success`, `Failure` |
//! | `flow` | `Success`, `Failure` |
//! | `functions` | whatever the function tells |
//! | `msgTypeSwitch` | the message type |
//! | `log` | `Success`, `Failure` |

mod expr;
mod filter;
mod flow;
mod functions;
mod group;
mod log;
mod switch;
mod transform;

use std::sync::Arc;

use rulechain_node::{NodeRegistry, RegistryError};

pub use filter::ExprFilterNode;
pub use flow::FlowNode;
pub use functions::{FunctionRegistry, FunctionsNode, NodeFunction};
pub use group::GroupActionNode;
pub use log::{LOG_TEMPLATE_PROPERTY, LogNode};
pub use switch::MsgTypeSwitchNode;
pub use transform::ExprTransformNode;

/// Register every built-in node type.
///
/// `functions` backs the `functions` node type; pass an empty registry when
/// no functions are needed.
pub fn register_builtins(
  registry: &NodeRegistry,
  functions: Arc<FunctionRegistry>,
) -> Result<(), RegistryError> {
  registry.register(Box::new(ExprFilterNode::default()))?;
  registry.register(Box::new(ExprTransformNode::default()))?;
  registry.register(Box::new(GroupActionNode::default()))?;
  registry.register(Box::new(FlowNode::default()))?;
  registry.register(Box::new(FunctionsNode::new(functions)))?;
  registry.register(Box::new(MsgTypeSwitchNode))?;
  registry.register(Box::new(LogNode::default()))?;
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_register_builtins() {
    let registry = NodeRegistry::new();
    register_builtins(&registry, Arc::new(FunctionRegistry::new())).unwrap();

    assert_eq!(
      registry.types(),
      vec![
        "exprFilter",
        "exprTransform",
        "flow",
        "functions",
        "groupAction",
        "log",
        "msgTypeSwitch"
      ]
    );
  }
}
