//! Built-in conduit components that run in process.

use std::sync::Arc;

use conduit_component::{ComponentError, ComponentRegistry};

pub mod json;

pub use json::JsonOperator;

/// Register every built-in operator.
pub fn register_builtins(registry: &mut ComponentRegistry) -> Result<(), ComponentError> {
  registry.register(Arc::new(JsonOperator::new()))?;
  Ok(())
}

/// A registry holding only the built-in operators.
pub fn builtin_registry() -> Result<ComponentRegistry, ComponentError> {
  let mut registry = ComponentRegistry::new();
  register_builtins(&mut registry)?;
  Ok(registry)
}
