use thiserror::Error;

/// Structural problems with a recipe.
///
/// All of these are detected before any component runs.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RecipeError {
  /// A `${...}` expression could not be parsed.
  #[error("invalid reference '{reference}': {message}")]
  InvalidReference { reference: String, message: String },

  /// A reference names neither a trigger slot nor a component.
  #[error("'{location}' references unknown node '{parent}' in '${{{reference}}}'")]
  UnknownReference {
    location: String,
    parent: String,
    reference: String,
  },

  /// A `variable.X` reference names an undeclared variable.
  #[error("'{location}' references undeclared variable '{name}'")]
  UnknownVariable { location: String, name: String },

  /// Setup may only reference trigger-level slots.
  #[error("setup of component '{component_id}' may only reference secret or connection, found '${{{reference}}}'")]
  SetupReference {
    component_id: String,
    reference: String,
  },

  /// A component ID collides with a reserved memory slot.
  #[error("component ID '{0}' is reserved")]
  ReservedComponentId(String),

  /// A component ID is used both inside an iterator and elsewhere.
  #[error("component ID '{0}' is declared more than once")]
  DuplicateComponentId(String),

  /// An iterator node is malformed.
  #[error("invalid iterator '{component_id}': {message}")]
  InvalidIterator {
    component_id: String,
    message: String,
  },

  /// An iterator range did not render to a usable range.
  #[error("iterator range error, {0}")]
  InvalidRange(String),

  /// The condition expression does not compile.
  #[error("invalid condition on component '{component_id}': {message}")]
  InvalidCondition {
    component_id: String,
    message: String,
  },

  /// Components depend on each other in a loop.
  #[error("dependency cycle between components: {}", .0.join(", "))]
  Cycle(Vec<String>),

  /// A reference points at a path that holds no value.
  #[error("reference '${{{0}}}' is not resolvable")]
  Unresolved(String),
}
