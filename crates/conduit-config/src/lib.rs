//! Conduit Config
//!
//! This crate contains the serializable types for conduit: pipeline recipes
//! as users write them and the runtime [`Settings`] the trigger service is
//! started with. Recipes are validated and compiled by `conduit-recipe`
//! before they are executed.
//!
//! Recipes can be loaded from:
//! - JSON files (via the CLI with `conduit run recipe.json`)
//! - Any other source that yields JSON (they are plain serde types)

mod component;
mod error;
mod recipe;
mod settings;

pub use component::{ComponentDef, ITERATOR_TYPE};
pub use error::ConfigError;
pub use recipe::{OutputDef, RecipeDef, VariableDef};
pub use settings::Settings;
