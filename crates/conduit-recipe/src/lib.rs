//! Conduit Recipe
//!
//! This crate provides the compiled recipe representation for conduit.
//! A compiled [`Recipe`] is a validated form of a [`conduit_config::RecipeDef`]
//! that is ready for the orchestrator to walk.
//!
//! Key differences from `conduit-config`:
//! - Every `${...}` reference points at a declared variable, a trigger slot
//!   or an existing component
//! - The component dependency graph is derived from those references and is
//!   acyclic
//! - Components are ordered into dependency groups
//! - Conditions are compiled
//! - Iterator bodies are compiled into nested recipes

mod condition;
mod error;
mod graph;
mod iteration;
mod recipe;
mod reference;

pub use condition::Condition;
pub use error::RecipeError;
pub use graph::Graph;
pub use iteration::{DEFAULT_INDEX, ELEMENT_KEY, Iteration, IterationSource, range_indexes};
pub use recipe::{CONNECTION_SLOT, Node, OUTPUT_SLOT, Recipe, SECRET_SLOT, VARIABLE_SLOT};
pub use reference::{Reference, Segment, collect_paths, find_references, lookup, parse_path, render};
