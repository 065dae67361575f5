//! Conduit Component
//!
//! This crate defines the contract every conduit component implements and
//! the machinery shared by all of them:
//!
//! - [`Definition`]: static metadata (tasks, setup and task schemas), loaded
//!   once per component type
//! - [`Component`] / [`Execution`]: building a task-bound execution from
//!   setup, then running batches of [`Job`]s
//! - [`TaskTable`]: task identifier to handler dispatch, with no fallback
//! - [`BatchExecutor`]: the per-job read, handle, write loop that isolates
//!   failures
//! - [`ComponentRegistry`]: the explicit set of components the orchestrator
//!   can use

mod contract;
mod definition;
mod dispatcher;
mod error;
mod executor;
mod job;
mod registry;
mod schema;

pub use contract::{Component, Execution, ExecutionParams, Setup, TaskExecution};
pub use definition::{Definition, TaskSchema};
pub use dispatcher::{CancellableFn, HandlerFn, TaskHandler, TaskTable, cancellable_fn, handler_fn};
pub use error::{ComponentError, JobError};
pub use executor::BatchExecutor;
pub use job::{Job, JobErrorSink, JobInput, JobOutcome, JobOutput};
pub use registry::ComponentRegistry;
pub use schema::Schema;
