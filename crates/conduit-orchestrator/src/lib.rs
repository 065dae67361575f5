//! Conduit Orchestrator
//!
//! This crate drives pipeline triggers. It walks a compiled recipe in
//! dependency order, feeds every record through each component's execution
//! via workflow memory, and exposes the result synchronously, as a pollable
//! [`Operation`], or as a live event stream.
//!
//! The entry point for transports is [`TriggerService`]; [`Orchestrator`]
//! is the lower-level primitive it is built on.

mod error;
mod io;
mod operation;
mod orchestrator;
mod result;
mod service;
mod sse;

pub use error::TriggerError;
pub use operation::{Operation, OperationState, OperationStore};
pub use orchestrator::{Orchestrator, PreparedTrigger};
pub use result::{Trace, TraceStatus, TriggerOutput, TriggerRequest};
pub use service::{Retention, TriggerService, TriggerStream};
pub use sse::format_event;
