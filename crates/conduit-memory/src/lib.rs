//! Per-trigger workflow memory and event fan-out.

mod error;
mod event;
mod guard;
mod memory;
mod store;
mod subscription;

pub use error::MemoryError;
pub use event::{ComponentStatus, ErrorData, Event, EventData, EventKind, PipelineStatus};
pub use guard::PurgeGuard;
pub use memory::{ComponentField, WorkflowMemory};
pub use store::{DEFAULT_EVENT_BUFFER, MemoryStore};
pub use subscription::EventSubscription;
