//! Jobs: one input record with its output and error sinks.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::JobError;

/// Source of a job's input record.
#[async_trait]
pub trait JobInput: Send + Sync {
  async fn read(&self) -> Result<Value, JobError>;
}

/// Sink for a job's output record.
#[async_trait]
pub trait JobOutput: Send + Sync {
  async fn write(&self, output: Value) -> Result<(), JobError>;
}

/// Sink recording a job's failure without failing the batch.
#[async_trait]
pub trait JobErrorSink: Send + Sync {
  async fn error(&self, error: JobError);
}

/// The unit of batched work.
pub struct Job {
  pub input: Box<dyn JobInput>,
  pub output: Box<dyn JobOutput>,
  pub error: Box<dyn JobErrorSink>,
}

impl Job {
  pub fn new(
    input: impl JobInput + 'static,
    output: impl JobOutput + 'static,
    error: impl JobErrorSink + 'static,
  ) -> Self {
    Self {
      input: Box::new(input),
      output: Box::new(output),
      error: Box::new(error),
    }
  }
}

impl std::fmt::Debug for Job {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Job").finish_non_exhaustive()
  }
}

/// What happened to one job: its output was written, or exactly one error
/// was recorded.
pub type JobOutcome = Result<(), JobError>;
