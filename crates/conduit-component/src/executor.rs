//! Batched job execution.
//!
//! Every job goes through read, handle and write. The first failing step
//! records its error through the job's error sink and the batch moves on, so
//! each job ends with exactly one outcome: its output was written, or one
//! error was recorded.

use std::sync::Arc;

use futures::StreamExt;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::dispatcher::TaskHandler;
use crate::error::{ComponentError, JobError};
use crate::job::{Job, JobOutcome};

/// Runs batches of jobs against one handler.
#[derive(Debug, Clone, Copy)]
pub struct BatchExecutor {
  concurrency: usize,
}

impl Default for BatchExecutor {
  fn default() -> Self {
    Self::sequential()
  }
}

impl BatchExecutor {
  /// One job at a time, in order.
  pub fn sequential() -> Self {
    Self { concurrency: 1 }
  }

  /// Up to `concurrency` jobs in flight. Outcomes are still reported in job
  /// order.
  pub fn concurrent(concurrency: usize) -> Self {
    Self {
      concurrency: concurrency.max(1),
    }
  }

  pub fn concurrency(&self) -> usize {
    self.concurrency
  }

  /// Run every job and return one outcome per job.
  ///
  /// Fails only if `cancel` fired during the batch. Jobs in flight are
  /// aborted and, like jobs that had not started, record a cancellation
  /// error, so the per-job outcome guarantee still holds.
  pub async fn run(
    &self,
    cancel: &CancellationToken,
    jobs: Vec<Job>,
    handler: Arc<dyn TaskHandler>,
  ) -> Result<Vec<JobOutcome>, ComponentError> {
    let outcomes: Vec<JobOutcome> = futures::stream::iter(jobs.into_iter().enumerate())
      .map(|(index, job)| run_job(index, job, handler.clone(), cancel))
      .buffered(self.concurrency)
      .collect()
      .await;

    if cancel.is_cancelled() {
      return Err(ComponentError::Cancelled);
    }

    Ok(outcomes)
  }
}

async fn run_job(
  index: usize,
  job: Job,
  handler: Arc<dyn TaskHandler>,
  cancel: &CancellationToken,
) -> JobOutcome {
  let result = process(&job, handler, cancel).await;
  if let Err(e) = &result {
    debug!(job_index = index, error = %e, "job_failed");
    job.error.error(e.clone()).await;
  }
  result
}

async fn process(
  job: &Job,
  handler: Arc<dyn TaskHandler>,
  cancel: &CancellationToken,
) -> JobOutcome {
  if cancel.is_cancelled() {
    return Err(JobError::cancelled());
  }

  let record = job.input.read().await?;

  // The handler runs on its own task so a panic is contained to this job.
  // Dropping the set aborts the task, so a cancelled handler never outlives
  // its batch.
  let mut tasks = JoinSet::new();
  let token = cancel.child_token();
  tasks.spawn(async move { handler.handle(token, record).await });

  let joined = tokio::select! {
    biased;
    _ = cancel.cancelled() => return Err(JobError::cancelled()),
    joined = tasks.join_next() => joined,
  };
  let output = match joined {
    Some(Ok(result)) => result?,
    Some(Err(e)) => return Err(JobError::new(format!("task handler panicked: {}", e))),
    None => return Err(JobError::new("task handler did not run")),
  };

  job.output.write(output).await
}
