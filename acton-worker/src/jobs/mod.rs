//! Background job scheduling.
//!
//! Producers hand [`WorkItem`]s to a bounded [`JobQueue`]; a single
//! [`JobScheduler`] drains it, one job at a time:
//!
//! - a fresh [`Scope`](crate::scope::Scope) is created for the job
//! - the scope joins the job's parent session, or opens a new one
//! - the body runs on its own task with the scope bound as the current scope
//! - the scope releases its session hold, whatever the outcome
//!
//! # Example
//!
//! ```rust
//! use acton_worker::jobs::{Job, JobResult};
//! use acton_worker::scope::Scope;
//! use async_trait::async_trait;
//! use tokio_util::sync::CancellationToken;
//!
//! #[derive(Debug)]
//! pub struct GenerateSummary {
//!     document: String,
//! }
//!
//! #[async_trait]
//! impl Job for GenerateSummary {
//!     fn name(&self) -> &str {
//!         "generate-summary"
//!     }
//!
//!     async fn execute(self: Box<Self>, scope: Scope, cancel: CancellationToken) -> JobResult<()> {
//!         if cancel.is_cancelled() {
//!             return Ok(());
//!         }
//!         println!("Summarizing {} in scope {}", self.document, scope.id());
//!         Ok(())
//!     }
//! }
//! ```

mod error;
mod job;
mod queue;
mod scheduler;

pub use error::{JobError, JobQueueError, JobResult};
pub use job::{job_fn, FnJob, Job, JobId, WorkItem};
pub use queue::{JobMetrics, JobQueue, JobReceiver};
pub use scheduler::{JobOutcome, JobPhase, JobScheduler};

pub(crate) use scheduler::panic_message;
