//! Background work for Acton applications.
//!
//! Moves slow, externally-dependent work (AI calls, document generation,
//! scraping) off the request path while keeping track of the logical
//! session that work belongs to, and funnels every write to an external
//! versioned store through a single ordered, retrying commit queue.
//!
//! The crate is built from two long-lived consumer loops:
//!
//! - [`jobs::JobScheduler`] drains a bounded [`jobs::JobQueue`], runs each job
//!   inside a fresh [`scope::Scope`] bound to a [`sessions::Session`], and always
//!   tears that binding down afterwards.
//! - [`commits::CommitProcessor`] drains the unbounded [`commits::CommitQueue`]
//!   one operation at a time, rebasing on the latest branch tip and retrying
//!   rate limits and non-fast-forward rejections with exponential backoff.
//!
//! [`runtime::Worker`] starts both loops and stops them cooperatively.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use acton_reactive::prelude::*;
//! use acton_worker::commits::MemoryStore;
//! use acton_worker::config::WorkerConfig;
//! use acton_worker::jobs::{job_fn, JobError};
//! use acton_worker::runtime::Worker;
//! use acton_worker::scope::{ContainerScopeFactory, ServiceRegistry};
//! use acton_worker::sessions::AgentSessionStore;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = WorkerConfig::default();
//! let mut actors = ActonApp::launch_async().await;
//! let sessions = AgentSessionStore::spawn(&mut actors, &config.sessions).await?;
//! let scopes = ContainerScopeFactory::new(ServiceRegistry::new());
//! let store = MemoryStore::new(&config.commits.branch);
//!
//! let worker = Worker::start(&config, Arc::new(scopes), Arc::new(sessions), Arc::new(store))?;
//! let handle = worker.handle();
//!
//! let commits = handle.commits().clone();
//! handle
//!     .enqueue_job(
//!         job_fn("save-transcript", move |_scope, _cancel| async move {
//!             commits
//!                 .submit_commit("chat.md", b"hello".to_vec(), "transcripts", "Save transcript")
//!                 .await?;
//!             Ok::<(), JobError>(())
//!         }),
//!         None,
//!     )
//!     .await?;
//!
//! worker.shutdown().await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod commits;
pub mod config;
pub mod jobs;
pub mod runtime;
pub mod scope;
pub mod sessions;
pub mod telemetry;

pub use commits::{CommitError, CommitHandle, CommitOutcome, CommitQueue, CommitRequest};
pub use config::WorkerConfig;
pub use jobs::{job_fn, Job, JobError, JobId, JobQueue, JobResult};
pub use runtime::{Worker, WorkerError, WorkerHandle};
pub use scope::{current_scope, Scope, ScopeFactory, ScopeId};
pub use sessions::{Session, SessionError, SessionId, SessionStore};
