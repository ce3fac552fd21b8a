//! Shared data types for the Meridian worker-node runtime.
//!
//! Canonical definitions used by every other crate: job identifiers,
//! the job payload itself, handler metadata, worker identity, and the
//! job state machine. Kept dependency-light (serde + thiserror only)
//! so it can sit underneath the handler, job-db, staging and worker
//! crates without pulling in async runtimes or I/O.

pub mod error;
pub mod handler_meta;
pub mod job;
pub mod post;
pub mod worker_identity;

pub use error::ProtocolError;
pub use handler_meta::{HandlerDefaults, HandlerMetadata, InputType, RunOn};
pub use job::{Job, JobId, JobState};
pub use post::PostDirective;
pub use worker_identity::{WorkerIdentity, WorkerType};
