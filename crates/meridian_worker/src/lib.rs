//! Worker (C5): job-acquisition loop, handler switching, task
//! execution, and the per-job resource/status bookkeeping around it.

mod config;
mod resources;
mod staging;
mod status;
mod worker;

pub use config::WorkerConfig;
pub use status::{WorkerState, WorkerStatus};
pub use worker::Worker;
