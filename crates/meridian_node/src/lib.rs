//! Node Controller (C6) + CLI & Config (C9): the binary-facing crate
//! that ties the Worker, Handler, Job DB, and Staging crates together
//! into the `meridian-node` executable.

pub mod cli;
pub mod controller;
pub mod telemetry;

pub use cli::Cli;
