//! Handler model: the Handler ABI (C8), Handler Registry (C1) and
//! Handler Loader (C2).

mod error;
mod handle;
mod registry;

pub use error::HandlerError;
pub use handle::HandlerHandle;
pub use registry::{discover, find as discover_one, DiscoveredHandler};

use meridian_protocol::Job;
use std::path::PathBuf;

/// Per-job state shared with a handler during `process_task` (worker
/// identity, a workdir, and whatever else a handler legitimately
/// needs from its host Worker without reaching back into Worker
/// internals).
pub struct WorkerContext {
    pub wid: String,
    pub workdir: PathBuf,
}

/// Cooperative cancellation signal, set from the Worker's
/// cancellation-monitor task (§4.4.3 step 4) and polled by
/// long-running handlers that declare `cancellable() == true`.
///
/// Arc<AtomicBool> internally so clones share state cheaply.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: std::sync::Arc<std::sync::atomic::AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(std::sync::atomic::Ordering::SeqCst)
    }
}

/// The Handler ABI (C8). Implemented by the `Box<dyn Handler>`
/// returned from a handler dylib's `meridian_handler_entry` export.
///
/// `cancel` is `Some` iff the handler's metadata declared
/// `cancellable = true` — handlers that don't ask for cancellation
/// support never see a token and the Worker never starts a monitor
/// task on their behalf (REDESIGN FLAG #1: capability bit, not arity
/// inspection).
pub trait Handler: Send {
    fn load(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    fn unload(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Extra runnability check beyond "metadata parsed". Default true.
    fn canrun(&self) -> bool {
        true
    }

    fn process_task(
        &mut self,
        worker: &WorkerContext,
        job: &Job,
        cancel: Option<&CancellationToken>,
    ) -> anyhow::Result<(u8, serde_json::Value)>;

    /// Delivered on forced cancellation so a handler may release
    /// external resources (processes, sockets, temp files) beyond
    /// what `cancel` alone communicates.
    fn stop_job(&mut self) {}
}

/// Entry point symbol every handler `cdylib` must export.
pub type HandlerEntryFn = unsafe extern "Rust" fn() -> Box<dyn Handler>;

pub const HANDLER_ENTRY_SYMBOL: &[u8] = b"meridian_handler_entry";
