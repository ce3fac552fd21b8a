//! In-memory Worker status snapshot (§3 supplemental — the concrete
//! shape of the distilled spec's "status sink"). Handlers update
//! `progress` directly; the framework never interpolates it.

use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub enum WorkerState {
    Idle,
    Running,
    Stopped,
    /// §4.4.2 step 6: `switch_handler` failed to import the handler for
    /// the current job. Distinct from `Idle`/`Running` so external
    /// status readers can tell "waiting for work" from "stuck failing
    /// to load a handler" without parsing `last_error`.
    ImportError,
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkerStatus {
    pub state: WorkerState,
    pub progress: u8,
    pub num_errors: u64,
    pub last_error: Option<String>,
    pub host: String,
    pub module: Option<String>,
    pub current_job: Option<i64>,
}

impl WorkerStatus {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            state: WorkerState::Idle,
            progress: 0,
            num_errors: 0,
            last_error: None,
            host: host.into(),
            module: None,
            current_job: None,
        }
    }

    pub fn begin_job(&mut self, job_id: i64, module: &str) {
        self.state = WorkerState::Running;
        self.progress = 0;
        self.current_job = Some(job_id);
        self.module = Some(module.to_string());
    }

    pub fn record_error(&mut self, message: impl Into<String>) {
        self.num_errors += 1;
        self.last_error = Some(message.into());
    }

    /// A `switch_handler` import failure: records the error and moves
    /// `state` to `ImportError` rather than leaving it at whatever it
    /// was before the failed switch.
    pub fn record_import_error(&mut self, message: impl Into<String>) {
        self.state = WorkerState::ImportError;
        self.record_error(message);
    }

    pub fn end_job(&mut self) {
        self.state = WorkerState::Idle;
        self.current_job = None;
    }

    /// Drops the current-job reference without touching `state` —
    /// used after `record_import_error` so `ImportError` survives
    /// until the next `begin_job`, unlike `end_job`'s reset to `Idle`.
    pub fn clear_current_job(&mut self) {
        self.current_job = None;
    }
}
