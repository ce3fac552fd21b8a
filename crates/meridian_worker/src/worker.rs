//! Worker (C5) — the heart: job-acquisition loop, handler switching,
//! and task execution (§4.4).

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use meridian_handler::{CancellationToken, Handler, HandlerHandle, WorkerContext};
use meridian_jobdb::{AllocatedJob, JobDbClient};
use meridian_protocol::{Job, JobId, JobState};
use meridian_stage::FilePreparer;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::config::WorkerConfig;
use crate::resources::{self, PeakRssTracker, ResourceBaseline};
use crate::staging;
use crate::status::WorkerStatus;

/// Heartbeat / idle cadence (§5): sleep 1s between empty polls, force
/// a broadcast at least every 300s even if nothing changed.
const IDLE_POLL: Duration = Duration::from_secs(1);
const FORCE_BROADCAST_INTERVAL: Duration = Duration::from_secs(300);
/// DB-layer exception backoff (§4.4.1).
const DB_ERROR_BACKOFF: Duration = Duration::from_secs(5);
/// Cancellation monitor poll cadence (§4.4.3 step 4).
const CANCEL_POLL: Duration = Duration::from_secs(1);

pub struct Worker {
    config: WorkerConfig,
    jobdb: Arc<dyn JobDbClient>,
    preparer: Arc<dyn FilePreparer>,
    current: Option<HandlerHandle>,
    supported: Vec<String>,
    status: WorkerStatus,
    stop_event: Arc<AtomicBool>,
    reload_event: Arc<AtomicBool>,
    last_reported: Instant,
}

impl Worker {
    pub fn new(
        config: WorkerConfig,
        jobdb: Arc<dyn JobDbClient>,
        preparer: Arc<dyn FilePreparer>,
    ) -> Self {
        let host = config.nodename.clone();
        let supported = discover_supported(&config);
        Self {
            config,
            jobdb,
            preparer,
            current: None,
            supported,
            status: WorkerStatus::new(host),
            stop_event: Arc::new(AtomicBool::new(false)),
            reload_event: Arc::new(AtomicBool::new(false)),
            last_reported: Instant::now()
                .checked_sub(FORCE_BROADCAST_INTERVAL)
                .unwrap_or_else(Instant::now),
        }
    }

    /// A clone of the stop flag, for a signal handler to set from
    /// outside the job loop (SIGINT/SIGTERM).
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop_event)
    }

    /// A clone of the reload flag, for a signal handler to set from
    /// outside the job loop (SIGHUP). Checked once per loop iteration;
    /// `rescan_modules` runs on the Worker's own task, never directly
    /// from the signal handler.
    pub fn reload_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.reload_event)
    }

    pub fn status(&self) -> &WorkerStatus {
        &self.status
    }

    /// Re-run C1 against the configured search paths, replacing the
    /// supported set (`rescan_modules`, fired on reload).
    pub fn rescan_modules(&mut self) {
        self.supported = discover_supported(&self.config);
        info!(supported = ?self.supported, "rescanned handlers");
    }

    /// The job-acquisition loop (§4.4.1). Runs until `stop_event` is
    /// set, publishing `Stopped` on the way out.
    pub async fn run(&mut self) -> anyhow::Result<()> {
        let max_jobs = self.config.identity.worker_type.max_jobs();

        while !self.stop_event.load(Ordering::SeqCst) {
            if self.reload_event.swap(false, Ordering::SeqCst) {
                self.rescan_modules();
            }

            let preferred = self.current.as_ref().map(|h| h.name.clone());

            let allocated = match self
                .jobdb
                .allocate_job(
                    &self.config.identity.wid(),
                    &self.config.nodename,
                    &self.supported,
                    max_jobs,
                    self.config.identity.worker_type.as_str(),
                    preferred.as_deref(),
                )
                .await
            {
                Ok(jobs) => jobs,
                Err(e) => {
                    error!(error = %e, "job db error, backing off");
                    tokio::time::sleep(DB_ERROR_BACKOFF).await;
                    continue;
                }
            };

            if allocated.is_empty() {
                self.report_idle().await;
                tokio::time::sleep(IDLE_POLL).await;
                continue;
            }

            for AllocatedJob { job } in allocated {
                if self.stop_event.load(Ordering::SeqCst) {
                    break;
                }
                self.status.begin_job(job.id.as_i64(), &job.module);

                match self.switch_handler(&job).await {
                    Ok(()) => {
                        self.process_task(job).await;
                        self.status.end_job();
                    }
                    Err(e) => {
                        warn!(job = job.id.as_i64(), error = %e, "handler switch failed, failing job");
                        let _ = self
                            .jobdb
                            .update_job(job.id.as_i64(), JobState::Failed, Some(Value::String(e.to_string())), None, None)
                            .await;
                        // Leaves `state` at `ImportError` rather than
                        // `end_job()`'s usual reset to `Idle`, so a
                        // worker stuck failing to import a handler
                        // reports that distinctly until its next job.
                        self.status.record_import_error(e.to_string());
                        self.status.clear_current_job();
                    }
                }
            }
        }

        info!("worker stopping, reconciling job db");
        if let Err(e) = self
            .jobdb
            .force_stopped(&self.config.identity.wid(), &self.config.nodename)
            .await
        {
            error!(error = %e, "force_stopped failed during shutdown");
        }
        let _ = self.jobdb.remove_worker(&self.config.identity.wid()).await;

        Ok(())
    }

    async fn report_idle(&mut self) {
        let supported_json = serde_json::to_string(&self.supported).unwrap_or_default();
        let now_epoch = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);

        if let Err(e) = self
            .jobdb
            .update_worker(&self.config.identity.wid(), &supported_json, now_epoch)
            .await
        {
            warn!(error = %e, "heartbeat update_worker failed");
        }

        let force_broadcast = self.last_reported.elapsed() > FORCE_BROADCAST_INTERVAL;
        if force_broadcast {
            debug!(wid = %self.config.identity.wid(), "idle heartbeat (forced broadcast)");
            self.last_reported = Instant::now();
        }
    }

    /// `switchHandler` (§4.4.2).
    async fn switch_handler(&mut self, job: &Job) -> anyhow::Result<()> {
        let discovered = meridian_handler::discover_one(&job.module, &self.config.handler_paths);

        if let (Some(current), Some(discovered)) = (&self.current, &discovered) {
            if current.matches_affinity(&job.module, discovered.mtime) {
                return Ok(());
            }
        }

        if let Some(mut current) = self.current.take() {
            if let Err(e) = current.unload() {
                warn!(handler = %current.name, error = %e, "best-effort unload failed");
            }
        }

        let target_dir = job
            .workdir
            .clone()
            .unwrap_or_else(|| self.config.install_root.clone());
        std::env::set_current_dir(&target_dir)
            .map_err(|e| anyhow::anyhow!("failed to chdir to workdir {}: {e}", target_dir.display()))?;

        let handle = HandlerHandle::load(&job.module, &self.config.handler_paths)?;
        self.current = Some(handle);

        Ok(())
    }

    /// `processTask` (§4.4.3).
    async fn process_task(&mut self, mut job: Job) {
        let log_level = job.log_level_or_default().to_string();
        debug!(job = job.id.as_i64(), log_level = %log_level, "processing task");

        let stage_start = Instant::now();
        if let Err(e) = staging::stage_args(&self.preparer, &mut job.args) {
            self.commit_failure(&job, format!("file prepare failed: {e}")).await;
            return;
        }
        if job.module == "docker" {
            staging::stage_docker_nested_args(job.args.get("arguments"));
        }
        let prepare_time = stage_start.elapsed();
        debug!(job = job.id.as_i64(), prepare_ms = prepare_time.as_millis(), "staging complete");

        let baseline = ResourceBaseline::capture();
        let cancellable = self
            .current
            .as_ref()
            .map(|h| h.cancellable())
            .unwrap_or(false);

        let cancel_token = cancellable.then(CancellationToken::new);
        let stop_monitor = Arc::new(AtomicBool::new(false));
        let peak_rss = PeakRssTracker::new(baseline.current_rss());
        let monitor_handle = cancel_token.clone().map(|token| {
            self.spawn_cancel_monitor(
                job.id,
                Arc::clone(&self.stop_event),
                Arc::clone(&stop_monitor),
                token,
                baseline.pid(),
                peak_rss.clone(),
            )
        });

        let worker_ctx = WorkerContext {
            wid: self.config.identity.wid(),
            workdir: std::env::current_dir().unwrap_or_else(|_| self.config.install_root.clone()),
        };

        let outcome = {
            let Some(handle) = self.current.as_mut() else {
                self.commit_failure(&job, "no handler loaded".to_string()).await;
                return;
            };
            let handler: &mut dyn Handler = handle.handler_mut();
            handler.process_task(&worker_ctx, &job, cancel_token.as_ref())
        };

        stop_monitor.store(true, Ordering::SeqCst);
        if let Some(handle) = monitor_handle {
            let _ = handle.await;
        }

        let was_cancelled = cancel_token.as_ref().map(|t| t.is_cancelled()).unwrap_or(false);
        let delta_cpu = baseline.delta_cpu_seconds();
        peak_rss.record(baseline.current_rss());
        let max_memory = peak_rss.peak();

        let (state, mut result) = if was_cancelled {
            (JobState::Cancelled, Value::String("Cancelled".to_string()))
        } else {
            match outcome {
                Ok((progress, result)) if progress == 100 => (JobState::Completed, result),
                Ok((progress, _)) => {
                    let msg = format!("unexpected progress: {progress}");
                    self.status.record_error(msg.clone());
                    (JobState::Failed, Value::String(msg))
                }
                Err(e) => {
                    self.status.record_error(e.to_string());
                    (JobState::Failed, serde_json::json!({ "error": e.to_string() }))
                }
            }
        };

        if state == JobState::Completed {
            if let Some(post) = job.post.as_ref() {
                if let Value::Object(map) = &mut result {
                    if let Err(e) = meridian_stage::run_post_process(self.preparer.as_ref(), post, map) {
                        warn!(job = job.id.as_i64(), error = %e, "post-process upload failed");
                    }
                }
            }
        }

        if let Err(e) = self
            .jobdb
            .update_job(job.id.as_i64(), state, Some(result), Some(delta_cpu), Some(max_memory))
            .await
        {
            error!(job = job.id.as_i64(), error = %e, "commit failed (not retried)");
        }
    }

    async fn commit_failure(&mut self, job: &Job, message: String) {
        self.status.record_error(message.clone());
        if let Err(e) = self
            .jobdb
            .update_job(job.id.as_i64(), JobState::Failed, Some(Value::String(message)), None, None)
            .await
        {
            error!(job = job.id.as_i64(), error = %e, "commit failed (not retried)");
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn spawn_cancel_monitor(
        &self,
        job_id: JobId,
        stop_event: Arc<AtomicBool>,
        stop_monitor: Arc<AtomicBool>,
        token: CancellationToken,
        pid: sysinfo::Pid,
        peak_rss: PeakRssTracker,
    ) -> tokio::task::JoinHandle<()> {
        let jobdb = Arc::clone(&self.jobdb);
        tokio::spawn(async move {
            loop {
                if stop_event.load(Ordering::SeqCst)
                    || stop_monitor.load(Ordering::SeqCst)
                    || token.is_cancelled()
                {
                    return;
                }

                peak_rss.record(resources::sample_rss(pid));

                match jobdb.get_job_state(job_id.as_i64()).await {
                    Ok(Some(JobState::Cancelled)) | Ok(None) => {
                        token.cancel();
                        return;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(job = job_id.as_i64(), error = %e, "cancellation monitor poll failed");
                    }
                }
                tokio::time::sleep(CANCEL_POLL).await;
            }
        })
    }
}

fn discover_supported(config: &WorkerConfig) -> Vec<String> {
    match &config.supported_filter {
        None => vec!["any".to_string()],
        Some(filter) => {
            let discovered: HashSet<String> =
                meridian_handler::discover(&config.handler_paths, Some(filter))
                    .into_iter()
                    .collect();
            discovered.into_iter().collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use meridian_jobdb::JobDbError;
    use meridian_protocol::WorkerIdentity;
    use meridian_stage::{FixResult, StageError};
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct MockJobDb {
        jobs: StdMutex<Vec<Job>>,
        updates: StdMutex<Vec<(i64, JobState)>>,
    }

    impl MockJobDb {
        fn with_jobs(jobs: Vec<Job>) -> Self {
            Self {
                jobs: StdMutex::new(jobs),
                updates: StdMutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl JobDbClient for MockJobDb {
        async fn allocate_job(
            &self,
            _worker_id: &str,
            _node: &str,
            _supported: &[String],
            max_jobs: usize,
            _worker_type: &str,
            _prefer: Option<&str>,
        ) -> Result<Vec<AllocatedJob>, JobDbError> {
            let mut jobs = self.jobs.lock().unwrap();
            let take = max_jobs.min(jobs.len());
            Ok(jobs.drain(0..take).map(|job| AllocatedJob { job }).collect())
        }

        async fn update_job(
            &self,
            id: i64,
            state: JobState,
            _retval: Option<Value>,
            _cpu: Option<f64>,
            _memory: Option<u64>,
        ) -> Result<(), JobDbError> {
            self.updates.lock().unwrap().push((id, state));
            Ok(())
        }

        async fn get_job_state(&self, _id: i64) -> Result<Option<JobState>, JobDbError> {
            Ok(Some(JobState::Allocated))
        }

        async fn update_worker(&self, _wid: &str, _supported_json: &str, _last_job_time: f64) -> Result<(), JobDbError> {
            Ok(())
        }

        async fn remove_worker(&self, _wid: &str) -> Result<(), JobDbError> {
            Ok(())
        }

        async fn force_stopped(&self, _worker_id: &str, _node: &str) -> Result<(), JobDbError> {
            Ok(())
        }
    }

    struct NoopPreparer;

    impl FilePreparer for NoopPreparer {
        fn fix(&self, _reference: &str) -> Result<FixResult, StageError> {
            unimplemented!()
        }
        fn write_s3(&self, _: &str, _: &str, _: &str, _: &str) -> Result<String, StageError> {
            unimplemented!()
        }
        fn write_scp(&self, _: &str, _: &str, _: &str) -> Result<String, StageError> {
            unimplemented!()
        }
    }

    fn test_config(tmp: &std::path::Path) -> WorkerConfig {
        WorkerConfig {
            identity: WorkerIdentity::new(meridian_protocol::WorkerType::Normal, "host01", 0),
            nodename: "host01".to_string(),
            handler_paths: vec![tmp.to_path_buf()],
            supported_filter: Some(["any".to_string()].into_iter().collect()),
            install_root: tmp.to_path_buf(),
            datadir: tmp.to_path_buf(),
        }
    }

    fn empty_job(id: i64, module: &str) -> Job {
        Job {
            id: JobId::new(id),
            module: module.to_string(),
            modulepath: None,
            workdir: None,
            priority: 0,
            args: serde_json::Map::new(),
            post: None,
            log_level: None,
        }
    }

    #[tokio::test]
    async fn unresolvable_handler_fails_job_and_keeps_worker_alive() {
        let tmp = tempfile::tempdir().unwrap();
        let jobdb: Arc<dyn JobDbClient> = Arc::new(MockJobDb::with_jobs(vec![empty_job(7, "nonexistent")]));
        let preparer: Arc<dyn FilePreparer> = Arc::new(NoopPreparer);
        let mut worker = Worker::new(test_config(tmp.path()), Arc::clone(&jobdb), preparer);

        worker.stop_event.store(true, Ordering::SeqCst);
        let allocated = worker
            .jobdb
            .allocate_job("w", "host01", &["any".to_string()], 1, "normal", None)
            .await
            .unwrap();
        assert_eq!(allocated.len(), 1);

        let job = allocated.into_iter().next().unwrap().job;
        let result = worker.switch_handler(&job).await;
        assert!(result.is_err(), "expected HandlerNotFound to surface as an error");
    }

    #[test]
    fn discover_supported_defaults_to_any_when_unfiltered() {
        let tmp = tempfile::tempdir().unwrap();
        let mut config = test_config(tmp.path());
        config.supported_filter = None;
        assert_eq!(discover_supported(&config), vec!["any".to_string()]);
    }
}
