use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use meridian_jobdb::SqliteJobDb;
use meridian_logging::{init_logging, LogConfig};
use meridian_node::cli::Cli;
use meridian_node::controller;
use meridian_protocol::{WorkerIdentity, WorkerType};
use meridian_stage::LocalFilePreparer;
use meridian_worker::{Worker, WorkerConfig};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(LogConfig {
        app_name: "meridian-node",
        verbose: cli.debug,
        detached: cli.is_worker_subprocess(),
    })?;

    if cli.list_modules {
        return controller::list_modules(&cli);
    }

    if cli.is_worker_subprocess() {
        run_worker(cli).await
    } else {
        controller::run(cli).await
    }
}

async fn run_worker(cli: Cli) -> Result<()> {
    let slot = cli
        .internal_worker_slot
        .expect("run_worker called without --internal-worker-slot");
    let worker_type: WorkerType = cli.internal_worker_type.parse()?;

    let nodename = cli.name.clone().unwrap_or_else(default_nodename);
    let install_root = Cli::install_root();
    let datadir = install_root.join("data");
    std::fs::create_dir_all(&datadir).ok();

    let supported_filter = cli.modules.as_ref().and_then(|modules| {
        if modules.iter().any(|m| m == "any") {
            None
        } else {
            Some(modules.iter().cloned().collect::<HashSet<_>>())
        }
    });

    let config = WorkerConfig {
        identity: WorkerIdentity::new(worker_type, nodename.clone(), slot),
        nodename,
        handler_paths: cli.module_paths.clone(),
        supported_filter,
        install_root,
        datadir: datadir.clone(),
    };

    let jobdb = SqliteJobDb::connect(&cli.jobdb_url).await?;
    jobdb.migrate().await?;
    let jobdb: Arc<dyn meridian_jobdb::JobDbClient> = Arc::new(jobdb);
    let preparer: Arc<dyn meridian_stage::FilePreparer> = Arc::new(LocalFilePreparer::new(datadir));

    let mut worker = Worker::new(config, jobdb, preparer);
    install_worker_signal_handlers(worker.stop_handle(), worker.reload_handle())?;
    worker.run().await
}

/// Mirrors `original_source/CryoCloud/Tools/node.py`'s `Worker.run()`,
/// which registers its own `SIGHUP` (`rescan_modules`) and
/// `SIGINT`/`SIGTERM` (`self._stop_event.set()`) handlers rather than
/// relying solely on the Node Controller's forwarding. Without this,
/// the OS default disposition for an unhandled `SIGTERM`/`SIGHUP`
/// terminates the process immediately, skipping `Worker::run`'s
/// graceful `force_stopped`/`remove_worker` cleanup and turning
/// "reload" into a silent kill-and-respawn.
fn install_worker_signal_handlers(stop_event: Arc<AtomicBool>, reload_event: Arc<AtomicBool>) -> Result<()> {
    #[cfg(unix)]
    {
        use signal_hook::consts::{SIGHUP, SIGINT, SIGTERM};
        use signal_hook::iterator::Signals;

        let mut signals = Signals::new([SIGINT, SIGTERM, SIGHUP])?;
        std::thread::spawn(move || {
            for sig in signals.forever() {
                match sig {
                    SIGHUP => reload_event.store(true, Ordering::SeqCst),
                    SIGINT | SIGTERM => {
                        stop_event.store(true, Ordering::SeqCst);
                    }
                    _ => {}
                }
            }
        });
    }

    #[cfg(windows)]
    {
        ctrlc::set_handler(move || {
            stop_event.store(true, Ordering::SeqCst);
        })?;
        // No cross-platform SIGHUP equivalent on Windows; reload simply
        // never fires for a Windows worker subprocess.
        let _ = reload_event;
        tracing::warn!("reload signal has no Windows equivalent; this worker will not rescan handlers on reload");
    }

    Ok(())
}

fn default_nodename() -> String {
    gethostname::gethostname()
        .into_string()
        .unwrap_or_else(|_| "localhost".to_string())
}
