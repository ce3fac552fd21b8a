//! Node Controller (C6, §4.5): spawns and supervises the worker pool,
//! publishes telemetry, and propagates signals. Grounded on
//! `casparian`'s `run_unified` (src/main.rs): a spawned `std::thread`
//! owns `signal_hook::iterator::Signals` and flips an `Arc<AtomicBool>`
//! that the async main loop polls.

use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::process::{Child, Command};
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use crate::cli::Cli;
use crate::telemetry::TelemetrySampler;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WorkerKind {
    Normal,
    Admin,
}

impl WorkerKind {
    fn as_str(self) -> &'static str {
        match self {
            WorkerKind::Normal => "normal",
            WorkerKind::Admin => "admin",
        }
    }
}

struct SupervisedWorker {
    kind: WorkerKind,
    slot: usize,
    child: Child,
}

/// The shutdown signal shared between the signal-handling thread and
/// the controller's async loop. A second interrupt while the first is
/// still being honored forces an abort instead of a graceful wait.
struct ShutdownFlags {
    requested: Arc<AtomicBool>,
    reload: Arc<AtomicBool>,
    force: Arc<AtomicBool>,
}

fn install_signal_handlers() -> Result<ShutdownFlags> {
    let requested = Arc::new(AtomicBool::new(false));
    let reload = Arc::new(AtomicBool::new(false));
    let force = Arc::new(AtomicBool::new(false));

    #[cfg(unix)]
    {
        use signal_hook::consts::{SIGHUP, SIGINT, SIGTERM};
        use signal_hook::iterator::Signals;

        let mut signals = Signals::new([SIGINT, SIGTERM, SIGHUP])
            .context("failed to register unix signal handlers")?;
        let requested = requested.clone();
        let reload = reload.clone();
        let force = force.clone();
        std::thread::spawn(move || {
            for sig in signals.forever() {
                match sig {
                    SIGHUP => {
                        reload.store(true, Ordering::SeqCst);
                    }
                    SIGINT | SIGTERM => {
                        if requested.swap(true, Ordering::SeqCst) {
                            force.store(true, Ordering::SeqCst);
                        }
                    }
                    _ => {}
                }
            }
        });
    }

    #[cfg(windows)]
    {
        let requested = requested.clone();
        let force = force.clone();
        ctrlc::set_handler(move || {
            if requested.swap(true, Ordering::SeqCst) {
                force.store(true, Ordering::SeqCst);
            }
        })
        .context("failed to register ctrl-c handler")?;
    }

    Ok(ShutdownFlags {
        requested,
        reload,
        force,
    })
}

/// Send `SIGHUP` to a child process by pid (unix only; Windows workers
/// don't get a reload signal forwarded — they simply re-run C1 on
/// their own poll cadence, which is a behavioral simplification of the
/// unchanged distilled-spec semantics noted in DESIGN.md).
#[cfg(unix)]
fn forward_reload(pid: u32) {
    unsafe {
        libc::kill(pid as libc::pid_t, libc::SIGHUP);
    }
}

#[cfg(windows)]
fn forward_reload(_pid: u32) {}

fn spawn_worker(cli: &Cli, kind: WorkerKind, slot: usize) -> Result<Child> {
    let exe = std::env::current_exe().context("failed to resolve current executable")?;
    let mut cmd = Command::new(exe);
    cmd.arg("--internal-worker-slot")
        .arg(slot.to_string())
        .arg("--internal-worker-type")
        .arg(kind.as_str())
        .arg("--jobdb-url")
        .arg(&cli.jobdb_url);

    if let Some(name) = &cli.name {
        cmd.arg("--name").arg(name);
    }
    if !cli.module_paths.is_empty() {
        let paths = cli
            .module_paths
            .iter()
            .map(|p| p.to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join(",");
        cmd.arg("--module-paths").arg(paths);
    }
    if let Some(modules) = &cli.modules {
        cmd.arg("--modules").arg(modules.join(","));
    }
    if cli.debug {
        cmd.arg("--debug");
    }

    cmd.stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());

    cmd.spawn()
        .with_context(|| format!("failed to spawn {} worker slot {slot}", kind.as_str()))
}

fn spawn_pool(cli: &Cli, num_workers: usize) -> Result<Vec<SupervisedWorker>> {
    let mut workers = Vec::with_capacity(num_workers + cli.num_admin_workers);
    for slot in 0..num_workers {
        let child = spawn_worker(cli, WorkerKind::Normal, slot)?;
        workers.push(SupervisedWorker {
            kind: WorkerKind::Normal,
            slot,
            child,
        });
    }
    for slot in 0..cli.num_admin_workers {
        let child = spawn_worker(cli, WorkerKind::Admin, slot)?;
        workers.push(SupervisedWorker {
            kind: WorkerKind::Admin,
            slot,
            child,
        });
    }
    Ok(workers)
}

/// Run C1 standalone and print the discovered handler set as JSON,
/// then return (the caller exits 0 immediately after).
pub fn list_modules(cli: &Cli) -> Result<()> {
    let mut paths = cli.module_paths.clone();
    paths.push(Cli::install_root());
    let filter: Option<std::collections::HashSet<String>> = cli
        .modules
        .as_ref()
        .filter(|m| !m.iter().any(|x| x == "any"))
        .map(|m| m.iter().cloned().collect());
    let names = meridian_handler::discover(&paths, filter.as_ref());
    let json = serde_json::to_string_pretty(&names)?;
    println!("{json}");
    Ok(())
}

/// Startup + steady-state supervision loop for the Node Controller.
pub async fn run(cli: Cli) -> Result<()> {
    let num_workers = cli.num_workers.unwrap_or_else(num_cpus_fallback);
    info!(
        num_workers,
        num_admin_workers = cli.num_admin_workers,
        "starting node controller"
    );

    let shutdown = install_signal_handlers()?;
    let mut workers = spawn_pool(&cli, num_workers)?;

    let suppress_telemetry = TelemetrySampler::running_in_container();
    if suppress_telemetry {
        info!("running inside a container: telemetry publication suppressed, supervision continues");
    }
    let mut sampler = TelemetrySampler::new();

    let mut ticker = tokio::time::interval(Duration::from_secs(cli.sample_rate.max(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        if shutdown.requested.load(Ordering::SeqCst) {
            break;
        }

        tokio::select! {
            _ = ticker.tick() => {
                if !suppress_telemetry {
                    let snapshot = sampler.sample(cli.cpus);
                    info!(telemetry = %snapshot.to_json(), "telemetry");
                }
                reap_dead_workers(&mut workers, &cli)?;
            }
            _ = tokio::time::sleep(Duration::from_millis(200)) => {}
        }

        if shutdown.reload.swap(false, Ordering::SeqCst) {
            info!("reload signal received, forwarding to workers");
            #[cfg(unix)]
            for w in &workers {
                if let Some(pid) = w.child.id() {
                    forward_reload(pid);
                }
            }
        }
    }

    info!("shutdown requested, stopping workers");
    shutdown_pool(&mut workers, shutdown.force.load(Ordering::SeqCst)).await;
    info!("node controller stopped");
    Ok(())
}

fn reap_dead_workers(workers: &mut [SupervisedWorker], cli: &Cli) -> Result<()> {
    for w in workers.iter_mut() {
        if let Ok(Some(status)) = w.child.try_wait() {
            warn!(
                kind = w.kind.as_str(),
                slot = w.slot,
                ?status,
                "worker exited unexpectedly, restarting"
            );
            w.child = spawn_worker(cli, w.kind, w.slot)?;
        }
    }
    Ok(())
}

async fn shutdown_pool(workers: &mut [SupervisedWorker], force: bool) {
    for w in workers.iter_mut() {
        if force {
            let _ = w.child.start_kill();
            continue;
        }
        if let Some(pid) = w.child.id() {
            #[cfg(unix)]
            unsafe {
                libc::kill(pid as libc::pid_t, libc::SIGTERM);
            }
        }
        let wait = tokio::time::timeout(Duration::from_secs(3), w.child.wait()).await;
        if wait.is_err() {
            warn!(kind = w.kind.as_str(), slot = w.slot, "worker did not exit in time, killing");
            let _ = w.child.start_kill();
        }
    }
}

fn num_cpus_fallback() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}
