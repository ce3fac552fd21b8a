//! CLI & Config (C9, §6 — exact flags from the distilled spec).

use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(name = "meridian-node", about = "Distributed worker-node runtime")]
pub struct Cli {
    /// Number of normal workers (default: logical CPU count)
    #[arg(short = 'n', long = "num-workers")]
    pub num_workers: Option<usize>,

    /// Node name (default: hostname)
    #[arg(long)]
    pub name: Option<String>,

    /// Number of admin workers
    #[arg(short = 'a', long = "num-admin-workers", default_value_t = 1)]
    pub num_admin_workers: usize,

    /// Override detected CPU count (also scales reported telemetry)
    #[arg(long)]
    pub cpus: Option<usize>,

    /// Run the Handler Registry and print the discovered set, then exit
    #[arg(long)]
    pub list_modules: bool,

    /// Filter the supported handler set; literal `any` disables discovery filtering
    #[arg(short = 'm', long = "modules", value_delimiter = ',')]
    pub modules: Option<Vec<String>>,

    /// Extra handler search directories
    #[arg(short = 'p', long = "module-paths", value_delimiter = ',')]
    pub module_paths: Vec<PathBuf>,

    /// Verbose logging
    #[arg(long)]
    pub debug: bool,

    /// Job DB connection string (ambient: the distilled spec treats the
    /// job db as an external collaborator; this port needs somewhere
    /// concrete to point `SqliteJobDb` at).
    #[arg(long, env = "MERIDIAN_JOBDB_URL", default_value = "sqlite::memory:")]
    pub jobdb_url: String,

    /// Telemetry publish cadence, in seconds.
    #[arg(long, default_value_t = 5)]
    pub sample_rate: u64,

    /// Internal: this process is a worker subprocess, not the
    /// controller (self-re-exec, §4.9). Not part of the public surface.
    #[arg(long, hide = true)]
    pub internal_worker_slot: Option<usize>,

    /// Internal: paired with `internal_worker_slot`.
    #[arg(long, hide = true, default_value = "normal")]
    pub internal_worker_type: String,
}

impl Cli {
    pub fn is_worker_subprocess(&self) -> bool {
        self.internal_worker_slot.is_some()
    }

    /// `CC_DIR`'s renamed equivalent: the install root, used as the
    /// default handler path and as a Worker's fallback working
    /// directory.
    pub fn install_root() -> PathBuf {
        match std::env::var("MERIDIAN_DIR") {
            Ok(dir) => PathBuf::from(dir),
            Err(_) => {
                tracing::warn!("MERIDIAN_DIR not set, falling back to current directory");
                std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_public_flags() {
        let cli = Cli::parse_from([
            "meridian-node",
            "-n",
            "4",
            "--name",
            "host01",
            "-a",
            "2",
            "--modules",
            "csv,json",
            "-p",
            "/opt/handlers,/opt/more",
            "--debug",
        ]);
        assert_eq!(cli.num_workers, Some(4));
        assert_eq!(cli.name.as_deref(), Some("host01"));
        assert_eq!(cli.num_admin_workers, 2);
        assert_eq!(cli.modules, Some(vec!["csv".to_string(), "json".to_string()]));
        assert_eq!(cli.module_paths.len(), 2);
        assert!(cli.debug);
        assert!(!cli.is_worker_subprocess());
    }

    #[test]
    fn defaults_match_spec() {
        let cli = Cli::parse_from(["meridian-node"]);
        assert_eq!(cli.num_workers, None);
        assert_eq!(cli.num_admin_workers, 1);
        assert!(!cli.list_modules);
        assert!(cli.modules.is_none());
        assert!(cli.module_paths.is_empty());
    }

    #[test]
    fn internal_worker_flags_are_hidden_but_parse() {
        let cli = Cli::parse_from([
            "meridian-node",
            "--internal-worker-slot",
            "3",
            "--internal-worker-type",
            "admin",
        ]);
        assert_eq!(cli.internal_worker_slot, Some(3));
        assert_eq!(cli.internal_worker_type, "admin");
        assert!(cli.is_worker_subprocess());
    }
}
