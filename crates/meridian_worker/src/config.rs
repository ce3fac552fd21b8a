use std::collections::HashSet;
use std::path::PathBuf;

use meridian_protocol::WorkerIdentity;

/// Plain configuration data for one Worker (§4.4). Cloned into the
/// Worker at construction time, not mutated afterward.
pub struct WorkerConfig {
    pub identity: WorkerIdentity,
    pub nodename: String,
    pub handler_paths: Vec<PathBuf>,
    /// `None` means the literal `any` filter: discovery is
    /// unrestricted.
    pub supported_filter: Option<HashSet<String>>,
    pub install_root: PathBuf,
    pub datadir: PathBuf,
}
