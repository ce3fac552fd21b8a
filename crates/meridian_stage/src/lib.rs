//! File Preparer (C3) and Post-processor (C7).

mod error;
mod local;
mod post;
mod staging;

pub use error::StageError;
pub use local::LocalFilePreparer;
pub use post::{run_post_process, PostProcessError};
pub use staging::{is_stagable_ref, StagingVerb};

/// Result of running the File Preparer over a stagable ref (§4.3).
#[derive(Debug, Clone)]
pub struct FixResult {
    pub file_list: Vec<String>,
}

/// The File Preparer contract (C3): translate URI-bearing argument
/// strings into local file paths, and upload outputs on the way back
/// out via the post-processor.
pub trait FilePreparer: Send + Sync {
    /// Resolve one stagable ref (`"<verb> <scheme>://..."`) to one or
    /// more local paths.
    fn fix(&self, reference: &str) -> Result<FixResult, StageError>;

    fn write_s3(
        &self,
        endpoint: &str,
        bucket: &str,
        local: &str,
        remote: &str,
    ) -> Result<String, StageError>;

    fn write_scp(&self, local: &str, host: &str, path: &str) -> Result<String, StageError>;
}
