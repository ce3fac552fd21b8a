use thiserror::Error;

#[derive(Debug, Error)]
pub enum StageError {
    #[error("file prepare failed for '{reference}': {reason}")]
    FilePrepareFailed { reference: String, reason: String },

    #[error("io error while staging '{reference}': {source}")]
    Io {
        reference: String,
        #[source]
        source: std::io::Error,
    },
}
