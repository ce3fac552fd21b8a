use thiserror::Error;

/// §7's `DBTransient` kind: callers log and retry on a 5 s sleep loop
/// rather than propagate these past the acquisition loop.
#[derive(Debug, Error)]
pub enum JobDbError {
    #[error("job db transient error: {0}")]
    Transient(#[from] sqlx::Error),

    #[error("job db row decode error: {0}")]
    Decode(String),
}
