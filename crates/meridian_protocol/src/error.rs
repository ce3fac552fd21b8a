use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("invalid job id: {0}")]
    InvalidJobId(String),
    #[error("invalid worker type: {0}")]
    InvalidWorkerType(String),
    #[error("invalid job state: {0}")]
    InvalidJobState(String),
    #[error("malformed post-process directive: {0}")]
    MalformedPostDirective(String),
}
