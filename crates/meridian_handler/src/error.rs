use thiserror::Error;

#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("handler not found: {0}")]
    HandlerNotFound(String),

    #[error("failed to load handler {name}: {source}")]
    HandlerImportFailed {
        name: String,
        #[source]
        source: anyhow::Error,
    },
}
