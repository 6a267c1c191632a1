use log::error;
use thiserror::Error;

/// Failure taxonomy of the version pipeline.
///
/// Missing instructions are deliberately absent: a version without an
/// assembly is skipped, never failed.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("scheme `{0}` is not registered")]
    UnknownScheme(String),

    #[error("no make handler for scheme `{0}`")]
    UnhandledScheme(String),

    #[error("unknown clone action `{0}`")]
    UnknownCloneAction(String),

    #[error("processing failed for media {media_id} version `{version}`: {reason}")]
    ProcessingFailure {
        media_id: u64,
        version: String,
        reason: String,
    },

    #[error("failed to enqueue version `{version}` of media {media_id}: {reason}")]
    EnqueueFailure {
        media_id: u64,
        version: String,
        reason: String,
    },

    #[error("checksum mismatch for `{locator}`: expected {expected}, found {actual}")]
    IntegrityFailure {
        locator: String,
        expected: String,
        actual: String,
    },

    #[error("media {0} does not exist")]
    UnknownMedia(u64),
}

/// Failures of the queue transport itself, as opposed to the job it carries.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("connection to the job queue was lost")]
    ConnectionLost,

    #[error("job queue is unavailable")]
    Unavailable,

    #[error("job queue is closed")]
    Closed,

    #[error("no worker handles `{0}` jobs")]
    UnknownHandler(String),
}

/// Log the whole context chain and hand the error back.
pub fn handle_error(error: anyhow::Error) -> anyhow::Error {
    let chain = error
        .chain()
        .map(|cause| cause.to_string())
        .collect::<Vec<_>>()
        .join("\n  caused by: ");
    error!("{}", chain);
    error
}
