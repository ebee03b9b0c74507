use parley_core::BoxError;
use parley_step::Failure;
use thiserror::Error;

/// Terminal or retry-exhaustion conditions surfaced to a handler body.
#[derive(Debug, Error)]
pub enum StreamError {
    /// The stream was closed before an item arrived.
    #[error("stream ended")]
    Ended,

    /// No item arrived before the deadline.
    #[error("stream fetch timed out after {ms}ms")]
    Timeout { ms: u64 },

    /// Every attempt of a validated `get` was rejected.
    #[error("no acceptable reply after {attempts} attempts")]
    MaxAttempts {
        attempts: u32,
        #[source]
        last: Failure,
    },
}

/// Errors from session registry operations.
#[derive(Debug, Error)]
pub enum SessionError {
    /// `create` was asked for an identifier that already has a live stream.
    #[error("session already in use: {identifier}")]
    InUse { identifier: String },
}

/// What a session handler body returns. Errors are logged by the manager.
pub type HandlerResult = Result<(), BoxError>;
