use parley_core::BoxError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MiddlewareError {
    /// A middleware returned an error; everything after it was skipped.
    #[error("middleware {name} failed: {source}")]
    Failed {
        name: String,
        #[source]
        source: BoxError,
    },

    /// A middleware panicked. The panic is contained at the chain boundary.
    #[error("middleware panicked: {message}")]
    Panicked { message: String },
}

/// What a middleware returns.
pub type MiddlewareResult = std::result::Result<(), BoxError>;
