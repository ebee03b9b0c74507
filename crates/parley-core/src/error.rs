use thiserror::Error;

/// Type-erased error returned by handler bodies and middleware.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum ParleyError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unknown session manager: {name}")]
    UnknownManager { name: String },
}

impl ParleyError {
    /// Short, stable error code for logs and diagnostics.
    pub fn code(&self) -> &'static str {
        match self {
            ParleyError::Config(_) => "CONFIG_ERROR",
            ParleyError::UnknownManager { .. } => "UNKNOWN_MANAGER",
        }
    }
}

pub type Result<T> = std::result::Result<T, ParleyError>;
