use thiserror::Error;

/// Errors that can occur within any channel adapter.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// `send` was called before `connect` or after `disconnect`.
    #[error("Channel {0} is not connected")]
    NotConnected(String),

    /// A message could not be delivered to the remote endpoint.
    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A line could not be read from the underlying transport.
    #[error("Line codec error: {0}")]
    Codec(#[from] tokio_util::codec::LinesCodecError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
