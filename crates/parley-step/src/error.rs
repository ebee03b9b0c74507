use thiserror::Error;

/// Expected mismatch signalled by a [`Step`](crate::Step).
///
/// A message-less failure is a silent "not for me"; a failure with a message
/// is surfaced to the sender by whoever handles it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Error)]
#[error("{}", .message.as_deref().unwrap_or("step did not match"))]
pub struct Failure {
    message: Option<String>,
}

impl Failure {
    pub fn silent() -> Self {
        Self { message: None }
    }

    pub fn with_message(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
        }
    }

    /// The user-facing message, if any.
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn is_silent(&self) -> bool {
        self.message.is_none()
    }
}

pub type StepResult<R> = std::result::Result<R, Failure>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_uses_message_when_present() {
        assert_eq!(Failure::with_message("usage: /add a b").to_string(), "usage: /add a b");
        assert_eq!(Failure::silent().to_string(), "step did not match");
    }

    #[test]
    fn silent_has_no_message() {
        assert!(Failure::silent().is_silent());
        assert_eq!(Failure::with_message("x").message(), Some("x"));
    }
}
