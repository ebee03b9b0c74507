//! Interfaces to the outside world: where events come from and where replies go.
//!
//! The dispatcher only depends on the [`Channel`] and [`EventSource`] traits.
//! [`console`] provides a line-oriented adapter used by the demo binary and
//! in tests.

pub mod channel;
pub mod console;
pub mod error;
pub mod types;

pub use channel::{Channel, EventSource};
pub use console::{ConsoleChannel, ConsoleSource};
pub use error::ChannelError;
pub use types::{ChannelStatus, MessageFormat, OutboundMessage, Target};
