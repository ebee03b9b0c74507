//! `parley-app`: the dispatcher tying middleware, session managers and a
//! channel together, plus the event steps bot authors build flows from.

pub mod app;
pub mod reaper;
pub mod reply;
pub mod steps;

pub use app::App;
pub use reply::ReplyOnFailure;

/// Everything a flow author usually needs.
pub mod prelude {
    pub use crate::app::App;
    pub use crate::steps::{by_admin, command, in_group, in_private, parse, root, sender, text};
    pub use parley_channels::{Channel, OutboundMessage};
    pub use parley_core::Event;
    pub use parley_sessions::{GetOptions, HandlerResult, MessageStream, StreamError};
    pub use parley_step::{certain, die, Extraction, Failure, Record, Step, StepResult};
}
