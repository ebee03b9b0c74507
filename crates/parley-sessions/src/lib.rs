//! `parley-sessions`: per-conversation event streams and the managers that
//! route events into them.
//!
//! | Type                 | Role                                                      |
//! |----------------------|-----------------------------------------------------------|
//! | [`MessageStream`]    | single-consumer FIFO read by one handler body             |
//! | [`StreamHandle`]     | writer side, held by the manager registry                 |
//! | [`SessionManager`]   | at most one live stream per identifier across templates   |
//! | [`CosessionManager`] | one live stream per identifier *per template*             |

pub mod cosession;
pub mod error;
pub mod hook;
pub mod manager;
pub mod stream;
pub mod template;
pub mod types;

pub use cosession::CosessionManager;
pub use error::{HandlerResult, SessionError, StreamError};
pub use hook::{FailureHook, IgnoreFailures};
pub use manager::{SessionManager, Sessions};
pub use stream::{channel, channel_with, MessageStream, StreamHandle, StreamInfo};
pub use template::{PredicateTemplate, SessionBody, StepTemplate, Template};
pub use types::{GetOptions, Identifier, Identify, SessionInfo};
