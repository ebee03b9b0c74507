//! Ordered, mutable middleware chain wrapping per-event dispatch.

pub mod builtin;
pub mod chain;
pub mod error;

pub use builtin::{IgnoreSelf, LogEvents};
pub use chain::{Middleware, MiddlewareChain, MiddlewareId, Next, Outcome};
pub use error::{MiddlewareError, MiddlewareResult};
