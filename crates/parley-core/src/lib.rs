//! Shared vocabulary for parley: the inbound event model, identifier
//! functions, configuration, and the top-level error type.

pub mod config;
pub mod error;
pub mod identify;
pub mod types;

pub use config::ParleyConfig;
pub use error::{BoxError, ParleyError, Result};
pub use types::{Anonymous, Event, GroupKind, PrivateKind, Role, Scope, SenderProfile};
