use std::fmt::Debug;
use std::hash::Hash;
use std::time::Duration;

use async_trait::async_trait;

use crate::stream::StreamInfo;

/// Anything usable as a registry key: the value an identifier function
/// derives from an event.
pub trait Identifier: Eq + Hash + Clone + Debug + Send + Sync + 'static {}

impl<K> Identifier for K where K: Eq + Hash + Clone + Debug + Send + Sync + 'static {}

/// Asynchronous identifier function. Must be deterministic and free of
/// side effects: equal events always yield equal identifiers.
///
/// Synchronous closures `Fn(&T) -> K` implement this automatically.
#[async_trait]
pub trait Identify<T, K>: Send + Sync {
    async fn identify(&self, item: &T) -> K;
}

#[async_trait]
impl<T, K, F> Identify<T, K> for F
where
    T: Sync,
    K: Send,
    F: Fn(&T) -> K + Send + Sync,
{
    async fn identify(&self, item: &T) -> K {
        self(item)
    }
}

/// Options for [`MessageStream::get`](crate::MessageStream::get).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GetOptions {
    /// Total fetch-and-validate attempts. Zero is treated as one.
    pub max_attempts: u32,
    /// Budget shared by every attempt. `None` waits forever.
    pub timeout: Option<Duration>,
}

impl Default for GetOptions {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            timeout: None,
        }
    }
}

impl GetOptions {
    pub fn attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Self::default()
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Snapshot of one live session, as reported by a manager.
#[derive(Debug, Clone)]
pub struct SessionInfo {
    /// Name of the manager holding the session.
    pub manager: String,
    /// Debug rendering of the identifier.
    pub identifier: String,
    pub stream: StreamInfo,
}
