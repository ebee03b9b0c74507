use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::join_all;
use tracing::debug;

use crate::error::HandlerResult;
use crate::hook::FailureHook;
use crate::manager::{SessionManager, Sessions};
use crate::stream::MessageStream;
use crate::template::{PredicateTemplate, Template};
use crate::types::{Identifier, Identify, SessionInfo};

/// Several independent [`SessionManager`]s over one identifier function,
/// each holding exactly one template.
///
/// Every template can own a live session for the same identifier at the
/// same time; each session only sees items written after it started.
pub struct CosessionManager<T, K> {
    name: String,
    identify: Arc<dyn Identify<T, K>>,
    hook: Arc<dyn FailureHook<T>>,
    members: RwLock<Vec<Arc<SessionManager<T, K>>>>,
}

impl<T, K> CosessionManager<T, K>
where
    T: Clone + Send + Sync + 'static,
    K: Identifier,
{
    pub fn new<F>(name: impl Into<String>, identify: F, hook: Arc<dyn FailureHook<T>>) -> Self
    where
        F: Fn(&T) -> K + Send + Sync + 'static,
    {
        Self::with_identifier(name, Arc::new(identify), hook)
    }

    pub fn with_identifier(
        name: impl Into<String>,
        identify: Arc<dyn Identify<T, K>>,
        hook: Arc<dyn FailureHook<T>>,
    ) -> Self {
        Self {
            name: name.into(),
            identify,
            hook,
            members: RwLock::new(Vec::new()),
        }
    }

    pub fn register<P, B, Fut>(&self, predicate: P, body: B)
    where
        P: Fn(&K) -> bool + Send + Sync + 'static,
        B: Fn(MessageStream<T>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.register_template(Arc::new(PredicateTemplate::new(predicate, body)));
    }

    pub fn register_template(&self, template: Arc<dyn Template<K, T>>) {
        let mut members = self.members.write().unwrap_or_else(PoisonError::into_inner);
        let member = SessionManager::with_identifier(
            format!("{}#{}", self.name, members.len()),
            Arc::clone(&self.identify),
            Arc::clone(&self.hook),
        );
        member.register_template(template);
        members.push(Arc::new(member));
        debug!(manager = %self.name, members = members.len(), "cosession template registered");
    }

    fn members(&self) -> Vec<Arc<SessionManager<T, K>>> {
        self.members
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Route one item to every member. The identifier is computed once.
    pub async fn run(&self, item: &T) {
        let identifier = self.identify.identify(item).await;
        let members = self.members();
        join_all(
            members
                .iter()
                .map(|member| member.dispatch(identifier.clone(), item.clone())),
        )
        .await;
    }

    /// Number of live sessions held for `identifier`, one per member at most.
    pub fn live_for(&self, identifier: &K) -> usize {
        self.members()
            .iter()
            .filter(|member| member.contains(identifier))
            .count()
    }

    /// Close every session held for `identifier`; returns how many closed.
    pub fn close(&self, identifier: &K) -> usize {
        self.members()
            .iter()
            .filter(|member| member.close(identifier))
            .count()
    }
}

#[async_trait]
impl<T, K> Sessions<T> for CosessionManager<T, K>
where
    T: Clone + Send + Sync + 'static,
    K: Identifier,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, item: &T) {
        CosessionManager::run(self, item).await
    }

    fn live(&self) -> usize {
        self.members().iter().map(|member| member.live()).sum()
    }

    fn close_idle(&self, max_idle: Duration) -> usize {
        self.members()
            .iter()
            .map(|member| member.close_idle(max_idle))
            .sum()
    }

    fn sessions(&self) -> Vec<SessionInfo> {
        self.members()
            .iter()
            .flat_map(|member| member.sessions())
            .collect()
    }
}
