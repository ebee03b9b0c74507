//! Periodic session housekeeping: optional idle expiry and a warning for
//! sessions that have been open for a long time. Long-lived sessions are
//! only logged.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::app::App;

/// What each reaper tick does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReaperPolicy {
    /// Close sessions idle for at least this long.
    pub max_idle: Option<Duration>,
    /// Warn about sessions open for at least this long.
    pub warn_after: Option<Duration>,
    pub interval: Duration,
}

impl ReaperPolicy {
    /// Policy from the `[sessions]` config section; `None` when there is
    /// nothing to do.
    pub fn from_config(app: &App) -> Option<Self> {
        let sessions = &app.config().sessions;
        let policy = Self {
            max_idle: sessions.idle_timeout_secs.map(Duration::from_secs),
            warn_after: sessions.long_lived_warn_secs.map(Duration::from_secs),
            interval: Duration::from_secs(sessions.reap_interval_secs.max(1)),
        };
        (policy.max_idle.is_some() || policy.warn_after.is_some()).then_some(policy)
    }
}

/// Apply `policy` every `policy.interval` until `shutdown` fires.
pub fn spawn_reaper(app: Arc<App>, policy: ReaperPolicy, shutdown: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(policy.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            max_idle_secs = policy.max_idle.map(|d| d.as_secs()),
            warn_after_secs = policy.warn_after.map(|d| d.as_secs()),
            interval_secs = policy.interval.as_secs(),
            "session reaper started"
        );
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    if let Some(max_idle) = policy.max_idle {
                        let closed = app.close_idle(max_idle);
                        if closed > 0 {
                            info!(closed, live = app.live(), "idle sessions closed");
                        } else {
                            debug!("no idle sessions");
                        }
                    }
                    if let Some(warn_after) = policy.warn_after {
                        app.report_long_lived(warn_after);
                    }
                }
            }
        }
        debug!("session reaper stopped");
    })
}

/// Start the reaper with the configured policy, if any.
pub fn spawn_configured_reaper(app: &Arc<App>, shutdown: CancellationToken) -> Option<JoinHandle<()>> {
    let policy = ReaperPolicy::from_config(app)?;
    Some(spawn_reaper(Arc::clone(app), policy, shutdown))
}
