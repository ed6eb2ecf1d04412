//! Optimistic-echo suppression.
//!
//! When this client mutates an item it applies the change locally right
//! away. The server then broadcasts the change back; without suppression
//! the resulting refresh would clobber the optimistic state with a fetch
//! that may race the write. Each issued mutation is remembered for a grace
//! window, and notifications matching a remembered key skip the primary
//! refresh while the window is open.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::trace;

use larder_protocol::ChangeEvent;

/// What a consumer should do with an incoming change notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshPlan {
    /// Re-fetch the authoritative list state.
    pub primary: bool,
    /// Derived views (the activity feed) refresh regardless of suppression:
    /// the optimistic update covered only the primary state.
    pub activity: bool,
}

pub struct EchoSuppressor {
    entries: Mutex<HashMap<String, Instant>>,
    grace: Duration,
}

impl EchoSuppressor {
    pub const DEFAULT_GRACE: Duration = Duration::from_secs(5);

    pub fn new(grace: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            grace,
        }
    }

    /// Remember a just-issued mutation. Called at the moment the optimistic
    /// local update is applied and the request goes out.
    pub fn record(&self, mutation_key: &str) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(mutation_key.to_string(), Instant::now());
        }
    }

    /// Whether a notification for `mutation_key` is a self-echo. Entries are
    /// never consumed here — a flurry of duplicate events inside the window
    /// must all be suppressed — and an expired entry counts as absent even
    /// before the sweeper removes it.
    pub fn should_suppress(&self, mutation_key: &str) -> bool {
        match self.entries.lock() {
            Ok(entries) => entries
                .get(mutation_key)
                .is_some_and(|issued| issued.elapsed() < self.grace),
            Err(_) => false,
        }
    }

    /// Decide what to refresh for an incoming event.
    pub fn plan(&self, event: &ChangeEvent) -> RefreshPlan {
        let suppressed = event
            .mutation_key()
            .is_some_and(|key| self.should_suppress(key));
        if suppressed {
            trace!(key = ?event.mutation_key(), "suppressing self-echoed refresh");
        }
        RefreshPlan {
            primary: !suppressed,
            activity: true,
        }
    }

    /// Drop expired entries. Removal is strictly time-based; an entry lives
    /// out its full window even if it already suppressed something.
    pub fn sweep(&self) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.retain(|_, issued| issued.elapsed() < self.grace);
        }
    }

    /// Periodic sweep task; lazy expiry on read keeps correctness between
    /// ticks.
    pub fn spawn_sweeper(self: &Arc<Self>, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
        let suppressor = Arc::clone(self);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(suppressor.grace);
            tick.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tick.tick() => suppressor.sweep(),
                }
            }
        })
    }

    pub fn pending(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }
}

impl Default for EchoSuppressor {
    fn default() -> Self {
        Self::new(Self::DEFAULT_GRACE)
    }
}
