//! Monitor lifecycle: wiring the live feed, the persistence task and the
//! evaluator around one source subscription.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::info;

use crate::error::Result;
use crate::evaluator::{AlertEvaluator, EvaluatorOptions};
use crate::history::HistoryStore;
use crate::live::{DEFAULT_CHANNEL_CAPACITY, LiveFeed};
use crate::notifier::Notifier;
use crate::persist::{DEFAULT_DEBOUNCE_INTERVAL, PersistenceController};
use crate::preferences::Preferences;
use crate::source::ReadingSource;

/// Options for [`Monitor::start`].
#[derive(Debug, Clone, Copy)]
pub struct MonitorOptions {
    /// Minimum spacing of persisted readings per kind.
    pub debounce_interval: Duration,
    /// Capacity of the live broadcast channel.
    pub channel_capacity: usize,
    pub evaluator: EvaluatorOptions,
}

impl Default for MonitorOptions {
    fn default() -> Self {
        Self {
            debounce_interval: DEFAULT_DEBOUNCE_INTERVAL,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            evaluator: EvaluatorOptions::default(),
        }
    }
}

/// A running monitor.
///
/// Owns the source subscription (through the live feed), the persistence
/// task and the evaluator. Background work is tracked so that
/// [`shutdown`](Self::shutdown) can wait for it.
pub struct Monitor {
    feed: Arc<LiveFeed>,
    persistence: Arc<PersistenceController>,
    evaluator: Arc<AlertEvaluator>,
    history: Arc<dyn HistoryStore>,
    preferences: Arc<Preferences>,
    notifier: Arc<dyn Notifier>,
    cancel: CancellationToken,
    tasks: TaskTracker,
}

impl Monitor {
    /// Subscribe to `source` and start persisting its readings.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(
        source: &dyn ReadingSource,
        history: Arc<dyn HistoryStore>,
        preferences: Arc<Preferences>,
        notifier: Arc<dyn Notifier>,
        options: MonitorOptions,
    ) -> Result<Self> {
        let feed = Arc::new(LiveFeed::start(source, options.channel_capacity)?);
        let persistence = Arc::new(PersistenceController::with_interval(
            Arc::clone(&history),
            options.debounce_interval,
        ));
        let evaluator = Arc::new(AlertEvaluator::new(
            feed.clone(),
            Arc::clone(&history),
            Arc::clone(&preferences),
            Arc::clone(&notifier),
            options.evaluator,
        ));

        let cancel = CancellationToken::new();
        let tasks = TaskTracker::new();
        tasks.spawn(
            Arc::clone(&persistence).run(feed.subscribe(), cancel.child_token()),
        );

        info!("Monitor started on {}", source.name());
        Ok(Self {
            feed,
            persistence,
            evaluator,
            history,
            preferences,
            notifier,
            cancel,
            tasks,
        })
    }

    pub fn feed(&self) -> &Arc<LiveFeed> {
        &self.feed
    }

    pub fn persistence(&self) -> &Arc<PersistenceController> {
        &self.persistence
    }

    pub fn evaluator(&self) -> &Arc<AlertEvaluator> {
        &self.evaluator
    }

    pub fn history(&self) -> &Arc<dyn HistoryStore> {
        &self.history
    }

    pub fn preferences(&self) -> &Arc<Preferences> {
        &self.preferences
    }

    /// Token cancelled on shutdown, for tasks spawned alongside the monitor.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.child_token()
    }

    /// Run `task` under the monitor so that shutdown waits for it.
    pub fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tasks.spawn(task);
    }

    pub fn is_running(&self) -> bool {
        !self.cancel.is_cancelled()
    }

    /// Stop everything: unsubscribe from the source, cancel background tasks
    /// (an in-flight tick is dropped at its next await point), wait for them,
    /// then silence any sounding alarm. Idempotent.
    pub async fn shutdown(&self) {
        if self.is_running() {
            info!("Shutting down monitor");
        }
        self.cancel.cancel();
        self.feed.stop();
        self.tasks.close();
        self.tasks.wait().await;
        self.notifier.silence();
    }
}

impl std::fmt::Debug for Monitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Monitor")
            .field("running", &self.is_running())
            .field("feed", &self.feed)
            .field("persistence", &self.persistence)
            .finish()
    }
}
