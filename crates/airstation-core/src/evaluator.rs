//! Periodic alert evaluation.
//!
//! One [`AlertEvaluator::tick`] snapshots the thresholds and then decides a
//! current value for each critical kind:
//!
//! * **CO** prefers a live reading (bounded by `live_timeout`) and falls back
//!   to the newest stored reading in the history window.
//! * **PM2.5** prefers the mean of the history window and falls back to a
//!   live reading when the window is empty or the store cannot be queried.
//!
//! A kind with no value is skipped and logged. Ticks never overlap: a tick
//! started while another is in flight returns
//! [`TickOutcome::AlreadyRunning`] without doing anything.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use airstation_types::SensorKind;

use crate::error::Result;
use crate::history::{HistoryStore, mean};
use crate::live::LiveReader;
use crate::notifier::Notifier;
use crate::preferences::{Preferences, ThresholdConfig};

/// Default bound on a live read.
pub const DEFAULT_LIVE_TIMEOUT: Duration = Duration::from_secs(10);
/// Default history window for fallback and averaging.
pub const DEFAULT_HISTORY_WINDOW: Duration = Duration::from_secs(10 * 60);

/// Timing knobs for the evaluator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EvaluatorOptions {
    pub live_timeout: Duration,
    pub history_window: Duration,
}

impl Default for EvaluatorOptions {
    fn default() -> Self {
        Self {
            live_timeout: DEFAULT_LIVE_TIMEOUT,
            history_window: DEFAULT_HISTORY_WINDOW,
        }
    }
}

/// Where an evaluated value came from.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum ValueSource {
    /// A reading received live during the tick.
    Live,
    /// The newest reading in the history window.
    HistoryLatest,
    /// Mean of the history window.
    HistoryAverage { samples: usize },
}

/// The decision for one kind in one tick.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Evaluation {
    pub kind: SensorKind,
    pub value: f64,
    pub source: ValueSource,
    pub threshold: f64,
    /// Whether the notifier was invoked.
    pub triggered: bool,
}

/// Per-kind results of a completed tick; `None` means skipped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct TickReport {
    pub co: Option<Evaluation>,
    pub pm25: Option<Evaluation>,
}

/// Result of a successful tick.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TickOutcome {
    /// Notifications are off; nothing was read.
    Disabled,
    /// Both kinds were evaluated (or skipped).
    Completed(TickReport),
    /// Another tick was in flight.
    AlreadyRunning,
}

/// Threshold evaluator for CO and PM2.5.
pub struct AlertEvaluator {
    live: Arc<dyn LiveReader>,
    history: Arc<dyn HistoryStore>,
    preferences: Arc<Preferences>,
    notifier: Arc<dyn Notifier>,
    options: EvaluatorOptions,
    in_flight: tokio::sync::Mutex<()>,
}

impl AlertEvaluator {
    pub fn new(
        live: Arc<dyn LiveReader>,
        history: Arc<dyn HistoryStore>,
        preferences: Arc<Preferences>,
        notifier: Arc<dyn Notifier>,
        options: EvaluatorOptions,
    ) -> Self {
        Self {
            live,
            history,
            preferences,
            notifier,
            options,
            in_flight: tokio::sync::Mutex::new(()),
        }
    }

    pub fn options(&self) -> EvaluatorOptions {
        self.options
    }

    /// Run one evaluation.
    ///
    /// Returns an error only when the reading source or the history store is
    /// unreachable in a way the fallbacks cannot cover; such errors are
    /// retryable and no notification has been sent for the failed kind.
    pub async fn tick(&self) -> Result<TickOutcome> {
        let Ok(_guard) = self.in_flight.try_lock() else {
            debug!("Evaluation already in flight, skipping");
            return Ok(TickOutcome::AlreadyRunning);
        };

        let config = self.preferences.snapshot();
        if !config.notifications_enabled {
            debug!("Notifications disabled, nothing to evaluate");
            return Ok(TickOutcome::Disabled);
        }

        let co = self.evaluate_co(&config).await?;
        let pm25 = self.evaluate_pm25(&config).await?;

        info!(
            "Evaluation complete: CO {}, PM2.5 {}",
            describe(co.as_ref()),
            describe(pm25.as_ref())
        );
        Ok(TickOutcome::Completed(TickReport { co, pm25 }))
    }

    async fn evaluate_co(&self, config: &ThresholdConfig) -> Result<Option<Evaluation>> {
        let kind = SensorKind::Co;
        let current = match self.live.next_reading(kind, self.options.live_timeout).await? {
            Some(reading) => Some((reading.value, ValueSource::Live)),
            None => {
                warn!(
                    "No live CO reading within {:?}, falling back to history",
                    self.options.live_timeout
                );
                let window = self.history.query(kind, self.options.history_window).await?;
                window
                    .last()
                    .map(|reading| (reading.value, ValueSource::HistoryLatest))
            }
        };

        let Some((value, source)) = current else {
            warn!("CO evaluation skipped: no live reading and no recent history");
            return Ok(None);
        };

        let triggered = value > config.co_threshold;
        if triggered {
            self.notifier.notify_lethal_alarm(value);
        }
        Ok(Some(Evaluation {
            kind,
            value,
            source,
            threshold: config.co_threshold,
            triggered,
        }))
    }

    async fn evaluate_pm25(&self, config: &ThresholdConfig) -> Result<Option<Evaluation>> {
        let kind = SensorKind::Pm25;
        let window = self.history.query(kind, self.options.history_window).await;
        let (average, storage_error) = match window {
            Ok(window) => (
                mean(&window).map(|avg| {
                    (
                        avg,
                        ValueSource::HistoryAverage {
                            samples: window.len(),
                        },
                    )
                }),
                None,
            ),
            Err(e) => {
                warn!("PM2.5 history unavailable, using live reading: {}", e);
                (None, Some(e))
            }
        };

        let current = match average {
            Some(found) => Some(found),
            None => self
                .live
                .next_reading(kind, self.options.live_timeout)
                .await?
                .map(|reading| (reading.value, ValueSource::Live)),
        };

        let Some((value, source)) = current else {
            if let Some(e) = storage_error {
                return Err(e);
            }
            warn!("PM2.5 evaluation skipped: no history and no live reading");
            return Ok(None);
        };

        let triggered = value > config.pm25_threshold;
        if triggered {
            self.notifier.notify_high_risk(value);
        }
        Ok(Some(Evaluation {
            kind,
            value,
            source,
            threshold: config.pm25_threshold,
            triggered,
        }))
    }
}

fn describe(evaluation: Option<&Evaluation>) -> String {
    match evaluation {
        Some(e) if e.triggered => format!("{:.1} (above {:.1})", e.value, e.threshold),
        Some(e) => format!("{:.1}", e.value),
        None => "unavailable".to_string(),
    }
}

impl std::fmt::Debug for AlertEvaluator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlertEvaluator")
            .field("options", &self.options)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::mock::{MemoryHistory, MockLiveReader, NotifierCall, RecordingNotifier};
    use airstation_types::Reading;
    use time::OffsetDateTime;

    struct Fixture {
        live: Arc<MockLiveReader>,
        history: Arc<MemoryHistory>,
        preferences: Arc<Preferences>,
        notifier: Arc<RecordingNotifier>,
        evaluator: AlertEvaluator,
    }

    fn fixture() -> Fixture {
        let live = Arc::new(MockLiveReader::new());
        let history = Arc::new(MemoryHistory::new());
        let preferences = Arc::new(Preferences::in_memory(ThresholdConfig::default()));
        let notifier = Arc::new(RecordingNotifier::new());
        let evaluator = AlertEvaluator::new(
            live.clone(),
            history.clone(),
            preferences.clone(),
            notifier.clone(),
            EvaluatorOptions::default(),
        );
        Fixture {
            live,
            history,
            preferences,
            notifier,
            evaluator,
        }
    }

    fn minutes_ago(minutes: i64) -> OffsetDateTime {
        OffsetDateTime::now_utc() - time::Duration::minutes(minutes)
    }

    fn completed(outcome: TickOutcome) -> TickReport {
        match outcome {
            TickOutcome::Completed(report) => report,
            other => panic!("expected completed tick, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_live_co_above_threshold_sounds_alarm() {
        let f = fixture();
        f.live.push(Reading::now(SensorKind::Co, 62.0));

        let report = completed(f.evaluator.tick().await.unwrap());
        let co = report.co.unwrap();
        assert_eq!(co.value, 62.0);
        assert_eq!(co.source, ValueSource::Live);
        assert!(co.triggered);
        assert_eq!(f.notifier.calls(), vec![NotifierCall::LethalAlarm(62.0)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_live_co_never_consults_history() {
        let f = fixture();
        f.live.push(Reading::now(SensorKind::Co, 5.0));
        f.history.seed(Reading::new(SensorKind::Pm25, 10.0, minutes_ago(1)));

        f.evaluator.tick().await.unwrap();
        // Only the PM2.5 average touched the store.
        assert_eq!(f.history.query_count_for(SensorKind::Co), 0);
        assert_eq!(f.history.query_count_for(SensorKind::Pm25), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_co_falls_back_to_last_history_entry() {
        let f = fixture();
        f.history.seed(Reading::new(SensorKind::Co, 70.0, minutes_ago(8)));
        f.history.seed(Reading::new(SensorKind::Co, 55.0, minutes_ago(2)));

        let report = completed(f.evaluator.tick().await.unwrap());
        let co = report.co.unwrap();
        assert_eq!(co.value, 55.0);
        assert_eq!(co.source, ValueSource::HistoryLatest);
        assert!(f.notifier.calls().contains(&NotifierCall::LethalAlarm(55.0)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_co_skipped_when_no_value_anywhere() {
        let f = fixture();
        f.history.seed(Reading::new(SensorKind::Co, 99.0, minutes_ago(30)));

        let report = completed(f.evaluator.tick().await.unwrap());
        assert!(report.co.is_none());
        assert!(report.pm25.is_none());
        assert!(f.notifier.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_pm25_average_without_live_read() {
        let f = fixture();
        for (i, value) in [10.0, 20.0, 30.0].into_iter().enumerate() {
            f.history
                .seed(Reading::new(SensorKind::Pm25, value, minutes_ago(5 - i as i64)));
        }

        let report = completed(f.evaluator.tick().await.unwrap());
        let pm25 = report.pm25.unwrap();
        assert_eq!(pm25.value, 20.0);
        assert_eq!(pm25.source, ValueSource::HistoryAverage { samples: 3 });
        assert!(!pm25.triggered);
        assert_eq!(f.live.calls_for(SensorKind::Pm25), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pm25_above_threshold_notifies_high_risk() {
        let f = fixture();
        f.history.seed(Reading::new(SensorKind::Pm25, 40.0, minutes_ago(3)));
        f.history.seed(Reading::new(SensorKind::Pm25, 42.0, minutes_ago(1)));

        f.evaluator.tick().await.unwrap();
        assert_eq!(f.notifier.calls(), vec![NotifierCall::HighRisk(41.0)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pm25_falls_back_to_live_when_history_empty() {
        let f = fixture();
        f.live.push(Reading::now(SensorKind::Pm25, 12.0));

        let report = completed(f.evaluator.tick().await.unwrap());
        let pm25 = report.pm25.unwrap();
        assert_eq!(pm25.source, ValueSource::Live);
        assert_eq!(pm25.value, 12.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_storage_fault_degrades_to_live() {
        let f = fixture();
        f.history.fail_queries(true);
        f.live.push(Reading::now(SensorKind::Co, 3.0));
        f.live.push(Reading::now(SensorKind::Pm25, 50.0));

        let report = completed(f.evaluator.tick().await.unwrap());
        assert_eq!(report.co.map(|e| e.value), Some(3.0));
        assert_eq!(report.pm25.map(|e| e.source), Some(ValueSource::Live));
        assert_eq!(f.notifier.calls(), vec![NotifierCall::HighRisk(50.0)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_storage_fault_without_live_value_is_retryable() {
        let f = fixture();
        f.history.fail_queries(true);

        let err = f.evaluator.tick().await.unwrap_err();
        assert!(err.is_retryable());
        assert!(f.notifier.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_source_is_retryable_failure() {
        let f = fixture();
        f.live.close();

        let err = f.evaluator.tick().await.unwrap_err();
        assert!(matches!(err, Error::SourceClosed));
        assert!(err.is_retryable());
        assert!(f.notifier.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_notifications_do_nothing() {
        let f = fixture();
        f.preferences.set_notifications_enabled(false).await.unwrap();
        f.live.push(Reading::now(SensorKind::Co, 500.0));
        f.history.seed(Reading::new(SensorKind::Pm25, 500.0, minutes_ago(1)));

        assert_eq!(f.evaluator.tick().await.unwrap(), TickOutcome::Disabled);
        assert!(f.notifier.calls().is_empty());
        assert_eq!(f.live.calls_for(SensorKind::Co), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_threshold_change_visible_to_next_tick() {
        let f = fixture();
        f.live.push(Reading::now(SensorKind::Co, 45.0));
        f.evaluator.tick().await.unwrap();
        assert!(f.notifier.calls().is_empty());

        f.preferences.set_co_threshold(40.0).await.unwrap();
        f.live.push(Reading::now(SensorKind::Co, 45.0));
        f.evaluator.tick().await.unwrap();
        assert_eq!(f.notifier.calls(), vec![NotifierCall::LethalAlarm(45.0)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticks_do_not_overlap() {
        let f = fixture();
        let evaluator = Arc::new(f.evaluator);

        let first = {
            let evaluator = Arc::clone(&evaluator);
            tokio::spawn(async move { evaluator.tick().await })
        };
        // Let the first tick reach its live read.
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(evaluator.tick().await.unwrap(), TickOutcome::AlreadyRunning);
        assert!(matches!(
            first.await.unwrap().unwrap(),
            TickOutcome::Completed(_)
        ));
    }
}
