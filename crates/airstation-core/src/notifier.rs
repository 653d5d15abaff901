//! Alert dispatch and the lethal-gas alarm session.
//!
//! The evaluator talks to a [`Notifier`], which is fire-and-forget: calls
//! return immediately and failures are logged, never surfaced.
//!
//! [`AlarmNotifier`] is the standard implementation. It renders alerts into
//! an [`Alert`] for a [`NotificationSink`] and drives a [`Siren`] for the
//! audible part of a lethal alarm. At most one alarm session exists at a time:
//! a new lethal alarm stops the current siren, replaces the session, and
//! restarts the bound. The siren stops on its own once the bound elapses.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use airstation_types::SensorKind;

use crate::error::Result;

/// How long the audible alarm sounds unless replaced or silenced.
pub const DEFAULT_ALARM_DURATION: Duration = Duration::from_secs(20);

/// Receiver of triggered alerts.
pub trait Notifier: Send + Sync {
    /// PM2.5 exceeded its threshold.
    fn notify_high_risk(&self, value: f64);

    /// CO exceeded its threshold; starts an alarm session.
    fn notify_lethal_alarm(&self, value: f64);

    /// Stop any audible signal. Called on shutdown.
    fn silence(&self) {}
}

/// Severity of an [`Alert`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertLevel {
    /// Unhealthy particulate levels.
    HighRisk,
    /// Life-threatening gas concentration.
    Lethal,
}

/// A rendered, user-facing alert.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Alert {
    pub level: AlertLevel,
    pub kind: SensorKind,
    pub value: f64,
    pub title: String,
    pub body: String,
}

impl Alert {
    /// Alert for a PM2.5 average above threshold.
    pub fn high_risk(value: f64) -> Self {
        let kind = SensorKind::Pm25;
        Self {
            level: AlertLevel::HighRisk,
            kind,
            value,
            title: "Air quality alert".to_string(),
            body: format!("High {} level: {:.1} {}", kind, value, kind.unit()),
        }
    }

    /// Alert for CO above threshold.
    pub fn lethal(value: f64) -> Self {
        let kind = SensorKind::Co;
        Self {
            level: AlertLevel::Lethal,
            kind,
            value,
            title: "Evacuate: lethal gas detected".to_string(),
            body: format!("Lethal gas: {} {:.1} {}", kind, value, kind.unit()),
        }
    }
}

/// Presents alerts to the user.
pub trait NotificationSink: Send + Sync {
    fn show(&self, alert: &Alert) -> Result<()>;
}

/// Audible signal for alarm sessions.
pub trait Siren: Send + Sync {
    fn start(&self) -> Result<()>;
    fn stop(&self) -> Result<()>;
}

/// The currently sounding alarm.
#[derive(Debug, Clone, Serialize)]
pub struct AlarmSession {
    pub id: u64,
    pub kind: SensorKind,
    pub value: f64,
    #[serde(with = "time::serde::rfc3339")]
    pub started_at: OffsetDateTime,
    pub duration: Duration,
    #[serde(skip)]
    token: CancellationToken,
}

type SessionSlot = Arc<Mutex<Option<AlarmSession>>>;

/// [`Notifier`] backed by a sink and a siren, owning the alarm session.
pub struct AlarmNotifier {
    sink: Arc<dyn NotificationSink>,
    siren: Arc<dyn Siren>,
    alarm_duration: Duration,
    session: SessionSlot,
    next_id: AtomicU64,
}

impl AlarmNotifier {
    pub fn new(sink: Arc<dyn NotificationSink>, siren: Arc<dyn Siren>) -> Self {
        Self::with_duration(sink, siren, DEFAULT_ALARM_DURATION)
    }

    pub fn with_duration(
        sink: Arc<dyn NotificationSink>,
        siren: Arc<dyn Siren>,
        alarm_duration: Duration,
    ) -> Self {
        Self {
            sink,
            siren,
            alarm_duration,
            session: Arc::new(Mutex::new(None)),
            next_id: AtomicU64::new(1),
        }
    }

    /// The active alarm session, if the siren is sounding.
    pub fn active_session(&self) -> Option<AlarmSession> {
        lock(&self.session).clone()
    }

    fn show(&self, alert: &Alert) {
        if let Err(e) = self.sink.show(alert) {
            warn!("Failed to show notification '{}': {}", alert.title, e);
        }
    }

    fn start_session(&self, value: f64) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        let session = AlarmSession {
            id,
            kind: SensorKind::Co,
            value,
            started_at: OffsetDateTime::now_utc(),
            duration: self.alarm_duration,
            token: token.clone(),
        };

        {
            let mut slot = lock(&self.session);
            if let Some(previous) = slot.take() {
                debug!("Replacing alarm session #{}", previous.id);
                previous.token.cancel();
                stop_siren(self.siren.as_ref());
            }
            if let Err(e) = self.siren.start() {
                error!("Failed to start siren: {}", e);
                return;
            }
            *slot = Some(session);
        }

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let slot = Arc::clone(&self.session);
                let siren = Arc::clone(&self.siren);
                let duration = self.alarm_duration;
                handle.spawn(async move {
                    tokio::select! {
                        _ = token.cancelled() => {}
                        _ = tokio::time::sleep(duration) => {
                            let mut slot = lock(&slot);
                            if slot.as_ref().is_some_and(|s| s.id == id) {
                                slot.take();
                                stop_siren(siren.as_ref());
                                debug!("Alarm session #{} ended after {:?}", id, duration);
                            }
                        }
                    }
                });
            }
            Err(_) => {
                warn!("No async runtime for the alarm timer; stopping siren immediately");
                lock(&self.session).take();
                stop_siren(self.siren.as_ref());
            }
        }
    }
}

impl Notifier for AlarmNotifier {
    fn notify_high_risk(&self, value: f64) {
        let alert = Alert::high_risk(value);
        info!("{}", alert.body);
        self.show(&alert);
    }

    fn notify_lethal_alarm(&self, value: f64) {
        let alert = Alert::lethal(value);
        warn!("{}", alert.body);
        self.show(&alert);
        self.start_session(value);
    }

    fn silence(&self) {
        if let Some(session) = lock(&self.session).take() {
            info!("Silencing alarm session #{}", session.id);
            session.token.cancel();
            stop_siren(self.siren.as_ref());
        }
    }
}

impl std::fmt::Debug for AlarmNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlarmNotifier")
            .field("alarm_duration", &self.alarm_duration)
            .field("session", &self.active_session())
            .finish()
    }
}

fn lock(slot: &SessionSlot) -> std::sync::MutexGuard<'_, Option<AlarmSession>> {
    slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn stop_siren(siren: &dyn Siren) {
    if let Err(e) = siren.stop() {
        warn!("Failed to stop siren: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{RecordingSink, RecordingSiren};
    use tokio::time::sleep;

    fn notifier() -> (Arc<RecordingSink>, Arc<RecordingSiren>, AlarmNotifier) {
        let sink = Arc::new(RecordingSink::new());
        let siren = Arc::new(RecordingSiren::new());
        let notifier = AlarmNotifier::new(sink.clone(), siren.clone());
        (sink, siren, notifier)
    }

    #[test]
    fn test_alert_rendering() {
        let alert = Alert::high_risk(41.23);
        assert_eq!(alert.body, "High PM2.5 level: 41.2 µg/m³");
        assert_eq!(alert.level, AlertLevel::HighRisk);

        let alert = Alert::lethal(62.0);
        assert_eq!(alert.body, "Lethal gas: CO 62.0 ppm");
        assert_eq!(alert.kind, SensorKind::Co);
    }

    #[tokio::test(start_paused = true)]
    async fn test_high_risk_does_not_sound() {
        let (sink, siren, notifier) = notifier();
        notifier.notify_high_risk(40.0);
        assert_eq!(sink.alerts().len(), 1);
        assert_eq!(siren.starts(), 0);
        assert!(notifier.active_session().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_alarm_self_terminates() {
        let (sink, siren, notifier) = notifier();
        notifier.notify_lethal_alarm(62.0);
        assert!(siren.is_active());
        assert_eq!(sink.alerts()[0].level, AlertLevel::Lethal);

        sleep(Duration::from_secs(19)).await;
        assert!(siren.is_active());

        sleep(Duration::from_secs(2)).await;
        assert!(!siren.is_active());
        assert!(notifier.active_session().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_alarm_replaces_and_resets_bound() {
        let (_sink, siren, notifier) = notifier();
        notifier.notify_lethal_alarm(60.0);
        let first = notifier.active_session().unwrap();

        sleep(Duration::from_secs(15)).await;
        notifier.notify_lethal_alarm(70.0);
        let second = notifier.active_session().unwrap();
        assert_ne!(first.id, second.id);
        assert_eq!(second.value, 70.0);
        assert_eq!(siren.starts(), 2);
        assert_eq!(siren.max_concurrent(), 1);

        // Past the first session's bound, the second still sounds.
        sleep(Duration::from_secs(10)).await;
        assert!(siren.is_active());

        sleep(Duration::from_secs(11)).await;
        assert!(!siren.is_active());
        assert_eq!(siren.max_concurrent(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_silence_stops_active_alarm() {
        let (_sink, siren, notifier) = notifier();
        notifier.notify_lethal_alarm(90.0);
        notifier.silence();
        assert!(!siren.is_active());
        assert!(notifier.active_session().is_none());

        notifier.silence();
        assert_eq!(siren.stops(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sink_failure_still_sounds_alarm() {
        let sink = Arc::new(RecordingSink::failing());
        let siren = Arc::new(RecordingSiren::new());
        let notifier = AlarmNotifier::new(sink, siren.clone());

        notifier.notify_lethal_alarm(80.0);
        assert!(siren.is_active());
    }
}
