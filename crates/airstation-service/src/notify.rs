//! Notification sinks and sirens for the service.

use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use airstation_core::{Alert, AlertLevel, NotificationSink, Result, Siren};

/// Sink that writes alerts to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl NotificationSink for TracingSink {
    fn show(&self, alert: &Alert) -> Result<()> {
        match alert.level {
            AlertLevel::HighRisk => warn!("{}: {}", alert.title, alert.body),
            AlertLevel::Lethal => error!("{}: {}", alert.title, alert.body),
        }
        Ok(())
    }
}

/// Siren that rings the terminal bell until stopped.
#[derive(Debug)]
pub struct TerminalBellSiren {
    period: Duration,
    ringing: Mutex<Option<CancellationToken>>,
}

impl TerminalBellSiren {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            ringing: Mutex::new(None),
        }
    }

    pub fn is_ringing(&self) -> bool {
        self.ringing
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .is_some()
    }
}

impl Default for TerminalBellSiren {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

impl Siren for TerminalBellSiren {
    fn start(&self) -> Result<()> {
        let handle = tokio::runtime::Handle::try_current()
            .map_err(|e| std::io::Error::other(format!("terminal siren: {e}")))?;

        let token = CancellationToken::new();
        let previous = self
            .ringing
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .replace(token.clone());
        if let Some(previous) = previous {
            previous.cancel();
        }

        let period = self.period;
        handle.spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let mut stderr = std::io::stderr();
                        let _ = stderr.write_all(b"\x07");
                        let _ = stderr.flush();
                    }
                }
            }
        });
        debug!("Terminal siren started");
        Ok(())
    }

    fn stop(&self) -> Result<()> {
        if let Some(token) = self.ringing.lock().unwrap_or_else(|p| p.into_inner()).take() {
            token.cancel();
            debug!("Terminal siren stopped");
        }
        Ok(())
    }
}

/// Desktop notifications through the platform notification service.
#[cfg(feature = "notifications")]
#[derive(Debug, Default, Clone, Copy)]
pub struct DesktopSink;

#[cfg(feature = "notifications")]
impl NotificationSink for DesktopSink {
    fn show(&self, alert: &Alert) -> Result<()> {
        use notify_rust::Notification;

        let mut notification = Notification::new();
        notification
            .summary(&alert.title)
            .body(&alert.body)
            .appname("AirStation");

        #[cfg(target_os = "linux")]
        {
            if alert.level == AlertLevel::Lethal {
                notification.urgency(notify_rust::Urgency::Critical);
            }
        }

        notification
            .show()
            .map(|_| ())
            .map_err(|e| std::io::Error::other(format!("desktop notification: {e}")).into())
    }
}

/// Sink for this build: the log, plus desktop notifications when the
/// `notifications` feature is enabled.
pub fn default_sink() -> Arc<dyn NotificationSink> {
    #[cfg(feature = "notifications")]
    {
        Arc::new(Fanout(vec![Arc::new(TracingSink), Arc::new(DesktopSink)]))
    }
    #[cfg(not(feature = "notifications"))]
    {
        Arc::new(TracingSink)
    }
}

/// Delivers each alert to several sinks.
///
/// Every sink is tried; the first failure is returned.
pub struct Fanout(pub Vec<Arc<dyn NotificationSink>>);

impl NotificationSink for Fanout {
    fn show(&self, alert: &Alert) -> Result<()> {
        let mut first_error = None;
        for sink in &self.0 {
            if let Err(e) = sink.show(alert) {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}
