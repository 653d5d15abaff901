//! Alert threshold preferences.
//!
//! [`Preferences`] holds the current [`ThresholdConfig`] in a `watch` channel.
//! Readers take a snapshot or observe individual fields; writers validate,
//! persist through a [`PreferencesBackend`], and only then publish, so the
//! next evaluation tick always sees a value that is already on disk.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::error::{Error, Result};

/// Default PM2.5 alert threshold in µg/m³.
pub const DEFAULT_PM25_THRESHOLD: f64 = 35.0;
/// Default CO alarm threshold in ppm.
pub const DEFAULT_CO_THRESHOLD: f64 = 50.0;

/// User-configurable alert thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThresholdConfig {
    /// PM2.5 level (µg/m³) above which a high-risk notification is sent.
    pub pm25_threshold: f64,
    /// CO level (ppm) above which the lethal-gas alarm sounds.
    pub co_threshold: f64,
    /// Master switch for all alerts.
    pub notifications_enabled: bool,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            pm25_threshold: DEFAULT_PM25_THRESHOLD,
            co_threshold: DEFAULT_CO_THRESHOLD,
            notifications_enabled: true,
        }
    }
}

impl ThresholdConfig {
    /// Check that both thresholds are finite and positive.
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("pm25_threshold", self.pm25_threshold),
            ("co_threshold", self.co_threshold),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(Error::invalid_config(format!(
                    "{name} must be a positive number, got {value}"
                )));
            }
        }
        Ok(())
    }
}

/// Durable storage for threshold preferences.
#[async_trait]
pub trait PreferencesBackend: Send + Sync {
    /// Load stored preferences, `None` when nothing was saved yet.
    async fn load(&self) -> Result<Option<ThresholdConfig>>;

    /// Persist preferences.
    async fn save(&self, config: &ThresholdConfig) -> Result<()>;
}

/// Backend keeping preferences in memory only.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    stored: Mutex<Option<ThresholdConfig>>,
}

impl MemoryBackend {
    /// Create an empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a backend pre-populated with `config`.
    pub fn with_config(config: ThresholdConfig) -> Self {
        Self {
            stored: Mutex::new(Some(config)),
        }
    }

    /// Last saved config.
    pub fn stored(&self) -> Option<ThresholdConfig> {
        *self.stored.lock().unwrap_or_else(|p| p.into_inner())
    }
}

#[async_trait]
impl PreferencesBackend for MemoryBackend {
    async fn load(&self) -> Result<Option<ThresholdConfig>> {
        Ok(self.stored())
    }

    async fn save(&self, config: &ThresholdConfig) -> Result<()> {
        *self.stored.lock().unwrap_or_else(|p| p.into_inner()) = Some(*config);
        Ok(())
    }
}

/// Observable threshold preferences with write-through persistence.
pub struct Preferences {
    tx: watch::Sender<ThresholdConfig>,
    backend: Arc<dyn PreferencesBackend>,
    write_lock: tokio::sync::Mutex<()>,
}

impl Preferences {
    /// Load preferences from `backend`, falling back to defaults when nothing
    /// is stored or the stored values are invalid.
    pub async fn open(backend: Arc<dyn PreferencesBackend>) -> Result<Self> {
        let config = match backend.load().await? {
            Some(config) => match config.validate() {
                Ok(()) => config,
                Err(e) => {
                    warn!("Ignoring stored thresholds: {}", e);
                    ThresholdConfig::default()
                }
            },
            None => ThresholdConfig::default(),
        };
        info!(
            "Thresholds: PM2.5 > {} µg/m³, CO > {} ppm, notifications {}",
            config.pm25_threshold,
            config.co_threshold,
            if config.notifications_enabled { "on" } else { "off" }
        );

        let (tx, _) = watch::channel(config);
        Ok(Self {
            tx,
            backend,
            write_lock: tokio::sync::Mutex::new(()),
        })
    }

    /// Preferences backed by memory, starting from `config`.
    pub fn in_memory(config: ThresholdConfig) -> Self {
        let (tx, _) = watch::channel(config);
        Self {
            tx,
            backend: Arc::new(MemoryBackend::with_config(config)),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Current values.
    pub fn snapshot(&self) -> ThresholdConfig {
        *self.tx.borrow()
    }

    /// Receiver notified on every published change.
    pub fn subscribe(&self) -> watch::Receiver<ThresholdConfig> {
        self.tx.subscribe()
    }

    /// Observe one field: yields the current value, then each distinct new one.
    pub fn watch_field<T, F>(&self, field: F) -> BoxStream<'static, T>
    where
        T: PartialEq + Clone + Send + 'static,
        F: Fn(&ThresholdConfig) -> T + Send + Sync + 'static,
    {
        let rx = self.subscribe();
        stream::unfold((rx, None::<T>, field), |(mut rx, last, field)| async move {
            if last.is_some() && rx.changed().await.is_err() {
                return None;
            }
            loop {
                let value = field(&rx.borrow_and_update());
                if last.as_ref() != Some(&value) {
                    return Some((value.clone(), (rx, Some(value), field)));
                }
                if rx.changed().await.is_err() {
                    return None;
                }
            }
        })
        .boxed()
    }

    /// Observe the PM2.5 threshold.
    pub fn pm25_threshold(&self) -> BoxStream<'static, f64> {
        self.watch_field(|c| c.pm25_threshold)
    }

    /// Observe the CO threshold.
    pub fn co_threshold(&self) -> BoxStream<'static, f64> {
        self.watch_field(|c| c.co_threshold)
    }

    /// Observe the notifications switch.
    pub fn notifications_enabled(&self) -> BoxStream<'static, bool> {
        self.watch_field(|c| c.notifications_enabled)
    }

    /// Set the PM2.5 threshold.
    pub async fn set_pm25_threshold(&self, value: f64) -> Result<ThresholdConfig> {
        self.update(|c| c.pm25_threshold = value).await
    }

    /// Set the CO threshold.
    pub async fn set_co_threshold(&self, value: f64) -> Result<ThresholdConfig> {
        self.update(|c| c.co_threshold = value).await
    }

    /// Enable or disable notifications.
    pub async fn set_notifications_enabled(&self, enabled: bool) -> Result<ThresholdConfig> {
        self.update(|c| c.notifications_enabled = enabled).await
    }

    /// Replace all values at once.
    pub async fn replace(&self, config: ThresholdConfig) -> Result<ThresholdConfig> {
        self.update(|c| *c = config).await
    }

    /// Apply `change`, validate, persist, then publish.
    ///
    /// Nothing is published if validation or persistence fails.
    pub async fn update<F>(&self, change: F) -> Result<ThresholdConfig>
    where
        F: FnOnce(&mut ThresholdConfig),
    {
        let _guard = self.write_lock.lock().await;
        let mut next = self.snapshot();
        change(&mut next);
        next.validate()?;
        self.backend.save(&next).await?;
        self.tx.send_replace(next);
        Ok(next)
    }
}

impl std::fmt::Debug for Preferences {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Preferences")
            .field("current", &self.snapshot())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingBackend;

    #[async_trait]
    impl PreferencesBackend for FailingBackend {
        async fn load(&self) -> Result<Option<ThresholdConfig>> {
            Ok(None)
        }

        async fn save(&self, _config: &ThresholdConfig) -> Result<()> {
            Err(Error::Preferences("read-only".into()))
        }
    }

    #[test]
    fn test_defaults() {
        let config = ThresholdConfig::default();
        assert_eq!(config.pm25_threshold, 35.0);
        assert_eq!(config.co_threshold, 50.0);
        assert!(config.notifications_enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_thresholds() {
        let mut config = ThresholdConfig::default();
        config.co_threshold = f64::NAN;
        assert!(config.validate().is_err());
        config.co_threshold = -1.0;
        assert!(config.validate().is_err());
        config.co_threshold = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_deserialize_uses_defaults() {
        let config: ThresholdConfig = serde_json::from_str(r#"{"co_threshold": 40}"#).unwrap();
        assert_eq!(config.co_threshold, 40.0);
        assert_eq!(config.pm25_threshold, 35.0);
        assert!(config.notifications_enabled);
    }

    #[tokio::test]
    async fn test_open_loads_stored_values() {
        let stored = ThresholdConfig {
            pm25_threshold: 20.0,
            ..Default::default()
        };
        let prefs = Preferences::open(Arc::new(MemoryBackend::with_config(stored)))
            .await
            .unwrap();
        assert_eq!(prefs.snapshot(), stored);
    }

    #[tokio::test]
    async fn test_open_ignores_invalid_stored_values() {
        let stored = ThresholdConfig {
            pm25_threshold: -5.0,
            ..Default::default()
        };
        let prefs = Preferences::open(Arc::new(MemoryBackend::with_config(stored)))
            .await
            .unwrap();
        assert_eq!(prefs.snapshot(), ThresholdConfig::default());
    }

    #[tokio::test]
    async fn test_setter_persists_before_publishing() {
        let backend = Arc::new(MemoryBackend::new());
        let prefs = Preferences::open(backend.clone()).await.unwrap();

        prefs.set_co_threshold(30.0).await.unwrap();
        assert_eq!(prefs.snapshot().co_threshold, 30.0);
        assert_eq!(backend.stored().map(|c| c.co_threshold), Some(30.0));
    }

    #[tokio::test]
    async fn test_invalid_update_is_not_published() {
        let prefs = Preferences::in_memory(ThresholdConfig::default());
        let err = prefs.set_pm25_threshold(f64::INFINITY).await.unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
        assert_eq!(prefs.snapshot().pm25_threshold, 35.0);
    }

    #[tokio::test]
    async fn test_failed_save_is_not_published() {
        let prefs = Preferences::open(Arc::new(FailingBackend)).await.unwrap();
        assert!(prefs.set_notifications_enabled(false).await.is_err());
        assert!(prefs.snapshot().notifications_enabled);
    }

    #[tokio::test]
    async fn test_watch_field_yields_only_changes_to_that_field() {
        let prefs = Preferences::in_memory(ThresholdConfig::default());
        let mut co = prefs.co_threshold();

        assert_eq!(co.next().await, Some(50.0));

        prefs.set_pm25_threshold(10.0).await.unwrap();
        prefs.set_co_threshold(45.0).await.unwrap();
        assert_eq!(co.next().await, Some(45.0));

        prefs.set_notifications_enabled(false).await.unwrap();
        prefs.set_co_threshold(40.0).await.unwrap();
        assert_eq!(co.next().await, Some(40.0));
    }
}
