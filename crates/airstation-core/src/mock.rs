//! Test doubles for the monitoring core.
//!
//! These are public so that downstream crates (the store and the service)
//! can exercise the core without a sensor bridge, a database, or a speaker.
//!
//! # Features
//!
//! - **Failure injection**: make subscriptions, appends or queries fail
//! - **Call recording**: count history queries per kind and live reads
//! - **Alarm observation**: track siren start/stop and peak concurrency

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use airstation_types::{PersistedReading, RawSensorEvent, Reading, SensorKind};

use crate::error::{Error, Result};
use crate::history::HistoryStore;
use crate::live::LiveReader;
use crate::notifier::{Alert, NotificationSink, Notifier, Siren};
use crate::source::{EventHandler, ReadingSource, Subscription};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Default)]
struct SourceInner {
    handlers: Mutex<BTreeMap<u64, EventHandler>>,
    next_id: AtomicU64,
    fail_subscribe: AtomicBool,
}

/// In-process reading source driven by the test.
///
/// Clones share the same set of subscribers.
#[derive(Clone, Default)]
pub struct MockReadingSource {
    inner: Arc<SourceInner>,
}

impl MockReadingSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent `subscribe` calls fail with `SourceUnavailable`.
    pub fn set_fail_subscribe(&self, fail: bool) {
        self.inner.fail_subscribe.store(fail, Ordering::SeqCst);
    }

    /// Deliver an event to every subscriber on the caller's context.
    pub fn emit(&self, event: RawSensorEvent) {
        let handlers: Vec<EventHandler> = lock(&self.inner.handlers).values().cloned().collect();
        for handler in handlers {
            handler(event);
        }
    }

    /// Deliver a raw event stamped now.
    pub fn emit_raw(&self, sensor_type: i32, value: f64) {
        self.emit(RawSensorEvent::now(sensor_type, value));
    }

    /// Deliver the raw form of `reading`.
    pub fn emit_reading(&self, reading: Reading) {
        self.emit(RawSensorEvent {
            sensor_type: reading.kind.sensor_type().unwrap_or(0),
            value: reading.value,
            timestamp: reading.timestamp,
        });
    }

    /// Number of live registrations.
    pub fn subscriber_count(&self) -> usize {
        lock(&self.inner.handlers).len()
    }
}

impl ReadingSource for MockReadingSource {
    fn subscribe(&self, handler: EventHandler) -> Result<Subscription> {
        if self.inner.fail_subscribe.load(Ordering::SeqCst) {
            return Err(Error::SourceUnavailable("mock source offline".to_string()));
        }
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        lock(&self.inner.handlers).insert(id, handler);

        let inner = Arc::clone(&self.inner);
        Ok(Subscription::with_release(CancellationToken::new(), move || {
            lock(&inner.handlers).remove(&id);
        }))
    }

    fn name(&self) -> &str {
        "mock"
    }
}

impl std::fmt::Debug for MockReadingSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockReadingSource")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

/// History store kept in memory.
pub struct MemoryHistory {
    rows: Mutex<Vec<PersistedReading>>,
    next_id: AtomicI64,
    appends: broadcast::Sender<PersistedReading>,
    fail_appends: AtomicBool,
    fail_queries: AtomicBool,
    append_count: AtomicU32,
    query_counts: Mutex<[u32; SensorKind::COUNT]>,
}

impl Default for MemoryHistory {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryHistory {
    pub fn new() -> Self {
        let (appends, _) = broadcast::channel(256);
        Self {
            rows: Mutex::new(Vec::new()),
            next_id: AtomicI64::new(1),
            appends,
            fail_appends: AtomicBool::new(false),
            fail_queries: AtomicBool::new(false),
            append_count: AtomicU32::new(0),
            query_counts: Mutex::new([0; SensorKind::COUNT]),
        }
    }

    /// Insert a pre-existing row without notifying watchers or counting it
    /// as an append.
    pub fn seed(&self, reading: Reading) -> PersistedReading {
        let row = PersistedReading::new(self.next_id.fetch_add(1, Ordering::SeqCst), reading);
        lock(&self.rows).push(row);
        row
    }

    pub fn fail_appends(&self, fail: bool) {
        self.fail_appends.store(fail, Ordering::SeqCst);
    }

    pub fn fail_queries(&self, fail: bool) {
        self.fail_queries.store(fail, Ordering::SeqCst);
    }

    /// Successful appends so far.
    pub fn append_count(&self) -> u32 {
        self.append_count.load(Ordering::SeqCst)
    }

    /// Range queries issued for `kind`, including failed ones.
    pub fn query_count_for(&self, kind: SensorKind) -> u32 {
        lock(&self.query_counts)[kind.index()]
    }

    /// Range queries issued for any kind.
    pub fn query_count(&self) -> u32 {
        lock(&self.query_counts).iter().sum()
    }

    /// Every stored row in id order.
    pub fn all(&self) -> Vec<PersistedReading> {
        let mut rows = lock(&self.rows).clone();
        rows.sort_by_key(|row| row.id);
        rows
    }

    pub fn len(&self) -> usize {
        lock(&self.rows).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl HistoryStore for MemoryHistory {
    async fn append(&self, reading: Reading) -> Result<PersistedReading> {
        if self.fail_appends.load(Ordering::SeqCst) {
            return Err(Error::storage("mock storage failure"));
        }
        let row = self.seed(reading);
        self.append_count.fetch_add(1, Ordering::SeqCst);
        let _ = self.appends.send(row);
        Ok(row)
    }

    async fn query_since(
        &self,
        kind: SensorKind,
        since: OffsetDateTime,
    ) -> Result<Vec<PersistedReading>> {
        lock(&self.query_counts)[kind.index()] += 1;
        if self.fail_queries.load(Ordering::SeqCst) {
            return Err(Error::storage("mock storage unavailable"));
        }
        let mut rows: Vec<PersistedReading> = lock(&self.rows)
            .iter()
            .filter(|row| row.reading.kind == kind && row.reading.timestamp >= since)
            .copied()
            .collect();
        rows.sort_by_key(|row| (row.reading.timestamp, row.id));
        Ok(rows)
    }

    fn subscribe_appends(&self) -> broadcast::Receiver<PersistedReading> {
        self.appends.subscribe()
    }
}

impl std::fmt::Debug for MemoryHistory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryHistory")
            .field("rows", &self.len())
            .finish()
    }
}

/// Live reader answering from per-kind queues.
///
/// With an empty queue a read waits for the full timeout and yields nothing,
/// which under paused time resolves instantly.
#[derive(Debug, Default)]
pub struct MockLiveReader {
    queued: Mutex<HashMap<SensorKind, VecDeque<Reading>>>,
    calls: Mutex<HashMap<SensorKind, u32>>,
    closed: AtomicBool,
}

impl MockLiveReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a reading for the next read of its kind.
    pub fn push(&self, reading: Reading) {
        lock(&self.queued)
            .entry(reading.kind)
            .or_default()
            .push_back(reading);
    }

    /// Make every subsequent read fail with `SourceClosed`.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    /// Reads issued for `kind`.
    pub fn calls_for(&self, kind: SensorKind) -> u32 {
        lock(&self.calls).get(&kind).copied().unwrap_or(0)
    }
}

#[async_trait]
impl LiveReader for MockLiveReader {
    async fn next_reading(&self, kind: SensorKind, timeout: Duration) -> Result<Option<Reading>> {
        *lock(&self.calls).entry(kind).or_default() += 1;
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::SourceClosed);
        }
        let queued = lock(&self.queued).get_mut(&kind).and_then(VecDeque::pop_front);
        match queued {
            Some(reading) => Ok(Some(reading)),
            None => {
                tokio::time::sleep(timeout).await;
                Ok(None)
            }
        }
    }
}

/// A call received by [`RecordingNotifier`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NotifierCall {
    HighRisk(f64),
    LethalAlarm(f64),
    Silence,
}

/// Notifier that records calls instead of alerting anyone.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    calls: Mutex<Vec<NotifierCall>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Alert calls in order, excluding `silence`.
    pub fn calls(&self) -> Vec<NotifierCall> {
        lock(&self.calls)
            .iter()
            .copied()
            .filter(|call| *call != NotifierCall::Silence)
            .collect()
    }

    /// Number of `silence` calls.
    pub fn silenced(&self) -> usize {
        lock(&self.calls)
            .iter()
            .filter(|call| **call == NotifierCall::Silence)
            .count()
    }
}

impl Notifier for RecordingNotifier {
    fn notify_high_risk(&self, value: f64) {
        lock(&self.calls).push(NotifierCall::HighRisk(value));
    }

    fn notify_lethal_alarm(&self, value: f64) {
        lock(&self.calls).push(NotifierCall::LethalAlarm(value));
    }

    fn silence(&self) {
        lock(&self.calls).push(NotifierCall::Silence);
    }
}

/// Sink that records rendered alerts.
#[derive(Debug, Default)]
pub struct RecordingSink {
    alerts: Mutex<Vec<Alert>>,
    fail: bool,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// A sink whose every `show` fails after recording.
    pub fn failing() -> Self {
        Self {
            alerts: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn alerts(&self) -> Vec<Alert> {
        lock(&self.alerts).clone()
    }
}

impl NotificationSink for RecordingSink {
    fn show(&self, alert: &Alert) -> Result<()> {
        lock(&self.alerts).push(alert.clone());
        if self.fail {
            return Err(Error::Io(std::io::Error::other("notification daemon gone")));
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct SirenState {
    active: u32,
    max_concurrent: u32,
    starts: u32,
    stops: u32,
}

/// Siren that tracks how many signals are sounding.
#[derive(Debug, Default)]
pub struct RecordingSiren {
    state: Mutex<SirenState>,
}

impl RecordingSiren {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        lock(&self.state).active > 0
    }

    pub fn starts(&self) -> u32 {
        lock(&self.state).starts
    }

    pub fn stops(&self) -> u32 {
        lock(&self.state).stops
    }

    /// Highest number of simultaneously sounding signals observed.
    pub fn max_concurrent(&self) -> u32 {
        lock(&self.state).max_concurrent
    }
}

impl Siren for RecordingSiren {
    fn start(&self) -> Result<()> {
        let mut state = lock(&self.state);
        state.active += 1;
        state.starts += 1;
        state.max_concurrent = state.max_concurrent.max(state.active);
        Ok(())
    }

    fn stop(&self) -> Result<()> {
        let mut state = lock(&self.state);
        state.active = state.active.saturating_sub(1);
        state.stops += 1;
        Ok(())
    }
}
