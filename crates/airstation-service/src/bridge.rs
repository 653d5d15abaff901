//! TCP client for the sensor bridge.
//!
//! The bridge answers each `GET DATA\n` request with one newline-delimited
//! JSON frame. [`BridgeSource`] polls it on a fixed interval and hands every
//! decoded event to its subscriber, reconnecting after failures until the
//! subscription is cancelled.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::{MissedTickBehavior, interval, sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use airstation_core::{Error, EventHandler, ReadingSource, Result, Subscription, decode_frame};

use crate::config::SourceConfig;

/// Poll request understood by the bridge.
pub const POLL_COMMAND: &[u8] = b"GET DATA\n";

/// Reading source backed by a TCP sensor bridge.
#[derive(Debug, Clone)]
pub struct BridgeSource {
    address: String,
    poll_interval: Duration,
    reconnect_delay: Duration,
    connect_timeout: Duration,
    /// Failures since the last successful connect, shared with the worker.
    failures: Arc<AtomicU32>,
}

impl BridgeSource {
    pub fn new(address: impl Into<String>) -> Self {
        Self::from_config(&SourceConfig {
            address: address.into(),
            ..Default::default()
        })
    }

    pub fn from_config(config: &SourceConfig) -> Self {
        Self {
            address: config.address.clone(),
            poll_interval: config.poll_interval(),
            reconnect_delay: config.reconnect_delay(),
            connect_timeout: config.connect_timeout(),
            failures: Arc::new(AtomicU32::new(0)),
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_reconnect_delay(mut self, reconnect_delay: Duration) -> Self {
        self.reconnect_delay = reconnect_delay;
        self
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Connection failures since the bridge was last reachable.
    pub fn consecutive_failures(&self) -> u32 {
        self.failures.load(Ordering::Relaxed)
    }
}

impl ReadingSource for BridgeSource {
    fn subscribe(&self, handler: EventHandler) -> Result<Subscription> {
        let handle = tokio::runtime::Handle::try_current().map_err(|_| {
            Error::SourceUnavailable("sensor bridge requires a Tokio runtime".to_string())
        })?;

        let token = CancellationToken::new();
        let worker = self.clone();
        let worker_token = token.clone();
        handle.spawn(async move {
            worker.run(handler, worker_token).await;
        });

        info!("Subscribed to sensor bridge at {}", self.address);
        Ok(Subscription::new(token))
    }

    fn name(&self) -> &str {
        &self.address
    }
}

impl BridgeSource {
    async fn run(self, handler: EventHandler, cancel: CancellationToken) {
        loop {
            let outcome = tokio::select! {
                _ = cancel.cancelled() => break,
                outcome = self.session(&handler, &cancel) => outcome,
            };

            match outcome {
                Ok(()) => break,
                Err(e) => {
                    let consecutive_failures = self.failures.fetch_add(1, Ordering::Relaxed) + 1;
                    if consecutive_failures <= 3 {
                        warn!(
                            "Sensor bridge {} failed: {} (attempt {})",
                            self.address, e, consecutive_failures
                        );
                    } else if consecutive_failures == 4 {
                        error!(
                            "Sensor bridge {} failed {} times, will keep retrying silently",
                            self.address, consecutive_failures
                        );
                    }
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = sleep(self.reconnect_delay) => {}
            }
        }

        debug!("Sensor bridge worker for {} stopped", self.address);
    }

    /// One connection: poll until the socket fails or `cancel` fires.
    async fn session(&self, handler: &EventHandler, cancel: &CancellationToken) -> Result<()> {
        let stream = timeout(self.connect_timeout, TcpStream::connect(&self.address))
            .await
            .map_err(|_| Error::timeout("bridge connect", self.connect_timeout))?
            .map_err(|e| Error::SourceUnavailable(format!("{}: {}", self.address, e)))?;
        info!("Connected to sensor bridge at {}", self.address);
        self.failures.store(0, Ordering::Relaxed);

        let (reader, mut writer) = stream.into_split();
        let mut lines = BufReader::new(reader).lines();
        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = ticker.tick() => {
                    writer.write_all(POLL_COMMAND).await?;
                }
                line = lines.next_line() => {
                    let Some(line) = line? else {
                        return Err(Error::SourceUnavailable(format!(
                            "{} closed the connection",
                            self.address
                        )));
                    };
                    dispatch(&line, handler);
                }
            }
        }
    }
}

fn dispatch(line: &str, handler: &EventHandler) {
    let line = line.trim_end_matches('\r');
    if line.is_empty() {
        return;
    }
    match decode_frame(line) {
        Ok(events) => {
            for event in events {
                handler(event);
            }
        }
        Err(e) => debug!("Skipping bridge line: {}", e),
    }
}
