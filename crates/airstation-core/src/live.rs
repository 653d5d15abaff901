//! Live feed of mapped readings.
//!
//! [`LiveFeed`] subscribes once to a [`ReadingSource`], maps every raw event
//! and fans the resulting [`Reading`]s out over a broadcast channel. Each
//! consumer gets its own receiver, so a slow consumer lags (and skips) rather
//! than stalling the producer or other consumers.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, Stream};
use tokio::sync::broadcast;
use tokio::time::{Instant, timeout_at};
use tracing::{debug, warn};

use airstation_types::{Reading, SensorKind};

use crate::error::{Error, Result};
use crate::mapper::map;
use crate::source::{EventHandler, ReadingSource, Subscription};

/// Default capacity of the live broadcast channel.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Boxed stream of live readings.
pub type ReadingStream = Pin<Box<dyn Stream<Item = Reading> + Send>>;

/// Bounded read of the next live value of a kind.
#[async_trait]
pub trait LiveReader: Send + Sync {
    /// Wait up to `timeout` for the next reading of `kind`.
    ///
    /// Returns `Ok(None)` when nothing arrives in time and
    /// [`Error::SourceClosed`] when the feed has ended.
    async fn next_reading(&self, kind: SensorKind, timeout: Duration) -> Result<Option<Reading>>;
}

/// Broadcast fan-out of mapped readings from one source subscription.
pub struct LiveFeed {
    template: broadcast::Receiver<Reading>,
    subscription: Subscription,
}

impl LiveFeed {
    /// Subscribe to `source` and start mapping its events.
    ///
    /// The broadcast sender lives inside the source handler, so when the
    /// source releases the handler every receiver observes the close.
    pub fn start(source: &dyn ReadingSource, capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(Error::invalid_config("live channel capacity must be > 0"));
        }
        let (tx, template) = broadcast::channel(capacity);
        let handler: EventHandler = Arc::new(move |event| {
            let _ = tx.send(map(&event));
        });
        let subscription = source.subscribe(handler)?;
        debug!("Live feed subscribed to {}", source.name());

        Ok(Self {
            template,
            subscription,
        })
    }

    /// A fresh receiver that sees readings published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Reading> {
        self.template.resubscribe()
    }

    /// Live readings as a stream; lagged items are skipped, the stream ends
    /// when the feed stops.
    pub fn readings(&self) -> ReadingStream {
        Box::pin(receiver_stream(self.subscribe()))
    }

    /// Unsubscribe from the source. Idempotent.
    pub fn stop(&self) {
        if !self.subscription.is_cancelled() {
            debug!("Stopping live feed");
        }
        self.subscription.cancel();
    }

    /// Whether [`stop`](Self::stop) has been called.
    pub fn is_stopped(&self) -> bool {
        self.subscription.is_cancelled()
    }
}

impl std::fmt::Debug for LiveFeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveFeed")
            .field("subscription", &self.subscription)
            .finish()
    }
}

/// Turn a broadcast receiver into a stream of readings.
pub fn receiver_stream(
    rx: broadcast::Receiver<Reading>,
) -> impl Stream<Item = Reading> + Send + 'static {
    stream::unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(reading) => return Some((reading, rx)),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Live stream lagged, skipped {} readings", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    })
}

#[async_trait]
impl LiveReader for LiveFeed {
    async fn next_reading(&self, kind: SensorKind, timeout: Duration) -> Result<Option<Reading>> {
        if self.is_stopped() {
            return Err(Error::SourceClosed);
        }
        let mut rx = self.subscribe();
        let deadline = Instant::now() + timeout;

        loop {
            match timeout_at(deadline, rx.recv()).await {
                Err(_) => {
                    debug!("No live {} reading within {:?}", kind, timeout);
                    return Ok(None);
                }
                Ok(Ok(reading)) if reading.kind == kind => return Ok(Some(reading)),
                Ok(Ok(_)) => continue,
                Ok(Err(broadcast::error::RecvError::Lagged(skipped))) => {
                    debug!("Live read lagged by {} readings", skipped);
                }
                Ok(Err(broadcast::error::RecvError::Closed)) => return Err(Error::SourceClosed),
            }
        }
    }
}
