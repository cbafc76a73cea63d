//! Subscription fabric (component 4.G): routes hot-store pub/sub
//! notifications to long-poll readers.
//!
//! A trace's channel is a `tokio::sync::broadcast`, which already gives us
//! the "bounded queue that drops the oldest message and marks the reader
//! lagged on overflow" behavior §4.G calls for — this crate just adds the
//! idle-timeout teardown and the bar-wide fan-out on top.

use std::sync::Arc;
use std::time::Duration;

use pbars_hotstore::{HotStore, TraceUpdate};
use pbars_ids::TraceId;
use tokio::sync::{broadcast, mpsc};

/// Subscriptions with no activity for this long tear themselves down (§4.G).
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(30);

/// Depth of a [`BarFanout`]'s aggregated queue. Per-trace backpressure is
/// already bounded by the broadcast channel itself.
pub const DEFAULT_FANOUT_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq)]
pub enum SubscriptionEvent {
    Update(TraceUpdate),
    /// The reader fell behind; `skipped` messages were dropped. The reader
    /// must re-snapshot live state via the hot-state adapter (§4.C) rather
    /// than trust its own queue to have seen every mutation.
    Lagged { skipped: u64 },
}

/// A single reader's view of one trace's notification stream.
pub struct TraceSubscription {
    receiver: broadcast::Receiver<TraceUpdate>,
    idle_timeout: Duration,
}

impl TraceSubscription {
    #[must_use]
    pub fn new(receiver: broadcast::Receiver<TraceUpdate>, idle_timeout: Duration) -> Self {
        Self { receiver, idle_timeout }
    }

    pub fn subscribe<H: HotStore + ?Sized>(
        hotstore: &H,
        owner: &str,
        bar_name: &str,
        trace_uid: TraceId,
        idle_timeout: Duration,
    ) -> Self {
        Self::new(hotstore.subscribe(owner, bar_name, trace_uid), idle_timeout)
    }

    /// Waits for the next event, or `None` once the subscription should be
    /// torn down (idle timeout elapsed, or the channel closed).
    pub async fn recv(&mut self) -> Option<SubscriptionEvent> {
        match tokio::time::timeout(self.idle_timeout, self.receiver.recv()).await {
            Err(_elapsed) => {
                tracing::debug!("tearing down subscription after idle timeout");
                None
            }
            Ok(Ok(update)) => Some(SubscriptionEvent::Update(update)),
            Ok(Err(broadcast::error::RecvError::Lagged(skipped))) => Some(SubscriptionEvent::Lagged { skipped }),
            Ok(Err(broadcast::error::RecvError::Closed)) => None,
        }
    }
}

/// Fans multiple trace subscriptions for one bar into a single aggregated
/// stream. Traces are tracked explicitly via [`Self::track`] as they start —
/// the fabric has no directory of its own, it only multiplexes channels it's
/// told about.
pub struct BarFanout {
    hotstore: Arc<dyn HotStore>,
    owner: String,
    bar_name: String,
    idle_timeout: Duration,
    tx: mpsc::Sender<SubscriptionEvent>,
    rx: mpsc::Receiver<SubscriptionEvent>,
}

impl BarFanout {
    #[must_use]
    pub fn new(hotstore: Arc<dyn HotStore>, owner: impl Into<String>, bar_name: impl Into<String>) -> Self {
        Self::with_config(hotstore, owner, bar_name, DEFAULT_FANOUT_CAPACITY, DEFAULT_IDLE_TIMEOUT)
    }

    #[must_use]
    pub fn with_config(
        hotstore: Arc<dyn HotStore>,
        owner: impl Into<String>,
        bar_name: impl Into<String>,
        capacity: usize,
        idle_timeout: Duration,
    ) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        Self {
            hotstore,
            owner: owner.into(),
            bar_name: bar_name.into(),
            idle_timeout,
            tx,
            rx,
        }
    }

    /// Starts forwarding `trace_uid`'s notifications into this fan-out.
    /// Stops on its own once the trace's subscription tears down.
    pub fn track(&self, trace_uid: TraceId) {
        let mut subscription = TraceSubscription::subscribe(
            self.hotstore.as_ref(),
            &self.owner,
            &self.bar_name,
            trace_uid,
            self.idle_timeout,
        );
        let tx = self.tx.clone();
        tokio::spawn(async move {
            while let Some(event) = subscription.recv().await {
                if tx.send(event).await.is_err() {
                    break;
                }
            }
        });
    }

    pub async fn recv(&mut self) -> Option<SubscriptionEvent> {
        self.rx.recv().await
    }
}
