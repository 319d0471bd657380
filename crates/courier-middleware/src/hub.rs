//! Fan-out of live delivery snapshots to connected observers.
//!
//! Each subscriber owns a small bounded [`mpsc`] queue.  Publishing
//! serialises the [`Snapshot`] once and hands the same `Arc<str>` frame to
//! every queue with `try_send`, so a slow observer can never stall the
//! publisher or its peers:
//!
//! | `try_send` outcome | Action |
//! |---|---|
//! | `Ok` | delivered |
//! | `Full` | frame dropped for that subscriber only |
//! | `Closed` | subscriber pruned |
//!
//! Delivery failures are never reported to the caller as errors.
//!
//! # Example
//!
//! ```rust
//! use courier_middleware::BroadcastHub;
//! use courier_types::{Snapshot, VehicleState};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let hub = BroadcastHub::new();
//! let mut sub = hub.subscribe();
//!
//! let delivered = hub.publish(&Snapshot::new(VehicleState::default(), Vec::new()));
//! assert_eq!(delivered, 1);
//!
//! let frame = sub.receiver.recv().await.unwrap();
//! assert!(frame.contains("\"state\""));
//! # }
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use courier_types::Snapshot;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Frames buffered per subscriber before new ones are dropped.
pub const SUBSCRIBER_CAPACITY: usize = 16;

/// One serialised snapshot, shared by every subscriber.
pub type Frame = Arc<str>;

/// Handle returned by [`BroadcastHub::subscribe`].
#[derive(Debug)]
pub struct Subscription {
    pub id: u64,
    pub receiver: mpsc::Receiver<Frame>,
}

/// Shared snapshot broadcaster.  Clone it cheaply; clones share the same
/// subscriber set.
#[derive(Clone, Debug, Default)]
pub struct BroadcastHub {
    inner: Arc<HubInner>,
}

#[derive(Debug, Default)]
struct HubInner {
    next_id: AtomicU64,
    subscribers: Mutex<HashMap<u64, mpsc::Sender<Frame>>>,
}

impl BroadcastHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new observer.
    pub fn subscribe(&self) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, receiver) = mpsc::channel(SUBSCRIBER_CAPACITY);
        self.lock().insert(id, tx);
        debug!(subscriber = id, "Observer subscribed");
        Subscription { id, receiver }
    }

    /// Remove an observer.  Unknown ids are ignored.
    pub fn unsubscribe(&self, id: u64) {
        if self.lock().remove(&id).is_some() {
            debug!(subscriber = id, "Observer unsubscribed");
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().len()
    }

    /// Push `snapshot` to every subscriber and return how many accepted it.
    pub fn publish(&self, snapshot: &Snapshot) -> usize {
        let frame: Frame = match serde_json::to_string(snapshot) {
            Ok(json) => json.into(),
            Err(e) => {
                warn!(error = %e, "Snapshot serialisation failed; frame skipped");
                return 0;
            }
        };

        let mut subscribers = self.lock();
        let mut delivered = 0;
        subscribers.retain(|id, tx| match tx.try_send(frame.clone()) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(TrySendError::Full(_)) => {
                debug!(subscriber = id, "Observer queue full; frame dropped");
                true
            }
            Err(TrySendError::Closed(_)) => {
                debug!(subscriber = id, "Observer gone; pruned");
                false
            }
        });
        delivered
    }

    /// Publish a fresh snapshot from `source` every `interval` until
    /// `shutdown` is cancelled.
    pub async fn run<F, Fut>(&self, interval: Duration, shutdown: CancellationToken, mut source: F)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Snapshot>,
    {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        info!(interval_ms = interval.as_millis() as u64, "Broadcast loop started");
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    if self.subscriber_count() == 0 {
                        continue;
                    }
                    let snapshot = source().await;
                    self.publish(&snapshot);
                }
            }
        }
        info!("Broadcast loop stopped");
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<u64, mpsc::Sender<Frame>>> {
        self.inner
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
