//! Frame fan-out from the capture loop to viewers and the recorder

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, Weak};

use tokio::sync::mpsc::{self, error::TrySendError};
use uuid::Uuid;

use crate::recording::Recorder;
use crate::types::Frame;

/// Outcome of one [`FrameBus::publish`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    /// Subscribers that received the frame
    pub delivered: usize,
    /// Subscribers removed because they were full or gone
    pub evicted: usize,
    /// Whether the recorder queued the frame
    pub recorded: bool,
}

/// Broadcasts frames to live subscribers and, while recording, to the
/// recorder's ingress queue.
///
/// Delivery never waits: each subscriber sits behind its own bounded channel
/// and a subscriber that cannot take a frame immediately is dropped from the
/// bus. Cloning is cheap and every clone publishes to the same subscribers.
#[derive(Clone)]
pub struct FrameBus {
    inner: Arc<BusInner>,
}

struct BusInner {
    subscribers: RwLock<HashMap<Uuid, mpsc::Sender<Frame>>>,
    closed: AtomicBool,
    recorder: Option<Recorder>,
    buffer: usize,
    published: AtomicU64,
    evicted: AtomicU64,
}

impl BusInner {
    fn remove(&self, ids: &[Uuid]) -> usize {
        let mut subscribers = self
            .subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        ids.iter()
            .filter(|id| subscribers.remove(*id).is_some())
            .count()
    }
}

impl FrameBus {
    /// `buffer` is the number of frames a subscriber may fall behind before
    /// it is considered stalled and evicted.
    pub fn new(buffer: usize, recorder: Option<Recorder>) -> Self {
        Self {
            inner: Arc::new(BusInner {
                subscribers: RwLock::new(HashMap::new()),
                closed: AtomicBool::new(false),
                recorder,
                buffer: buffer.max(1),
                published: AtomicU64::new(0),
                evicted: AtomicU64::new(0),
            }),
        }
    }

    pub fn recorder(&self) -> Option<&Recorder> {
        self.inner.recorder.as_ref()
    }

    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::channel(self.inner.buffer);
        let id = Uuid::new_v4();
        let count = {
            let mut subscribers = self
                .inner
                .subscribers
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            // checked under the lock so close() cannot miss a late subscriber
            if !self.inner.closed.load(Ordering::Acquire) {
                subscribers.insert(id, tx);
            }
            subscribers.len()
        };
        log::debug!("Subscriber {} registered ({} active)", id, count);

        Subscription {
            id,
            receiver: rx,
            bus: Arc::downgrade(&self.inner),
        }
    }

    /// Remove a subscriber. Returns whether it was still registered.
    pub fn unsubscribe(&self, id: Uuid) -> bool {
        let removed = self.inner.remove(&[id]) > 0;
        if removed {
            log::debug!("Subscriber {} unregistered", id);
        }
        removed
    }

    /// Hand `frame` to every subscriber and to the recorder without blocking.
    pub fn publish(&self, frame: Frame) -> PublishReport {
        let mut report = PublishReport::default();
        let mut stale = Vec::new();

        {
            let subscribers = self
                .inner
                .subscribers
                .read()
                .unwrap_or_else(PoisonError::into_inner);
            for (id, tx) in subscribers.iter() {
                match tx.try_send(frame.clone()) {
                    Ok(()) => report.delivered += 1,
                    Err(TrySendError::Full(_)) => {
                        log::debug!(
                            "Subscriber {} fell {} frames behind, evicting",
                            id,
                            self.inner.buffer
                        );
                        stale.push(*id);
                    }
                    Err(TrySendError::Closed(_)) => stale.push(*id),
                }
            }
        }

        if !stale.is_empty() {
            report.evicted = self.inner.remove(&stale);
            self.inner
                .evicted
                .fetch_add(report.evicted as u64, Ordering::Relaxed);
        }

        if let Some(recorder) = &self.inner.recorder {
            report.recorded = recorder.enqueue(frame);
        }

        self.inner.published.fetch_add(1, Ordering::Relaxed);
        report
    }

    /// Drop every subscriber and refuse new ones. Open subscriptions drain
    /// what they buffered and then end, which lets long-lived streams finish
    /// during shutdown.
    pub fn close(&self) {
        let mut subscribers = self
            .inner
            .subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        self.inner.closed.store(true, Ordering::Release);
        let count = subscribers.len();
        subscribers.clear();
        log::debug!("Bus closed, released {} subscribers", count);
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner
            .subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Frames published since the bus was created
    pub fn published(&self) -> u64 {
        self.inner.published.load(Ordering::Relaxed)
    }

    /// Subscribers evicted for falling behind or disappearing
    pub fn evicted(&self) -> u64 {
        self.inner.evicted.load(Ordering::Relaxed)
    }
}

/// Receiving end of one bus registration.
///
/// The bus only keeps the sending half, so dropping the subscription is
/// enough to end the registration; `Drop` also unregisters eagerly.
pub struct Subscription {
    id: Uuid,
    receiver: mpsc::Receiver<Frame>,
    bus: Weak<BusInner>,
}

impl Subscription {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Next frame, or `None` once the bus has evicted this subscriber (after
    /// the frames already buffered) or has been dropped.
    pub async fn recv(&mut self) -> Option<Frame> {
        self.receiver.recv().await
    }

    /// Non-blocking variant of [`recv`](Self::recv): `None` when nothing is
    /// buffered right now.
    pub fn try_recv(&mut self) -> Option<Frame> {
        self.receiver.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            if bus.remove(&[self.id]) > 0 {
                log::debug!("Subscriber {} disconnected", self.id);
            }
        }
    }
}
