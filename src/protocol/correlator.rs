//! Reply correlation for one DVR-IP session.
//!
//! Incoming frames are matched against pending operations (one-shot,
//! sequence-scoped) and alarm subscriptions (long-lived, command-scoped).
//! Frames nobody claims wait in a bounded holding area so that a reply
//! arriving just before its waiter registers is not lost, and are evicted
//! once they outlive the retention window.

use super::codec::{peek_command_id, peek_sequence, peek_session_id};
use bytes::Bytes;
use std::{
    collections::VecDeque,
    sync::Mutex,
    time::{Duration, Instant},
};
use tokio::sync::{mpsc, oneshot};

/// Upper bound on unclaimed frames kept around.
const HOLDING_CAPACITY: usize = 64;

/// Expectations one pending operation has about its reply frame.
///
/// `None` fields match anything; a zero session also matches anything since
/// frames received before login carry session 0.
#[derive(Debug, Clone, Copy)]
pub struct FrameFilter {
    pub sequence: Option<u32>,
    pub session_id: Option<u32>,
    pub command_id: Option<u16>,
}

impl FrameFilter {
    fn matches(&self, frame: &Bytes) -> bool {
        let seq_ok = match self.sequence {
            None => true,
            Some(want) => peek_sequence(frame) == Some(want),
        };
        let session_ok = match self.session_id {
            None | Some(0) => true,
            Some(want) => peek_session_id(frame) == Some(want),
        };
        let command_ok = match self.command_id {
            None => true,
            Some(want) => peek_command_id(frame) == Some(want),
        };
        seq_ok && session_ok && command_ok
    }
}

struct PendingOperation {
    filter: FrameFilter,
    slot: oneshot::Sender<Bytes>,
}

struct AlarmSubscription {
    id: u64,
    command_id: u16,
    tx: mpsc::Sender<Bytes>,
}

struct HeldFrame {
    frame: Bytes,
    received_at: Instant,
}

#[derive(Default)]
struct Inner {
    pending: Vec<PendingOperation>,
    subscriptions: Vec<AlarmSubscription>,
    held: VecDeque<HeldFrame>,
    next_subscription_id: u64,
    closed: bool,
}

/// Matches incoming frames to exactly one waiting consumer.
pub struct ReplyCorrelator {
    inner: Mutex<Inner>,
    retention: Duration,
}

impl ReplyCorrelator {
    pub fn new(retention: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            retention,
        }
    }

    /// Register a pending operation and return its single-fulfillment slot.
    ///
    /// Held frames are scanned first so a reply that raced ahead of its
    /// waiter is delivered immediately. After shutdown the returned receiver
    /// resolves to an error straight away.
    pub fn register(&self, filter: FrameFilter) -> oneshot::Receiver<Bytes> {
        let (tx, rx) = oneshot::channel();
        let mut inner = self.inner.lock().expect("correlator lock poisoned");
        if inner.closed {
            return rx;
        }
        self.evict_stale(&mut inner);

        if let Some(pos) = inner.held.iter().position(|h| filter.matches(&h.frame)) {
            let held = inner.held.remove(pos).expect("position just found");
            let _ = tx.send(held.frame);
            return rx;
        }

        inner.pending.push(PendingOperation { filter, slot: tx });
        rx
    }

    /// Register a long-lived subscription for every frame with the given
    /// command id. Returns the subscription handle id and the frame channel.
    pub fn subscribe(&self, command_id: u16, capacity: usize) -> (u64, mpsc::Receiver<Bytes>) {
        let (tx, rx) = mpsc::channel(capacity);
        let mut inner = self.inner.lock().expect("correlator lock poisoned");
        let id = inner.next_subscription_id;
        inner.next_subscription_id += 1;
        if !inner.closed {
            inner.subscriptions.push(AlarmSubscription {
                id,
                command_id,
                tx,
            });
        }
        (id, rx)
    }

    pub fn unsubscribe(&self, id: u64) {
        let mut inner = self.inner.lock().expect("correlator lock poisoned");
        inner.subscriptions.retain(|s| s.id != id);
    }

    /// Route one complete frame: non-exclusively to every matching
    /// subscription, then to at most one pending operation; otherwise into
    /// the holding area.
    pub fn dispatch(&self, frame: Bytes) {
        let mut inner = self.inner.lock().expect("correlator lock poisoned");
        if inner.closed {
            return;
        }
        self.evict_stale(&mut inner);

        let command_id = peek_command_id(&frame);
        let mut forwarded = false;
        inner.subscriptions.retain(|sub| {
            if Some(sub.command_id) != command_id {
                return true;
            }
            match sub.tx.try_send(frame.clone()) {
                Ok(()) => {
                    forwarded = true;
                    true
                }
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::warn!(
                        command_id = sub.command_id,
                        "subscription channel full; dropping frame"
                    );
                    forwarded = true;
                    true
                }
                // Receiver gone; the subscription is dead.
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            }
        });

        let mut claimed = false;
        while let Some(pos) = inner.pending.iter().position(|p| p.filter.matches(&frame)) {
            let pending = inner.pending.remove(pos);
            // A send failure means the waiter timed out or was cancelled;
            // the next matching waiter, if any, may still claim the frame.
            if pending.slot.send(frame.clone()).is_ok() {
                claimed = true;
                break;
            }
        }

        if !claimed && !forwarded {
            if inner.held.len() >= HOLDING_CAPACITY {
                if let Some(evicted) = inner.held.pop_front() {
                    log_discarded(&evicted.frame, "holding area full");
                }
            }
            inner.held.push_back(HeldFrame {
                frame,
                received_at: Instant::now(),
            });
        }
    }

    /// Drop everything still pending or held, logging each held frame.
    /// Registered waiters observe their slot closing. Idempotent.
    pub fn shutdown(&self) {
        let mut inner = self.inner.lock().expect("correlator lock poisoned");
        if inner.closed {
            return;
        }
        inner.closed = true;
        for held in inner.held.drain(..) {
            log_discarded(&held.frame, "correlator shutdown");
        }
        inner.pending.clear();
        inner.subscriptions.clear();
    }

    fn evict_stale(&self, inner: &mut Inner) {
        let now = Instant::now();
        while let Some(front) = inner.held.front() {
            if now.duration_since(front.received_at) <= self.retention {
                break;
            }
            let stale = inner.held.pop_front().expect("front just observed");
            log_discarded(&stale.frame, "retention window elapsed");
        }
        inner.pending.retain(|p| !p.slot.is_closed());
    }
}

fn log_discarded(frame: &Bytes, reason: &'static str) {
    tracing::warn!(
        reason,
        len = frame.len(),
        command_id = peek_command_id(frame),
        sequence = peek_sequence(frame),
        "response discarded"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::codec;
    use crate::types::FRAME_RETENTION;

    fn frame(session: u32, seq: u32, cmd: u16) -> Bytes {
        codec::encode(session, seq, cmd, b"{\"Ret\":100}")
    }

    #[tokio::test]
    async fn matching_waiter_is_fulfilled() {
        let correlator = ReplyCorrelator::new(FRAME_RETENTION);
        let rx = correlator.register(FrameFilter {
            sequence: Some(5),
            session_id: Some(0x64),
            command_id: Some(1007),
        });
        correlator.dispatch(frame(0x64, 5, 1007));
        assert_eq!(rx.await.unwrap(), frame(0x64, 5, 1007));
    }

    #[tokio::test]
    async fn only_the_matching_operation_is_fulfilled() {
        let correlator = ReplyCorrelator::new(FRAME_RETENTION);
        let rx_a = correlator.register(FrameFilter {
            sequence: Some(1),
            session_id: Some(0x64),
            command_id: Some(1007),
        });
        let mut rx_b = correlator.register(FrameFilter {
            sequence: Some(2),
            session_id: Some(0x64),
            command_id: Some(1007),
        });

        correlator.dispatch(frame(0x64, 1, 1007));

        assert!(rx_a.await.is_ok());
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn held_frame_is_delivered_to_late_waiter() {
        let correlator = ReplyCorrelator::new(FRAME_RETENTION);
        correlator.dispatch(frame(0x64, 9, 1043));
        let rx = correlator.register(FrameFilter {
            sequence: Some(9),
            session_id: Some(0x64),
            command_id: Some(1043),
        });
        assert!(rx.await.is_ok());
    }

    #[tokio::test]
    async fn stale_frame_is_evicted_not_delivered() {
        let correlator = ReplyCorrelator::new(Duration::ZERO);
        correlator.dispatch(frame(0x64, 9, 1043));
        tokio::time::sleep(Duration::from_millis(5)).await;
        let mut rx = correlator.register(FrameFilter {
            sequence: Some(9),
            session_id: Some(0x64),
            command_id: Some(1043),
        });
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn zero_session_filter_matches_any_session() {
        let correlator = ReplyCorrelator::new(FRAME_RETENTION);
        let rx = correlator.register(FrameFilter {
            sequence: Some(1),
            session_id: Some(0),
            command_id: Some(1001),
        });
        correlator.dispatch(frame(0x7777, 1, 1001));
        assert!(rx.await.is_ok());
    }

    #[tokio::test]
    async fn subscription_receives_every_matching_frame() {
        let correlator = ReplyCorrelator::new(FRAME_RETENTION);
        let (_id, mut rx) = correlator.subscribe(1504, 8);
        correlator.dispatch(frame(0x64, 100, 1504));
        correlator.dispatch(frame(0x64, 101, 1504));
        correlator.dispatch(frame(0x64, 3, 1007));
        assert!(rx.recv().await.is_some());
        assert!(rx.recv().await.is_some());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn subscription_does_not_consume_from_request_path() {
        let correlator = ReplyCorrelator::new(FRAME_RETENTION);
        let (_id, mut sub_rx) = correlator.subscribe(1504, 8);
        let rx = correlator.register(FrameFilter {
            sequence: None,
            session_id: None,
            command_id: Some(1504),
        });
        correlator.dispatch(frame(0x64, 100, 1504));
        assert!(sub_rx.recv().await.is_some());
        assert!(rx.await.is_ok());
    }

    #[tokio::test]
    async fn unsubscribe_stops_forwarding() {
        let correlator = ReplyCorrelator::new(FRAME_RETENTION);
        let (id, mut rx) = correlator.subscribe(1504, 8);
        correlator.unsubscribe(id);
        correlator.dispatch(frame(0x64, 100, 1504));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn shutdown_closes_waiters() {
        let correlator = ReplyCorrelator::new(FRAME_RETENTION);
        let rx = correlator.register(FrameFilter {
            sequence: Some(1),
            session_id: None,
            command_id: None,
        });
        correlator.shutdown();
        assert!(rx.await.is_err());

        // Registration after shutdown resolves to an error immediately.
        let rx = correlator.register(FrameFilter {
            sequence: Some(2),
            session_id: None,
            command_id: None,
        });
        assert!(rx.await.is_err());
    }
}
