//! Outbound notifications.
//!
//! Observers are invoked on whichever thread drove the transition (camera or
//! IMU callback), after the tracker has released its state lock. A rendering
//! layer with thread affinity should not touch UI state from there; it should
//! register a `ChannelObserver` and drain the receiver on its own thread.

use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use crossbeam_channel::{Receiver, Sender, TrySendError};
use serde::Serialize;

use crate::detect::DetectionBox;

/// Tracker callbacks. Every method has an empty default.
pub trait TrackerObserver: Send + Sync {
    /// A lock was acquired on `detection` in a `frame_width` x `frame_height` frame.
    fn on_lock_acquired(&self, _detection: &DetectionBox, _frame_width: u32, _frame_height: u32) {}

    /// The lock was dropped and the tracker is scanning again.
    fn on_lock_lost(&self) {}

    /// The displayed box changed. `None` clears it.
    fn on_box_updated(
        &self,
        _detection: Option<&DetectionBox>,
        _frame_width: u32,
        _frame_height: u32,
    ) {
    }

    /// A scanning pass finished without a lock.
    fn on_candidates_observed(&self, _candidates: &[DetectionBox]) {}
}

/// Owned form of an observer callback.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TrackerEvent {
    LockAcquired {
        detection: DetectionBox,
        frame_width: u32,
        frame_height: u32,
    },
    LockLost,
    BoxUpdated {
        detection: Option<DetectionBox>,
        frame_width: u32,
        frame_height: u32,
    },
    CandidatesObserved {
        candidates: Vec<DetectionBox>,
    },
}

/// Forwards callbacks as `TrackerEvent`s over a channel.
///
/// Sending never blocks. Once the receiver of an unbounded channel is
/// dropped, events are discarded.
#[derive(Clone)]
pub struct ChannelObserver {
    tx: Sender<TrackerEvent>,
    // Bounded channels only: used to evict the oldest queued event.
    evict: Option<Receiver<TrackerEvent>>,
}

impl ChannelObserver {
    pub fn unbounded() -> (Self, Receiver<TrackerEvent>) {
        let (tx, rx) = crossbeam_channel::unbounded();
        (Self { tx, evict: None }, rx)
    }

    /// A channel holding at most `capacity` events (at least one).
    ///
    /// When it is full, `CandidatesObserved` events are dropped. Lock, loss
    /// and box events evict the oldest queued event instead, so the newest
    /// transition always reaches the receiver and the last event drained
    /// reflects the tracker's current state. Intermediate events can be lost.
    pub fn bounded(capacity: usize) -> (Self, Receiver<TrackerEvent>) {
        let (tx, rx) = crossbeam_channel::bounded(capacity.max(1));
        let evict = Some(rx.clone());
        (Self { tx, evict }, rx)
    }

    fn forward(&self, mut event: TrackerEvent) {
        loop {
            match self.tx.try_send(event) {
                Ok(()) => return,
                Err(TrySendError::Disconnected(_)) => return,
                Err(TrySendError::Full(rejected)) => {
                    let evict = match (&self.evict, &rejected) {
                        (_, TrackerEvent::CandidatesObserved { .. }) | (None, _) => {
                            log::debug!("observer channel full, dropping {:?}", rejected);
                            return;
                        }
                        (Some(evict), _) => evict,
                    };
                    if let Ok(stale) = evict.try_recv() {
                        log::debug!("observer channel full, evicted {:?}", stale);
                    }
                    event = rejected;
                }
            }
        }
    }
}

impl TrackerObserver for ChannelObserver {
    fn on_lock_acquired(&self, detection: &DetectionBox, frame_width: u32, frame_height: u32) {
        self.forward(TrackerEvent::LockAcquired {
            detection: detection.clone(),
            frame_width,
            frame_height,
        });
    }

    fn on_lock_lost(&self) {
        self.forward(TrackerEvent::LockLost);
    }

    fn on_box_updated(&self, detection: Option<&DetectionBox>, frame_width: u32, frame_height: u32) {
        self.forward(TrackerEvent::BoxUpdated {
            detection: detection.cloned(),
            frame_width,
            frame_height,
        });
    }

    fn on_candidates_observed(&self, candidates: &[DetectionBox]) {
        self.forward(TrackerEvent::CandidatesObserved {
            candidates: candidates.to_vec(),
        });
    }
}

// ----------------------------------------------------------------------------
// Dispatcher: ordered delivery
// ----------------------------------------------------------------------------

#[derive(Default)]
struct Outbox {
    next_seq: u64,
    pending: BTreeMap<u64, Vec<TrackerEvent>>,
    draining: bool,
}

/// Delivers event batches to observers in the order their sequence numbers
/// were reserved, regardless of which thread hands them in first.
///
/// Every reserved sequence number must be handed in exactly once, or delivery
/// stalls at the gap. Callbacks run with no lock held; a batch submitted from
/// inside a callback is queued and delivered after the current one.
#[derive(Default)]
pub(crate) struct Dispatcher {
    observers: RwLock<Vec<Arc<dyn TrackerObserver>>>,
    outbox: Mutex<Outbox>,
}

impl Dispatcher {
    pub(crate) fn add_observer(&self, observer: Arc<dyn TrackerObserver>) {
        self.observers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(observer);
    }

    pub(crate) fn submit(&self, seq: u64, events: Vec<TrackerEvent>) {
        {
            let mut outbox = self.lock_outbox();
            outbox.pending.insert(seq, events);
            if outbox.draining {
                return;
            }
            outbox.draining = true;
        }

        loop {
            let batch = {
                let mut outbox = self.lock_outbox();
                let next = outbox.next_seq;
                match outbox.pending.remove(&next) {
                    Some(batch) => {
                        outbox.next_seq += 1;
                        batch
                    }
                    None => {
                        outbox.draining = false;
                        return;
                    }
                }
            };
            let observers = self
                .observers
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .clone();
            for event in &batch {
                for observer in &observers {
                    let delivered =
                        panic::catch_unwind(AssertUnwindSafe(|| notify(observer.as_ref(), event)));
                    if delivered.is_err() {
                        log::warn!("observer panicked while handling {:?}", event);
                    }
                }
            }
        }
    }

    fn lock_outbox(&self) -> MutexGuard<'_, Outbox> {
        self.outbox.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn notify(observer: &dyn TrackerObserver, event: &TrackerEvent) {
    match event {
        TrackerEvent::LockAcquired {
            detection,
            frame_width,
            frame_height,
        } => observer.on_lock_acquired(detection, *frame_width, *frame_height),
        TrackerEvent::LockLost => observer.on_lock_lost(),
        TrackerEvent::BoxUpdated {
            detection,
            frame_width,
            frame_height,
        } => observer.on_box_updated(detection.as_ref(), *frame_width, *frame_height),
        TrackerEvent::CandidatesObserved { candidates } => {
            observer.on_candidates_observed(candidates)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Rect;

    #[test]
    fn channel_observer_forwards_in_order() {
        let (observer, rx) = ChannelObserver::unbounded();
        let b = DetectionBox::new("cup", 0.8, Rect::new(0.0, 0.0, 10.0, 10.0));

        observer.on_lock_acquired(&b, 640, 480);
        observer.on_box_updated(None, 0, 0);
        observer.on_lock_lost();

        let events: Vec<TrackerEvent> = rx.try_iter().collect();
        assert_eq!(events.len(), 3);
        assert!(matches!(events[0], TrackerEvent::LockAcquired { frame_width: 640, .. }));
        assert!(matches!(events[1], TrackerEvent::BoxUpdated { detection: None, .. }));
        assert_eq!(events[2], TrackerEvent::LockLost);
    }

    #[test]
    fn dispatcher_holds_later_batches_until_gap_fills() {
        let dispatcher = Dispatcher::default();
        let (observer, rx) = ChannelObserver::unbounded();
        dispatcher.add_observer(Arc::new(observer));

        dispatcher.submit(1, vec![TrackerEvent::LockLost]);
        assert_eq!(rx.try_iter().count(), 0);

        let b = DetectionBox::new("cup", 0.8, Rect::default());
        dispatcher.submit(
            0,
            vec![TrackerEvent::LockAcquired {
                detection: b,
                frame_width: 640,
                frame_height: 480,
            }],
        );
        let events: Vec<TrackerEvent> = rx.try_iter().collect();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], TrackerEvent::LockAcquired { .. }));
        assert_eq!(events[1], TrackerEvent::LockLost);
    }

    #[test]
    fn full_channel_never_blocks() {
        let (observer, rx) = ChannelObserver::bounded(1);
        observer.on_candidates_observed(&[]);
        observer.on_candidates_observed(&[]);
        assert_eq!(rx.try_iter().count(), 1);

        observer.on_lock_lost();
        observer.on_lock_lost();
        assert_eq!(rx.try_iter().count(), 1);

        let (observer, rx) = ChannelObserver::unbounded();
        drop(rx);
        observer.on_lock_lost();
    }

    #[test]
    fn full_channel_keeps_latest_transition() {
        let (observer, rx) = ChannelObserver::bounded(2);
        let b = DetectionBox::new("cup", 0.8, Rect::new(0.0, 0.0, 10.0, 10.0));

        observer.on_box_updated(Some(&b), 640, 480);
        observer.on_lock_acquired(&b, 640, 480);
        observer.on_candidates_observed(&[b.clone()]);
        observer.on_box_updated(None, 0, 0);
        observer.on_lock_lost();

        let events: Vec<TrackerEvent> = rx.try_iter().collect();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], TrackerEvent::BoxUpdated { detection: None, .. }));
        assert_eq!(events[1], TrackerEvent::LockLost);
    }

    struct Faulty;

    impl TrackerObserver for Faulty {
        fn on_lock_lost(&self) {
            panic!("observer failure");
        }
    }

    #[test]
    fn failing_observer_does_not_silence_the_rest() {
        let dispatcher = Dispatcher::default();
        let (observer, rx) = ChannelObserver::unbounded();
        dispatcher.add_observer(Arc::new(Faulty));
        dispatcher.add_observer(Arc::new(observer));

        dispatcher.submit(0, vec![TrackerEvent::LockLost]);
        dispatcher.submit(1, vec![TrackerEvent::LockLost]);
        dispatcher.submit(2, vec![TrackerEvent::CandidatesObserved { candidates: vec![] }]);

        let events: Vec<TrackerEvent> = rx.try_iter().collect();
        assert_eq!(events.len(), 3);
        assert_eq!(events[1], TrackerEvent::LockLost);
        assert!(matches!(events[2], TrackerEvent::CandidatesObserved { .. }));
    }
}
