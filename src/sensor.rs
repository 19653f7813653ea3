//! Push-based input plumbing.
//!
//! Camera frames and orientation vectors arrive through callbacks on their
//! producers' own threads. A consumer registers a sink and receives a
//! `Subscription`; cancelling or dropping the handle unregisters the sink.
//! Cancelling twice is a no-op.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use anyhow::Result;

use crate::frame::Frame;

/// Receives raw rotation vectors (3 or 4 components).
pub type OrientationSink = Arc<dyn Fn(&[f32]) + Send + Sync>;

/// Receives camera frames.
pub type FrameSink = Arc<dyn Fn(&Frame) + Send + Sync>;

/// IMU rotation-vector producer.
pub trait OrientationSource: Send + Sync {
    /// Whether the device has a usable orientation sensor. Callers must check
    /// this before relying on inertial tracking.
    fn is_available(&self) -> bool;

    fn subscribe(&self, sink: OrientationSink) -> Result<Subscription>;
}

/// Camera frame producer.
pub trait FrameSource: Send + Sync {
    fn subscribe(&self, sink: FrameSink) -> Result<Subscription>;
}

// ----------------------------------------------------------------------------
// Subscription
// ----------------------------------------------------------------------------

/// Owned registration handle.
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    pub fn is_active(&self) -> bool {
        self.cancel.is_some()
    }

    pub fn cancel(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.is_active())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// PushSource: in-process producer
// ----------------------------------------------------------------------------

struct Registry<T: ?Sized + 'static> {
    next_id: u64,
    sinks: Vec<(u64, Arc<dyn Fn(&T) + Send + Sync>)>,
}

/// In-process producer that fans values out to every registered sink.
///
/// Used by tests, trace replay and the demo in place of real device drivers.
/// Clones share registrations.
pub struct PushSource<T: ?Sized + 'static> {
    registry: Arc<Mutex<Registry<T>>>,
    available: Arc<AtomicBool>,
}

pub type PushOrientationSource = PushSource<[f32]>;
pub type PushFrameSource = PushSource<Frame>;

impl<T: ?Sized + 'static> Clone for PushSource<T> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
            available: Arc::clone(&self.available),
        }
    }
}

impl<T: ?Sized + 'static> Default for PushSource<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ?Sized + 'static> PushSource<T> {
    pub fn new() -> Self {
        Self {
            registry: Arc::new(Mutex::new(Registry {
                next_id: 0,
                sinks: Vec::new(),
            })),
            available: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Producer that reports no hardware.
    pub fn unavailable() -> Self {
        let source = Self::new();
        source.set_available(false);
        source
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.registry).sinks.len()
    }

    /// Deliver a value to every current sink, on the caller's thread.
    ///
    /// Sinks are invoked outside the registry lock, so a sink may cancel its
    /// own subscription.
    pub fn emit(&self, value: &T) {
        let sinks: Vec<Arc<dyn Fn(&T) + Send + Sync>> = lock(&self.registry)
            .sinks
            .iter()
            .map(|(_, sink)| Arc::clone(sink))
            .collect();
        for sink in sinks {
            sink(value);
        }
    }

    fn register(&self, sink: Arc<dyn Fn(&T) + Send + Sync>) -> Subscription {
        let id = {
            let mut registry = lock(&self.registry);
            let id = registry.next_id;
            registry.next_id += 1;
            registry.sinks.push((id, sink));
            id
        };
        let weak: Weak<Mutex<Registry<T>>> = Arc::downgrade(&self.registry);
        Subscription::new(move || {
            if let Some(registry) = weak.upgrade() {
                lock(&registry).sinks.retain(|(sink_id, _)| *sink_id != id);
            }
        })
    }
}

impl OrientationSource for PushSource<[f32]> {
    fn is_available(&self) -> bool {
        self.available()
    }

    fn subscribe(&self, sink: OrientationSink) -> Result<Subscription> {
        Ok(self.register(sink))
    }
}

impl FrameSource for PushSource<Frame> {
    fn subscribe(&self, sink: FrameSink) -> Result<Subscription> {
        Ok(self.register(sink))
    }
}

fn lock<T: ?Sized + 'static>(registry: &Mutex<Registry<T>>) -> MutexGuard<'_, Registry<T>> {
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}
