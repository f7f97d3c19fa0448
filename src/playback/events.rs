//! Push-based event delivery from the engine threads to subscribers.

use std::sync::{Arc, Mutex};

use crossbeam_channel::{bounded, unbounded, Receiver, Sender, TrySendError};

use crate::audio::spectrum::SpectrumFrame;
use crate::error::PlaybackError;
use crate::playback::PlaybackState;

/// Capacity of a display subscriber. A subscriber that falls this far behind
/// misses events rather than stalling the audio thread.
pub const SUBSCRIBER_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub enum EngineEvent {
    StateChanged {
        generation: u64,
        state: PlaybackState,
    },
    Position {
        generation: u64,
        position: f64,
        duration: f64,
    },
    TrackEnded {
        generation: u64,
    },
    Spectrum(SpectrumFrame),
    Error {
        generation: u64,
        error: Arc<PlaybackError>,
    },
}

impl EngineEvent {
    /// Events that change what the session should do next. These are never
    /// dropped for lifecycle subscribers.
    pub fn is_lifecycle(&self) -> bool {
        matches!(
            self,
            EngineEvent::StateChanged { .. } | EngineEvent::TrackEnded { .. } | EngineEvent::Error { .. }
        )
    }
}

struct Subscriber {
    tx: Sender<EngineEvent>,
    lifecycle_only: bool,
}

#[derive(Clone, Default)]
pub struct EventBus {
    subscribers: Arc<Mutex<Vec<Subscriber>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// All events, bounded and lossy.
    pub fn subscribe(&self) -> Receiver<EngineEvent> {
        let (tx, rx) = bounded(SUBSCRIBER_CAPACITY);
        self.add(Subscriber {
            tx,
            lifecycle_only: false,
        });
        rx
    }

    /// Lifecycle events only, unbounded and lossless.
    pub fn subscribe_lifecycle(&self) -> Receiver<EngineEvent> {
        let (tx, rx) = unbounded();
        self.add(Subscriber {
            tx,
            lifecycle_only: true,
        });
        rx
    }

    fn add(&self, sub: Subscriber) {
        self.subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(sub);
    }

    pub fn publish(&self, event: EngineEvent) {
        let lifecycle = event.is_lifecycle();
        let mut subs = self.subscribers.lock().unwrap_or_else(|e| e.into_inner());
        subs.retain(|sub| {
            if sub.lifecycle_only && !lifecycle {
                return true;
            }
            match sub.tx.try_send(event.clone()) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    log::trace!("subscriber full; event dropped");
                    true
                }
                Err(TrySendError::Disconnected(_)) => false,
            }
        });
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}
