pub mod engine;
pub mod events;
pub mod metadata;
pub mod scheduler;
pub mod session;

use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlaybackState {
    Playing,
    Paused,
    #[default]
    Stopped,
}

/// Latest position as seen by the engine thread.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlaybackInfo {
    pub generation: u64,
    pub state: PlaybackState,
    /// Seconds actually heard, clamped into `[0, duration]`.
    pub position: f64,
    pub duration: f64,
}

pub type PlaybackHandle = Arc<Mutex<PlaybackInfo>>;
