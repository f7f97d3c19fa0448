//! Error types for the engine.
//!
//! Every variant carries enough context (path, failing stage) for a UI to
//! render a specific message.

use std::path::PathBuf;

use thiserror::Error;

use crate::playback::PlaybackState;

/// Failures while opening or reading an audio file.
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("unsupported audio format: {path}")]
    UnsupportedFormat { path: PathBuf },

    #[error("corrupt audio data in {path} ({stage}): {reason}")]
    CorruptData {
        path: PathBuf,
        stage: &'static str,
        reason: String,
    },

    #[error("I/O error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl DecodeError {
    pub fn path(&self) -> &PathBuf {
        match self {
            DecodeError::UnsupportedFormat { path }
            | DecodeError::CorruptData { path, .. }
            | DecodeError::Io { path, .. } => path,
        }
    }
}

/// Failures surfaced by the scheduler or the session.
#[derive(Error, Debug)]
pub enum PlaybackError {
    #[error("audio output unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("playback engine is not running")]
    StreamClosed,

    #[error("playback stopped: {0}")]
    Decode(#[from] DecodeError),

    #[error("no track at index {index} (playlist has {len})")]
    NoSuchTrack { index: usize, len: usize },

    #[error("cannot {op} while {state:?}")]
    InvalidTransition {
        op: &'static str,
        state: PlaybackState,
    },
}

/// Failures while saving or loading a playlist.
#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("I/O error on playlist {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed playlist {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("playlist entry no longer exists: {0}")]
    StalePath(PathBuf),
}

/// Top-level error for callers that mix subsystems.
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Playback(#[from] PlaybackError),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error("config {path}: {reason}")]
    Config { path: PathBuf, reason: String },
}

pub type Result<T> = std::result::Result<T, Error>;
