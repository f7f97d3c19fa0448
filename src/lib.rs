pub mod app;
pub mod audio;
pub mod data;
pub mod error;
pub mod playback;
pub mod utils;

pub use audio::decoder::AudioStream;
pub use audio::equalizer::EqSettings;
pub use audio::spectrum::{Normalization, SpectrumFrame};
pub use data::config::EngineConfig;
pub use data::playlist::{Playlist, PlaylistLoad};
pub use error::{DecodeError, Error, PersistenceError, PlaybackError, Result};
pub use playback::events::EngineEvent;
pub use playback::metadata::Track;
pub use playback::session::PlaybackSession;
pub use playback::PlaybackState;
