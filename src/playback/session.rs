//! The one playback session per process: playlist + engine, with transitions
//! validated on the caller's thread.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError};

use crate::audio::decoder::AudioStream;
use crate::audio::equalizer::EqSettings;
use crate::data::config::EngineConfig;
use crate::data::playlist::Playlist;
use crate::error::{PersistenceError, PlaybackError};
use crate::playback::engine::Engine;
use crate::playback::events::EngineEvent;
use crate::playback::metadata::Track;
use crate::playback::scheduler::{clamp_crossfade, clamp_volume, Command};
use crate::playback::PlaybackState;

pub struct PlaybackSession {
    engine: Engine,
    lifecycle: Receiver<EngineEvent>,
    playlist: Playlist,
    state: PlaybackState,
    // Bumped for every track handed to the engine; older events are ignored.
    generation: u64,
    volume: f32,
    crossfade_secs: f64,
    eq: EqSettings,
}

impl PlaybackSession {
    /// Session on the default output device.
    pub fn new(config: &EngineConfig) -> Result<Self, PlaybackError> {
        Ok(Self::with_engine(Engine::start(config)?, config))
    }

    pub fn with_engine(engine: Engine, config: &EngineConfig) -> Self {
        let config = config.clone().sanitized();
        let lifecycle = engine.subscribe_lifecycle();
        Self {
            engine,
            lifecycle,
            playlist: Playlist::new(),
            state: PlaybackState::Stopped,
            generation: 0,
            volume: config.volume,
            crossfade_secs: config.crossfade_secs,
            eq: config.eq,
        }
    }

    pub fn playlist(&self) -> &Playlist {
        &self.playlist
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    pub fn crossfade(&self) -> f64 {
        self.crossfade_secs
    }

    pub fn equalizer(&self) -> EqSettings {
        self.eq
    }

    pub fn current_track(&self) -> Option<&Track> {
        self.playlist.current_track()
    }

    /// Heard position of the current track in seconds.
    pub fn position(&self) -> f64 {
        let info = self.engine.status();
        if self.state == PlaybackState::Stopped || info.generation != self.generation {
            return 0.0;
        }
        info.position
    }

    pub fn duration(&self) -> f64 {
        let info = self.engine.status();
        if info.generation == self.generation && info.duration > 0.0 {
            return info.duration;
        }
        self.current_track().map(|t| t.duration).unwrap_or(0.0)
    }

    /// Bounded, lossy receiver of every engine event, for display.
    pub fn subscribe(&self) -> Receiver<EngineEvent> {
        self.engine.subscribe()
    }

    // ---- transport ----

    pub fn play_index(&mut self, index: usize) -> Result<(), PlaybackError> {
        if !self.playlist.select(index) {
            return Err(PlaybackError::NoSuchTrack {
                index,
                len: self.playlist.len(),
            });
        }
        self.play_current()
    }

    pub fn play_current(&mut self) -> Result<(), PlaybackError> {
        let Some(index) = self.playlist.current() else {
            return Err(PlaybackError::NoSuchTrack { index: 0, len: 0 });
        };
        if self.playlist.refresh_stale(index) {
            log::debug!("track {index} changed on disk; tags re-read");
        }
        let Some(track) = self.playlist.get(index) else {
            return Err(PlaybackError::NoSuchTrack {
                index,
                len: self.playlist.len(),
            });
        };

        let stream = AudioStream::open(&track.path)?;
        self.generation += 1;
        self.engine.send(Command::Play {
            stream: Box::new(stream),
            generation: self.generation,
        })?;
        self.state = PlaybackState::Playing;
        Ok(())
    }

    pub fn pause(&mut self) -> Result<(), PlaybackError> {
        self.expect_state("pause", PlaybackState::Playing)?;
        self.engine.send(Command::Pause)?;
        self.state = PlaybackState::Paused;
        Ok(())
    }

    pub fn resume(&mut self) -> Result<(), PlaybackError> {
        self.expect_state("resume", PlaybackState::Paused)?;
        self.engine.send(Command::Resume)?;
        self.state = PlaybackState::Playing;
        Ok(())
    }

    /// Pause, resume, or start the current track when stopped.
    pub fn toggle_pause(&mut self) -> Result<(), PlaybackError> {
        match self.state {
            PlaybackState::Playing => self.pause(),
            PlaybackState::Paused => self.resume(),
            PlaybackState::Stopped => self.play_current(),
        }
    }

    pub fn seek(&mut self, seconds: f64) -> Result<(), PlaybackError> {
        if self.state == PlaybackState::Stopped {
            return Err(PlaybackError::InvalidTransition {
                op: "seek",
                state: self.state,
            });
        }
        self.engine.send(Command::Seek(seconds))
    }

    pub fn stop(&mut self) -> Result<(), PlaybackError> {
        self.state = PlaybackState::Stopped;
        self.engine.send(Command::Stop)
    }

    /// Returns the volume actually applied.
    pub fn set_volume(&mut self, volume: f32) -> Result<f32, PlaybackError> {
        let v = clamp_volume(volume);
        self.engine.send(Command::SetVolume(v))?;
        self.volume = v;
        Ok(v)
    }

    pub fn set_crossfade(&mut self, seconds: f64) -> Result<f64, PlaybackError> {
        let s = clamp_crossfade(seconds);
        self.engine.send(Command::SetCrossfade(s))?;
        self.crossfade_secs = s;
        Ok(s)
    }

    pub fn set_equalizer(&mut self, eq: EqSettings) -> Result<EqSettings, PlaybackError> {
        let eq = eq.clamp();
        self.engine.send(Command::SetEqualizer(eq))?;
        self.eq = eq;
        Ok(eq)
    }

    /// Skip forward. Starts the new track unless stopped.
    pub fn next(&mut self) -> Result<Option<usize>, PlaybackError> {
        let next = self.playlist.next();
        if next.is_some() && self.state != PlaybackState::Stopped {
            self.play_current()?;
        }
        Ok(next)
    }

    pub fn previous(&mut self) -> Result<Option<usize>, PlaybackError> {
        let prev = self.playlist.previous();
        if prev.is_some() && self.state != PlaybackState::Stopped {
            self.play_current()?;
        }
        Ok(prev)
    }

    // ---- playlist ----

    pub fn add(&mut self, track: Track) {
        self.playlist.add(track);
    }

    pub fn add_path(&mut self, path: &Path) {
        self.playlist.add(Track::from_path(path));
    }

    pub fn add_folder(&mut self, dir: &Path) -> Result<usize, PersistenceError> {
        self.playlist.add_folder(dir)
    }

    /// Remove a track; stops playback if it was the one playing.
    pub fn remove(&mut self, index: usize) -> Result<Track, PlaybackError> {
        let was_current = self.playlist.current() == Some(index);
        let len = self.playlist.len();
        let track = self
            .playlist
            .remove(index)
            .ok_or(PlaybackError::NoSuchTrack { index, len })?;
        if was_current && self.state != PlaybackState::Stopped {
            self.stop()?;
        }
        Ok(track)
    }

    pub fn reorder(&mut self, from: usize, to: usize) -> bool {
        self.playlist.reorder(from, to)
    }

    pub fn toggle_shuffle(&mut self) -> bool {
        self.playlist.toggle_shuffle()
    }

    pub fn toggle_repeat(&mut self) -> bool {
        self.playlist.toggle_repeat()
    }

    pub fn clear(&mut self) -> Result<(), PlaybackError> {
        if self.state != PlaybackState::Stopped {
            self.stop()?;
        }
        self.playlist.clear();
        Ok(())
    }

    pub fn save_playlist(&self, path: &Path) -> Result<(), PersistenceError> {
        self.playlist.save(path)
    }

    /// Replace the playlist with the one at `path`, keeping the shuffle and
    /// repeat flags. Returns the entries that were dropped.
    pub fn load_playlist(&mut self, path: &Path) -> crate::error::Result<Vec<PersistenceError>> {
        let loaded = Playlist::load(path)?;
        if self.state != PlaybackState::Stopped {
            self.stop()?;
        }
        let mut playlist = loaded.playlist;
        if self.playlist.is_shuffle() {
            playlist.toggle_shuffle();
        }
        if self.playlist.is_repeat() {
            playlist.toggle_repeat();
        }
        self.playlist = playlist;
        Ok(loaded.dropped)
    }

    // ---- events ----

    /// Apply pending lifecycle events without blocking. Returns those that
    /// belong to the current track.
    pub fn poll_events(&mut self) -> Vec<EngineEvent> {
        let pending: Vec<EngineEvent> = self.lifecycle.try_iter().collect();
        let mut out = Vec::new();
        for ev in pending {
            self.apply(ev, &mut out);
        }
        out
    }

    /// Like [`poll_events`](Self::poll_events), but waits up to `timeout`
    /// for the first event.
    pub fn wait_events(&mut self, timeout: Duration) -> Vec<EngineEvent> {
        let deadline = Instant::now() + timeout;
        let mut out = Vec::new();
        while out.is_empty() {
            let left = deadline.saturating_duration_since(Instant::now());
            match self.lifecycle.recv_timeout(left) {
                Ok(ev) => self.apply(ev, &mut out),
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        out.extend(self.poll_events());
        out
    }

    fn apply(&mut self, ev: EngineEvent, out: &mut Vec<EngineEvent>) {
        match ev {
            EngineEvent::TrackEnded { generation } if generation == self.generation => {
                if self.state == PlaybackState::Stopped {
                    return;
                }
                let was_paused = self.state == PlaybackState::Paused;
                self.state = PlaybackState::Stopped;
                out.push(ev);
                if was_paused {
                    // The end raced a pause: move on but stay put at the next track.
                    let next = self.playlist.advance_on_track_end();
                    log::debug!("track ended while paused, next is {next:?}");
                    return;
                }
                match self.playlist.advance_on_track_end() {
                    Some(i) => {
                        if let Err(e) = self.play_current() {
                            log::error!("cannot continue with track {i}: {e}");
                            out.push(EngineEvent::Error {
                                generation: self.generation,
                                error: Arc::new(e),
                            });
                        }
                    }
                    None => log::info!("end of playlist"),
                }
            }
            EngineEvent::Error { generation, .. } if generation == self.generation => {
                self.state = PlaybackState::Stopped;
                out.push(ev);
            }
            EngineEvent::StateChanged { generation, .. } if generation == self.generation => {
                out.push(ev);
            }
            other => log::debug!("ignoring stale event {other:?}"),
        }
    }

    fn expect_state(&self, op: &'static str, want: PlaybackState) -> Result<(), PlaybackError> {
        if self.state == want {
            Ok(())
        } else {
            Err(PlaybackError::InvalidTransition {
                op,
                state: self.state,
            })
        }
    }
}
