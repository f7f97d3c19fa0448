use rand::Rng;
use std::fs;
use std::path::{Path, PathBuf};

use crate::audio::decoder::is_audio_path;
use crate::error::PersistenceError;
use crate::playback::metadata::Track;

/// Ordered tracks plus the shuffle/repeat policy that picks what plays next.
///
/// `current` is `Some(i)` with `i < len` whenever the list is non-empty and
/// `None` when it is empty.
#[derive(Debug, Default, Clone)]
pub struct Playlist {
    tracks: Vec<Track>,
    current: Option<usize>,
    shuffle: bool,
    repeat: bool,
}

/// Result of [`Playlist::load`]: entries whose file is gone are dropped and
/// reported rather than failing the whole load.
#[derive(Debug)]
pub struct PlaylistLoad {
    pub playlist: Playlist,
    pub dropped: Vec<PersistenceError>,
}

impl Playlist {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn get(&self, index: usize) -> Option<&Track> {
        self.tracks.get(index)
    }

    pub fn current(&self) -> Option<usize> {
        self.current
    }

    pub fn current_track(&self) -> Option<&Track> {
        self.current.and_then(|i| self.tracks.get(i))
    }

    pub fn is_shuffle(&self) -> bool {
        self.shuffle
    }

    pub fn is_repeat(&self) -> bool {
        self.repeat
    }

    pub fn toggle_shuffle(&mut self) -> bool {
        self.shuffle = !self.shuffle;
        self.shuffle
    }

    pub fn toggle_repeat(&mut self) -> bool {
        self.repeat = !self.repeat;
        self.repeat
    }

    pub fn add(&mut self, track: Track) {
        self.tracks.push(track);
        if self.current.is_none() {
            self.current = Some(0);
        }
    }

    /// Add every audio file directly inside `dir`, sorted by file name.
    /// Returns how many were added.
    pub fn add_folder(&mut self, dir: &Path) -> Result<usize, PersistenceError> {
        let io_err = |source| PersistenceError::Io {
            path: dir.to_path_buf(),
            source,
        };
        let mut paths: Vec<PathBuf> = fs::read_dir(dir)
            .map_err(io_err)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_file() && is_audio_path(p))
            .collect();
        paths.sort();

        let added = paths.len();
        for p in paths {
            self.add(Track::from_path(&p));
        }
        Ok(added)
    }

    /// Remove and return the track at `index`. Removing the current track
    /// makes the following one current.
    pub fn remove(&mut self, index: usize) -> Option<Track> {
        if index >= self.tracks.len() {
            return None;
        }
        let removed = self.tracks.remove(index);
        self.current = match self.current {
            _ if self.tracks.is_empty() => None,
            Some(c) if index < c => Some(c - 1),
            Some(c) if index == c => Some(c.min(self.tracks.len() - 1)),
            other => other,
        };
        Some(removed)
    }

    /// Move the track at `from` to `to`. The current index follows the track
    /// that was current.
    pub fn reorder(&mut self, from: usize, to: usize) -> bool {
        let len = self.tracks.len();
        if from >= len || to >= len {
            return false;
        }
        if from == to {
            return true;
        }
        let t = self.tracks.remove(from);
        self.tracks.insert(to, t);

        if let Some(c) = self.current {
            self.current = Some(if c == from {
                to
            } else if from < c && c <= to {
                c - 1
            } else if to <= c && c < from {
                c + 1
            } else {
                c
            });
        }
        true
    }

    pub fn select(&mut self, index: usize) -> bool {
        if index >= self.tracks.len() {
            return false;
        }
        self.current = Some(index);
        true
    }

    /// Re-read the track at `index` if its file changed since it was loaded.
    pub fn refresh_stale(&mut self, index: usize) -> bool {
        match self.tracks.get_mut(index) {
            Some(t) if t.is_stale() => {
                *t = t.reload();
                true
            }
            _ => false,
        }
    }

    pub fn clear(&mut self) {
        self.tracks.clear();
        self.current = None;
    }

    /// Manual skip. Always wraps; under shuffle picks any other track.
    pub fn next(&mut self) -> Option<usize> {
        let cur = self.current?;
        let len = self.tracks.len();
        let next = if self.shuffle && len > 1 {
            random_other(cur, len)
        } else {
            (cur + 1) % len
        };
        self.current = Some(next);
        Some(next)
    }

    /// Manual step back. Ignores shuffle.
    pub fn previous(&mut self) -> Option<usize> {
        let cur = self.current?;
        let len = self.tracks.len();
        let prev = (cur + len - 1) % len;
        self.current = Some(prev);
        Some(prev)
    }

    /// What plays after the current track finishes on its own. `None` means
    /// playback should stop; the current index is left where it was.
    pub fn advance_on_track_end(&mut self) -> Option<usize> {
        let cur = self.current?;
        let len = self.tracks.len();
        let next = if self.shuffle && len > 1 {
            random_other(cur, len)
        } else if cur + 1 < len {
            cur + 1
        } else if self.repeat {
            0
        } else {
            return None;
        };
        self.current = Some(next);
        Some(next)
    }

    /// Write the playlist as a pretty-printed JSON array of absolute paths.
    pub fn save(&self, path: &Path) -> Result<(), PersistenceError> {
        let paths: Vec<&Path> = self.tracks.iter().map(|t| t.path.as_path()).collect();
        let raw = serde_json::to_string_pretty(&paths).map_err(|source| PersistenceError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| PersistenceError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        }
        fs::write(path, raw).map_err(|source| PersistenceError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn load(path: &Path) -> Result<PlaylistLoad, PersistenceError> {
        let raw = fs::read_to_string(path).map_err(|source| PersistenceError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let entries: Vec<PathBuf> =
            serde_json::from_str(&raw).map_err(|source| PersistenceError::Parse {
                path: path.to_path_buf(),
                source,
            })?;

        let mut playlist = Playlist::new();
        let mut dropped = Vec::new();
        for entry in entries {
            if entry.is_file() {
                playlist.add(Track::from_path(&entry));
            } else {
                log::warn!("dropping missing playlist entry {}", entry.display());
                dropped.push(PersistenceError::StalePath(entry));
            }
        }
        Ok(PlaylistLoad { playlist, dropped })
    }
}

/// Uniform pick from `0..len` excluding `cur`. Requires `len > 1`.
fn random_other(cur: usize, len: usize) -> usize {
    let r = rand::thread_rng().gen_range(0..len - 1);
    if r >= cur {
        r + 1
    } else {
        r
    }
}
