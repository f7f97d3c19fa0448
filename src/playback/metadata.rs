use lofty::{Accessor, AudioFile, TaggedFileExt};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

/// A loaded track. Immutable; use [`Track::is_stale`] / [`Track::reload`] when
/// the file on disk may have changed.
#[derive(Debug, Clone, PartialEq)]
pub struct Track {
    pub path: PathBuf,
    /// Seconds. Zero when neither the container nor the tags know it.
    pub duration: f64,
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub artwork: Option<Arc<[u8]>>,
    pub artwork_hash: Option<u64>,
    modified: Option<SystemTime>,
}

impl Track {
    /// Read tags for `path`. Tag failures are not errors: the track keeps its
    /// path and empty metadata.
    pub fn from_path(path: &Path) -> Self {
        let path = absolute(path);
        let modified = std::fs::metadata(&path).and_then(|m| m.modified()).ok();
        let mut track = Self {
            path,
            duration: 0.0,
            title: None,
            artist: None,
            album: None,
            artwork: None,
            artwork_hash: None,
            modified,
        };
        if let Err(e) = read_tags(&mut track) {
            log::debug!("no tags for {}: {e}", track.path.display());
        }
        track
    }

    pub fn with_duration(mut self, duration: f64) -> Self {
        if duration.is_finite() && duration > 0.0 {
            self.duration = duration;
        }
        self
    }

    pub fn display_title(&self) -> String {
        if let Some(t) = self.title.as_deref().filter(|t| !t.trim().is_empty()) {
            return t.to_string();
        }
        self.path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("Unknown")
            .to_string()
    }

    pub fn display_artist(&self) -> &str {
        self.artist
            .as_deref()
            .filter(|a| !a.trim().is_empty())
            .unwrap_or("Unknown Artist")
    }

    /// True when the file's modification time differs from the one seen at load.
    pub fn is_stale(&self) -> bool {
        let now = std::fs::metadata(&self.path).and_then(|m| m.modified()).ok();
        now != self.modified
    }

    pub fn reload(&self) -> Self {
        Self::from_path(&self.path).with_duration(self.duration)
    }
}

fn read_tags(track: &mut Track) -> anyhow::Result<()> {
    let tagged = lofty::read_from_path(&track.path)?;
    track.duration = tagged.properties().duration().as_secs_f64();

    if let Some(tag) = tagged.primary_tag().or_else(|| tagged.first_tag()) {
        track.title = tag.title().map(|t| t.to_string());
        track.artist = tag.artist().map(|a| a.to_string());
        track.album = tag.album().map(|al| al.to_string());

        if let Some(pic) = tag.pictures().first() {
            let bytes = pic.data();
            track.artwork_hash = Some(hash_bytes(bytes));
            track.artwork = Some(Arc::from(bytes));
        }
    }
    Ok(())
}

fn absolute(path: &Path) -> PathBuf {
    if let Ok(p) = std::fs::canonicalize(path) {
        return p;
    }
    if path.is_absolute() {
        return path.to_path_buf();
    }
    std::env::current_dir()
        .map(|cwd| cwd.join(path))
        .unwrap_or_else(|_| path.to_path_buf())
}

fn hash_bytes(bytes: &[u8]) -> u64 {
    let mut h = DefaultHasher::new();
    bytes.hash(&mut h);
    h.finish()
}
