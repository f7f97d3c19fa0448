//! Streaming decode of a local file into interleaved `f32` frames.
//!
//! Container detection is done by content sniffing: the probe is never given
//! the file extension, so a mislabelled file is either played correctly or
//! rejected, never misplayed.

use std::fs::File;
use std::io::ErrorKind;
use std::path::Path;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{Decoder, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::{Error as SymphoniaError, SeekErrorKind};
use symphonia::core::formats::{FormatOptions, FormatReader, SeekMode, SeekTo};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::units::{Time, TimeBase};

use crate::error::DecodeError;
use crate::playback::metadata::Track;

/// An open, forward-only decode of one file.
pub struct AudioStream {
    track: Track,
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    time_base: Option<TimeBase>,
    sample_rate: u32,
    channels: usize,
    duration: f64,
    pending: Vec<f32>,
    position_frames: u64,
    // First frame to keep after a seek; earlier frames of the landing packet are dropped.
    seek_target: Option<u64>,
    exhausted: bool,
    #[cfg(test)]
    fail_at: Option<u64>,
}

impl AudioStream {
    pub fn open(path: &Path) -> Result<Self, DecodeError> {
        let file = File::open(path).map_err(|source| DecodeError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let probed = symphonia::default::get_probe()
            .format(
                &Hint::new(),
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|e| map_err(path, "probe", e))?;
        let format = probed.format;

        let Some(track) = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        else {
            return Err(DecodeError::UnsupportedFormat {
                path: path.to_path_buf(),
            });
        };

        let params = track.codec_params.clone();
        let track_id = track.id;

        let decoder = symphonia::default::get_codecs()
            .make(&params, &DecoderOptions::default())
            .map_err(|e| map_err(path, "codec", e))?;

        let sample_rate = params.sample_rate.filter(|r| *r > 0).ok_or_else(|| {
            DecodeError::CorruptData {
                path: path.to_path_buf(),
                stage: "probe",
                reason: "unknown sample rate".to_string(),
            }
        })?;
        let channels = params.channels.map(|c| c.count()).unwrap_or(0);
        if channels == 0 {
            return Err(DecodeError::CorruptData {
                path: path.to_path_buf(),
                stage: "probe",
                reason: "unknown channel layout".to_string(),
            });
        }

        let tags = Track::from_path(path);
        let duration = params
            .n_frames
            .map(|n| n as f64 / sample_rate as f64)
            .unwrap_or(tags.duration);
        let track = tags.with_duration(duration);

        log::debug!(
            "opened {} ({} Hz, {} ch, {:.2}s)",
            path.display(),
            sample_rate,
            channels,
            duration
        );

        Ok(Self {
            track,
            format,
            decoder,
            track_id,
            time_base: params.time_base,
            sample_rate,
            channels,
            duration,
            pending: Vec::new(),
            position_frames: 0,
            seek_target: None,
            exhausted: false,
            #[cfg(test)]
            fail_at: None,
        })
    }

    pub fn track(&self) -> &Track {
        &self.track
    }

    pub fn title(&self) -> Option<&str> {
        self.track.title.as_deref()
    }

    pub fn artist(&self) -> Option<&str> {
        self.track.artist.as_deref()
    }

    pub fn embedded_artwork(&self) -> Option<&[u8]> {
        self.track.artwork.as_deref()
    }

    /// Seconds.
    pub fn duration(&self) -> f64 {
        self.duration
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channel_count(&self) -> usize {
        self.channels
    }

    /// Seconds of audio already returned by [`read_frames`](Self::read_frames).
    pub fn position(&self) -> f64 {
        self.position_frames as f64 / self.sample_rate as f64
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted && self.pending.is_empty()
    }

    /// Read up to `frames` interleaved frames. An empty result means the
    /// stream is finished.
    pub fn read_frames(&mut self, frames: usize) -> Result<Vec<f32>, DecodeError> {
        #[cfg(test)]
        if self.fail_at.is_some_and(|at| self.position_frames >= at) {
            return Err(DecodeError::CorruptData {
                path: self.track.path.clone(),
                stage: "decode",
                reason: "bad frame".to_string(),
            });
        }
        let want = frames * self.channels;
        while self.pending.len() < want && !self.exhausted {
            self.decode_next()?;
        }

        let take = want.min(self.pending.len());
        let take = take - take % self.channels;
        let out: Vec<f32> = self.pending.drain(..take).collect();
        self.position_frames += (take / self.channels) as u64;
        Ok(out)
    }

    /// Reposition to `seconds` (clamped into `[0, duration]`). Returns the new
    /// position.
    pub fn seek(&mut self, seconds: f64) -> Result<f64, DecodeError> {
        let mut target = if seconds.is_finite() { seconds.max(0.0) } else { 0.0 };
        if self.duration > 0.0 {
            target = target.min(self.duration);
        }

        self.pending.clear();
        self.seek_target = None;

        if self.duration > 0.0 && target >= self.duration {
            self.finish_at(target);
            return Ok(self.position());
        }

        let time = Time::new(target.trunc() as u64, target.fract());
        let seeked = match self.format.seek(
            SeekMode::Accurate,
            SeekTo::Time {
                time,
                track_id: Some(self.track_id),
            },
        ) {
            Ok(s) => s,
            Err(SymphoniaError::SeekError(SeekErrorKind::OutOfRange)) => {
                self.finish_at(target);
                return Ok(self.position());
            }
            Err(e) => return Err(map_err(&self.track.path, "seek", e)),
        };

        self.decoder.reset();
        let required = self.ts_to_frames(seeked.required_ts);
        self.seek_target = Some(required);
        self.position_frames = required;
        self.exhausted = false;
        Ok(self.position())
    }

    /// Make reads fail once `frame` has been reached.
    #[cfg(test)]
    pub(crate) fn fail_at_frame(&mut self, frame: u64) {
        self.fail_at = Some(frame);
    }

    fn finish_at(&mut self, seconds: f64) {
        self.position_frames = (seconds * self.sample_rate as f64).round() as u64;
        self.exhausted = true;
    }

    fn decode_next(&mut self) -> Result<(), DecodeError> {
        let packet = match self.format.next_packet() {
            Ok(p) => p,
            Err(SymphoniaError::IoError(e)) if e.kind() == ErrorKind::UnexpectedEof => {
                self.exhausted = true;
                return Ok(());
            }
            Err(SymphoniaError::ResetRequired) => {
                self.exhausted = true;
                return Ok(());
            }
            Err(e) => return Err(map_err(&self.track.path, "read", e)),
        };

        if packet.track_id() != self.track_id {
            return Ok(());
        }
        let packet_start = self.ts_to_frames(packet.ts());

        let decoded = match self.decoder.decode(&packet) {
            Ok(d) => d,
            Err(SymphoniaError::DecodeError(msg)) => {
                log::warn!(
                    "skipping undecodable packet in {}: {msg}",
                    self.track.path.display()
                );
                return Ok(());
            }
            Err(SymphoniaError::IoError(e)) if e.kind() == ErrorKind::UnexpectedEof => {
                self.exhausted = true;
                return Ok(());
            }
            Err(e) => return Err(map_err(&self.track.path, "decode", e)),
        };

        let spec = *decoded.spec();
        let frames = decoded.frames();
        if spec.channels.count() != self.channels {
            return Err(DecodeError::CorruptData {
                path: self.track.path.clone(),
                stage: "decode",
                reason: format!(
                    "channel count changed from {} to {}",
                    self.channels,
                    spec.channels.count()
                ),
            });
        }

        let mut sample_buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
        sample_buf.copy_interleaved_ref(decoded);
        let samples = sample_buf.samples();

        let mut skip = 0usize;
        if let Some(target) = self.seek_target {
            if packet_start + frames as u64 <= target {
                return Ok(());
            }
            skip = target.saturating_sub(packet_start) as usize;
            self.seek_target = None;
        }

        let start = (skip * self.channels).min(samples.len());
        self.pending.extend_from_slice(&samples[start..]);
        Ok(())
    }

    fn ts_to_frames(&self, ts: u64) -> u64 {
        match self.time_base {
            Some(tb) => {
                let t = tb.calc_time(ts);
                ((t.seconds as f64 + t.frac) * self.sample_rate as f64).round() as u64
            }
            None => ts,
        }
    }
}

fn map_err(path: &Path, stage: &'static str, e: SymphoniaError) -> DecodeError {
    match e {
        // The probe scans until EOF when nothing matches.
        SymphoniaError::IoError(io) if stage == "probe" && io.kind() == ErrorKind::UnexpectedEof => {
            DecodeError::UnsupportedFormat {
                path: path.to_path_buf(),
            }
        }
        SymphoniaError::IoError(source) => DecodeError::Io {
            path: path.to_path_buf(),
            source,
        },
        SymphoniaError::Unsupported(_) => DecodeError::UnsupportedFormat {
            path: path.to_path_buf(),
        },
        other => DecodeError::CorruptData {
            path: path.to_path_buf(),
            stage,
            reason: other.to_string(),
        },
    }
}

/// Extension filter for folder browsing. Format support is decided by
/// [`AudioStream::open`], not by this.
pub fn is_audio_path(p: &Path) -> bool {
    let Some(ext) = p.extension().and_then(|s| s.to_str()) else {
        return false;
    };
    matches!(
        ext.to_lowercase().as_str(),
        "mp3" | "flac" | "wav" | "ogg" | "oga" | "aac" | "m4a" | "aif" | "aiff"
    )
}
