//! Playback state machine run on the engine thread.
//!
//! Each tick pulls one buffer from the current stream, equalizes it, feeds the
//! analysis tap, applies gain and writes it to the output. The write blocks on
//! the device ring, so ticks run at hardware cadence.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::audio::decoder::AudioStream;
use crate::audio::equalizer::{EqSettings, Equalizer};
use crate::audio::output::{AudioOutput, StreamSpec};
use crate::audio::tap::AnalysisTap;
use crate::error::{DecodeError, PlaybackError};
use crate::playback::events::{EngineEvent, EventBus};
use crate::playback::{PlaybackHandle, PlaybackInfo, PlaybackState};

pub enum Command {
    Play {
        stream: Box<AudioStream>,
        generation: u64,
    },
    Pause,
    Resume,
    Seek(f64),
    Stop,
    SetVolume(f32),
    SetCrossfade(f64),
    SetEqualizer(EqSettings),
    Shutdown,
}

impl Command {
    /// Settings changes that do not interrupt a crossfade in progress.
    fn is_setting(&self) -> bool {
        matches!(
            self,
            Command::SetVolume(_) | Command::SetCrossfade(_) | Command::SetEqualizer(_)
        )
    }
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub buffer_frames: usize,
    pub position_interval: Duration,
    pub volume: f32,
    pub crossfade_secs: f64,
    pub equalizer: EqSettings,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            buffer_frames: 1024,
            position_interval: Duration::from_millis(100),
            volume: 1.0,
            crossfade_secs: 0.0,
            equalizer: EqSettings::default(),
        }
    }
}

/// Outgoing track fading to silence before `next` takes over.
struct Fade {
    next: Box<AudioStream>,
    next_generation: u64,
    total: usize,
    remaining: usize,
    gain: f32,
}

pub struct Scheduler {
    output: Box<dyn AudioOutput>,
    bus: EventBus,
    status: PlaybackHandle,
    tap: AnalysisTap,
    eq: Equalizer,

    stream: Option<Box<AudioStream>>,
    generation: u64,
    state: PlaybackState,
    volume: f32,
    crossfade_secs: f64,
    fade: Option<Fade>,

    buffer_frames: usize,
    position_interval: Duration,
    last_position: Option<Instant>,
    device_failed: bool,
    // A track ended naturally and its tail is still queued in the output.
    tail_pending: bool,
}

pub fn clamp_volume(v: f32) -> f32 {
    if v.is_nan() {
        0.0
    } else {
        v.clamp(0.0, 1.0)
    }
}

pub fn clamp_crossfade(secs: f64) -> f64 {
    if secs.is_finite() {
        secs.max(0.0)
    } else {
        0.0
    }
}

impl Scheduler {
    pub fn new(
        output: Box<dyn AudioOutput>,
        bus: EventBus,
        status: PlaybackHandle,
        tap: AnalysisTap,
        cfg: SchedulerConfig,
    ) -> Self {
        Self {
            output,
            bus,
            status,
            tap,
            eq: Equalizer::new(cfg.equalizer, 44_100, 2),
            stream: None,
            generation: 0,
            state: PlaybackState::Stopped,
            volume: clamp_volume(cfg.volume),
            crossfade_secs: clamp_crossfade(cfg.crossfade_secs),
            fade: None,
            buffer_frames: cfg.buffer_frames.max(1),
            position_interval: cfg.position_interval,
            last_position: None,
            device_failed: false,
            tail_pending: false,
        }
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    /// True while ticks have audio to render.
    pub fn is_active(&self) -> bool {
        self.state == PlaybackState::Playing
    }

    /// Apply one command. Returns `false` once the engine should shut down.
    pub fn handle(&mut self, cmd: Command) -> bool {
        if self.fade.is_some() && !cmd.is_setting() {
            self.complete_switch();
        }

        match cmd {
            Command::Play { stream, generation } => self.play(stream, generation),
            Command::Pause => {
                if self.state == PlaybackState::Playing {
                    self.output.set_paused(true);
                    self.set_state(PlaybackState::Paused);
                    self.report_position(true);
                } else {
                    log::debug!("pause ignored while {:?}", self.state);
                }
            }
            Command::Resume => {
                if self.state == PlaybackState::Paused {
                    self.output.set_paused(false);
                    self.set_state(PlaybackState::Playing);
                } else {
                    log::debug!("resume ignored while {:?}", self.state);
                }
            }
            Command::Seek(secs) => self.seek(secs),
            Command::Stop => self.stop(),
            Command::SetVolume(v) => self.volume = clamp_volume(v),
            Command::SetCrossfade(secs) => self.crossfade_secs = clamp_crossfade(secs),
            Command::SetEqualizer(eq) => self.eq.set_settings(eq.clamp()),
            Command::Shutdown => {
                self.release(true);
                return false;
            }
        }
        true
    }

    /// Render one buffer. No-op unless playing.
    pub fn tick(&mut self) {
        if self.state != PlaybackState::Playing {
            return;
        }
        let want = match &self.fade {
            Some(f) => self.buffer_frames.min(f.remaining.max(1)),
            None => self.buffer_frames,
        };
        let Some(stream) = self.stream.as_mut() else {
            self.set_state(PlaybackState::Stopped);
            return;
        };
        let channels = stream.channel_count();

        let mut frames = match stream.read_frames(want) {
            Ok(f) => f,
            Err(e) => {
                self.decode_failed(e);
                return;
            }
        };
        if frames.is_empty() {
            if self.fade.is_some() {
                self.complete_switch();
            } else {
                self.track_ended();
            }
            return;
        }

        self.eq.process(&mut frames);
        self.tap.push(&frames, channels);

        match self.fade.as_mut() {
            Some(fade) => {
                for frame in frames.chunks_exact_mut(channels) {
                    let g = fade.gain * fade.remaining as f32 / fade.total as f32;
                    frame.iter_mut().for_each(|s| *s *= g);
                    fade.remaining = fade.remaining.saturating_sub(1);
                }
            }
            None => {
                if self.volume != 1.0 {
                    let v = self.volume;
                    frames.iter_mut().for_each(|s| *s *= v);
                }
            }
        }

        if let Err(e) = self.output.write(&frames) {
            self.device_failed(e);
            return;
        }

        if self.fade.as_ref().is_some_and(|f| f.remaining == 0) {
            self.complete_switch();
        }
        self.report_position(false);
    }

    fn play(&mut self, stream: Box<AudioStream>, generation: u64) {
        let fading = self.state == PlaybackState::Playing
            && self.crossfade_secs > 0.0
            && self.stream.is_some();
        if fading {
            let rate = self
                .stream
                .as_ref()
                .map(|s| s.sample_rate())
                .unwrap_or(44_100);
            let total = ((self.crossfade_secs * rate as f64).round() as usize).max(1);
            log::debug!("crossfading into {} over {total} frames", stream.track().path.display());
            self.fade = Some(Fade {
                next: stream,
                next_generation: generation,
                total,
                remaining: total,
                gain: self.volume,
            });
            return;
        }
        // After a natural end the next track queues behind the old tail.
        let flush = !self.tail_pending;
        self.start(stream, generation, flush);
    }

    fn complete_switch(&mut self) {
        if let Some(fade) = self.fade.take() {
            self.start(fade.next, fade.next_generation, false);
        }
    }

    /// Make `stream` current. `flush` discards audio still queued for the
    /// previous track.
    fn start(&mut self, stream: Box<AudioStream>, generation: u64, flush: bool) {
        self.stream = None;
        if flush {
            self.output.flush();
        }
        self.tail_pending = false;
        self.generation = generation;

        let spec = StreamSpec {
            sample_rate: stream.sample_rate(),
            channels: stream.channel_count(),
        };
        self.device_failed = false;
        if let Err(e) = self.output.configure(spec) {
            self.device_failed(e);
            return;
        }
        self.output.set_paused(false);
        self.eq.configure(spec.sample_rate, spec.channels);
        self.tap.configure(spec.sample_rate);

        log::info!(
            "playing {} - {}",
            stream.track().display_artist(),
            stream.track().display_title()
        );
        self.stream = Some(stream);
        self.set_state(PlaybackState::Playing);
        self.report_position(true);
    }

    fn seek(&mut self, secs: f64) {
        if self.state == PlaybackState::Stopped {
            log::debug!("seek ignored while stopped");
            return;
        }
        let Some(stream) = self.stream.as_mut() else {
            return;
        };
        self.output.flush();
        self.eq.reset();
        self.tap.reset();
        match stream.seek(secs) {
            Ok(pos) => {
                log::debug!("seeked to {pos:.3}s");
                self.report_position(true);
            }
            Err(e) => self.decode_failed(e),
        }
    }

    fn stop(&mut self) {
        self.release(true);
        self.set_state(PlaybackState::Stopped);
        self.report_position(true);
    }

    fn release(&mut self, flush: bool) {
        self.stream = None;
        self.fade = None;
        if flush {
            self.output.flush();
            self.tail_pending = false;
        }
        self.output.set_paused(false);
    }

    fn track_ended(&mut self) {
        log::debug!("track ended (generation {})", self.generation);
        // The ring keeps its tail so the next track follows without a gap.
        self.release(false);
        self.tail_pending = true;
        self.set_state(PlaybackState::Stopped);
        self.update_status(0.0, 0.0);
        self.bus.publish(EngineEvent::TrackEnded {
            generation: self.generation,
        });
    }

    fn decode_failed(&mut self, e: DecodeError) {
        log::error!("stopping {}: {e}", e.path().display());
        self.release(true);
        self.set_state(PlaybackState::Stopped);
        self.update_status(0.0, 0.0);
        self.bus.publish(EngineEvent::Error {
            generation: self.generation,
            error: Arc::new(PlaybackError::Decode(e)),
        });
    }

    fn device_failed(&mut self, e: PlaybackError) {
        self.release(true);
        self.set_state(PlaybackState::Stopped);
        self.update_status(0.0, 0.0);
        if self.device_failed {
            return;
        }
        self.device_failed = true;
        log::error!("{e}");
        self.bus.publish(EngineEvent::Error {
            generation: self.generation,
            error: Arc::new(e),
        });
    }

    fn set_state(&mut self, state: PlaybackState) {
        if self.state == state {
            return;
        }
        self.state = state;
        if let Ok(mut info) = self.status.lock() {
            info.state = state;
            info.generation = self.generation;
        }
        self.bus.publish(EngineEvent::StateChanged {
            generation: self.generation,
            state,
        });
    }

    /// Seconds actually heard: decoded position minus what still sits in
    /// the output ring.
    fn heard_position(&self) -> (f64, f64) {
        let Some(stream) = self.stream.as_ref() else {
            return (0.0, 0.0);
        };
        let buffered = self.output.buffered_frames() as f64 / stream.sample_rate() as f64;
        let duration = stream.duration();
        let mut pos = (stream.position() - buffered).max(0.0);
        if duration > 0.0 {
            pos = pos.min(duration);
        }
        (pos, duration)
    }

    fn report_position(&mut self, force: bool) {
        let (position, duration) = self.heard_position();
        self.update_status(position, duration);

        let due = self
            .last_position
            .map_or(true, |t| t.elapsed() >= self.position_interval);
        if !(force || due) {
            return;
        }
        self.last_position = Some(Instant::now());
        self.bus.publish(EngineEvent::Position {
            generation: self.generation,
            position,
            duration,
        });
    }

    fn update_status(&self, position: f64, duration: f64) {
        if let Ok(mut info) = self.status.lock() {
            *info = PlaybackInfo {
                generation: self.generation,
                state: self.state,
                position,
                duration,
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;
    use std::sync::{Arc, Mutex};

    use crossbeam_channel::Receiver;

    use super::*;
    use crate::audio::decoder::fixtures::{constant_wav, ramp_wav};
    use crate::audio::output::memory::{HeldOutput, MemoryOutput};
    use crate::audio::tap::AnalysisWindow;

    struct Rig {
        sched: Scheduler,
        out: MemoryOutput,
        events: Receiver<EngineEvent>,
        status: PlaybackHandle,
        _windows: Receiver<AnalysisWindow>,
    }

    fn rig(cfg: SchedulerConfig) -> Rig {
        let out = MemoryOutput::default();
        let bus = EventBus::new();
        let events = bus.subscribe_lifecycle();
        let status: PlaybackHandle = Arc::new(Mutex::new(PlaybackInfo::default()));
        let (tap, windows) = AnalysisTap::new(256, 30, 2);
        let sched = Scheduler::new(Box::new(out.clone()), bus, Arc::clone(&status), tap, cfg);
        Rig {
            sched,
            out,
            events,
            status,
            _windows: windows,
        }
    }

    fn small_buffers() -> SchedulerConfig {
        SchedulerConfig {
            buffer_frames: 256,
            ..Default::default()
        }
    }

    fn open(p: &std::path::Path) -> Box<AudioStream> {
        Box::new(AudioStream::open(p).unwrap())
    }

    fn states(rx: &Receiver<EngineEvent>) -> Vec<PlaybackState> {
        rx.try_iter()
            .filter_map(|e| match e {
                EngineEvent::StateChanged { state, .. } => Some(state),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn play_pause_resume_stop_transitions() {
        let dir = tempfile::tempdir().unwrap();
        let a = ramp_wav(dir.path(), "a.wav", 8_000, 8_000);
        let mut r = rig(small_buffers());

        r.sched.handle(Command::Play {
            stream: open(&a),
            generation: 1,
        });
        r.sched.tick();
        r.sched.handle(Command::Pause);
        assert!(r.out.paused.load(Ordering::Relaxed));
        let heard = r.status.lock().unwrap().position;
        assert!((heard - 256.0 / 8_000.0).abs() < 1e-9);

        // Ticks while paused render nothing.
        let before = r.out.written.lock().unwrap().len();
        r.sched.tick();
        assert_eq!(r.out.written.lock().unwrap().len(), before);

        r.sched.handle(Command::Resume);
        assert!(!r.out.paused.load(Ordering::Relaxed));
        r.sched.tick();
        // Resume continues where pause left off.
        let written = r.out.written.lock().unwrap().clone();
        assert_eq!(written.len(), 512);
        assert_eq!((written[256] * 32768.0).round() as i32, 256);

        r.sched.handle(Command::Stop);
        assert_eq!(
            states(&r.events),
            vec![
                PlaybackState::Playing,
                PlaybackState::Paused,
                PlaybackState::Playing,
                PlaybackState::Stopped
            ]
        );
        assert_eq!(r.status.lock().unwrap().position, 0.0);
    }

    #[test]
    fn invalid_commands_are_ignored() {
        let mut r = rig(small_buffers());
        r.sched.handle(Command::Pause);
        r.sched.handle(Command::Resume);
        r.sched.handle(Command::Seek(3.0));
        assert_eq!(r.sched.state(), PlaybackState::Stopped);
        assert!(states(&r.events).is_empty());
    }

    #[test]
    fn volume_is_clamped_and_applied() {
        let dir = tempfile::tempdir().unwrap();
        let a = constant_wav(dir.path(), "a.wav", 8_000, 4_000, 0.5);
        let mut r = rig(small_buffers());

        r.sched.handle(Command::SetVolume(-1.0));
        assert_eq!(r.sched.volume(), 0.0);
        r.sched.handle(Command::SetVolume(2.0));
        assert_eq!(r.sched.volume(), 1.0);
        r.sched.handle(Command::SetVolume(f32::NAN));
        assert_eq!(r.sched.volume(), 0.0);

        r.sched.handle(Command::SetVolume(0.5));
        r.sched.handle(Command::Play {
            stream: open(&a),
            generation: 1,
        });
        r.sched.tick();
        let written = r.out.written.lock().unwrap();
        assert!(written.iter().all(|s| (s - 0.25).abs() < 1e-4));
    }

    #[test]
    fn natural_end_publishes_track_ended_and_stops() {
        let dir = tempfile::tempdir().unwrap();
        let a = ramp_wav(dir.path(), "a.wav", 8_000, 1_000);
        let mut r = rig(small_buffers());

        r.sched.handle(Command::Play {
            stream: open(&a),
            generation: 7,
        });
        for _ in 0..10 {
            r.sched.tick();
        }
        assert_eq!(r.sched.state(), PlaybackState::Stopped);
        assert_eq!(r.out.written.lock().unwrap().len(), 1_000);
        // The tail is not flushed on a natural end.
        assert_eq!(*r.out.flushes.lock().unwrap(), 1);

        let events: Vec<_> = r.events.try_iter().collect();
        let ended = events
            .iter()
            .position(|e| matches!(e, EngineEvent::TrackEnded { generation: 7 }))
            .unwrap();
        let stopped = events
            .iter()
            .position(|e| {
                matches!(
                    e,
                    EngineEvent::StateChanged {
                        state: PlaybackState::Stopped,
                        ..
                    }
                )
            })
            .unwrap();
        assert!(stopped < ended);
    }

    #[test]
    fn next_track_after_natural_end_queues_behind_the_tail() {
        let dir = tempfile::tempdir().unwrap();
        let a = constant_wav(dir.path(), "a.wav", 8_000, 1_000, 0.25);
        let b = ramp_wav(dir.path(), "b.wav", 8_000, 8_000);
        let out = HeldOutput::new(1 << 16);
        let bus = EventBus::new();
        let status: PlaybackHandle = Arc::new(Mutex::new(PlaybackInfo::default()));
        let (tap, _windows) = AnalysisTap::new(256, 30, 2);
        let mut sched = Scheduler::new(Box::new(out.clone()), bus, status, tap, small_buffers());

        sched.handle(Command::Play {
            stream: open(&a),
            generation: 1,
        });
        for _ in 0..10 {
            sched.tick();
        }
        assert_eq!(sched.state(), PlaybackState::Stopped);
        assert_eq!(out.queued().len(), 1_000);

        sched.handle(Command::Play {
            stream: open(&b),
            generation: 2,
        });
        assert_eq!(out.queued().len(), 1_000);
        sched.tick();
        let queued = out.queued();
        assert_eq!(queued.len(), 1_256);
        assert!(queued[..1_000].iter().all(|s| (s - 0.25).abs() < 1e-4));
        let head: Vec<i64> = queued[1_000..1_004]
            .iter()
            .map(|s| (s * 32768.0).round() as i64)
            .collect();
        assert_eq!(head, vec![0, 1, 2, 3]);

        sched.handle(Command::Stop);
        assert!(out.ring.is_empty());
    }

    #[test]
    fn stop_after_natural_end_drops_the_tail() {
        let dir = tempfile::tempdir().unwrap();
        let a = ramp_wav(dir.path(), "a.wav", 8_000, 1_000);
        let b = ramp_wav(dir.path(), "b.wav", 8_000, 1_000);
        let out = HeldOutput::new(1 << 16);
        let status: PlaybackHandle = Arc::new(Mutex::new(PlaybackInfo::default()));
        let (tap, _windows) = AnalysisTap::new(256, 30, 2);
        let mut sched = Scheduler::new(
            Box::new(out.clone()),
            EventBus::new(),
            status,
            tap,
            small_buffers(),
        );

        sched.handle(Command::Play {
            stream: open(&a),
            generation: 1,
        });
        for _ in 0..10 {
            sched.tick();
        }
        sched.handle(Command::Stop);
        assert!(out.ring.is_empty());

        // Once stopped explicitly, the next play starts from a clean ring.
        sched.handle(Command::Play {
            stream: open(&b),
            generation: 2,
        });
        sched.tick();
        assert_eq!(out.queued().len(), 256);
    }

    #[test]
    fn decode_failure_mid_stream_stops_and_reports_once() {
        let dir = tempfile::tempdir().unwrap();
        let a = ramp_wav(dir.path(), "a.wav", 8_000, 8_000);
        let b = ramp_wav(dir.path(), "b.wav", 8_000, 8_000);
        let mut r = rig(small_buffers());

        let mut stream = open(&a);
        stream.fail_at_frame(512);
        r.sched.handle(Command::Play {
            stream,
            generation: 3,
        });
        for _ in 0..10 {
            r.sched.tick();
        }
        assert_eq!(r.sched.state(), PlaybackState::Stopped);
        assert_eq!(r.out.written.lock().unwrap().len(), 512);
        assert_eq!(r.status.lock().unwrap().state, PlaybackState::Stopped);

        let events: Vec<_> = r.events.try_iter().collect();
        let errors: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                EngineEvent::Error { generation, error } => Some((*generation, Arc::clone(error))),
                _ => None,
            })
            .collect();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].0, 3);
        assert!(matches!(*errors[0].1, PlaybackError::Decode(_)));
        assert!(!events
            .iter()
            .any(|e| matches!(e, EngineEvent::TrackEnded { .. })));

        r.sched.handle(Command::Play {
            stream: open(&b),
            generation: 4,
        });
        r.sched.tick();
        assert_eq!(r.sched.state(), PlaybackState::Playing);
    }

    #[test]
    fn crossfade_ramp_is_linear_and_reaches_zero() {
        let dir = tempfile::tempdir().unwrap();
        let a = constant_wav(dir.path(), "a.wav", 8_000, 8_000, 0.5);
        let b = constant_wav(dir.path(), "b.wav", 8_000, 8_000, 0.25);
        let mut r = rig(SchedulerConfig {
            buffer_frames: 256,
            crossfade_secs: 0.1,
            ..Default::default()
        });

        r.sched.handle(Command::Play {
            stream: open(&a),
            generation: 1,
        });
        r.sched.tick();
        r.sched.handle(Command::Play {
            stream: open(&b),
            generation: 2,
        });
        // Volume changes mid-fade apply to the incoming track only.
        r.sched.handle(Command::SetVolume(0.5));
        for _ in 0..6 {
            r.sched.tick();
        }

        let written = r.out.written.lock().unwrap().clone();
        let fade = &written[256..256 + 800];
        assert!(fade.windows(2).all(|w| w[1] <= w[0]));
        assert!((fade[0] - 0.5).abs() < 1e-3);
        assert!((fade[400] - 0.25).abs() < 1e-3);
        assert!(fade[799] < 0.001);
        assert!(written[256 + 800..].iter().all(|s| (s - 0.125).abs() < 1e-3));
        // The outgoing tail is kept, not flushed.
        assert_eq!(*r.out.flushes.lock().unwrap(), 1);
        assert_eq!(r.status.lock().unwrap().generation, 2);
    }

    #[test]
    fn command_mid_fade_completes_the_switch_first() {
        let dir = tempfile::tempdir().unwrap();
        let a = constant_wav(dir.path(), "a.wav", 8_000, 8_000, 0.5);
        let b = constant_wav(dir.path(), "b.wav", 8_000, 8_000, 0.25);
        let mut r = rig(SchedulerConfig {
            buffer_frames: 256,
            crossfade_secs: 1.0,
            ..Default::default()
        });

        r.sched.handle(Command::Play {
            stream: open(&a),
            generation: 1,
        });
        r.sched.tick();
        r.sched.handle(Command::Play {
            stream: open(&b),
            generation: 2,
        });
        r.sched.tick();
        r.sched.handle(Command::Pause);

        assert_eq!(r.sched.state(), PlaybackState::Paused);
        let info = r.status.lock().unwrap().clone();
        assert_eq!(info.generation, 2);
        assert_eq!(info.position, 0.0);
    }

    #[test]
    fn play_while_paused_switches_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let a = constant_wav(dir.path(), "a.wav", 8_000, 8_000, 0.5);
        let b = constant_wav(dir.path(), "b.wav", 8_000, 8_000, 0.25);
        let mut r = rig(SchedulerConfig {
            buffer_frames: 256,
            crossfade_secs: 1.0,
            ..Default::default()
        });
        r.sched.handle(Command::Play {
            stream: open(&a),
            generation: 1,
        });
        r.sched.tick();
        r.sched.handle(Command::Pause);
        r.sched.handle(Command::Play {
            stream: open(&b),
            generation: 2,
        });
        r.sched.tick();

        let written = r.out.written.lock().unwrap().clone();
        assert!(written[256..].iter().all(|s| (s - 0.25).abs() < 1e-3));
        assert_eq!(r.sched.state(), PlaybackState::Playing);
        assert_eq!(*r.out.flushes.lock().unwrap(), 2);
    }

    #[test]
    fn seek_flushes_and_repositions() {
        let dir = tempfile::tempdir().unwrap();
        let a = ramp_wav(dir.path(), "a.wav", 8_000, 16_000);
        let mut r = rig(small_buffers());
        r.sched.handle(Command::Play {
            stream: open(&a),
            generation: 1,
        });
        r.sched.tick();
        r.sched.handle(Command::Seek(1.0));
        assert_eq!(*r.out.flushes.lock().unwrap(), 2);
        assert!((r.status.lock().unwrap().position - 1.0).abs() < 1e-3);

        r.sched.tick();
        let written = r.out.written.lock().unwrap();
        let first = (written[256] * 32768.0).round() as i32;
        assert!((first - 8_000).abs() <= 1, "landed on {first}");
    }

    #[test]
    fn device_failure_is_reported_once() {
        let dir = tempfile::tempdir().unwrap();
        let a = ramp_wav(dir.path(), "a.wav", 8_000, 8_000);
        let mut r = rig(small_buffers());
        r.out.fail_writes.store(true, Ordering::Relaxed);

        r.sched.handle(Command::Play {
            stream: open(&a),
            generation: 1,
        });
        r.sched.tick();
        r.sched.tick();
        assert_eq!(r.sched.state(), PlaybackState::Stopped);

        let errors: Vec<_> = r
            .events
            .try_iter()
            .filter_map(|e| match e {
                EngineEvent::Error { error, .. } => Some(error),
                _ => None,
            })
            .collect();
        assert_eq!(errors.len(), 1);
        assert!(matches!(*errors[0], PlaybackError::DeviceUnavailable(_)));
    }

    #[test]
    fn shutdown_ends_the_loop() {
        let mut r = rig(small_buffers());
        assert!(r.sched.handle(Command::SetCrossfade(-3.0)));
        assert!(!r.sched.handle(Command::Shutdown));
    }
}
