//! Output stage.
//!
//! The scheduler writes interleaved `f32` into a bounded [`SampleRing`]; the
//! cpal callback drains it without blocking. When paused, the callback writes
//! silence and leaves the ring untouched so resume continues exactly where
//! playback stopped.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

use crate::error::PlaybackError;

/// Sample rate and channel layout of the audio being written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamSpec {
    pub sample_rate: u32,
    pub channels: usize,
}

/// Sink for rendered audio. Implementations own the device.
pub trait AudioOutput {
    /// Prepare for audio in `spec`. Called before the first write of each
    /// track; may re-open the device.
    fn configure(&mut self, spec: StreamSpec) -> Result<(), PlaybackError>;

    /// Queue interleaved samples. May block until the device has room, but
    /// never indefinitely.
    fn write(&mut self, samples: &[f32]) -> Result<(), PlaybackError>;

    /// Stop consuming queued audio (silence is played) without discarding it.
    fn set_paused(&mut self, paused: bool);

    /// Drop everything queued but not yet played.
    fn flush(&mut self);

    /// Frames written but not yet played.
    fn buffered_frames(&self) -> usize;
}

const WRITE_TIMEOUT: Duration = Duration::from_secs(2);
const WAIT_SLICE: Duration = Duration::from_millis(50);

/// Bounded queue of interleaved samples shared with the device callback.
pub struct SampleRing {
    inner: Mutex<RingInner>,
    cv: Condvar,
    capacity: usize,
    paused: AtomicBool,
}

struct RingInner {
    queue: VecDeque<f32>,
}

impl SampleRing {
    pub fn new(capacity_samples: usize) -> Self {
        let capacity = capacity_samples.max(1);
        Self {
            inner: Mutex::new(RingInner {
                queue: VecDeque::with_capacity(capacity),
            }),
            cv: Condvar::new(),
            capacity,
            paused: AtomicBool::new(false),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RingInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn len(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::Relaxed);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Relaxed)
    }

    pub fn clear(&self) {
        self.lock().queue.clear();
        self.cv.notify_all();
    }

    /// Push all of `samples`, waiting for room in slices of [`WAIT_SLICE`].
    ///
    /// `abort` is checked between waits; returns `false` if it fired or
    /// `timeout` elapsed before everything was queued.
    pub fn push_blocking(&self, samples: &[f32], timeout: Duration, abort: impl Fn() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        let mut offset = 0;
        while offset < samples.len() {
            let mut g = self.lock();
            while g.queue.len() >= self.capacity {
                if abort() {
                    return false;
                }
                let now = Instant::now();
                if now >= deadline {
                    return false;
                }
                let wait = WAIT_SLICE.min(deadline - now);
                g = match self.cv.wait_timeout(g, wait) {
                    Ok((g, _)) => g,
                    Err(e) => e.into_inner().0,
                };
            }
            let room = self.capacity - g.queue.len();
            let n = room.min(samples.len() - offset);
            g.queue.extend(&samples[offset..offset + n]);
            offset += n;
        }
        true
    }

    /// Non-blocking drain into `out`. Returns samples copied; zero while paused.
    pub fn pop_into(&self, out: &mut [f32]) -> usize {
        if self.is_paused() {
            return 0;
        }
        let mut g = self.lock();
        let n = out.len().min(g.queue.len());
        for (dst, src) in out.iter_mut().zip(g.queue.drain(..n)) {
            *dst = src;
        }
        drop(g);
        if n > 0 {
            self.cv.notify_all();
        }
        n
    }
}

/// Default cpal device output.
pub struct CpalOutput {
    ring_seconds: f32,
    ring: Arc<SampleRing>,
    spec: Option<StreamSpec>,
    stream: Option<cpal::Stream>,
    failure: Arc<Mutex<Option<String>>>,
}

impl CpalOutput {
    pub fn new(ring_seconds: f32) -> Self {
        Self {
            ring_seconds,
            ring: Arc::new(SampleRing::new(1)),
            spec: None,
            stream: None,
            failure: Arc::new(Mutex::new(None)),
        }
    }

    fn failure(&self) -> Option<String> {
        self.failure.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn open(&mut self, spec: StreamSpec) -> Result<(), PlaybackError> {
        self.stream = None;
        *self.failure.lock().unwrap_or_else(|e| e.into_inner()) = None;

        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| PlaybackError::DeviceUnavailable("no default output device".to_string()))?;
        if let Ok(name) = device.name() {
            log::info!("cpal output device: {name}");
        }

        let supported = pick_config(&device, spec)?;
        let sample_format = supported.sample_format();
        let config: cpal::StreamConfig = supported.config();
        if config.sample_rate.0 != spec.sample_rate {
            log::warn!(
                "device does not support {} Hz; playing at {} Hz without resampling",
                spec.sample_rate,
                config.sample_rate.0
            );
        }

        let capacity = (spec.sample_rate as f32 * self.ring_seconds.clamp(0.02, 2.0)).ceil() as usize
            * spec.channels;
        let ring = Arc::new(SampleRing::new(capacity));

        let stream = match sample_format {
            cpal::SampleFormat::F32 => build_stream::<f32>(&device, &config, spec.channels, &ring, &self.failure),
            cpal::SampleFormat::I16 => build_stream::<i16>(&device, &config, spec.channels, &ring, &self.failure),
            cpal::SampleFormat::I32 => build_stream::<i32>(&device, &config, spec.channels, &ring, &self.failure),
            cpal::SampleFormat::U16 => build_stream::<u16>(&device, &config, spec.channels, &ring, &self.failure),
            other => Err(PlaybackError::DeviceUnavailable(format!(
                "unsupported device sample format {other:?}"
            ))),
        }?;
        stream
            .play()
            .map_err(|e| PlaybackError::DeviceUnavailable(format!("start stream: {e}")))?;

        self.ring = ring;
        self.stream = Some(stream);
        self.spec = Some(spec);
        Ok(())
    }
}

impl AudioOutput for CpalOutput {
    fn configure(&mut self, spec: StreamSpec) -> Result<(), PlaybackError> {
        if self.spec == Some(spec) && self.stream.is_some() && self.failure().is_none() {
            return Ok(());
        }
        self.open(spec)
    }

    fn write(&mut self, samples: &[f32]) -> Result<(), PlaybackError> {
        if self.stream.is_none() {
            return Err(PlaybackError::DeviceUnavailable("output not configured".to_string()));
        }
        let failure = Arc::clone(&self.failure);
        let failed = move || failure.lock().map(|f| f.is_some()).unwrap_or(true);
        if !self.ring.push_blocking(samples, WRITE_TIMEOUT, failed) {
            let reason = self
                .failure()
                .unwrap_or_else(|| "output stalled".to_string());
            self.stream = None;
            return Err(PlaybackError::DeviceUnavailable(reason));
        }
        Ok(())
    }

    fn set_paused(&mut self, paused: bool) {
        self.ring.set_paused(paused);
    }

    fn flush(&mut self) {
        self.ring.clear();
    }

    fn buffered_frames(&self) -> usize {
        let channels = self.spec.map(|s| s.channels).unwrap_or(1).max(1);
        self.ring.len() / channels
    }
}

fn pick_config(
    device: &cpal::Device,
    spec: StreamSpec,
) -> Result<cpal::SupportedStreamConfig, PlaybackError> {
    let rate = cpal::SampleRate(spec.sample_rate);
    if let Ok(ranges) = device.supported_output_configs() {
        let ranges: Vec<_> = ranges
            .filter(|r| r.min_sample_rate() <= rate && rate <= r.max_sample_rate())
            .collect();
        let score = |r: &cpal::SupportedStreamConfigRange| {
            let mut s = 0;
            if r.channels() as usize == spec.channels {
                s += 2;
            }
            if r.sample_format() == cpal::SampleFormat::F32 {
                s += 1;
            }
            s
        };
        if let Some(best) = ranges.into_iter().max_by_key(score) {
            return Ok(best.with_sample_rate(rate));
        }
    }
    device
        .default_output_config()
        .map_err(|e| PlaybackError::DeviceUnavailable(format!("no usable output config: {e}")))
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    src_channels: usize,
    ring: &Arc<SampleRing>,
    failure: &Arc<Mutex<Option<String>>>,
) -> Result<cpal::Stream, PlaybackError>
where
    T: cpal::SizedSample + cpal::FromSample<f32>,
{
    let dst_channels = config.channels as usize;
    let ring_cb = Arc::clone(ring);
    let failure_cb = Arc::clone(failure);
    let mut scratch: Vec<f32> = Vec::new();

    let err_fn = move |err: cpal::StreamError| {
        log::warn!("cpal stream error: {err}");
        let mut f = failure_cb.lock().unwrap_or_else(|e| e.into_inner());
        if f.is_none() {
            *f = Some(err.to_string());
        }
    };

    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                let frames = data.len() / dst_channels.max(1);
                let want = frames * src_channels;
                if scratch.len() < want {
                    scratch.resize(want, 0.0);
                }
                let got = ring_cb.pop_into(&mut scratch[..want]) / src_channels.max(1);
                for frame in 0..frames {
                    for ch in 0..dst_channels {
                        let v = if frame < got {
                            map_channel(&scratch[frame * src_channels..(frame + 1) * src_channels], dst_channels, ch)
                        } else {
                            0.0
                        };
                        data[frame * dst_channels + ch] = <T as cpal::Sample>::from_sample::<f32>(v);
                    }
                }
            },
            err_fn,
            None,
        )
        .map_err(|e| PlaybackError::DeviceUnavailable(format!("build output stream: {e}")))
}

/// Channel mapping from one source frame to destination channel `dst_ch`.
///
/// mono → many duplicates, stereo → mono averages, otherwise channels are
/// passed through and missing ones repeat the last source channel.
fn map_channel(src: &[f32], dst_channels: usize, dst_ch: usize) -> f32 {
    match (src.len(), dst_channels) {
        (0, _) => 0.0,
        (1, _) => src[0],
        (2, 1) => 0.5 * (src[0] + src[1]),
        (n, _) => src[dst_ch.min(n - 1)],
    }
}

#[cfg(test)]
pub(crate) mod memory {
    use super::*;

    /// Collects everything written; never blocks.
    #[derive(Clone, Default)]
    pub struct MemoryOutput {
        pub written: Arc<Mutex<Vec<f32>>>,
        pub specs: Arc<Mutex<Vec<StreamSpec>>>,
        pub flushes: Arc<Mutex<usize>>,
        pub paused: Arc<AtomicBool>,
        pub fail_writes: Arc<AtomicBool>,
    }

    impl AudioOutput for MemoryOutput {
        fn configure(&mut self, spec: StreamSpec) -> Result<(), PlaybackError> {
            self.specs.lock().unwrap().push(spec);
            Ok(())
        }

        fn write(&mut self, samples: &[f32]) -> Result<(), PlaybackError> {
            if self.fail_writes.load(Ordering::Relaxed) {
                return Err(PlaybackError::DeviceUnavailable("unplugged".to_string()));
            }
            self.written.lock().unwrap().extend_from_slice(samples);
            Ok(())
        }

        fn set_paused(&mut self, paused: bool) {
            self.paused.store(paused, Ordering::Relaxed);
        }

        fn flush(&mut self) {
            *self.flushes.lock().unwrap() += 1;
        }

        fn buffered_frames(&self) -> usize {
            0
        }
    }

    /// Queues into a [`SampleRing`] that nothing drains, like a device that
    /// has not yet played what it was given.
    #[derive(Clone)]
    pub struct HeldOutput {
        pub ring: Arc<SampleRing>,
        channels: usize,
    }

    impl HeldOutput {
        pub fn new(capacity_samples: usize) -> Self {
            Self {
                ring: Arc::new(SampleRing::new(capacity_samples)),
                channels: 1,
            }
        }

        pub fn queued(&self) -> Vec<f32> {
            self.ring.lock().queue.iter().copied().collect()
        }
    }

    impl AudioOutput for HeldOutput {
        fn configure(&mut self, spec: StreamSpec) -> Result<(), PlaybackError> {
            self.channels = spec.channels.max(1);
            Ok(())
        }

        fn write(&mut self, samples: &[f32]) -> Result<(), PlaybackError> {
            if self.ring.push_blocking(samples, WAIT_SLICE, || false) {
                Ok(())
            } else {
                Err(PlaybackError::DeviceUnavailable("ring full".to_string()))
            }
        }

        fn set_paused(&mut self, paused: bool) {
            self.ring.set_paused(paused);
        }

        fn flush(&mut self) {
            self.ring.clear();
        }

        fn buffered_frames(&self) -> usize {
            self.ring.len() / self.channels
        }
    }
}
