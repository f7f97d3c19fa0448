//! Engine threads: one owns the scheduler and the output device, the other
//! turns tapped PCM windows into spectrum frames.

use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender, TryRecvError};

use crate::audio::output::{AudioOutput, CpalOutput};
use crate::audio::spectrum::SpectrumAnalyzer;
use crate::audio::tap::{AnalysisTap, AnalysisWindow};
use crate::data::config::EngineConfig;
use crate::error::PlaybackError;
use crate::playback::events::{EngineEvent, EventBus};
use crate::playback::scheduler::{Command, Scheduler};
use crate::playback::{PlaybackHandle, PlaybackInfo};

const IDLE_WAIT: Duration = Duration::from_millis(250);
const ANALYSIS_QUEUE: usize = 2;

pub struct Engine {
    tx: Sender<Command>,
    bus: EventBus,
    status: PlaybackHandle,
    worker: Option<JoinHandle<()>>,
    analyzer: Option<JoinHandle<()>>,
}

impl Engine {
    /// Engine writing to the default cpal output device.
    pub fn start(config: &EngineConfig) -> Result<Self, PlaybackError> {
        let ring_seconds = config.ring_seconds;
        Self::with_output(config, move || {
            Box::new(CpalOutput::new(ring_seconds)) as Box<dyn AudioOutput>
        })
    }

    /// `make_output` runs on the engine thread, so the device handle never
    /// crosses threads.
    pub fn with_output<F>(config: &EngineConfig, make_output: F) -> Result<Self, PlaybackError>
    where
        F: FnOnce() -> Box<dyn AudioOutput> + Send + 'static,
    {
        let config = config.clone().sanitized();
        let (tx, rx) = unbounded();
        let bus = EventBus::new();
        let status: PlaybackHandle = Arc::new(Mutex::new(PlaybackInfo::default()));
        let (tap, windows) = AnalysisTap::new(config.fft_size, config.spectrum_hz, ANALYSIS_QUEUE);

        let analyzer = {
            let bus = bus.clone();
            let config = config.clone();
            thread::Builder::new()
                .name("retro-analyzer".to_string())
                .spawn(move || run_analyzer(windows, bus, &config))
                .map_err(|e| PlaybackError::DeviceUnavailable(format!("spawn analyzer thread: {e}")))?
        };

        let worker = {
            let bus = bus.clone();
            let status = Arc::clone(&status);
            let sched_cfg = config.scheduler();
            thread::Builder::new()
                .name("retro-engine".to_string())
                .spawn(move || {
                    let sched = Scheduler::new(make_output(), bus, status, tap, sched_cfg);
                    run_worker(sched, rx);
                })
                .map_err(|e| PlaybackError::DeviceUnavailable(format!("spawn engine thread: {e}")))?
        };

        Ok(Self {
            tx,
            bus,
            status,
            worker: Some(worker),
            analyzer: Some(analyzer),
        })
    }

    pub fn send(&self, cmd: Command) -> Result<(), PlaybackError> {
        self.tx.send(cmd).map_err(|_| PlaybackError::StreamClosed)
    }

    pub fn subscribe(&self) -> Receiver<EngineEvent> {
        self.bus.subscribe()
    }

    pub fn subscribe_lifecycle(&self) -> Receiver<EngineEvent> {
        self.bus.subscribe_lifecycle()
    }

    pub fn status(&self) -> PlaybackInfo {
        self.status.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        let _ = self.tx.send(Command::Shutdown);
        if let Some(h) = self.worker.take() {
            let _ = h.join();
        }
        // The analyzer exits once the worker drops the tap.
        if let Some(h) = self.analyzer.take() {
            let _ = h.join();
        }
    }
}

fn run_worker(mut sched: Scheduler, rx: Receiver<Command>) {
    loop {
        if sched.is_active() {
            loop {
                match rx.try_recv() {
                    Ok(cmd) => {
                        if !sched.handle(cmd) {
                            return;
                        }
                    }
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => return,
                }
            }
            sched.tick();
        } else {
            match rx.recv_timeout(IDLE_WAIT) {
                Ok(cmd) => {
                    if !sched.handle(cmd) {
                        return;
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => return,
            }
        }
    }
}

fn run_analyzer(windows: Receiver<AnalysisWindow>, bus: EventBus, config: &EngineConfig) {
    let mut analyzer = SpectrumAnalyzer::new(
        config.fft_size,
        config.spectrum_bands,
        44_100,
        config.normalization,
        config.smoothing,
    );
    while let Ok(w) = windows.recv() {
        analyzer.set_sample_rate(w.sample_rate);
        let frame = analyzer.analyze(&w.samples);
        bus.publish(EngineEvent::Spectrum(frame));
    }
    log::debug!("analyzer thread exiting");
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;
    use crate::audio::decoder::fixtures::sine_wav;
    use crate::audio::decoder::AudioStream;
    use crate::audio::output::memory::MemoryOutput;
    use crate::playback::PlaybackState;

    fn engine(out: &MemoryOutput) -> Engine {
        let out = out.clone();
        Engine::with_output(&EngineConfig::default(), move || Box::new(out) as Box<dyn AudioOutput>)
            .unwrap()
    }

    #[test]
    fn plays_to_the_end_and_publishes_spectrum() {
        let dir = tempfile::tempdir().unwrap();
        let p = sine_wav(dir.path(), "tone.wav", 22_050, 2, 0.5, 1000.0);
        let out = MemoryOutput::default();
        let eng = engine(&out);
        let events = eng.subscribe();

        let stream = Box::new(AudioStream::open(&p).unwrap());
        eng.send(Command::Play { stream, generation: 1 }).unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        let mut ended = false;
        let mut spectrum = 0;
        while !(ended && spectrum > 0) && Instant::now() < deadline {
            match events.recv_timeout(Duration::from_millis(100)) {
                Ok(EngineEvent::TrackEnded { generation }) => {
                    assert_eq!(generation, 1);
                    ended = true;
                }
                Ok(EngineEvent::Spectrum(frame)) => {
                    assert_eq!(frame.bands.len(), 24);
                    spectrum += 1;
                }
                _ => {}
            }
        }
        assert!(ended);
        assert!(spectrum > 0);
        assert_eq!(out.written.lock().unwrap().len(), 11_025 * 2);
        assert_eq!(eng.status().state, PlaybackState::Stopped);
    }

    #[test]
    fn drop_joins_threads() {
        let out = MemoryOutput::default();
        let eng = engine(&out);
        let events = eng.subscribe();
        drop(eng);
        // Both threads are gone, so the bus has no publishers left.
        assert!(events.recv_timeout(Duration::from_millis(50)).is_err());
    }
}
