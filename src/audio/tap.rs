//! Output tap feeding the spectrum analyzer.
//!
//! The scheduler pushes every rendered buffer; the tap keeps the newest
//! `window` mono samples and hands a copy to the analyzer thread at the
//! refresh rate. The queue between them is bounded: when the analyzer falls
//! behind, the oldest window is evicted and the audio thread moves on.

use std::collections::VecDeque;

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};

pub const MIN_REFRESH_HZ: u32 = 20;
pub const MAX_REFRESH_HZ: u32 = 50;

#[derive(Debug, Clone)]
pub struct AnalysisWindow {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

pub struct AnalysisTap {
    tx: Sender<AnalysisWindow>,
    // Producer-side handle used only to evict the oldest queued window.
    evict: Receiver<AnalysisWindow>,
    ring: VecDeque<f32>,
    window: usize,
    refresh_hz: u32,
    hop: usize,
    since_last: usize,
    sample_rate: u32,
    dropped: u64,
}

impl AnalysisTap {
    pub fn new(window: usize, refresh_hz: u32, queue: usize) -> (Self, Receiver<AnalysisWindow>) {
        let (tx, rx) = bounded(queue.max(1));
        let window = window.max(2);
        let tap = Self {
            tx,
            evict: rx.clone(),
            ring: VecDeque::with_capacity(window),
            window,
            refresh_hz: refresh_hz.clamp(MIN_REFRESH_HZ, MAX_REFRESH_HZ),
            hop: usize::MAX,
            since_last: 0,
            sample_rate: 0,
            dropped: 0,
        };
        (tap, rx)
    }

    pub fn configure(&mut self, sample_rate: u32) {
        self.sample_rate = sample_rate;
        self.hop = (sample_rate / self.refresh_hz).max(1) as usize;
        self.reset();
    }

    pub fn reset(&mut self) {
        self.ring.clear();
        self.since_last = 0;
    }

    /// Windows evicted because the analyzer had not consumed them yet.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn push(&mut self, interleaved: &[f32], channels: usize) {
        let channels = channels.max(1);
        for frame in interleaved.chunks_exact(channels) {
            let mono = frame.iter().sum::<f32>() / channels as f32;
            if self.ring.len() == self.window {
                self.ring.pop_front();
            }
            self.ring.push_back(mono);

            self.since_last += 1;
            if self.since_last >= self.hop {
                self.since_last = 0;
                self.publish();
            }
        }
    }

    fn publish(&mut self) {
        let w = AnalysisWindow {
            samples: self.ring.iter().copied().collect(),
            sample_rate: self.sample_rate,
        };
        match self.tx.try_send(w) {
            Ok(()) => {}
            Err(TrySendError::Full(w)) => {
                let _ = self.evict.try_recv();
                self.dropped += 1;
                log::trace!("analysis behind; dropped oldest window");
                let _ = self.tx.try_send(w);
            }
            Err(TrySendError::Disconnected(_)) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publishes_at_refresh_rate_and_keeps_newest() {
        let (mut tap, rx) = AnalysisTap::new(4, 20, 2);
        tap.configure(100); // hop = 5 frames

        // Stereo frames whose mono value is the frame index.
        let frames: Vec<f32> = (0..25).flat_map(|i| [i as f32 - 1.0, i as f32 + 1.0]).collect();
        tap.push(&frames, 2);

        // 5 windows were produced; only the two newest survive.
        assert_eq!(tap.dropped(), 3);
        let a = rx.try_recv().unwrap();
        let b = rx.try_recv().unwrap();
        assert!(rx.try_recv().is_err());
        assert_eq!(a.samples, vec![16.0, 17.0, 18.0, 19.0]);
        assert_eq!(b.samples, vec![21.0, 22.0, 23.0, 24.0]);
        assert_eq!(b.sample_rate, 100);
    }

    #[test]
    fn nothing_published_before_configure() {
        let (mut tap, rx) = AnalysisTap::new(8, 30, 2);
        tap.push(&[0.1; 1000], 1);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn refresh_rate_is_clamped() {
        let (mut tap, rx) = AnalysisTap::new(8, 1000, 4);
        tap.configure(1000); // clamped to 50 Hz => hop 20
        tap.push(&[0.0; 19], 1);
        assert!(rx.try_recv().is_err());
        tap.push(&[0.0; 1], 1);
        assert!(rx.try_recv().is_ok());
    }
}
