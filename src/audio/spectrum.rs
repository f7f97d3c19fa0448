use serde::{Deserialize, Serialize};

use crate::audio::fft::FftEngine;
use crate::audio::smoother::Ema;

pub const MIN_HZ: f32 = 20.0;
pub const MAX_HZ: f32 = 20_000.0;

/// `Fixed` maps this many dB below full scale to zero.
pub const FIXED_FLOOR_DB: f32 = -72.0;
/// `AutoGain` displays this range below the rolling reference.
pub const AUTO_RANGE_DB: f32 = 60.0;
pub const AUTO_DECAY_DB: f32 = 0.5;
pub const AUTO_MIN_REF_DB: f32 = -60.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Normalization {
    Fixed,
    #[default]
    AutoGain,
}

/// Band levels in `[0, 1]`, lowest band first.
#[derive(Debug, Clone, PartialEq)]
pub struct SpectrumFrame {
    pub bands: Vec<f32>,
    pub sample_rate: u32,
}

pub struct SpectrumAnalyzer {
    fft: FftEngine,
    bands: usize,
    sample_rate: u32,
    // Half-open bin range per band.
    bins: Vec<(usize, usize)>,
    normalization: Normalization,
    reference_db: f32,
    smooth: Ema,
}

impl SpectrumAnalyzer {
    pub fn new(
        fft_size: usize,
        bands: usize,
        sample_rate: u32,
        normalization: Normalization,
        smoothing: f32,
    ) -> Self {
        let fft = FftEngine::new(fft_size);
        let bands = bands.max(1);
        let bins = band_bins(bands, sample_rate, fft.fft_size());
        Self {
            fft,
            bands,
            sample_rate,
            bins,
            normalization,
            reference_db: AUTO_MIN_REF_DB,
            smooth: Ema::new(smoothing, bands),
        }
    }

    pub fn set_sample_rate(&mut self, sample_rate: u32) {
        if sample_rate == self.sample_rate {
            return;
        }
        self.sample_rate = sample_rate;
        self.bins = band_bins(self.bands, sample_rate, self.fft.fft_size());
        self.reference_db = AUTO_MIN_REF_DB;
        self.smooth.reset();
    }

    /// Frequency range `(low, high)` in Hz covered by each band.
    pub fn band_ranges_hz(&self) -> Vec<(f32, f32)> {
        let bin_hz = self.sample_rate as f32 / self.fft.fft_size() as f32;
        self.bins
            .iter()
            .map(|&(lo, hi)| (lo as f32 * bin_hz, hi as f32 * bin_hz))
            .collect()
    }

    /// Analyze the newest `fft_size` mono samples of `window`.
    pub fn analyze(&mut self, window: &[f32]) -> SpectrumFrame {
        let mags = self.fft.magnitudes(window);

        let levels_db: Vec<f32> = self
            .bins
            .iter()
            .map(|&(lo, hi)| {
                let peak = mags[lo..hi].iter().copied().fold(0.0f32, f32::max);
                20.0 * peak.max(1e-9).log10()
            })
            .collect();

        let (floor, top) = match self.normalization {
            Normalization::Fixed => (FIXED_FLOOR_DB, 0.0),
            Normalization::AutoGain => {
                let loudest = levels_db.iter().copied().fold(f32::MIN, f32::max);
                self.reference_db = loudest
                    .max(self.reference_db - AUTO_DECAY_DB)
                    .max(AUTO_MIN_REF_DB);
                (self.reference_db - AUTO_RANGE_DB, self.reference_db)
            }
        };

        let mut bands: Vec<f32> = levels_db
            .iter()
            .map(|db| ((db - floor) / (top - floor)).clamp(0.0, 1.0))
            .collect();
        self.smooth.apply(&mut bands);

        SpectrumFrame {
            bands,
            sample_rate: self.sample_rate,
        }
    }
}

/// Log-spaced band edges between [`MIN_HZ`] and `min(MAX_HZ, nyquist)`,
/// mapped onto FFT bins. Bands narrower than a bin take the nearest bin.
fn band_bins(bands: usize, sample_rate: u32, fft_size: usize) -> Vec<(usize, usize)> {
    let half = (fft_size / 2).max(2);
    let nyquist = sample_rate as f32 / 2.0;
    let bin_hz = sample_rate.max(1) as f32 / fft_size as f32;
    let lo_hz = MIN_HZ.min(nyquist * 0.5);
    let hi_hz = MAX_HZ.min(nyquist);
    let ratio = hi_hz / lo_hz;

    (0..bands)
        .map(|b| {
            let f0 = lo_hz * ratio.powf(b as f32 / bands as f32);
            let f1 = lo_hz * ratio.powf((b + 1) as f32 / bands as f32);
            let start = ((f0 / bin_hz).ceil() as usize).clamp(1, half - 1);
            let end = ((f1 / bin_hz).ceil() as usize).min(half);
            if end > start {
                (start, end)
            } else {
                let center = (((f0 * f1).sqrt() / bin_hz).round() as usize).clamp(1, half - 1);
                (center, center + 1)
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tone(rate: u32, hz: f32, amp: f32, n: usize) -> Vec<f32> {
        (0..n)
            .map(|i| (2.0 * std::f32::consts::PI * hz * i as f32 / rate as f32).sin() * amp)
            .collect()
    }

    fn argmax(x: &[f32]) -> usize {
        x.iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
            .unwrap()
    }

    #[test]
    fn tone_peaks_in_its_band() {
        let rate = 48_000;
        let mut a = SpectrumAnalyzer::new(2048, 24, rate, Normalization::AutoGain, 1.0);
        let frame = a.analyze(&tone(rate, 1000.0, 0.5, 2048));

        assert_eq!(frame.bands.len(), 24);
        let peak = argmax(&frame.bands);
        let (lo, hi) = a.band_ranges_hz()[peak];
        assert!(lo <= 1000.0 && 1000.0 < hi, "peak band {lo}..{hi}");
        assert!((frame.bands[peak] - 1.0).abs() < 1e-6);
        assert!(frame.bands.iter().all(|v| (0.0..=1.0).contains(v)));
    }

    #[test]
    fn silence_is_all_zero() {
        for mode in [Normalization::Fixed, Normalization::AutoGain] {
            let mut a = SpectrumAnalyzer::new(1024, 16, 44_100, mode, 0.5);
            let frame = a.analyze(&[0.0; 1024]);
            assert!(frame.bands.iter().all(|v| *v == 0.0), "{mode:?}");
        }
    }

    #[test]
    fn fixed_reference_tracks_absolute_level() {
        let rate = 44_100;
        let mut a = SpectrumAnalyzer::new(4096, 24, rate, Normalization::Fixed, 1.0);
        let loud = a.analyze(&tone(rate, 440.0, 0.5, 4096));
        let quiet = a.analyze(&tone(rate, 440.0, 0.005, 4096));
        let band = argmax(&loud.bands);
        assert!(loud.bands[band] > 0.8);
        // 40 dB quieter is 40/72 lower on the fixed scale.
        let drop = loud.bands[band] - quiet.bands[band];
        assert!((drop - 40.0 / 72.0).abs() < 0.05, "drop {drop}");
    }

    #[test]
    fn auto_gain_reference_decays_slowly() {
        let rate = 44_100;
        let mut a = SpectrumAnalyzer::new(2048, 12, rate, Normalization::AutoGain, 1.0);
        a.analyze(&tone(rate, 440.0, 0.8, 2048));
        let quiet = a.analyze(&tone(rate, 440.0, 0.08, 2048));
        // One frame after a 20 dB drop the reference has fallen only 0.5 dB.
        let band = argmax(&quiet.bands);
        let expected = (AUTO_RANGE_DB - 20.0 + AUTO_DECAY_DB) / AUTO_RANGE_DB;
        assert!((quiet.bands[band] - expected).abs() < 0.03, "{}", quiet.bands[band]);
    }

    #[test]
    fn bands_are_log_spaced_and_cover_the_range() {
        let a = SpectrumAnalyzer::new(4096, 10, 44_100, Normalization::Fixed, 1.0);
        let ranges = a.band_ranges_hz();
        assert_eq!(ranges.len(), 10);
        for w in ranges.windows(2) {
            assert!(w[1].0 >= w[0].0);
            // Upper bands are wider than lower ones.
            assert!(w[1].1 - w[1].0 >= w[0].1 - w[0].0);
        }
        assert!(ranges[9].1 > 15_000.0);
    }

    #[test]
    fn sample_rate_change_rebuilds_bands() {
        let mut a = SpectrumAnalyzer::new(2048, 8, 44_100, Normalization::Fixed, 1.0);
        let before = a.band_ranges_hz();
        a.set_sample_rate(8_000);
        let after = a.band_ranges_hz();
        assert_ne!(before, after);
        assert!(after.last().unwrap().1 <= 4_000.0 + 1.0);
    }
}
