//! Three-band equalizer (bass / mid / treble).
//!
//! RBJ cookbook biquads: low shelf for bass, peaking filter for mid, high
//! shelf for treble. Runs on decoder output before both the device and the
//! analyzer tap.

use serde::{Deserialize, Serialize};

pub const MAX_GAIN_DB: f32 = 12.0;

pub const BASS_SHELF_HZ: f32 = 250.0;
pub const MID_CENTER_HZ: f32 = 1000.0;
pub const TREBLE_SHELF_HZ: f32 = 3000.0;
pub const MID_PEAK_Q: f32 = std::f32::consts::FRAC_1_SQRT_2;
pub const SHELF_Q: f32 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct EqSettings {
    #[serde(default)]
    pub bass_db: f32,
    #[serde(default)]
    pub mid_db: f32,
    #[serde(default)]
    pub treble_db: f32,
}

impl EqSettings {
    pub fn clamp(self) -> Self {
        let c = |v: f32| {
            if v.is_finite() {
                v.clamp(-MAX_GAIN_DB, MAX_GAIN_DB)
            } else {
                0.0
            }
        };
        Self {
            bass_db: c(self.bass_db),
            mid_db: c(self.mid_db),
            treble_db: c(self.treble_db),
        }
    }

    pub fn is_flat(&self) -> bool {
        self.bass_db == 0.0 && self.mid_db == 0.0 && self.treble_db == 0.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Coeffs {
    b0: f32,
    b1: f32,
    b2: f32,
    a1: f32,
    a2: f32,
}

impl Coeffs {
    fn low_shelf(rate: f32, hz: f32, q: f32, db: f32) -> Self {
        let a = 10f32.powf(db / 40.0);
        let (cos, alpha) = omega(rate, hz, q);
        let sq = 2.0 * a.sqrt() * alpha;
        Self::normalize(
            a * ((a + 1.0) - (a - 1.0) * cos + sq),
            2.0 * a * ((a - 1.0) - (a + 1.0) * cos),
            a * ((a + 1.0) - (a - 1.0) * cos - sq),
            (a + 1.0) + (a - 1.0) * cos + sq,
            -2.0 * ((a - 1.0) + (a + 1.0) * cos),
            (a + 1.0) + (a - 1.0) * cos - sq,
        )
    }

    fn high_shelf(rate: f32, hz: f32, q: f32, db: f32) -> Self {
        let a = 10f32.powf(db / 40.0);
        let (cos, alpha) = omega(rate, hz, q);
        let sq = 2.0 * a.sqrt() * alpha;
        Self::normalize(
            a * ((a + 1.0) + (a - 1.0) * cos + sq),
            -2.0 * a * ((a - 1.0) + (a + 1.0) * cos),
            a * ((a + 1.0) + (a - 1.0) * cos - sq),
            (a + 1.0) - (a - 1.0) * cos + sq,
            2.0 * ((a - 1.0) - (a + 1.0) * cos),
            (a + 1.0) - (a - 1.0) * cos - sq,
        )
    }

    fn peaking(rate: f32, hz: f32, q: f32, db: f32) -> Self {
        let a = 10f32.powf(db / 40.0);
        let (cos, alpha) = omega(rate, hz, q);
        Self::normalize(
            1.0 + alpha * a,
            -2.0 * cos,
            1.0 - alpha * a,
            1.0 + alpha / a,
            -2.0 * cos,
            1.0 - alpha / a,
        )
    }

    fn normalize(b0: f32, b1: f32, b2: f32, a0: f32, a1: f32, a2: f32) -> Self {
        Self {
            b0: b0 / a0,
            b1: b1 / a0,
            b2: b2 / a0,
            a1: a1 / a0,
            a2: a2 / a0,
        }
    }
}

fn omega(rate: f32, hz: f32, q: f32) -> (f32, f32) {
    // Keep the corner below Nyquist for low sample rates.
    let hz = hz.min(rate * 0.45);
    let w0 = 2.0 * std::f32::consts::PI * hz / rate;
    (w0.cos(), w0.sin() / (2.0 * q))
}

/// Direct form I state for one channel.
#[derive(Debug, Clone, Copy, Default)]
struct History {
    x1: f32,
    x2: f32,
    y1: f32,
    y2: f32,
}

impl History {
    fn run(&mut self, c: &Coeffs, x: f32) -> f32 {
        let y = c.b0 * x + c.b1 * self.x1 + c.b2 * self.x2 - c.a1 * self.y1 - c.a2 * self.y2;
        self.x2 = self.x1;
        self.x1 = x;
        self.y2 = self.y1;
        self.y1 = y;
        y
    }
}

pub struct Equalizer {
    settings: EqSettings,
    sample_rate: u32,
    channels: usize,
    stages: [Coeffs; 3],
    history: Vec<[History; 3]>,
}

impl Equalizer {
    pub fn new(settings: EqSettings, sample_rate: u32, channels: usize) -> Self {
        let settings = settings.clamp();
        let channels = channels.max(1);
        Self {
            settings,
            sample_rate,
            channels,
            stages: design(settings, sample_rate),
            history: vec![[History::default(); 3]; channels],
        }
    }

    pub fn settings(&self) -> EqSettings {
        self.settings
    }

    /// Change gains. Filter history is kept so there is no click.
    pub fn set_settings(&mut self, settings: EqSettings) {
        self.settings = settings.clamp();
        self.stages = design(self.settings, self.sample_rate);
    }

    /// Re-target for a new stream format; clears history.
    pub fn configure(&mut self, sample_rate: u32, channels: usize) {
        self.sample_rate = sample_rate;
        self.channels = channels.max(1);
        self.stages = design(self.settings, sample_rate);
        self.history = vec![[History::default(); 3]; self.channels];
    }

    pub fn reset(&mut self) {
        for h in &mut self.history {
            *h = [History::default(); 3];
        }
    }

    /// Filter interleaved samples in place.
    pub fn process(&mut self, samples: &mut [f32]) {
        if self.settings.is_flat() {
            return;
        }
        for frame in samples.chunks_mut(self.channels) {
            for (ch, s) in frame.iter_mut().enumerate() {
                let h = &mut self.history[ch];
                let mut v = *s;
                for (stage, c) in self.stages.iter().enumerate() {
                    v = h[stage].run(c, v);
                }
                *s = v;
            }
        }
    }
}

fn design(s: EqSettings, sample_rate: u32) -> [Coeffs; 3] {
    let rate = sample_rate.max(1) as f32;
    [
        Coeffs::low_shelf(rate, BASS_SHELF_HZ, SHELF_Q, s.bass_db),
        Coeffs::peaking(rate, MID_CENTER_HZ, MID_PEAK_Q, s.mid_db),
        Coeffs::high_shelf(rate, TREBLE_SHELF_HZ, SHELF_Q, s.treble_db),
    ]
}
