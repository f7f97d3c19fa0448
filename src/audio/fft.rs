use rustfft::{num_complex::Complex, FftPlanner};

/// Hann-windowed forward FFT with reusable buffers.
pub struct FftEngine {
    fft_size: usize,
    window: Vec<f32>,
    // Converts a bin magnitude into the amplitude of the sine that produced it.
    amplitude_scale: f32,
    fft: std::sync::Arc<dyn rustfft::Fft<f32>>,
    buf: Vec<Complex<f32>>,
    mags: Vec<f32>,
}

impl FftEngine {
    pub fn new(fft_size: usize) -> Self {
        let fft_size = fft_size.max(2);
        let mut planner = FftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(fft_size);
        let window = hann_window(fft_size);
        let window_sum: f32 = window.iter().sum();
        let buf = vec![Complex::new(0.0, 0.0); fft_size];
        let mags = vec![0.0f32; fft_size / 2];
        Self {
            fft_size,
            window,
            amplitude_scale: 2.0 / window_sum.max(f32::EPSILON),
            fft,
            buf,
            mags,
        }
    }

    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    /// Amplitude spectrum of `input` (first half, bin `k` at `k * rate / fft_size` Hz).
    ///
    /// Short input is zero-padded at the end; a full-scale sine reads ~1.0
    /// in its bin.
    pub fn magnitudes(&mut self, input: &[f32]) -> &[f32] {
        // Use the newest samples when given more than one window.
        let input = if input.len() > self.fft_size {
            &input[input.len() - self.fft_size..]
        } else {
            input
        };

        for i in 0..self.fft_size {
            let x = input.get(i).copied().unwrap_or(0.0) * self.window[i];
            self.buf[i] = Complex::new(x, 0.0);
        }

        self.fft.process(&mut self.buf);

        let half = self.fft_size / 2;
        for i in 0..half {
            self.mags[i] = self.buf[i].norm() * self.amplitude_scale;
        }
        &self.mags
    }
}

fn hann_window(n: usize) -> Vec<f32> {
    let mut w = vec![0.0; n];
    for i in 0..n {
        w[i] = 0.5 - 0.5 * ((2.0 * std::f32::consts::PI * i as f32) / (n as f32)).cos();
    }
    w
}
