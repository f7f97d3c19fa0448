/// Per-band exponential moving average. `alpha = 1.0` passes input through.
#[derive(Debug, Clone)]
pub struct Ema {
    alpha: f32,
    state: Vec<f32>,
}

impl Ema {
    pub fn new(alpha: f32, bands: usize) -> Self {
        let alpha = if alpha.is_finite() { alpha.clamp(0.01, 1.0) } else { 1.0 };
        Self {
            alpha,
            state: vec![0.0; bands],
        }
    }

    pub fn apply(&mut self, input: &mut [f32]) {
        if self.state.len() != input.len() {
            self.state = vec![0.0; input.len()];
        }
        for (s, x) in self.state.iter_mut().zip(input.iter_mut()) {
            *s = self.alpha * *x + (1.0 - self.alpha) * *s;
            *x = *s;
        }
    }

    pub fn reset(&mut self) {
        self.state.iter_mut().for_each(|s| *s = 0.0);
    }
}
