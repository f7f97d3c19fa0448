pub mod decoder;
pub mod equalizer;
pub mod fft;
pub mod output;
pub mod smoother;
pub mod spectrum;
pub mod tap;
