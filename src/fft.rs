//! FFT helpers over `rustfft`.
//!
//! All transforms accept arbitrary lengths. Spectra are full-length complex
//! vectors; the "half" spectrum of an `n`-point transform has `n / 2 + 1`
//! bins.

use rustfft::num_complex::Complex;
use rustfft::FftPlanner;

/// Planner wrapper that caches plans across frames.
pub struct FftEngine {
    planner: FftPlanner<f64>,
}

impl Default for FftEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl FftEngine {
    pub fn new() -> Self {
        Self {
            planner: FftPlanner::new(),
        }
    }

    /// Spectrum of `samples` zero-padded (or truncated) to `fft_size`.
    pub fn forward_real(&mut self, samples: &[f64], fft_size: usize) -> Vec<Complex<f64>> {
        let mut buffer: Vec<Complex<f64>> = samples
            .iter()
            .take(fft_size)
            .map(|&x| Complex::new(x, 0.0))
            .collect();
        buffer.resize(fft_size, Complex::new(0.0, 0.0));
        self.forward(&mut buffer);
        buffer
    }

    pub fn forward(&mut self, buffer: &mut [Complex<f64>]) {
        if buffer.is_empty() {
            return;
        }
        self.planner.plan_fft_forward(buffer.len()).process(buffer);
    }

    /// Normalised inverse transform in place.
    pub fn inverse(&mut self, buffer: &mut [Complex<f64>]) {
        if buffer.is_empty() {
            return;
        }
        self.planner.plan_fft_inverse(buffer.len()).process(buffer);
        let scale = 1.0 / buffer.len() as f64;
        for c in buffer.iter_mut() {
            *c *= scale;
        }
    }

    /// Real part of the normalised inverse transform.
    pub fn inverse_real(&mut self, mut spectrum: Vec<Complex<f64>>) -> Vec<f64> {
        self.inverse(&mut spectrum);
        spectrum.into_iter().map(|c| c.re).collect()
    }
}

/// Number of non-redundant bins of an `fft_size` transform of real data.
pub fn half_spectrum_len(fft_size: usize) -> usize {
    fft_size / 2 + 1
}

/// Mirrors `spectrum[1..max_freq - 1]` into the upper half as complex
/// conjugates so the inverse transform is real.
pub fn fill_hermitian(spectrum: &mut [Complex<f64>], max_freq: usize) {
    let n = spectrum.len();
    for k in max_freq..n {
        spectrum[k] = spectrum[n - k].conj();
    }
}

/// Magnitudes of the half spectrum.
pub fn magnitude_half(spectrum: &[Complex<f64>]) -> Vec<f64> {
    spectrum[..half_spectrum_len(spectrum.len())]
        .iter()
        .map(|c| c.norm())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use dasp::signal::{self, Signal};

    #[test]
    fn test_forward_inverse_identity_arbitrary_length() {
        let mut fft = FftEngine::new();
        let samples: Vec<f64> = (0..37).map(|i| ((i * 7) % 11) as f64 - 5.0).collect();
        let spectrum = fft.forward_real(&samples, 37);
        let back = fft.inverse_real(spectrum);
        for (a, b) in samples.iter().zip(&back) {
            assert!((a - b).abs() < 1e-9);
        }
    }

    #[test]
    fn test_tone_peak() {
        let mut fft = FftEngine::new();
        let tone: Vec<f64> = signal::rate(1_000.0)
            .const_hz(125.0)
            .sine()
            .take(64)
            .collect();
        let magnitude = magnitude_half(&fft.forward_real(&tone, 64));
        assert_eq!(magnitude.len(), 33);
        let peak = (0..magnitude.len())
            .max_by(|&a, &b| magnitude[a].total_cmp(&magnitude[b]))
            .unwrap();
        // 125 Hz at 1 kHz over 64 points lands on bin 8
        assert_eq!(peak, 8);
    }

    #[test]
    fn test_fill_hermitian() {
        let mut spectrum = vec![
            Complex::new(1.0, 0.0),
            Complex::new(2.0, 1.0),
            Complex::new(3.0, -1.0),
            Complex::new(4.0, 0.0),
            Complex::new(0.0, 0.0),
            Complex::new(0.0, 0.0),
        ];
        fill_hermitian(&mut spectrum, 4);
        assert_eq!(spectrum[4], Complex::new(3.0, 1.0));
        assert_eq!(spectrum[5], Complex::new(2.0, -1.0));

        let mut fft = FftEngine::new();
        fft.inverse(&mut spectrum);
        assert!(spectrum.iter().all(|c| c.im.abs() < 1e-12));
    }
}
