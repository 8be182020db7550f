//! Frame processors working on the complex spectrum.

use crate::fft::{fill_hermitian, half_spectrum_len, FftEngine};
use crate::frame::InlineProcessor;
use rustfft::num_complex::Complex;
use std::f64::consts::PI;

/// Function applied to the non-redundant half of a frame's spectrum.
pub type SpectrumModifier = Box<dyn FnMut(&mut [Complex<f64>])>;

/// Transforms each frame, lets a modifier edit bins `0..=n/2`, and writes the
/// real inverse transform back.
pub struct FrequencyDomainProcessor {
    fft: FftEngine,
    fft_size: usize,
    modifier: SpectrumModifier,
}

impl FrequencyDomainProcessor {
    /// Frames longer than `fft_size` are transformed at their own length.
    pub fn new(fft_size: usize, modifier: impl FnMut(&mut [Complex<f64>]) + 'static) -> Self {
        Self {
            fft: FftEngine::new(),
            fft_size,
            modifier: Box::new(modifier),
        }
    }

    pub fn fft_size(&self) -> usize {
        self.fft_size
    }
}

impl InlineProcessor for FrequencyDomainProcessor {
    fn apply_inline(&mut self, data: &mut [f64]) {
        let n = self.fft_size.max(data.len());
        let mut spectrum = self.fft.forward_real(data, n);
        let half = half_spectrum_len(n);
        (self.modifier)(&mut spectrum[..half]);
        fill_hermitian(&mut spectrum, half);
        let output = self.fft.inverse_real(spectrum);
        data.copy_from_slice(&output[..data.len()]);
    }
}

/// Monotone "robot" voice: every bin keeps its magnitude and loses its phase.
///
/// The remaining linear phase delays each frame's energy to its centre so
/// the synthesis window does not cut it away.
pub fn robotiser(fft_size: usize) -> FrequencyDomainProcessor {
    FrequencyDomainProcessor::new(fft_size, |bins| {
        for (k, bin) in bins.iter_mut().enumerate() {
            let sign = if k % 2 == 0 { 1.0 } else { -1.0 };
            *bin = Complex::new(sign * bin.norm(), 0.0);
        }
    })
}

/// Wraps an angle into `(-pi, pi]`.
fn principal_angle(phase: f64) -> f64 {
    let wrapped = (phase + PI).rem_euclid(2.0 * PI) - PI;
    if wrapped <= -PI {
        wrapped + 2.0 * PI
    } else {
        wrapped
    }
}

/// Phase vocoder for frames read with one hop and overlap-added with another.
///
/// Each bin's instantaneous frequency is estimated from the phase advance
/// over the analysis hop and integrated over the synthesis hop, so partials
/// stay coherent when the frame rate changes.
pub struct PhaseVocoder {
    fft: FftEngine,
    analysis_hop: usize,
    synthesis_hop: usize,
    previous_phase: Vec<f64>,
    synthesis_phase: Vec<f64>,
}

impl PhaseVocoder {
    pub fn new(analysis_hop: usize, synthesis_hop: usize) -> Self {
        Self {
            fft: FftEngine::new(),
            analysis_hop,
            synthesis_hop,
            previous_phase: Vec::new(),
            synthesis_phase: Vec::new(),
        }
    }

    pub fn analysis_hop(&self) -> usize {
        self.analysis_hop
    }

    pub fn synthesis_hop(&self) -> usize {
        self.synthesis_hop
    }

    fn advance(&mut self, bins: &mut [Complex<f64>], fft_size: usize) {
        if self.previous_phase.len() != bins.len() {
            self.previous_phase = bins.iter().map(|c| c.arg()).collect();
            self.synthesis_phase = self.previous_phase.clone();
            return;
        }

        let ha = self.analysis_hop as f64;
        let hs = self.synthesis_hop as f64;
        for (k, bin) in bins.iter_mut().enumerate() {
            let magnitude = bin.norm();
            let phase = bin.arg();
            let omega = 2.0 * PI * k as f64 / fft_size as f64;
            let deviation = principal_angle(phase - self.previous_phase[k] - omega * ha);
            let frequency = omega + deviation / ha;

            self.previous_phase[k] = phase;
            self.synthesis_phase[k] = principal_angle(self.synthesis_phase[k] + hs * frequency);
            *bin = Complex::from_polar(magnitude, self.synthesis_phase[k]);
        }
    }
}

impl InlineProcessor for PhaseVocoder {
    fn apply_inline(&mut self, data: &mut [f64]) {
        let n = data.len();
        if n == 0 {
            return;
        }
        let mut spectrum = self.fft.forward_real(data, n);
        let half = half_spectrum_len(n);
        self.advance(&mut spectrum[..half], n);
        fill_hermitian(&mut spectrum, half);
        let output = self.fft.inverse_real(spectrum);
        data.copy_from_slice(&output);
    }
}
