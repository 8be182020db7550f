//! LPC analysis-resynthesis of frames.
//!
//! [`VocalTractModifier`] splits each frame into an all-pole vocal-tract
//! magnitude spectrum and an excitation spectrum. Unless it runs in
//! analysis-only mode, it then passes the vocal-tract spectrum through its
//! transforms, recombines both and writes the resynthesised frame back.

use crate::dsp::resample_linear;
use crate::error::{Error, Result};
use crate::fft::{fill_hermitian, half_spectrum_len, FftEngine};
use crate::frame::InlineProcessor;
use crate::lpc::{LpCoeffs, MIN_SPECTRUM_VALUE};
use rustfft::num_complex::Complex;
use tracing::debug;

/// Function applied to a vocal-tract magnitude spectrum.
pub type SpectrumTransform = Box<dyn FnMut(&mut [f64])>;

/// Smallest vocal-tract scale factor honoured by [`vocal_tract_scaling`].
pub const MIN_VSCALE: f64 = 0.05;

pub struct VocalTractModifier {
    order: usize,
    sample_rate: u32,
    fft_size: usize,
    analysis_only: bool,
    preemphasis: Option<f64>,
    transforms: Vec<SpectrumTransform>,
    fft: FftEngine,
    coeffs: Option<LpCoeffs>,
    vocal_tract: Vec<f64>,
    excitation: Vec<Complex<f64>>,
}

impl VocalTractModifier {
    /// `fft_size` must be a power of two so all frames of a run share one
    /// frequency grid.
    pub fn new(order: usize, sample_rate: u32, fft_size: usize, analysis_only: bool) -> Result<Self> {
        if !fft_size.is_power_of_two() || fft_size < 4 {
            return Err(Error::FftSizeNotPowerOfTwo(fft_size));
        }
        if order == 0 || order >= fft_size {
            return Err(Error::frame_config(format!(
                "LP order {} does not fit FFT size {}",
                order, fft_size
            )));
        }
        debug!(order, sample_rate, fft_size, analysis_only, "vocal tract modifier configured");
        Ok(Self {
            order,
            sample_rate,
            fft_size,
            analysis_only,
            preemphasis: None,
            transforms: Vec::new(),
            fft: FftEngine::new(),
            coeffs: None,
            vocal_tract: Vec::new(),
            excitation: Vec::new(),
        })
    }

    /// Analyses frames through the pre-emphasis filter `1 - coef z^-1`.
    pub fn with_preemphasis(mut self, coef: f64) -> Self {
        self.preemphasis = Some(coef);
        self
    }

    /// Appends a transform; transforms run in the order they were added.
    pub fn with_transform(mut self, transform: impl FnMut(&mut [f64]) + 'static) -> Self {
        self.transforms.push(Box::new(transform));
        self
    }

    pub fn order(&self) -> usize {
        self.order
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    pub fn max_freq(&self) -> usize {
        half_spectrum_len(self.fft_size)
    }

    /// Coefficients of the last analysed frame.
    pub fn coeffs(&self) -> Option<&LpCoeffs> {
        self.coeffs.as_ref()
    }

    /// Vocal-tract magnitude spectrum of the last frame, `max_freq` bins.
    pub fn vocal_tract(&self) -> &[f64] {
        &self.vocal_tract
    }

    /// Excitation (residual) spectrum of the last frame, `max_freq` bins.
    pub fn excitation(&self) -> &[Complex<f64>] {
        &self.excitation
    }

    /// Runs the analysis half on a windowed frame.
    pub fn analyse(&mut self, frame: &[f64]) {
        if frame.len() > self.fft_size {
            let grown = frame.len().next_power_of_two();
            debug!(from = self.fft_size, to = grown, "growing analysis FFT");
            self.fft_size = grown;
        }

        let coeffs = match self.preemphasis {
            Some(coef) => LpCoeffs::analyse_preemphasised(frame, self.order, coef),
            None => LpCoeffs::analyse(frame, self.order),
        };
        let max_freq = self.max_freq();
        self.vocal_tract = coeffs.spectrum(self.fft_size);
        self.coeffs = Some(coeffs);

        let mut spectrum = self.fft.forward_real(frame, self.fft_size);
        spectrum.truncate(max_freq);
        for (h, vt) in spectrum.iter_mut().zip(&self.vocal_tract) {
            *h /= vt.max(MIN_SPECTRUM_VALUE);
        }
        self.excitation = spectrum;
    }

    /// Applies the transforms and rebuilds `frame` from the excitation and
    /// the modified vocal-tract spectrum.
    fn resynthesise(&mut self, frame: &mut [f64]) {
        for transform in self.transforms.iter_mut() {
            transform(self.vocal_tract.as_mut_slice());
        }

        let max_freq = self.max_freq();
        let mut spectrum = vec![Complex::new(0.0, 0.0); self.fft_size];
        for k in 0..max_freq {
            spectrum[k] = self.excitation[k] * self.vocal_tract[k];
        }
        fill_hermitian(&mut spectrum, max_freq);
        let output = self.fft.inverse_real(spectrum);
        frame.copy_from_slice(&output[..frame.len()]);
    }
}

impl InlineProcessor for VocalTractModifier {
    fn apply_inline(&mut self, data: &mut [f64]) {
        self.analyse(data);
        if !self.analysis_only {
            self.resynthesise(data);
        }
    }
}

/// Frequency-axis warp of a vocal-tract spectrum.
///
/// `vscales` is resampled across the spectrum and floored at
/// [`MIN_VSCALE`]; bin `k` takes the value at `round((k + 1) / vscale) - 1`.
/// Factors above one raise formants, as from a shorter vocal tract.
pub fn vocal_tract_scaling(vscales: Vec<f64>) -> impl FnMut(&mut [f64]) {
    move |spectrum: &mut [f64]| scale_vocal_tract(spectrum, &vscales)
}

/// In-place version of [`vocal_tract_scaling`].
pub fn scale_vocal_tract(spectrum: &mut [f64], vscales: &[f64]) {
    let n = spectrum.len();
    if n == 0 || vscales.is_empty() {
        return;
    }
    let scales: Vec<f64> = resample_linear(vscales, n)
        .into_iter()
        .map(|v| v.max(MIN_VSCALE))
        .collect();
    let original = spectrum.to_vec();
    for (k, out) in spectrum.iter_mut().enumerate() {
        let index = ((k + 1) as f64 / scales[k] + 0.5).floor() as usize;
        *out = original[index.clamp(1, n) - 1];
    }
}
