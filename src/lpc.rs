//! Linear prediction analysis.
//!
//! Coefficients are kept in inverse-filter form `A(z) = 1 + a1 z^-1 + ...`,
//! so the all-pole vocal-tract model is `gain / A(z)`.

use biquad::{Biquad, Coefficients, DirectForm1};
use std::cell::OnceCell;
use std::f64::consts::PI;

/// Floor for every magnitude spectrum value.
pub const MIN_SPECTRUM_VALUE: f64 = 1e-10;

const LSF_GRID_POINTS: usize = 1024;
const LSF_BISECTIONS: usize = 48;

/// Prediction order used for a sampling rate: one pole pair per kHz plus
/// two, rounded up to even.
pub fn lp_order(sample_rate: u32) -> usize {
    let p = (sample_rate as f64 / 1000.0 + 2.0) as usize;
    if p % 2 == 1 {
        p + 1
    } else {
        p
    }
}

/// Autocorrelation for lags `0..=max_lag`.
pub fn autocorrelation(frame: &[f64], max_lag: usize) -> Vec<f64> {
    (0..=max_lag)
        .map(|lag| {
            if lag >= frame.len() {
                return 0.0;
            }
            frame[..frame.len() - lag]
                .iter()
                .zip(&frame[lag..])
                .map(|(a, b)| a * b)
                .sum()
        })
        .collect()
}

/// Levinson-Durbin recursion. Returns the inverse filter and the final
/// prediction error.
pub fn levinson(r: &[f64], order: usize) -> (Vec<f64>, f64) {
    let mut a = vec![0.0; order + 1];
    a[0] = 1.0;
    let mut err = r.first().copied().unwrap_or(0.0);
    if err <= f64::MIN_POSITIVE {
        return (a, 0.0);
    }

    let mut previous = a.clone();
    for i in 1..=order.min(r.len() - 1) {
        let acc: f64 = r[i] + (1..i).map(|j| a[j] * r[i - j]).sum::<f64>();
        let k = -acc / err;
        previous.copy_from_slice(&a);
        for j in 1..i {
            a[j] = previous[j] + k * previous[i - j];
        }
        a[i] = k;
        err *= 1.0 - k * k;
        if err <= f64::MIN_POSITIVE {
            // perfectly predictable frame
            err = 0.0;
            break;
        }
    }
    (a, err)
}

/// One frame's linear prediction model.
#[derive(Debug, Clone)]
pub struct LpCoeffs {
    one_minus_a: Vec<f64>,
    gain: f64,
    lsf: OnceCell<Vec<f64>>,
}

impl LpCoeffs {
    /// Analyses an already windowed frame.
    pub fn analyse(frame: &[f64], order: usize) -> Self {
        let r = autocorrelation(frame, order);
        let (one_minus_a, err) = levinson(&r, order);
        Self {
            one_minus_a,
            gain: err.max(0.0).sqrt(),
            lsf: OnceCell::new(),
        }
    }

    /// Analyses the frame after pre-emphasis with coefficient `coef`.
    pub fn analyse_preemphasised(frame: &[f64], order: usize, coef: f64) -> Self {
        Self::analyse(&pre_emphasis(frame, coef), order)
    }

    pub fn from_inverse_filter(one_minus_a: Vec<f64>, gain: f64) -> Self {
        Self {
            one_minus_a,
            gain,
            lsf: OnceCell::new(),
        }
    }

    /// Rebuilds the inverse filter from sorted line spectral frequencies in
    /// radians.
    pub fn from_lsf(lsf: &[f64], gain: f64) -> Self {
        let order = lsf.len();
        // trivial roots: z = -1 on P and z = 1 on Q for even orders, both on
        // Q for odd ones
        let (mut p, mut q) = if order % 2 == 0 {
            (vec![1.0, 1.0], vec![1.0, -1.0])
        } else {
            (vec![1.0], vec![1.0, 0.0, -1.0])
        };
        for (i, &w) in lsf.iter().enumerate() {
            let section = [1.0, -2.0 * w.cos(), 1.0];
            if i % 2 == 0 {
                p = convolve(&p, &section);
            } else {
                q = convolve(&q, &section);
            }
        }
        let one_minus_a = (0..=order)
            .map(|k| 0.5 * (p.get(k).copied().unwrap_or(0.0) + q.get(k).copied().unwrap_or(0.0)))
            .collect();
        Self {
            one_minus_a,
            gain,
            lsf: OnceCell::from(lsf.to_vec()),
        }
    }

    pub fn order(&self) -> usize {
        self.one_minus_a.len() - 1
    }

    pub fn gain(&self) -> f64 {
        self.gain
    }

    /// Inverse filter coefficients, starting with 1.
    pub fn one_minus_a(&self) -> &[f64] {
        &self.one_minus_a
    }

    /// Predictor coefficients: `x[n] ~ sum(alpha[i] * x[n - 1 - i])`.
    pub fn alpha(&self) -> Vec<f64> {
        self.one_minus_a[1..].iter().map(|a| -a).collect()
    }

    /// Magnitude of `gain / A(e^jw)` on the `fft_size / 2 + 1` bins of an
    /// `fft_size`-point grid.
    pub fn spectrum(&self, fft_size: usize) -> Vec<f64> {
        let max_freq = fft_size / 2 + 1;
        (0..max_freq)
            .map(|k| {
                let w = 2.0 * PI * k as f64 / fft_size as f64;
                let (re, im) = self
                    .one_minus_a
                    .iter()
                    .enumerate()
                    .fold((0.0, 0.0), |(re, im), (n, a)| {
                        let phase = w * n as f64;
                        (re + a * phase.cos(), im - a * phase.sin())
                    });
                let denominator = (re * re + im * im).sqrt().max(MIN_SPECTRUM_VALUE);
                (self.gain / denominator).max(MIN_SPECTRUM_VALUE)
            })
            .collect()
    }

    /// Line spectral frequencies in radians, ascending, computed on first use.
    pub fn lsf(&self) -> &[f64] {
        self.lsf.get_or_init(|| lpc_to_lsf(&self.one_minus_a))
    }
}

fn convolve(a: &[f64], b: &[f64]) -> Vec<f64> {
    let mut out = vec![0.0; a.len() + b.len() - 1];
    for (i, x) in a.iter().enumerate() {
        for (j, y) in b.iter().enumerate() {
            out[i + j] += x * y;
        }
    }
    out
}

/// Roots of the symmetric and antisymmetric polynomials built from `A(z)`,
/// found by sign changes on a frequency grid refined by bisection.
fn lpc_to_lsf(one_minus_a: &[f64]) -> Vec<f64> {
    let order = one_minus_a.len() - 1;
    let coeff = |k: usize| if k <= order { one_minus_a[k] } else { 0.0 };
    let sym: Vec<f64> = (0..=order + 1).map(|k| coeff(k) + coeff(order + 1 - k)).collect();
    let anti: Vec<f64> = (0..=order + 1).map(|k| coeff(k) - coeff(order + 1 - k)).collect();
    let center = (order + 1) as f64 / 2.0;

    let eval_sym = |w: f64| -> f64 {
        sym.iter()
            .enumerate()
            .map(|(k, c)| c * (w * (center - k as f64)).cos())
            .sum()
    };
    let eval_anti = |w: f64| -> f64 {
        anti.iter()
            .enumerate()
            .map(|(k, c)| c * (w * (center - k as f64)).sin())
            .sum()
    };

    let mut roots = find_roots(&eval_sym);
    roots.extend(find_roots(&eval_anti));
    roots.sort_by(f64::total_cmp);
    roots.truncate(order);
    roots
}

fn find_roots(f: &dyn Fn(f64) -> f64) -> Vec<f64> {
    let step = PI / LSF_GRID_POINTS as f64;
    let mut roots = Vec::new();
    let mut lo = step * 0.5;
    let mut f_lo = f(lo);
    for i in 1..LSF_GRID_POINTS {
        let hi = (i as f64 + 0.5) * step;
        let f_hi = f(hi);
        if f_lo == 0.0 || f_lo.signum() != f_hi.signum() {
            let (mut a, mut b, mut fa) = (lo, hi, f_lo);
            for _ in 0..LSF_BISECTIONS {
                let mid = 0.5 * (a + b);
                let fm = f(mid);
                if fa.signum() == fm.signum() && fm != 0.0 {
                    a = mid;
                    fa = fm;
                } else {
                    b = mid;
                }
            }
            roots.push(0.5 * (a + b));
        }
        lo = hi;
        f_lo = f_hi;
    }
    roots
}

/// First-order pre-emphasis `y[n] = x[n] - coef * x[n-1]`.
pub fn pre_emphasis(signal: &[f64], coef: f64) -> Vec<f64> {
    let mut filter = DirectForm1::<f64>::new(Coefficients {
        a1: 0.0,
        a2: 0.0,
        b0: 1.0,
        b1: -coef,
        b2: 0.0,
    });
    signal.iter().map(|&x| filter.run(x)).collect()
}

/// Inverse of [`pre_emphasis`]: `y[n] = x[n] + coef * y[n-1]`.
pub fn de_emphasis(signal: &[f64], coef: f64) -> Vec<f64> {
    let mut filter = DirectForm1::<f64>::new(Coefficients {
        a1: -coef,
        a2: 0.0,
        b0: 1.0,
        b1: 0.0,
        b2: 0.0,
    });
    signal.iter().map(|&x| filter.run(x)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::window::{Window, WindowKind};

    /// Output of a known two-pole resonator driven by an impulse train.
    fn resonator(len: usize) -> Vec<f64> {
        let mut y = vec![0.0; len];
        for n in 0..len {
            let excitation = if n % 80 == 0 { 1.0 } else { 0.0 };
            let y1 = if n >= 1 { y[n - 1] } else { 0.0 };
            let y2 = if n >= 2 { y[n - 2] } else { 0.0 };
            y[n] = excitation + 1.3 * y1 - 0.8 * y2;
        }
        y
    }

    #[test]
    fn test_lp_order() {
        assert_eq!(lp_order(16_000), 18);
        assert_eq!(lp_order(8_000), 10);
        assert_eq!(lp_order(44_100), 46);
    }

    #[test]
    fn test_levinson_recovers_resonator() {
        let coeffs = LpCoeffs::analyse(&resonator(4_000), 2);
        let a = coeffs.one_minus_a();
        assert!((a[1] + 1.3).abs() < 0.05, "a1 = {}", a[1]);
        assert!((a[2] - 0.8).abs() < 0.05, "a2 = {}", a[2]);
        assert_eq!(coeffs.alpha().len(), 2);
        assert!(coeffs.gain() > 0.0);
    }

    #[test]
    fn test_silent_frame_gives_flat_filter() {
        let coeffs = LpCoeffs::analyse(&[0.0; 64], 10);
        assert_eq!(coeffs.order(), 10);
        assert_eq!(coeffs.one_minus_a()[0], 1.0);
        assert!(coeffs.one_minus_a()[1..].iter().all(|&a| a == 0.0));
        assert!(coeffs.spectrum(64).iter().all(|&v| v >= MIN_SPECTRUM_VALUE));
    }

    #[test]
    fn test_spectrum_peaks_at_resonance() {
        let mut frame = resonator(512);
        Window::new(WindowKind::Hann, 512).apply(&mut frame);
        let coeffs = LpCoeffs::analyse(&frame, 4);
        let spectrum = coeffs.spectrum(512);
        assert_eq!(spectrum.len(), 257);

        // poles at angle acos(1.3 / (2 * sqrt(0.8))) ~ 0.757 rad
        let peak = (0..spectrum.len())
            .max_by(|&a, &b| spectrum[a].total_cmp(&spectrum[b]))
            .unwrap();
        let expected = (0.757 / (2.0 * PI) * 512.0) as usize;
        assert!((peak as i64 - expected as i64).abs() <= 6, "peak at {}", peak);
    }

    #[test]
    fn test_lsf_of_flat_filter() {
        let coeffs = LpCoeffs::from_inverse_filter(vec![1.0, 0.0, 0.0, 0.0, 0.0], 1.0);
        let lsf = coeffs.lsf();
        assert_eq!(lsf.len(), 4);
        for (i, w) in lsf.iter().enumerate() {
            assert!((w - PI * (i + 1) as f64 / 5.0).abs() < 1e-6);
        }
    }

    #[test]
    fn test_lsf_converts_back() {
        let mut frame = resonator(1_024);
        Window::new(WindowKind::Hamming, 1_024).apply(&mut frame);
        let coeffs = LpCoeffs::analyse(&frame, 6);
        let lsf = coeffs.lsf().to_vec();
        assert!(lsf.windows(2).all(|w| w[0] < w[1]));

        let rebuilt = LpCoeffs::from_lsf(&lsf, coeffs.gain());
        for (a, b) in coeffs.one_minus_a().iter().zip(rebuilt.one_minus_a()) {
            assert!((a - b).abs() < 1e-6, "{} vs {}", a, b);
        }
    }

    #[test]
    fn test_emphasis_filters_invert() {
        let signal = resonator(200);
        let emphasised = pre_emphasis(&signal, 0.97);
        assert!((emphasised[1] - (signal[1] - 0.97 * signal[0])).abs() < 1e-12);

        let restored = de_emphasis(&emphasised, 0.97);
        for (a, b) in signal.iter().zip(&restored) {
            assert!((a - b).abs() < 1e-9);
        }
    }
}
