//! Pitch marks, voicing decisions and a simple F0 tracker.

use crate::dsp::{round_half_up, round_to_len};
use crate::error::{Error, Result};
use tracing::debug;

/// F0 values at or below this are treated as unvoiced.
pub const VOICED_F0_THRESHOLD: f64 = 10.0;

/// Period length used for unvoiced stretches when placing marks.
pub const UNVOICED_F0: f64 = 100.0;

/// Default voicing probability threshold.
pub const DEFAULT_VOICING_THRESHOLD: f64 = 0.35;

/// Range of pitch period durations accepted as human voice.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VoiceRange {
    pub min_period_seconds: f64,
    pub max_period_seconds: f64,
}

impl Default for VoiceRange {
    fn default() -> Self {
        Self {
            min_period_seconds: 0.001,
            max_period_seconds: 0.030,
        }
    }
}

impl VoiceRange {
    /// Shortest and longest accepted period in samples.
    pub fn period_limits(&self, sample_rate: u32) -> (usize, usize) {
        let fs = sample_rate as f64;
        let min = (self.min_period_seconds * fs + 1e-9).floor().max(1.0) as usize;
        let max = (self.max_period_seconds * fs - 1e-9).ceil() as usize;
        (min, max.max(min))
    }

    /// Checks the length of period `index`.
    pub fn check(&self, index: usize, samples: usize, sample_rate: u32) -> Result<()> {
        let (min, max) = self.period_limits(sample_rate);
        if samples < min || samples > max {
            return Err(Error::ImplausiblePeriod {
                index,
                samples,
                min,
                max,
            });
        }
        Ok(())
    }
}

/// Strictly increasing sample indices of glottal closure instants.
///
/// Consecutive marks bound one pitch period. Periods may carry a voicing
/// flag; when they don't, consumers decide voicing from the signal.
#[derive(Debug, Clone, PartialEq)]
pub struct PitchMarks {
    marks: Vec<usize>,
    voicing: Option<Vec<bool>>,
    total_zeros_to_pad: usize,
}

impl PitchMarks {
    pub fn new(marks: Vec<usize>) -> Result<Self> {
        if marks.len() < 2 {
            return Err(Error::TooFewPitchMarks {
                required: 2,
                found: marks.len(),
            });
        }
        for (i, pair) in marks.windows(2).enumerate() {
            if pair[1] <= pair[0] {
                return Err(Error::NonIncreasingPitchMarks {
                    index: i + 1,
                    previous: pair[0],
                    current: pair[1],
                });
            }
        }
        Ok(Self {
            marks,
            voicing: None,
            total_zeros_to_pad: 0,
        })
    }

    /// Marks every `period` samples, starting at 0 and staying below `len`.
    pub fn regular(period: usize, len: usize) -> Result<Self> {
        if period == 0 {
            return Err(Error::frame_config("pitch period must be positive"));
        }
        Self::new((0..len).step_by(period).collect())
    }

    /// Attaches one voicing flag per period.
    pub fn with_voicing(mut self, voicing: Vec<bool>) -> Result<Self> {
        if voicing.len() != self.num_periods() {
            return Err(Error::frame_config(format!(
                "{} voicing flags for {} periods",
                voicing.len(),
                self.num_periods()
            )));
        }
        self.voicing = Some(voicing);
        Ok(self)
    }

    pub fn with_total_zeros_to_pad(mut self, zeros: usize) -> Self {
        self.total_zeros_to_pad = zeros;
        self
    }

    /// Places marks along an F0 contour sampled on a fixed grid with window
    /// `ws` and shift `ss` seconds.
    ///
    /// Unvoiced frames are bridged by interpolating the neighbouring voiced
    /// values, and stretches without any voiced neighbour advance at 100 Hz.
    /// With `pad_final_mark`, a last mark one period past the final one is
    /// added when the marks stop short of the signal end; the overrun is
    /// recorded in [`total_zeros_to_pad`](Self::total_zeros_to_pad).
    pub fn from_f0_contour(
        f0s: &[f64],
        sample_rate: u32,
        len: usize,
        ws: f64,
        ss: f64,
        pad_final_mark: bool,
    ) -> Result<Self> {
        if f0s.is_empty() || len == 0 {
            return Err(Error::TooFewPitchMarks {
                required: 2,
                found: 0,
            });
        }
        let fs = sample_rate as f64;
        let interpolated = interpolate_unvoiced(f0s);
        let last_frame = f0s.len() as i64 - 1;

        let mut marks: Vec<usize> = Vec::new();
        let mut voicing: Vec<bool> = Vec::new();
        for n in 0..len {
            let ind = round_half_up((n as f64 / fs - 0.5 * ws) / ss).clamp(0, last_frame) as usize;
            let f0 = interpolated[ind];
            let period = if f0 > VOICED_F0_THRESHOLD {
                fs / f0
            } else {
                fs / UNVOICED_F0
            };

            match marks.last() {
                None => marks.push(n),
                Some(&prev) if n as f64 - period >= prev as f64 => {
                    marks.push(n);
                    voicing.push(f0s[ind] > VOICED_F0_THRESHOLD);
                }
                Some(_) => {}
            }
        }

        if marks.len() < 2 {
            return Err(Error::TooFewPitchMarks {
                required: 2,
                found: marks.len(),
            });
        }

        let mut zeros = 0;
        let last = marks[marks.len() - 1];
        if pad_final_mark && last != len - 1 {
            let extra = 2 * last - marks[marks.len() - 2];
            marks.push(extra);
            voicing.push(voicing.last().copied().unwrap_or(false));
            zeros = extra.saturating_sub(len - 1);
        }
        debug!(marks = marks.len(), zeros, "pitch marks placed from F0 contour");

        Ok(Self::new(marks)?
            .with_voicing(voicing)?
            .with_total_zeros_to_pad(zeros))
    }

    pub fn marks(&self) -> &[usize] {
        &self.marks
    }

    pub fn len(&self) -> usize {
        self.marks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.marks.is_empty()
    }

    pub fn num_periods(&self) -> usize {
        self.marks.len() - 1
    }

    /// Length of period `index` in samples.
    pub fn period(&self, index: usize) -> usize {
        self.marks[index + 1] - self.marks[index]
    }

    /// Voicing flag of period `index`, if known.
    pub fn is_voiced(&self, index: usize) -> Option<bool> {
        self.voicing.as_ref().and_then(|v| v.get(index).copied())
    }

    pub fn total_zeros_to_pad(&self) -> usize {
        self.total_zeros_to_pad
    }

    /// F0 per period derived from the mark spacing.
    pub fn f0s(&self, sample_rate: u32) -> Vec<f64> {
        (0..self.num_periods())
            .map(|i| sample_rate as f64 / self.period(i) as f64)
            .collect()
    }
}

/// Fills unvoiced stretches of an F0 contour by linear interpolation between
/// the surrounding voiced values; leading and trailing stretches copy the
/// nearest voiced value.
pub fn interpolate_unvoiced(f0s: &[f64]) -> Vec<f64> {
    let voiced: Vec<usize> = (0..f0s.len())
        .filter(|&i| f0s[i] > VOICED_F0_THRESHOLD)
        .collect();
    let (Some(&first), Some(&last)) = (voiced.first(), voiced.last()) else {
        return f0s.to_vec();
    };

    let mut out = f0s.to_vec();
    out[..first].fill(f0s[first]);
    out[last + 1..].fill(f0s[last]);
    for pair in voiced.windows(2) {
        let (a, b) = (pair[0], pair[1]);
        for i in a + 1..b {
            let t = (i - a) as f64 / (b - a) as f64;
            out[i] = f0s[a] + t * (f0s[b] - f0s[a]);
        }
    }
    out
}

/// Normalised autocorrelation peak over lags for 40..400 Hz.
pub fn voicing_probability(frame: &[f64], sample_rate: u32) -> f64 {
    if frame.len() < 2 {
        return 0.0;
    }
    let max_lag = (sample_rate as usize / 40).min(frame.len() - 1);
    let min_lag = (sample_rate as usize / 400).min(max_lag);
    let r0 = autocorrelation_at(frame, 0);
    if r0 <= 0.0 {
        return 0.0;
    }
    let peak = (min_lag..=max_lag)
        .map(|lag| autocorrelation_at(frame, lag))
        .fold(f64::NEG_INFINITY, f64::max);
    peak / r0
}

/// Voicing decision for one frame.
pub fn is_voiced(frame: &[f64], sample_rate: u32, threshold: f64) -> bool {
    voicing_probability(frame, sample_rate) >= threshold
}

fn autocorrelation_at(frame: &[f64], lag: usize) -> f64 {
    frame[..frame.len() - lag]
        .iter()
        .zip(&frame[lag..])
        .map(|(a, b)| a * b)
        .sum()
}

/// Estimates an F0 contour on a fixed grid of `ws`-second windows every
/// `ss` seconds. Unvoiced frames get 0.
pub fn estimate_f0_contour(
    signal: &[f64],
    sample_rate: u32,
    ws: f64,
    ss: f64,
    voicing_threshold: f64,
) -> Vec<f64> {
    let fs = sample_rate as f64;
    let window = round_to_len(ws * fs).max(2);
    let shift = round_to_len(ss * fs).max(1);
    let num_frames = if signal.len() <= window {
        1
    } else {
        (signal.len() - window) / shift + 1
    };
    let min_lag = (sample_rate as usize / 400).max(1);

    (0..num_frames)
        .map(|i| {
            let start = i * shift;
            let end = (start + window).min(signal.len());
            let frame = &signal[start..end];
            if frame.len() < 2 || !is_voiced(frame, sample_rate, voicing_threshold) {
                return 0.0;
            }
            let max_lag = (sample_rate as usize / 40).min(frame.len() - 1);
            let best = (min_lag.min(max_lag)..=max_lag)
                .max_by(|&a, &b| {
                    autocorrelation_at(frame, a).total_cmp(&autocorrelation_at(frame, b))
                })
                .unwrap_or(max_lag);
            fs / best.max(1) as f64
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use dasp::signal::{self, Signal};

    fn tone(freq: f64, sample_rate: u32, len: usize) -> Vec<f64> {
        signal::rate(sample_rate as f64)
            .const_hz(freq)
            .sine()
            .take(len)
            .collect()
    }

    #[test]
    fn test_marks_must_increase() {
        assert!(PitchMarks::new(vec![0, 10, 10]).is_err());
        assert!(matches!(
            PitchMarks::new(vec![5]),
            Err(Error::TooFewPitchMarks { found: 1, .. })
        ));
        let marks = PitchMarks::new(vec![0, 10, 25]).unwrap();
        assert_eq!(marks.num_periods(), 2);
        assert_eq!(marks.period(1), 15);
        assert_eq!(marks.is_voiced(0), None);
    }

    #[test]
    fn test_regular_marks() {
        let marks = PitchMarks::regular(160, 1000).unwrap();
        assert_eq!(marks.marks(), &[0, 160, 320, 480, 640, 800, 960]);
        assert_eq!(marks.f0s(16_000)[0], 100.0);
    }

    #[test]
    fn test_voice_range() {
        let range = VoiceRange::default();
        assert_eq!(range.period_limits(16_000), (16, 480));
        assert!(range.check(0, 160, 16_000).is_ok());
        assert!(matches!(
            range.check(3, 640, 16_000),
            Err(Error::ImplausiblePeriod { index: 3, samples: 640, .. })
        ));
    }

    #[test]
    fn test_interpolate_unvoiced() {
        let out = interpolate_unvoiced(&[0.0, 100.0, 0.0, 0.0, 160.0, 0.0]);
        assert_eq!(out, vec![100.0, 100.0, 120.0, 140.0, 160.0, 160.0]);
        assert_eq!(interpolate_unvoiced(&[0.0, 0.0]), vec![0.0, 0.0]);
    }

    #[test]
    fn test_marks_from_constant_contour() {
        let f0s = vec![200.0; 20];
        let marks = PitchMarks::from_f0_contour(&f0s, 16_000, 1_000, 0.02, 0.01, true).unwrap();

        assert_eq!(marks.marks()[0], 0);
        for i in 0..marks.num_periods() {
            assert_eq!(marks.period(i), 80);
            assert_eq!(marks.is_voiced(i), Some(true));
        }
        // 0, 80, ..., 960 then one padded mark at 1040
        assert_eq!(*marks.marks().last().unwrap(), 1040);
        assert_eq!(marks.total_zeros_to_pad(), 41);
    }

    #[test]
    fn test_unvoiced_contour_uses_default_period() {
        let marks = PitchMarks::from_f0_contour(&[0.0; 5], 16_000, 500, 0.02, 0.01, false).unwrap();
        assert_eq!(marks.marks(), &[0, 160, 320, 480]);
        assert_eq!(marks.is_voiced(0), Some(false));
        assert_eq!(marks.total_zeros_to_pad(), 0);
    }

    #[test]
    fn test_voicing_of_tone_and_silence() {
        let voiced = tone(100.0, 16_000, 480);
        assert!(voicing_probability(&voiced, 16_000) > 0.6);
        assert!(is_voiced(&voiced, 16_000, DEFAULT_VOICING_THRESHOLD));
        assert_eq!(voicing_probability(&[0.0; 480], 16_000), 0.0);
    }

    #[test]
    fn test_estimate_f0_of_tone() {
        let signal = tone(125.0, 16_000, 8_000);
        let f0s = estimate_f0_contour(&signal, 16_000, 0.04, 0.01, DEFAULT_VOICING_THRESHOLD);
        assert!(!f0s.is_empty());
        for f0 in f0s {
            assert!((f0 - 125.0).abs() < 2.0, "f0 = {}", f0);
        }
    }
}
