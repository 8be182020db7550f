//! Frequency-domain pitch-synchronous overlap-add (FD-PSOLA).
//!
//! Frames of a few pitch periods are taken at every pitch mark. Each one is
//! repeated or skipped to follow the time scale, and rebuilt at a new length
//! through its LPC excitation and vocal-tract spectra when pitch or vocal
//! tract length change. The results are overlap-added at the new period.

pub mod schedule;
pub mod state;

pub use schedule::{ModificationSchedule, Scales};
pub use state::{OverlapAddBuffer, Placement, ProcessingStats, SynthesisState};

use crate::dsp::{energy, even_at_least, resample_linear, round_to_len};
use crate::error::{Error, Result};
use crate::fft::{fill_hermitian, FftEngine};
use crate::frame::PitchFrameProvider;
use crate::lpc::lp_order;
use crate::pitchmarks::{self, PitchMarks, VoiceRange, DEFAULT_VOICING_THRESHOLD};
use crate::source::{BufferedSource, SampleSink};
use crate::vocal_tract::{scale_vocal_tract, VocalTractModifier};
use crate::window::{Window, WindowKind};
use rustfft::num_complex::Complex;
use tracing::{debug, info, trace};

/// Configuration of [`FdPsolaProcessor`].
#[derive(Debug, Clone, PartialEq)]
pub struct PsolaConfig {
    /// Pitch periods per synthesis frame.
    pub num_periods: usize,
    /// Voicing probability above which a frame counts as voiced, used when
    /// the pitch marks carry no voicing flags.
    pub voicing_threshold: f64,
    /// Window length of the fixed grid schedules are resampled onto, seconds.
    pub schedule_window: f64,
    /// Shift of the fixed schedule grid, seconds.
    pub schedule_shift: f64,
    /// LP order; derived from the sampling rate when `None`.
    pub lp_order: Option<usize>,
    pub voice_range: VoiceRange,
    pub window: WindowKind,
}

impl Default for PsolaConfig {
    fn default() -> Self {
        Self {
            num_periods: 3,
            voicing_threshold: DEFAULT_VOICING_THRESHOLD,
            schedule_window: 0.02,
            schedule_shift: 0.01,
            lp_order: None,
            voice_range: VoiceRange::default(),
            window: WindowKind::Hann,
        }
    }
}

/// One input frame and what to do with it.
#[derive(Debug, Clone, Copy)]
pub struct PeriodInput<'a> {
    pub frame: &'a [f64],
    pub voiced: bool,
    pub scales: Scales,
    /// Length of the frame's first pitch period.
    pub period: usize,
    pub is_last: bool,
}

pub struct FdPsolaProcessor {
    config: PsolaConfig,
    sample_rate: u32,
    order: usize,
    analyser: VocalTractModifier,
    fft: FftEngine,
    stats: ProcessingStats,
}

impl FdPsolaProcessor {
    pub fn new(config: PsolaConfig, sample_rate: u32) -> Result<Self> {
        if config.num_periods == 0 {
            return Err(Error::frame_config("frames need at least one pitch period"));
        }
        if sample_rate == 0 {
            return Err(Error::frame_config("sampling rate must be positive"));
        }
        let order = config.lp_order.unwrap_or_else(|| lp_order(sample_rate));
        let analyser = VocalTractModifier::new(order, sample_rate, analysis_fft_size(4, order), true)?;
        Ok(Self {
            config,
            sample_rate,
            order,
            analyser,
            fft: FftEngine::new(),
            stats: ProcessingStats::default(),
        })
    }

    pub fn config(&self) -> &PsolaConfig {
        &self.config
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Counters of the most recent run.
    pub fn last_stats(&self) -> ProcessingStats {
        self.stats
    }

    /// Modifies `signal` and returns the result.
    pub fn process(
        &mut self,
        signal: &[f64],
        marks: &PitchMarks,
        schedule: &ModificationSchedule,
    ) -> Result<Vec<f64>> {
        let mut output = Vec::new();
        self.process_into(signal, marks, schedule, &mut output)?;
        Ok(output)
    }

    /// Modifies `signal`, streaming the result into `sink`.
    pub fn process_into<K: SampleSink + ?Sized>(
        &mut self,
        signal: &[f64],
        marks: &PitchMarks,
        schedule: &ModificationSchedule,
        sink: &mut K,
    ) -> Result<ProcessingStats> {
        let np = self.config.num_periods;
        let fs = self.sample_rate;
        if marks.len() <= np {
            return Err(Error::TooFewPitchMarks {
                required: np + 1,
                found: marks.len(),
            });
        }

        let scales = schedule.per_pitch_frame(
            marks,
            np,
            fs,
            signal.len(),
            self.config.schedule_window,
            self.config.schedule_shift,
        );
        let max_frame = (0..scales.len())
            .map(|i| even_at_least(marks.marks()[i + np] - marks.marks()[i], 4))
            .max()
            .unwrap_or(4);
        let capacity = ring_capacity(max_frame, schedule.min_pitch_scale());
        let fft_size = analysis_fft_size(max_frame, self.order);
        let target_len = schedule
            .single_time_scale()
            .map(|t| round_to_len(signal.len() as f64 * t));
        self.analyser = VocalTractModifier::new(self.order, fs, fft_size, true)?;
        debug!(
            frames = scales.len(),
            max_frame, capacity, fft_size, ?target_len, "FD-PSOLA run configured"
        );

        let source = BufferedSource::new(signal.to_vec()).with_sample_rate(fs);
        let mut frames = PitchFrameProvider::new(Box::new(source), marks.clone(), np, 1, fs)?
            .with_voice_range(self.config.voice_range);
        let mut state = SynthesisState::new(capacity, target_len);
        let leading = frames.leading_samples();
        state.write_direct(&leading, sink)?;

        let num_frames = frames.frame_count();
        let mut index = 0;
        while let Some(frame) = frames.next_frame()? {
            let voiced = match marks.is_voiced(index) {
                Some(voiced) => voiced,
                None => pitchmarks::is_voiced(frame, fs, self.config.voicing_threshold),
            };
            let input = PeriodInput {
                frame,
                voiced,
                scales: scales[index],
                period: marks.period(index),
                is_last: index + 1 == num_frames,
            };
            self.process_period(input, &mut state, sink)?;
            index += 1;
        }

        self.stats = state.finish(sink)?;
        info!(
            frames = self.stats.frames,
            skipped = self.stats.skipped,
            repeated = self.stats.repeated,
            warped = self.stats.warped,
            written = self.stats.written,
            "FD-PSOLA finished"
        );
        Ok(self.stats)
    }

    /// Synthesises one input frame into `state`.
    pub fn process_period<K: SampleSink + ?Sized>(
        &mut self,
        input: PeriodInput<'_>,
        state: &mut SynthesisState,
        sink: &mut K,
    ) -> Result<()> {
        let np = self.config.num_periods;
        let Scales {
            pscale,
            tscale,
            escale,
            vscale,
        } = input.scales;
        state.stats.frames += 1;

        let frame_size = even_at_least(input.frame.len(), 4);
        let mut new_frame_size = if input.voiced {
            even_at_least(round_to_len(frame_size as f64 / pscale), 4)
        } else {
            frame_size
        };

        let emissions = state.plan_emissions(frame_size, new_frame_size, tscale, np, input.is_last);
        if emissions == 0 {
            trace!(frame = state.stats.frames - 1, "skipped");
            return Ok(());
        }

        let mut frame = input.frame.to_vec();
        frame.resize(frame_size, 0.0);
        Window::periodic(self.config.window, frame_size).apply(&mut frame);

        let mut output = if input.scales.needs_warp(input.voiced) {
            state.stats.warped += 1;
            let warped = self.warp(&frame, pscale, vscale, new_frame_size);
            let gain = (energy(&frame) / (frame_size as f64).sqrt())
                / (energy(&warped) / (new_frame_size as f64).sqrt());
            scaled(warped, gain * escale)
        } else {
            new_frame_size = new_frame_size.min(frame_size);
            frame.truncate(new_frame_size);
            scaled(frame, escale)
        };

        let skip = if input.voiced {
            round_to_len(input.period as f64 / pscale)
        } else {
            input.period
        };
        let window = Window::periodic(self.config.window, new_frame_size);
        for j in 0..emissions {
            let is_final = input.is_last && j + 1 == emissions;
            let placement = state.placement(is_final);
            if placement == Placement::Normal && !input.voiced && j % 2 == 1 {
                // alternate direction of repeated noise
                output.reverse();
                state.place(&output, window.values(), placement);
                output.reverse();
            } else {
                state.place(&output, window.values(), placement);
            }
            state.advance(skip, sink)?;
        }
        Ok(())
    }

    /// Rebuilds a windowed frame at `new_frame_size` samples from its
    /// excitation spectrum, resampled along frequency, and its vocal-tract
    /// spectrum.
    fn warp(
        &mut self,
        frame: &[f64],
        pscale: f64,
        vscale: f64,
        new_frame_size: usize,
    ) -> Vec<f64> {
        let analyser = &mut self.analyser;
        analyser.analyse(frame);
        let max_freq = analyser.max_freq();

        let mut new_max_freq = round_to_len(max_freq as f64 / pscale).max(3);
        if new_max_freq % 2 == 0 {
            new_max_freq += 1;
        }
        let new_fft_size = 2 * (new_max_freq - 1);

        let mut vocal_tract = resample_linear(analyser.vocal_tract(), new_max_freq);
        if vscale != 1.0 {
            scale_vocal_tract(&mut vocal_tract, &[vscale]);
        }

        let excitation = analyser.excitation();
        let mut spectrum = vec![Complex::new(0.0, 0.0); new_fft_size];
        let copied = max_freq.min(new_fft_size);
        spectrum[..copied].copy_from_slice(&excitation[..copied]);
        tile_excitation(excitation, &mut spectrum, new_max_freq);

        let nyquist = new_max_freq - 1;
        spectrum[nyquist] = Complex::new(spectrum[nyquist].norm(), 0.0);
        for (bin, vt) in spectrum.iter_mut().zip(&vocal_tract) {
            *bin *= vt;
        }
        fill_hermitian(&mut spectrum, new_max_freq);

        let mut output = self.fft.inverse_real(spectrum);
        output.resize(new_frame_size, 0.0);
        trace!(max_freq, new_max_freq, new_frame_size, "warped frame");
        output
    }
}

/// Fills bins past the original band by mirroring the excitation back and
/// forth, so pitch scales below one still have content up to the new
/// Nyquist bin.
fn tile_excitation(excitation: &[Complex<f64>], spectrum: &mut [Complex<f64>], new_max_freq: usize) {
    let m = excitation.len();
    if m < 3 {
        return;
    }
    let mut k_max = 1;
    while new_max_freq > (k_max + 1) * (m - 2) {
        k_max += 1;
    }
    for k in 1..=k_max {
        let fix = (m - 2) * k;
        for j in fix + 2..new_max_freq.min(m + fix) {
            let src = if k % 2 == 1 { fix + m - j } else { j - fix - 1 };
            spectrum[j] = excitation[src];
        }
    }
}

/// Power-of-two analysis size covering the longest frame and the LP order.
fn analysis_fft_size(max_frame: usize, order: usize) -> usize {
    max_frame.max(2 * order).max(4).next_power_of_two()
}

/// Ring size holding the longest synthesis frame of a run.
fn ring_capacity(max_frame: usize, min_pscale: f64) -> usize {
    let stretched = even_at_least(round_to_len(max_frame as f64 / min_pscale), 4);
    stretched.max(max_frame) + 1
}

fn scaled(mut frame: Vec<f64>, gain: f64) -> Vec<f64> {
    for x in frame.iter_mut() {
        *x *= gain;
    }
    frame
}

#[cfg(test)]
mod tests {
    use super::*;
    use dasp::signal::{self, Signal};

    fn tone(freq: f64, len: usize) -> Vec<f64> {
        signal::rate(16_000.0)
            .const_hz(freq)
            .sine()
            .take(len)
            .map(|x| 0.5 * x)
            .collect()
    }

    fn run(signal: &[f64], marks: &PitchMarks, schedule: &ModificationSchedule) -> (Vec<f64>, ProcessingStats) {
        let mut psola = FdPsolaProcessor::new(PsolaConfig::default(), 16_000).unwrap();
        let output = psola.process(signal, marks, schedule).unwrap();
        (output, psola.last_stats())
    }

    #[test]
    fn test_identity_keeps_length_and_shape() {
        let input = tone(100.0, 8_000);
        let marks = PitchMarks::regular(160, input.len()).unwrap();
        let (output, stats) = run(&input, &marks, &ModificationSchedule::default());

        assert_eq!(output.len(), input.len());
        assert_eq!(stats.skipped, 0);
        assert_eq!(stats.warped, 0);
        // away from the edges the copy path reproduces the input
        for i in 1_000..7_000 {
            assert!((output[i] - input[i]).abs() < 1e-6, "sample {}", i);
        }
    }

    #[test]
    fn test_time_compression_skips() {
        let input = tone(100.0, 16_000);
        let marks = PitchMarks::regular(160, input.len()).unwrap();
        let schedule = ModificationSchedule::constant(1.0, 0.5, 1.0, 1.0).unwrap();
        let (output, stats) = run(&input, &marks, &schedule);
        assert_eq!(output.len(), 8_000);
        assert!(stats.skipped > 0);
    }

    #[test]
    fn test_pitch_scaling_warps_voiced_frames() {
        let input = tone(100.0, 8_000);
        let marks = PitchMarks::regular(160, input.len()).unwrap();
        let schedule = ModificationSchedule::constant(1.5, 1.0, 1.0, 1.0).unwrap();
        let (output, stats) = run(&input, &marks, &schedule);
        assert_eq!(output.len(), input.len());
        assert_eq!(stats.warped, stats.frames - stats.skipped);
        assert!(output.iter().all(|x| x.is_finite()));
    }

    #[test]
    fn test_unvoiced_marks_skip_pitch_warp() {
        let input = tone(100.0, 4_000);
        let marks = PitchMarks::regular(160, input.len()).unwrap();
        let voicing = vec![false; marks.num_periods()];
        let marks = marks.with_voicing(voicing).unwrap();
        let schedule = ModificationSchedule::constant(2.0, 1.0, 1.0, 1.0).unwrap();
        let (_, stats) = run(&input, &marks, &schedule);
        assert_eq!(stats.warped, 0);
    }

    #[test]
    fn test_energy_scale() {
        let input = tone(100.0, 8_000);
        let marks = PitchMarks::regular(160, input.len()).unwrap();
        let schedule = ModificationSchedule::constant(1.0, 1.0, 0.5, 1.0).unwrap();
        let (output, _) = run(&input, &marks, &schedule);
        for i in 1_000..7_000 {
            assert!((output[i] - 0.5 * input[i]).abs() < 1e-6);
        }
    }

    #[test]
    fn test_leading_samples_are_copied() {
        let input = tone(100.0, 4_000);
        let marks = PitchMarks::new((50..4_000).step_by(160).collect()).unwrap();
        let (output, _) = run(&input, &marks, &ModificationSchedule::default());
        assert_eq!(&output[..50], &input[..50]);
    }

    #[test]
    fn test_too_few_marks() {
        let marks = PitchMarks::new(vec![0, 160, 320]).unwrap();
        let mut psola = FdPsolaProcessor::new(PsolaConfig::default(), 16_000).unwrap();
        assert!(matches!(
            psola.process(&[0.0; 400], &marks, &ModificationSchedule::default()),
            Err(Error::TooFewPitchMarks { required: 4, found: 3 })
        ));
    }

    #[test]
    fn test_implausible_period_aborts() {
        let marks = PitchMarks::new(vec![0, 160, 320, 960, 1_120]).unwrap();
        let mut psola = FdPsolaProcessor::new(PsolaConfig::default(), 16_000).unwrap();
        assert!(matches!(
            psola.process(&[0.0; 1_200], &marks, &ModificationSchedule::default()),
            Err(Error::ImplausiblePeriod { index: 2, .. })
        ));
    }

    #[test]
    fn test_tile_excitation_mirrors() {
        let excitation: Vec<Complex<f64>> = (0..5).map(|i| Complex::new(i as f64, 0.0)).collect();
        let mut spectrum = vec![Complex::new(0.0, 0.0); 16];
        spectrum[..5].copy_from_slice(&excitation);
        tile_excitation(&excitation, &mut spectrum, 9);
        let re: Vec<f64> = spectrum[..9].iter().map(|c| c.re).collect();
        assert_eq!(re, vec![0.0, 1.0, 2.0, 3.0, 4.0, 3.0, 2.0, 1.0, 1.0]);
    }

    #[test]
    fn test_ring_capacity_covers_lowered_pitch() {
        assert_eq!(ring_capacity(480, 1.0), 481);
        assert_eq!(ring_capacity(480, 0.5), 961);
        assert_eq!(ring_capacity(480, 2.0), 481);
    }
}
