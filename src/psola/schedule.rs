//! Pitch, time, energy and vocal-tract scale schedules.

use crate::dsp::{resample_linear, round_half_up};
use crate::error::{Error, Result};
use crate::pitchmarks::PitchMarks;
use tracing::debug;

/// Scale factors applied to one pitch-synchronous frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Scales {
    pub pscale: f64,
    pub tscale: f64,
    pub escale: f64,
    pub vscale: f64,
}

impl Default for Scales {
    fn default() -> Self {
        Self {
            pscale: 1.0,
            tscale: 1.0,
            escale: 1.0,
            vscale: 1.0,
        }
    }
}

impl Scales {
    /// Whether the frame needs spectral warping rather than a windowed copy.
    pub fn needs_warp(&self, voiced: bool) -> bool {
        (voiced && self.pscale != 1.0) || self.vscale != 1.0
    }
}

/// User modification schedule.
///
/// Each array holds one value for the whole signal or a contour that is
/// stretched linearly over the signal's duration.
#[derive(Debug, Clone, PartialEq)]
pub struct ModificationSchedule {
    pscales: Vec<f64>,
    tscales: Vec<f64>,
    escales: Vec<f64>,
    vscales: Vec<f64>,
}

impl Default for ModificationSchedule {
    fn default() -> Self {
        Self {
            pscales: vec![1.0],
            tscales: vec![1.0],
            escales: vec![1.0],
            vscales: vec![1.0],
        }
    }
}

impl ModificationSchedule {
    /// Pitch, time and vocal-tract scales must be positive and finite.
    /// Energy scales may be zero.
    pub fn new(
        pscales: Vec<f64>,
        tscales: Vec<f64>,
        escales: Vec<f64>,
        vscales: Vec<f64>,
    ) -> Result<Self> {
        check_positive("pscale", &pscales)?;
        check_positive("tscale", &tscales)?;
        check_positive("vscale", &vscales)?;
        if escales.is_empty() {
            return Err(Error::schedule("escale has no values"));
        }
        if let Some(bad) = escales.iter().find(|e| !(e.is_finite() && **e >= 0.0)) {
            return Err(Error::schedule(format!("escale {} must be non-negative", bad)));
        }
        Ok(Self {
            pscales,
            tscales,
            escales,
            vscales,
        })
    }

    pub fn constant(pscale: f64, tscale: f64, escale: f64, vscale: f64) -> Result<Self> {
        Self::new(vec![pscale], vec![tscale], vec![escale], vec![vscale])
    }

    pub fn pscales(&self) -> &[f64] {
        &self.pscales
    }

    pub fn tscales(&self) -> &[f64] {
        &self.tscales
    }

    pub fn escales(&self) -> &[f64] {
        &self.escales
    }

    pub fn vscales(&self) -> &[f64] {
        &self.vscales
    }

    /// The global time-scale factor when exactly one is given.
    pub fn single_time_scale(&self) -> Option<f64> {
        match self.tscales.as_slice() {
            [t] => Some(*t),
            _ => None,
        }
    }

    pub fn min_pitch_scale(&self) -> f64 {
        self.pscales.iter().copied().fold(f64::INFINITY, f64::min)
    }

    /// Scales for each pitch-synchronous frame of `num_periods` periods.
    ///
    /// The schedules are first resampled onto a fixed analysis grid of
    /// window `ws` and shift `ss` seconds covering the padded signal; each
    /// frame then takes the grid point nearest its centre.
    pub fn per_pitch_frame(
        &self,
        marks: &PitchMarks,
        num_periods: usize,
        sample_rate: u32,
        signal_len: usize,
        ws: f64,
        ss: f64,
    ) -> Vec<Scales> {
        let fs = sample_rate as f64;
        let padded = (signal_len + marks.total_zeros_to_pad()) as f64;
        let grid_len = (round_half_up((padded / fs - 0.5 * ws) / ss).max(0) + 2) as usize;
        debug!(grid_len, ws, ss, "resampling modification schedule");

        let pscales = resample_linear(&self.pscales, grid_len);
        let tscales = resample_linear(&self.tscales, grid_len);
        let escales = resample_linear(&self.escales, grid_len);
        let vscales = resample_linear(&self.vscales, grid_len);

        let pm = marks.marks();
        let num_frames = pm.len().saturating_sub(num_periods);
        (0..num_frames)
            .map(|i| {
                let centre = 0.5 * (pm[i + num_periods] + pm[i]) as f64 / fs;
                let ind = round_half_up((centre - 0.5 * ws) / ss).clamp(0, grid_len as i64 - 1)
                    as usize;
                Scales {
                    pscale: pscales[ind],
                    tscale: tscales[ind],
                    escale: escales[ind],
                    vscale: vscales[ind],
                }
            })
            .collect()
    }
}

fn check_positive(name: &str, values: &[f64]) -> Result<()> {
    if values.is_empty() {
        return Err(Error::schedule(format!("{} has no values", name)));
    }
    match values.iter().find(|v| !(v.is_finite() && **v > 0.0)) {
        Some(bad) => Err(Error::schedule(format!("{} {} must be positive", name, bad))),
        None => Ok(()),
    }
}
