use crate::audio_io::AudioData;
use crate::effects::{check_format, float_param, number, AudioEffect, ParameterDef, ParameterValue, Parameters};
use crate::error::{Error, Result};
use crate::pitchmarks::{estimate_f0_contour, PitchMarks};
use crate::psola::{FdPsolaProcessor, ModificationSchedule, PsolaConfig};
use tracing::info;

/// Pitch, duration, loudness and vocal-tract modification with FD-PSOLA.
///
/// Pitch marks are placed from an F0 contour estimated on the input itself.
pub struct PitchShiftingEffect {
    // Parameters
    pitch_scale: f64, // 1.0 = no change, 2.0 = octave up, 0.5 = octave down
    time_scale: f64,
    energy_scale: f64,
    vocal_tract_scale: f64,
    config: PsolaConfig,
}

impl Default for PitchShiftingEffect {
    fn default() -> Self {
        Self::new()
    }
}

impl PitchShiftingEffect {
    pub fn new() -> Self {
        Self {
            pitch_scale: 1.0,
            time_scale: 1.0,
            energy_scale: 1.0,
            vocal_tract_scale: 1.0,
            config: PsolaConfig::default(),
        }
    }

    fn pitch_marks(&self, input: &AudioData) -> Result<PitchMarks> {
        let ws = self.config.schedule_window;
        let ss = self.config.schedule_shift;
        let f0s = estimate_f0_contour(
            &input.samples,
            input.sample_rate,
            ws,
            ss,
            self.config.voicing_threshold,
        );
        PitchMarks::from_f0_contour(&f0s, input.sample_rate, input.len(), ws, ss, true)
    }
}

impl AudioEffect for PitchShiftingEffect {
    fn name(&self) -> &str {
        "Pitch Shifting"
    }

    fn parameter_definitions(&self) -> Vec<ParameterDef> {
        vec![
            float_param("pitch", "Pitch scale (1.0 = no change, 2.0 = octave up)", 1.0, 0.25, 4.0),
            float_param("time", "Duration scale (2.0 = twice as long)", 1.0, 0.25, 4.0),
            float_param("energy", "Amplitude scale", 1.0, 0.0, 4.0),
            float_param("vocal_tract", "Spectral envelope stretch", 1.0, 0.5, 2.0),
        ]
    }

    fn set_parameters(&mut self, params: Parameters) -> Result<()> {
        for (key, value) in params {
            match key.as_str() {
                "pitch" => self.pitch_scale = number(&key, &value)?.clamp(0.25, 4.0),
                "time" => self.time_scale = number(&key, &value)?.clamp(0.25, 4.0),
                "energy" => self.energy_scale = number(&key, &value)?.clamp(0.0, 4.0),
                "vocal_tract" => self.vocal_tract_scale = number(&key, &value)?.clamp(0.5, 2.0),
                _ => return Err(Error::invalid_param(key, "unknown parameter")),
            }
        }
        Ok(())
    }

    fn get_parameters(&self) -> Parameters {
        let mut params = Parameters::new();
        params.insert("pitch".to_string(), ParameterValue::Float(self.pitch_scale));
        params.insert("time".to_string(), ParameterValue::Float(self.time_scale));
        params.insert("energy".to_string(), ParameterValue::Float(self.energy_scale));
        params.insert("vocal_tract".to_string(), ParameterValue::Float(self.vocal_tract_scale));
        params
    }

    fn process(&mut self, input: &AudioData) -> Result<AudioData> {
        check_format(self, input)?;
        let marks = self.pitch_marks(input)?;
        let schedule = ModificationSchedule::constant(
            self.pitch_scale,
            self.time_scale,
            self.energy_scale,
            self.vocal_tract_scale,
        )?;

        let mut processor = FdPsolaProcessor::new(self.config.clone(), input.sample_rate)?;
        let output = processor.process(&input.samples, &marks, &schedule)?;
        let stats = processor.last_stats();
        info!(
            marks = marks.len(),
            frames = stats.frames,
            warped = stats.warped,
            "pitch shifting done"
        );
        Ok(input.with_samples(output))
    }

    fn reset(&mut self) {
        // Every run builds its own processor
    }
}
