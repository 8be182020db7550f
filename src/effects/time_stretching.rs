use crate::audio_io::AudioData;
use crate::effects::{check_format, float_param, frame_length_param, int_param, number, overlap_add, AudioEffect, ParameterDef, ParameterValue, Parameters};
use crate::error::{Error, Result};
use crate::ola::OverlapAddConfig;
use crate::phase::PhaseVocoder;

/// Phase-vocoder time stretching at constant pitch.
pub struct TimeStretchingEffect {
    // Parameters
    time_scale: f64, // 1.0 = no change, 2.0 = twice as long, 0.5 = half as long
    frame_length: usize,
}

impl Default for TimeStretchingEffect {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeStretchingEffect {
    pub fn new() -> Self {
        Self {
            time_scale: 1.0,
            frame_length: 1024,
        }
    }

    fn config(&self) -> OverlapAddConfig {
        OverlapAddConfig {
            frame_length: self.frame_length,
            synthesis_window: true,
            time_scale: self.time_scale,
            ..OverlapAddConfig::default()
        }
    }
}

impl AudioEffect for TimeStretchingEffect {
    fn name(&self) -> &str {
        "Time Stretching"
    }

    fn parameter_definitions(&self) -> Vec<ParameterDef> {
        vec![
            float_param("time", "Time stretch factor (1.0 = no change, 2.0 = twice as long)", 1.0, 0.25, 4.0),
            int_param("frame_length", "Analysis frame length in samples", 1024, 64, 8192),
        ]
    }

    fn set_parameters(&mut self, params: Parameters) -> Result<()> {
        for (key, value) in params {
            match key.as_str() {
                "time" => self.time_scale = number(&key, &value)?.clamp(0.25, 4.0),
                "frame_length" => self.frame_length = frame_length_param(number(&key, &value)?),
                _ => return Err(Error::invalid_param(key, "unknown parameter")),
            }
        }
        Ok(())
    }

    fn get_parameters(&self) -> Parameters {
        let mut params = Parameters::new();
        params.insert("time".to_string(), ParameterValue::Float(self.time_scale));
        params.insert("frame_length".to_string(), ParameterValue::Int(self.frame_length as i64));
        params
    }

    fn process(&mut self, input: &AudioData) -> Result<AudioData> {
        check_format(self, input)?;
        let config = self.config();
        let (analysis_hop, synthesis_hop) = config
            .input_frameshift()
            .zip(config.block_size())
            .ok_or(Error::UnsupportedWindow(config.window))?;
        let vocoder = PhaseVocoder::new(analysis_hop, synthesis_hop);
        overlap_add(input, config, Box::new(vocoder))
    }

    fn reset(&mut self) {
        // The vocoder's phase memory lives only for one run
    }
}
