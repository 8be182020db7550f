use crate::audio_io::AudioData;
use crate::effects::{check_format, frame_length_param, int_param, number, overlap_add, AudioEffect, ParameterDef, ParameterValue, Parameters};
use crate::error::{Error, Result};
use crate::ola::OverlapAddConfig;
use crate::phase::robotiser;

/// Flat, buzzy "robot" voice from discarding the phase of every frame.
pub struct RobotiserEffect {
    frame_length: usize,
}

impl Default for RobotiserEffect {
    fn default() -> Self {
        Self::new()
    }
}

impl RobotiserEffect {
    pub fn new() -> Self {
        Self { frame_length: 1024 }
    }
}

impl AudioEffect for RobotiserEffect {
    fn name(&self) -> &str {
        "Robotiser"
    }

    fn parameter_definitions(&self) -> Vec<ParameterDef> {
        vec![int_param(
            "frame_length",
            "Frame length in samples; one frame per robot pulse period",
            1024,
            64,
            8192,
        )]
    }

    fn set_parameters(&mut self, params: Parameters) -> Result<()> {
        for (key, value) in params {
            match key.as_str() {
                "frame_length" => self.frame_length = frame_length_param(number(&key, &value)?),
                _ => return Err(Error::invalid_param(key, "unknown parameter")),
            }
        }
        Ok(())
    }

    fn get_parameters(&self) -> Parameters {
        let mut params = Parameters::new();
        params.insert("frame_length".to_string(), ParameterValue::Int(self.frame_length as i64));
        params
    }

    fn process(&mut self, input: &AudioData) -> Result<AudioData> {
        check_format(self, input)?;
        let config = OverlapAddConfig {
            frame_length: self.frame_length,
            synthesis_window: true,
            ..OverlapAddConfig::default()
        };
        overlap_add(input, config, Box::new(robotiser(self.frame_length)))
    }

    fn reset(&mut self) {
        // No internal state to reset
    }
}
