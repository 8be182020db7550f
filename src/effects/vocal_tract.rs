use crate::audio_io::AudioData;
use crate::effects::{check_format, frame_length_param, float_param, int_param, number, overlap_add, AudioEffect, ParameterDef, ParameterValue, Parameters};
use crate::error::{Error, Result};
use crate::lpc::lp_order;
use crate::ola::OverlapAddConfig;
use crate::vocal_tract::{vocal_tract_scaling, VocalTractModifier};

/// Formant shift without a pitch change: the LPC envelope of every frame is
/// stretched along the frequency axis and recombined with its excitation.
pub struct VocalTractEffect {
    // Parameters
    scale: f64, // > 1.0 raises formants (shorter tract), < 1.0 lowers them
    frame_length: usize,
    order: Option<usize>,
}

impl Default for VocalTractEffect {
    fn default() -> Self {
        Self::new()
    }
}

impl VocalTractEffect {
    pub fn new() -> Self {
        Self {
            scale: 1.0,
            frame_length: 512,
            order: None,
        }
    }
}

impl AudioEffect for VocalTractEffect {
    fn name(&self) -> &str {
        "Vocal Tract"
    }

    fn parameter_definitions(&self) -> Vec<ParameterDef> {
        vec![
            float_param("scale", "Vocal tract scale (1.0 = no change, 1.2 = formants up)", 1.0, 0.5, 2.0),
            int_param("frame_length", "Analysis frame length in samples", 512, 64, 8192),
            int_param("order", "LP order (0 = derive from sample rate)", 0, 0, 60),
        ]
    }

    fn set_parameters(&mut self, params: Parameters) -> Result<()> {
        for (key, value) in params {
            match key.as_str() {
                "scale" => self.scale = number(&key, &value)?.clamp(0.5, 2.0),
                "frame_length" => self.frame_length = frame_length_param(number(&key, &value)?),
                "order" => {
                    let order = number(&key, &value)?.round().clamp(0.0, 60.0) as usize;
                    self.order = (order > 0).then_some(order);
                }
                _ => return Err(Error::invalid_param(key, "unknown parameter")),
            }
        }
        Ok(())
    }

    fn get_parameters(&self) -> Parameters {
        let mut params = Parameters::new();
        params.insert("scale".to_string(), ParameterValue::Float(self.scale));
        params.insert("frame_length".to_string(), ParameterValue::Int(self.frame_length as i64));
        params.insert("order".to_string(), ParameterValue::Int(self.order.unwrap_or(0) as i64));
        params
    }

    fn process(&mut self, input: &AudioData) -> Result<AudioData> {
        check_format(self, input)?;
        let order = self.order.unwrap_or_else(|| lp_order(input.sample_rate));
        let fft_size = self.frame_length.next_power_of_two();
        let modifier = VocalTractModifier::new(order, input.sample_rate, fft_size, false)?
            .with_transform(vocal_tract_scaling(vec![self.scale]));
        let config = OverlapAddConfig {
            frame_length: self.frame_length,
            synthesis_window: true,
            ..OverlapAddConfig::default()
        };
        overlap_add(input, config, Box::new(modifier))
    }

    fn reset(&mut self) {
        // A new modifier is built for every run
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dasp::signal::{self, Signal};

    fn vowel(len: usize) -> AudioData {
        let fundamental = signal::rate(16_000.0).const_hz(120.0).sine();
        let formant = signal::rate(16_000.0).const_hz(720.0).sine();
        let samples = fundamental
            .add_amp(formant.scale_amp(0.4))
            .take(len)
            .map(|s| 0.4 * s)
            .collect();
        AudioData::mono(samples, 16_000)
    }

    #[test]
    fn test_vocal_tract_creation() {
        let effect = VocalTractEffect::new();
        assert_eq!(effect.name(), "Vocal Tract");
        assert_eq!(effect.parameter_definitions().len(), 3);
    }

    #[test]
    fn test_parameter_setting() {
        let mut effect = VocalTractEffect::new();
        let mut params = Parameters::new();
        params.insert("scale".to_string(), ParameterValue::Float(3.0)); // Above max
        params.insert("order".to_string(), ParameterValue::Int(12));
        assert!(effect.set_parameters(params).is_ok());

        let current = effect.get_parameters();
        assert_eq!(current.get("scale").unwrap().as_float(), Some(2.0));
        assert_eq!(current.get("order").unwrap().as_int(), Some(12));
    }

    #[test]
    fn test_unit_scale_is_transparent() {
        let mut effect = VocalTractEffect::new();
        let input = vowel(8000);
        let output = effect.process(&input).unwrap();
        assert_eq!(output.len(), input.len());
        for i in 1000..7000 {
            assert!((output.samples[i] - input.samples[i]).abs() < 1e-6);
        }
    }

    #[test]
    fn test_scale_changes_signal() {
        let mut effect = VocalTractEffect::new();
        let mut params = Parameters::new();
        params.insert("scale".to_string(), ParameterValue::Float(1.3));
        effect.set_parameters(params).unwrap();

        let input = vowel(8000);
        let output = effect.process(&input).unwrap();
        assert_eq!(output.len(), input.len());
        let difference: f64 = input
            .samples
            .iter()
            .zip(&output.samples)
            .map(|(a, b)| (a - b).powi(2))
            .sum();
        assert!(difference > 1e-3);
    }
}
