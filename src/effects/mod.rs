use crate::audio_io::AudioData;
use crate::error::{Error, Result};
use crate::frame::InlineProcessor;
use crate::ola::{FrameOverlapAddSource, OverlapAddConfig};
use crate::source::{BufferedSource, SampleSource};
use std::collections::HashMap;

pub mod pitch_shifting;
pub mod robotiser;
pub mod time_stretching;
pub mod vocal_tract;

/// Common parameter types for audio effects
#[derive(Debug, Clone, PartialEq)]
pub enum ParameterValue {
    Float(f64),
    Int(i64),
    Bool(bool),
    String(String),
}

impl ParameterValue {
    /// Parses a command-line value: integers first, then floats, then
    /// booleans, falling back to a string.
    pub fn parse(text: &str) -> Self {
        if let Ok(v) = text.parse::<i64>() {
            ParameterValue::Int(v)
        } else if let Ok(v) = text.parse::<f64>() {
            ParameterValue::Float(v)
        } else if let Ok(v) = text.parse::<bool>() {
            ParameterValue::Bool(v)
        } else {
            ParameterValue::String(text.to_string())
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            ParameterValue::Float(v) => Some(*v),
            ParameterValue::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            ParameterValue::Int(v) => Some(*v),
            ParameterValue::Float(v) => Some(*v as i64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ParameterValue::Bool(v) => Some(*v),
            _ => None,
        }
    }
}

impl std::fmt::Display for ParameterValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParameterValue::Float(v) => write!(f, "{}", v),
            ParameterValue::Int(v) => write!(f, "{}", v),
            ParameterValue::Bool(v) => write!(f, "{}", v),
            ParameterValue::String(v) => write!(f, "{}", v),
        }
    }
}

/// Parameter definition for effects
#[derive(Debug, Clone)]
pub struct ParameterDef {
    pub name: String,
    pub description: String,
    pub default_value: ParameterValue,
    pub min_value: Option<ParameterValue>,
    pub max_value: Option<ParameterValue>,
}

/// Collection of parameters for an effect
pub type Parameters = HashMap<String, ParameterValue>;

/// Common trait for all voice effects
pub trait AudioEffect {
    /// Get the name of the effect
    fn name(&self) -> &str;

    /// Get parameter definitions for this effect
    fn parameter_definitions(&self) -> Vec<ParameterDef>;

    /// Set effect parameters
    fn set_parameters(&mut self, params: Parameters) -> Result<()>;

    /// Get current parameter values
    fn get_parameters(&self) -> Parameters;

    /// Process audio data through the effect
    fn process(&mut self, input: &AudioData) -> Result<AudioData>;

    /// Reset the effect's internal state
    fn reset(&mut self);

    /// Check if the effect supports the given sample rate and channel count
    fn supports_format(&self, sample_rate: u32, channels: usize) -> bool {
        // The voice core works on one channel
        (8000..=192_000).contains(&sample_rate) && channels == 1
    }
}

/// Numeric value of parameter `name`.
pub(crate) fn number(name: &str, value: &ParameterValue) -> Result<f64> {
    value
        .as_float()
        .filter(|v| v.is_finite())
        .ok_or_else(|| Error::invalid_param(name, format!("expected a number, got {}", value)))
}

/// Hann frames overlap by three quarters, so lengths stay multiples of four.
pub(crate) fn frame_length_param(value: f64) -> usize {
    let clamped = value.clamp(64.0, 8192.0);
    4 * (clamped / 4.0).round() as usize
}

/// Fails unless the effect handles the input's layout.
pub(crate) fn check_format(effect: &dyn AudioEffect, input: &AudioData) -> Result<()> {
    if effect.supports_format(input.sample_rate, input.num_channels) {
        Ok(())
    } else {
        Err(Error::UnsupportedFormat(format!(
            "{} needs mono audio between 8 and 192 kHz, got {} channel(s) at {} Hz",
            effect.name(),
            input.num_channels,
            input.sample_rate
        )))
    }
}

/// Runs `processor` over the input through a frame overlap-add source.
pub(crate) fn overlap_add(
    input: &AudioData,
    config: OverlapAddConfig,
    processor: Box<dyn InlineProcessor>,
) -> Result<AudioData> {
    let source = BufferedSource::new(input.samples.clone()).with_sample_rate(input.sample_rate);
    let mut ola =
        FrameOverlapAddSource::new(Box::new(source), config, input.sample_rate, Some(processor))?;
    Ok(input.with_samples(ola.read_all()))
}

/// Utility functions for parameter creation
pub fn float_param(name: &str, desc: &str, default: f64, min: f64, max: f64) -> ParameterDef {
    ParameterDef {
        name: name.to_string(),
        description: desc.to_string(),
        default_value: ParameterValue::Float(default),
        min_value: Some(ParameterValue::Float(min)),
        max_value: Some(ParameterValue::Float(max)),
    }
}

pub fn int_param(name: &str, desc: &str, default: i64, min: i64, max: i64) -> ParameterDef {
    ParameterDef {
        name: name.to_string(),
        description: desc.to_string(),
        default_value: ParameterValue::Int(default),
        min_value: Some(ParameterValue::Int(min)),
        max_value: Some(ParameterValue::Int(max)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parameter_value_conversions() {
        let float_val = ParameterValue::Float(3.5);
        assert_eq!(float_val.as_float(), Some(3.5));
        assert_eq!(float_val.as_int(), Some(3));

        let int_val = ParameterValue::Int(42);
        assert_eq!(int_val.as_int(), Some(42));
        assert_eq!(int_val.as_float(), Some(42.0));

        let bool_val = ParameterValue::Bool(true);
        assert_eq!(bool_val.as_bool(), Some(true));
        assert_eq!(bool_val.as_float(), None);
    }

    #[test]
    fn test_parse_parameter_value() {
        assert_eq!(ParameterValue::parse("512"), ParameterValue::Int(512));
        assert_eq!(ParameterValue::parse("1.25"), ParameterValue::Float(1.25));
        assert_eq!(ParameterValue::parse("true"), ParameterValue::Bool(true));
        assert_eq!(
            ParameterValue::parse("hann"),
            ParameterValue::String("hann".to_string())
        );
    }

    #[test]
    fn test_frame_length_param() {
        assert_eq!(frame_length_param(10.0), 64);
        assert_eq!(frame_length_param(1023.0), 1024);
        assert_eq!(frame_length_param(1e9), 8192);
    }

    #[test]
    fn test_number_rejects_non_numeric() {
        assert_eq!(number("pitch", &ParameterValue::Int(2)).unwrap(), 2.0);
        assert!(matches!(
            number("pitch", &ParameterValue::String("high".into())),
            Err(Error::InvalidParameter { .. })
        ));
        assert!(number("pitch", &ParameterValue::Float(f64::NAN)).is_err());
    }
}
