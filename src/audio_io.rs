use crate::error::{Error, Result};
use crate::source::SampleSink;
use dasp::Sample;
use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use tracing::debug;

pub struct AudioData {
    pub samples: Vec<f64>,
    pub spec: WavSpec,
    pub num_channels: usize,
    pub sample_rate: u32,
}

impl AudioData {
    pub fn new(samples: Vec<f64>, spec: WavSpec) -> Self {
        Self {
            num_channels: spec.channels as usize,
            sample_rate: spec.sample_rate,
            samples,
            spec,
        }
    }

    /// Mono 16-bit audio at `sample_rate`.
    pub fn mono(samples: Vec<f64>, sample_rate: u32) -> Self {
        Self::new(samples, default_wav_spec(1, sample_rate))
    }

    /// Same format, new samples.
    pub fn with_samples(&self, samples: Vec<f64>) -> Self {
        Self::new(samples, self.spec)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn duration_seconds(&self) -> f64 {
        self.len() as f64 / (self.sample_rate as f64 * self.num_channels as f64)
    }
}

/// Read a WAV file with samples normalized to [-1.0, 1.0].
///
/// Integer PCM of 8 to 32 bits and 32-bit float are accepted.
pub fn read_audio_file<P: AsRef<Path>>(path: P) -> Result<AudioData> {
    let mut reader = WavReader::open(&path)?;
    let spec = reader.spec();
    debug!(
        path = %path.as_ref().display(),
        channels = spec.channels,
        sample_rate = spec.sample_rate,
        bits = spec.bits_per_sample,
        "reading audio file"
    );

    let samples = match (spec.sample_format, spec.bits_per_sample) {
        (SampleFormat::Int, 16) => reader
            .samples::<i16>()
            .map(|s| s.map(i16_to_f64))
            .collect::<std::result::Result<Vec<_>, _>>()?,
        (SampleFormat::Int, bits @ 8..=32) => {
            let scale = (1_i64 << (bits - 1)) as f64;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f64 / scale))
                .collect::<std::result::Result<Vec<_>, _>>()?
        }
        (SampleFormat::Float, 32) => reader
            .samples::<f32>()
            .map(|s| s.map(|v| v.to_sample::<f64>()))
            .collect::<std::result::Result<Vec<_>, _>>()?,
        (format, bits) => {
            return Err(Error::UnsupportedFormat(format!(
                "{} bit {:?} samples",
                bits, format
            )))
        }
    };

    Ok(AudioData::new(samples, spec))
}

/// Streams samples into a 16-bit PCM WAV file.
pub struct WavSink {
    writer: WavWriter<BufWriter<File>>,
    written: usize,
}

impl WavSink {
    /// Output is always 16-bit integer PCM; only the channel count and
    /// sample rate of `spec` are kept.
    pub fn create<P: AsRef<Path>>(path: P, spec: WavSpec) -> Result<Self> {
        let spec = default_wav_spec(spec.channels, spec.sample_rate);
        let writer = WavWriter::create(path, spec)?;
        Ok(Self { writer, written: 0 })
    }

    pub fn written(&self) -> usize {
        self.written
    }

    /// Writes the header sizes and closes the file.
    pub fn finalize(self) -> Result<()> {
        self.writer.finalize()?;
        Ok(())
    }
}

impl SampleSink for WavSink {
    fn write(&mut self, samples: &[f64]) -> Result<()> {
        for &sample in samples {
            self.writer.write_sample(f64_to_i16(sample))?;
        }
        self.written += samples.len();
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

/// Write samples to a 16-bit WAV file.
pub fn write_audio_file<P: AsRef<Path>>(path: P, samples: &[f64], spec: WavSpec) -> Result<()> {
    let mut sink = WavSink::create(path, spec)?;
    sink.write(samples)?;
    sink.finalize()
}

/// Convert i16 sample to f64 normalized to [-1.0, 1.0)
pub fn i16_to_f64(sample: i16) -> f64 {
    sample.to_sample::<f64>()
}

/// Convert f64 sample to i16, clamping to the valid range
pub fn f64_to_i16(sample: f64) -> i16 {
    sample.clamp(-1.0, 1.0).to_sample::<i16>()
}

/// Create a default WAV spec for output files
pub fn default_wav_spec(channels: u16, sample_rate: u32) -> WavSpec {
    WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_conversion() {
        assert_eq!(i16_to_f64(0), 0.0);
        assert_eq!(i16_to_f64(16384), 0.5);
        assert_eq!(i16_to_f64(-32768), -1.0);

        assert_eq!(f64_to_i16(0.0), 0);
        assert_eq!(f64_to_i16(0.5), 16384);
        assert_eq!(f64_to_i16(-1.0), -32768);

        // Out of range values are clamped first
        assert_eq!(f64_to_i16(-2.0), -32768);
        assert!(f64_to_i16(2.0) > 32_000);
    }

    #[test]
    fn test_default_wav_spec() {
        let spec = default_wav_spec(1, 16_000);
        assert_eq!(spec.channels, 1);
        assert_eq!(spec.sample_rate, 16_000);
        assert_eq!(spec.bits_per_sample, 16);
        assert_eq!(spec.sample_format, SampleFormat::Int);
    }

    #[test]
    fn test_audio_data_duration() {
        let audio = AudioData::mono(vec![0.0; 8000], 16_000);
        assert_eq!(audio.len(), 8000);
        assert!(!audio.is_empty());
        assert!((audio.duration_seconds() - 0.5).abs() < 1e-12);
        assert_eq!(audio.with_samples(Vec::new()).sample_rate, 16_000);
    }

    #[test]
    fn test_wav_round_trip() {
        let path = std::env::temp_dir().join(format!("voicefxrs-io-{}.wav", std::process::id()));
        let samples = vec![0.0, 0.25, -0.5, 0.75];
        write_audio_file(&path, &samples, default_wav_spec(1, 8000)).unwrap();

        let audio = read_audio_file(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(audio.sample_rate, 8000);
        assert_eq!(audio.len(), 4);
        for (a, b) in samples.iter().zip(&audio.samples) {
            assert!((a - b).abs() < 1e-4);
        }
    }
}
