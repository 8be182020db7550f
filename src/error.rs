//! Error types for the voice processing core and its effect wrappers.

use crate::window::WindowKind;
use thiserror::Error;

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that abort a processing run.
///
/// End of stream and silent input are not errors: frame providers report them
/// through `None` frames and reduced valid-sample counts.
#[derive(Debug, Error)]
pub enum Error {
    /// Pitch marks are not strictly increasing.
    #[error("pitch marks must be strictly increasing: mark {index} ({current}) follows {previous}")]
    NonIncreasingPitchMarks {
        /// Index of the offending mark.
        index: usize,
        /// Value of the preceding mark.
        previous: usize,
        /// Value of the offending mark.
        current: usize,
    },

    /// Not enough pitch marks to form a single frame.
    #[error("need at least {required} pitch marks, found {found}")]
    TooFewPitchMarks {
        /// Minimum number of marks.
        required: usize,
        /// Number of marks supplied.
        found: usize,
    },

    /// A pitch period lies outside the plausible voice range.
    #[error("implausible pitch period of {samples} samples at period {index} (allowed {min}..={max})")]
    ImplausiblePeriod {
        /// Index of the period.
        index: usize,
        /// Period length in samples.
        samples: usize,
        /// Shortest allowed period.
        min: usize,
        /// Longest allowed period.
        max: usize,
    },

    /// Two cooperating sources disagree on the sampling rate.
    #[error("sampling rate mismatch: expected {expected} Hz, found {found} Hz")]
    SampleRateMismatch {
        /// Rate of the first source.
        expected: u32,
        /// Rate of the conflicting source.
        found: u32,
    },

    /// FFT size must be a power of two.
    #[error("FFT size {0} is not a power of two")]
    FftSizeNotPowerOfTwo(usize),

    /// Frame length, shift or order is unusable.
    #[error("invalid frame configuration: {0}")]
    InvalidFrameConfig(String),

    /// A modification schedule is empty or holds unusable values.
    #[error("invalid modification schedule: {0}")]
    InvalidSchedule(String),

    /// The window kind has no overlap-add reconstruction rule.
    #[error("window {0:?} is not supported for overlap-add")]
    UnsupportedWindow(WindowKind),

    /// Invalid effect parameter value.
    #[error("invalid parameter '{name}': {message}")]
    InvalidParameter {
        /// Parameter name.
        name: String,
        /// Error message.
        message: String,
    },

    /// No effect is registered under this name.
    #[error("unknown effect '{0}'; use --list to see available effects")]
    UnknownEffect(String),

    /// Audio format not handled by an effect or by the WAV reader.
    #[error("unsupported audio format: {0}")]
    UnsupportedFormat(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// WAV container error.
    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),
}

impl Error {
    /// Creates an invalid parameter error.
    pub fn invalid_param(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidParameter {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Creates an invalid frame configuration error.
    pub fn frame_config(message: impl Into<String>) -> Self {
        Self::InvalidFrameConfig(message.into())
    }

    /// Creates an invalid schedule error.
    pub fn schedule(message: impl Into<String>) -> Self {
        Self::InvalidSchedule(message.into())
    }
}
