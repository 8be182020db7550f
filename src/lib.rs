//! Voice modification with frequency-domain PSOLA.
//!
//! The core frames a signal pitch-synchronously, changes the pitch, duration,
//! energy and vocal-tract length of each frame and overlap-adds the result.
//! Around it sit generic frame providers, an overlap-add source, LPC
//! analysis-resynthesis and a small effect layer driven from the CLI.

pub mod audio_io;
pub mod cli;
pub mod dsp;
pub mod effects;
pub mod error;
pub mod fft;
pub mod frame;
pub mod lpc;
pub mod ola;
pub mod phase;
pub mod pitchmarks;
pub mod psola;
pub mod source;
pub mod vocal_tract;
pub mod window;

pub use error::{Error, Result};
