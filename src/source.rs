//! Pull-based sample sources and sinks.
//!
//! A [`SampleSource`] hands out samples sequentially; each source owns its read
//! cursor. Sources compose: [`SequenceSource`] forwards reads to its children
//! in order, which is how frame providers pad a signal with silence.

use crate::error::{Error, Result};
use std::collections::VecDeque;

const READ_CHUNK: usize = 4096;

/// A finite, sequential stream of samples.
pub trait SampleSource {
    /// Reads up to `target.len()` samples and returns how many were written.
    /// A short read means the source is exhausted.
    fn read(&mut self, target: &mut [f64]) -> usize;

    /// Whether another read can return data.
    fn has_more(&self) -> bool;

    /// Samples left to read, when the source knows.
    fn remaining(&self) -> Option<usize> {
        None
    }

    /// Sampling rate of the data, when the source knows.
    fn sample_rate(&self) -> Option<u32> {
        None
    }

    /// Drains the source into a vector.
    fn read_all(&mut self) -> Vec<f64> {
        let mut out = Vec::with_capacity(self.remaining().unwrap_or(READ_CHUNK));
        let mut chunk = vec![0.0; READ_CHUNK];
        while self.has_more() {
            let n = self.read(&mut chunk);
            if n == 0 {
                break;
            }
            out.extend_from_slice(&chunk[..n]);
        }
        out
    }
}

impl<S: SampleSource + ?Sized> SampleSource for Box<S> {
    fn read(&mut self, target: &mut [f64]) -> usize {
        (**self).read(target)
    }

    fn has_more(&self) -> bool {
        (**self).has_more()
    }

    fn remaining(&self) -> Option<usize> {
        (**self).remaining()
    }

    fn sample_rate(&self) -> Option<u32> {
        (**self).sample_rate()
    }
}

/// Source backed by an in-memory buffer.
#[derive(Debug, Clone)]
pub struct BufferedSource {
    data: Vec<f64>,
    position: usize,
    sample_rate: Option<u32>,
}

impl BufferedSource {
    pub fn new(data: Vec<f64>) -> Self {
        Self {
            data,
            position: 0,
            sample_rate: None,
        }
    }

    pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = Some(sample_rate);
        self
    }

    /// Moves the read cursor back to the start.
    pub fn rewind(&mut self) {
        self.position = 0;
    }
}

impl SampleSource for BufferedSource {
    fn read(&mut self, target: &mut [f64]) -> usize {
        let n = target.len().min(self.data.len() - self.position);
        target[..n].copy_from_slice(&self.data[self.position..self.position + n]);
        self.position += n;
        n
    }

    fn has_more(&self) -> bool {
        self.position < self.data.len()
    }

    fn remaining(&self) -> Option<usize> {
        Some(self.data.len() - self.position)
    }

    fn sample_rate(&self) -> Option<u32> {
        self.sample_rate
    }
}

/// A run of zeros.
#[derive(Debug, Clone)]
pub struct SilenceSource {
    remaining: usize,
}

impl SilenceSource {
    pub fn new(length: usize) -> Self {
        Self { remaining: length }
    }
}

impl SampleSource for SilenceSource {
    fn read(&mut self, target: &mut [f64]) -> usize {
        let n = target.len().min(self.remaining);
        target[..n].fill(0.0);
        self.remaining -= n;
        n
    }

    fn has_more(&self) -> bool {
        self.remaining > 0
    }

    fn remaining(&self) -> Option<usize> {
        Some(self.remaining)
    }
}

/// Concatenation of sources, read in order.
pub struct SequenceSource {
    sources: VecDeque<Box<dyn SampleSource>>,
    sample_rate: Option<u32>,
}

impl SequenceSource {
    /// Fails if two children report different sampling rates.
    pub fn new(sources: Vec<Box<dyn SampleSource>>) -> Result<Self> {
        let mut sample_rate = None;
        for rate in sources.iter().filter_map(|s| s.sample_rate()) {
            match sample_rate {
                None => sample_rate = Some(rate),
                Some(expected) if expected != rate => {
                    return Err(Error::SampleRateMismatch {
                        expected,
                        found: rate,
                    })
                }
                Some(_) => {}
            }
        }
        Ok(Self {
            sources: sources.into(),
            sample_rate,
        })
    }

    /// Wraps `source` in `before` leading and `after` trailing zeros.
    pub fn padded(source: Box<dyn SampleSource>, before: usize, after: usize) -> Result<Self> {
        Self::new(vec![
            Box::new(SilenceSource::new(before)),
            source,
            Box::new(SilenceSource::new(after)),
        ])
    }
}

impl SampleSource for SequenceSource {
    fn read(&mut self, target: &mut [f64]) -> usize {
        let mut written = 0;
        while written < target.len() {
            let Some(current) = self.sources.front_mut() else {
                break;
            };
            let n = current.read(&mut target[written..]);
            written += n;
            if !current.has_more() {
                self.sources.pop_front();
            } else if n == 0 {
                break;
            }
        }
        written
    }

    fn has_more(&self) -> bool {
        self.sources.iter().any(|s| s.has_more())
    }

    fn remaining(&self) -> Option<usize> {
        self.sources.iter().map(|s| s.remaining()).sum()
    }

    fn sample_rate(&self) -> Option<u32> {
        self.sample_rate
    }
}

/// Receiver of a reconstructed sample stream.
pub trait SampleSink {
    fn write(&mut self, samples: &[f64]) -> Result<()>;

    /// Called once after the last block.
    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

impl SampleSink for Vec<f64> {
    fn write(&mut self, samples: &[f64]) -> Result<()> {
        self.extend_from_slice(samples);
        Ok(())
    }
}
