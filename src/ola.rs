//! Overlap-add reconstruction of framed signals.

use crate::dsp::round_to_len;
use crate::error::{Error, Result};
use crate::frame::{FrameProvider, InlineProcessor};
use crate::source::{SampleSource, SequenceSource};
use crate::window::{Window, WindowKind};
use tracing::debug;

/// Framing parameters for [`FrameOverlapAddSource`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OverlapAddConfig {
    pub window: WindowKind,
    pub frame_length: usize,
    /// Window each processed frame a second time before adding it.
    pub synthesis_window: bool,
    /// Output duration relative to the input. Values other than 1 read the
    /// input with a shift of `block_size / time_scale`.
    pub time_scale: f64,
}

impl Default for OverlapAddConfig {
    fn default() -> Self {
        Self {
            window: WindowKind::Hann,
            frame_length: 1024,
            synthesis_window: false,
            time_scale: 1.0,
        }
    }
}

impl OverlapAddConfig {
    /// Output samples produced per frame, or `None` if the window has no
    /// overlap rule.
    pub fn block_size(&self) -> Option<usize> {
        let overlap = self.window.overlap_fraction()?;
        Some(round_to_len(self.frame_length as f64 * (1.0 - overlap)))
    }

    /// Input samples consumed per frame.
    pub fn input_frameshift(&self) -> Option<usize> {
        let block = self.block_size()?;
        Some(round_to_len(block as f64 / self.time_scale).max(1))
    }
}

/// Sample source that frames its input, processes every frame and
/// overlap-adds the results.
///
/// With no processor and a time scale of 1 the output equals the input. The
/// input is padded with `n - 1` frame shifts of zeros on both sides, `n`
/// being the number of frames covering one output sample, and the first
/// `n - 1` output blocks are dropped before any sample is handed out.
pub struct FrameOverlapAddSource {
    frames: FrameProvider,
    processor: Option<Box<dyn InlineProcessor>>,
    synthesis_window: Option<Window>,
    memory: Vec<f64>,
    block_size: usize,
    input_shift: usize,
    output: Vec<f64>,
    output_pos: usize,
    finished: bool,
    sample_rate: u32,
}

impl FrameOverlapAddSource {
    pub fn new(
        source: Box<dyn SampleSource>,
        config: OverlapAddConfig,
        sample_rate: u32,
        processor: Option<Box<dyn InlineProcessor>>,
    ) -> Result<Self> {
        let block_size = config
            .block_size()
            .ok_or(Error::UnsupportedWindow(config.window))?;
        let frame_length = config.frame_length;
        if block_size == 0 || frame_length % block_size != 0 {
            return Err(Error::frame_config(format!(
                "frame length {} is not a multiple of the {:?} overlap block",
                frame_length, config.window
            )));
        }
        if !(config.time_scale.is_finite() && config.time_scale > 0.0) {
            return Err(Error::frame_config(format!(
                "time scale {} must be positive",
                config.time_scale
            )));
        }

        let input_shift = round_to_len(block_size as f64 / config.time_scale).max(1);
        debug_assert_eq!(Some(input_shift), config.input_frameshift());
        let blocks = frame_length / block_size - 1;
        let shifts_per_frame = frame_length / input_shift;
        let zero_shifts = if blocks * input_shift < frame_length {
            blocks
        } else {
            shifts_per_frame.saturating_sub(1)
        };
        let padding = zero_shifts * input_shift;

        let prescale = unity_prescale(config.window, frame_length, block_size, config.synthesis_window);
        let analysis = Window::with_prescale(config.window, frame_length + 1, prescale);
        let synthesis_window = config
            .synthesis_window
            .then(|| Window::with_prescale(config.window, frame_length + 1, prescale));

        debug!(
            frame_length,
            block_size, input_shift, padding, prescale, "overlap-add source configured"
        );

        let padded = SequenceSource::padded(source, padding, padding)?;
        let frames = FrameProvider::new(Box::new(padded), frame_length, input_shift, sample_rate)?
            .with_processor(Box::new(analysis));

        let mut ola = Self {
            frames,
            processor,
            synthesis_window,
            memory: vec![0.0; frame_length],
            block_size,
            input_shift,
            output: Vec::with_capacity(block_size),
            output_pos: 0,
            finished: false,
            sample_rate,
        };
        for _ in 0..blocks {
            if !ola.produce_block() {
                break;
            }
        }
        ola.output.clear();
        ola.output_pos = 0;
        ola.frames.reset_timer();
        Ok(ola)
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn input_frameshift(&self) -> usize {
        self.input_shift
    }

    pub fn frame_length(&self) -> usize {
        self.memory.len()
    }

    /// Processes one more frame and stages the next output block.
    fn produce_block(&mut self) -> bool {
        if self.finished {
            return false;
        }
        let Some(frame) = self.frames.next_frame() else {
            self.finished = true;
            return false;
        };
        if let Some(processor) = self.processor.as_mut() {
            processor.apply_inline(frame);
        }
        if let Some(window) = &self.synthesis_window {
            window.apply(frame);
        }
        for (m, x) in self.memory.iter_mut().zip(frame.iter()) {
            *m += x;
        }

        let length = self.memory.len();
        let block = self.block_size;
        let valid = self.frames.valid_samples_in_frame();
        self.output.clear();
        self.output_pos = 0;
        if valid < length {
            // last frame: only the samples backed by input are complete
            let missing = length - valid;
            let n = if block < missing { block } else { block - missing };
            self.output.extend_from_slice(&self.memory[..n]);
            self.finished = true;
        } else {
            self.output.extend_from_slice(&self.memory[..block]);
            self.memory.copy_within(block.., 0);
            self.memory[length - block..].fill(0.0);
        }
        true
    }
}

impl SampleSource for FrameOverlapAddSource {
    fn read(&mut self, target: &mut [f64]) -> usize {
        let mut written = 0;
        while written < target.len() {
            if self.output_pos >= self.output.len() {
                if !self.produce_block() {
                    break;
                }
                continue;
            }
            let n = (target.len() - written).min(self.output.len() - self.output_pos);
            target[written..written + n]
                .copy_from_slice(&self.output[self.output_pos..self.output_pos + n]);
            self.output_pos += n;
            written += n;
        }
        written
    }

    fn has_more(&self) -> bool {
        self.output_pos < self.output.len() || (!self.finished && self.frames.has_more())
    }

    fn sample_rate(&self) -> Option<u32> {
        Some(self.sample_rate)
    }
}

/// Scale making shifted copies of the (periodic) window sum to one. With a
/// synthesis window the frames are windowed twice, so the squared window is
/// normalised.
fn unity_prescale(kind: WindowKind, frame_length: usize, block_size: usize, squared: bool) -> f64 {
    let window = Window::new(kind, frame_length + 1);
    let values = &window.values()[..frame_length];
    let total: f64 = (0..block_size)
        .map(|i| {
            values[i..]
                .iter()
                .step_by(block_size)
                .map(|w| if squared { w * w } else { *w })
                .sum::<f64>()
        })
        .sum();
    let mean = total / block_size as f64;
    if mean <= 0.0 {
        return 1.0;
    }
    if squared {
        1.0 / mean.sqrt()
    } else {
        1.0 / mean
    }
}
