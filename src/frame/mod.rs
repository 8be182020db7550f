//! Framing of sample sources.
//!
//! [`FrameProvider`] cuts fixed-length, fixed-shift frames; the pitch
//! synchronous variant lives in [`pitch`].

pub mod pitch;

pub use pitch::PitchFrameProvider;

use crate::error::{Error, Result};
use crate::source::SampleSource;
use tracing::debug;

/// In-place processing step applied to each frame.
pub trait InlineProcessor {
    fn apply_inline(&mut self, data: &mut [f64]);
}

impl<P: InlineProcessor + ?Sized> InlineProcessor for Box<P> {
    fn apply_inline(&mut self, data: &mut [f64]) {
        (**self).apply_inline(data)
    }
}

/// Cuts a sample source into frames of `frame_length` samples, each starting
/// `frame_shift` samples after the previous one.
///
/// The overlapping tail of the previous frame is kept in memory, so the
/// source is read once. When the source runs dry the frame is zero-filled
/// and [`valid_samples_in_frame`](Self::valid_samples_in_frame) reports how
/// many samples are real.
pub struct FrameProvider {
    source: Box<dyn SampleSource>,
    processor: Option<Box<dyn InlineProcessor>>,
    frame_length: usize,
    frame_shift: usize,
    sample_rate: u32,
    frame: Vec<f64>,
    memory: Vec<f64>,
    valid_in_frame: usize,
    valid_in_memory: usize,
    stop_when_touching_end: bool,
    frame_start: Option<usize>,
    frames_read: usize,
    timer_origin: usize,
}

impl FrameProvider {
    pub fn new(
        source: Box<dyn SampleSource>,
        frame_length: usize,
        frame_shift: usize,
        sample_rate: u32,
    ) -> Result<Self> {
        if frame_length == 0 || frame_shift == 0 {
            return Err(Error::frame_config(format!(
                "frame length {} and shift {} must be positive",
                frame_length, frame_shift
            )));
        }
        if let Some(rate) = source.sample_rate() {
            if rate != sample_rate {
                return Err(Error::SampleRateMismatch {
                    expected: sample_rate,
                    found: rate,
                });
            }
        }
        debug!(frame_length, frame_shift, sample_rate, "frame provider configured");
        Ok(Self {
            source,
            processor: None,
            frame_length,
            frame_shift,
            sample_rate,
            frame: vec![0.0; frame_length],
            memory: vec![0.0; frame_length],
            valid_in_frame: 0,
            valid_in_memory: 0,
            stop_when_touching_end: true,
            frame_start: None,
            frames_read: 0,
            timer_origin: 0,
        })
    }

    /// Processor applied to every frame before it is returned. The overlap
    /// memory always keeps the unprocessed samples.
    pub fn with_processor(mut self, processor: Box<dyn InlineProcessor>) -> Self {
        self.processor = Some(processor);
        self
    }

    /// When `false`, keep emitting zero-padded frames after the source is
    /// exhausted until no valid sample is left in memory.
    pub fn with_stop_when_touching_end(mut self, stop: bool) -> Self {
        self.stop_when_touching_end = stop;
        self
    }

    pub fn frame_length(&self) -> usize {
        self.frame_length
    }

    pub fn frame_shift(&self) -> usize {
        self.frame_shift
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn valid_samples_in_frame(&self) -> usize {
        self.valid_in_frame
    }

    /// Number of frames returned since the last timer reset.
    pub fn frames_read(&self) -> usize {
        self.frames_read
    }

    /// Absolute index of the first sample of the current frame, counted from
    /// the last timer reset.
    pub fn frame_start_sample(&self) -> Option<usize> {
        self.frame_start
            .map(|start| start.saturating_sub(self.timer_origin))
    }

    pub fn frame_start_time(&self) -> Option<f64> {
        self.frame_start_sample()
            .map(|s| s as f64 / self.sample_rate as f64)
    }

    /// Restarts frame counting and timing at the next frame.
    pub fn reset_timer(&mut self) {
        self.frames_read = 0;
        self.timer_origin = self
            .frame_start
            .map_or(0, |start| start + self.frame_shift);
    }

    pub fn has_more(&self) -> bool {
        if self.frame_start.is_none() || self.source.has_more() {
            return self.source.has_more();
        }
        !self.stop_when_touching_end && self.valid_in_memory > self.frame_shift
    }

    /// Returns the next frame, or `None` once the source is exhausted.
    pub fn next_frame(&mut self) -> Option<&mut [f64]> {
        if !self.has_more() {
            self.valid_in_frame = 0;
            return None;
        }

        let length = self.frame_length;
        let shift = self.frame_shift;
        let (kept, kept_valid, start) = match self.frame_start {
            None => (0, 0, 0),
            Some(prev) if shift < length => (
                length - shift,
                self.valid_in_memory.saturating_sub(shift),
                prev + shift,
            ),
            Some(prev) => {
                self.skip(shift - length);
                (0, 0, prev + shift)
            }
        };

        self.frame[..kept].copy_from_slice(&self.memory[length - kept..length]);
        let read = self.source.read(&mut self.frame[kept..]);
        self.frame[kept + read..].fill(0.0);

        self.valid_in_frame = kept_valid + read;
        self.valid_in_memory = self.valid_in_frame;
        self.memory.copy_from_slice(&self.frame);
        self.frame_start = Some(start);
        self.frames_read += 1;

        if let Some(processor) = self.processor.as_mut() {
            processor.apply_inline(&mut self.frame);
        }
        Some(&mut self.frame)
    }

    fn skip(&mut self, mut count: usize) {
        let mut scratch = [0.0; 512];
        while count > 0 {
            let n = count.min(scratch.len());
            let read = self.source.read(&mut scratch[..n]);
            if read == 0 {
                break;
            }
            count -= read;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::BufferedSource;
    use crate::window::{Window, WindowKind};
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn provider(data: Vec<f64>, length: usize, shift: usize) -> FrameProvider {
        FrameProvider::new(Box::new(BufferedSource::new(data)), length, shift, 16_000).unwrap()
    }

    #[test]
    fn test_exact_length_source_gives_one_full_frame() {
        let mut frames = provider(vec![1.0; 8], 8, 2);
        assert!(frames.has_more());
        assert!(frames.next_frame().is_some());
        assert_eq!(frames.valid_samples_in_frame(), 8);
        assert!(!frames.has_more());
        assert!(frames.next_frame().is_none());
        assert_eq!(frames.valid_samples_in_frame(), 0);
    }

    #[test]
    fn test_short_source_is_zero_padded() {
        let mut frames = provider(vec![1.0; 7], 8, 2);
        let frame = frames.next_frame().unwrap().to_vec();
        assert_eq!(frames.valid_samples_in_frame(), 7);
        assert_eq!(frame[7], 0.0);
        assert!(frames.next_frame().is_none());
    }

    #[test]
    fn test_overlapping_frames_over_short_source() {
        let data: Vec<f64> = (1..=9).map(f64::from).collect();
        let mut frames = provider(data, 8, 2);

        assert_eq!(
            frames.next_frame().unwrap().to_vec(),
            vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0]
        );
        assert_eq!(frames.valid_samples_in_frame(), 8);

        // six samples carried over, one fresh, one pad
        assert_eq!(
            frames.next_frame().unwrap().to_vec(),
            vec![3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0, 0.0]
        );
        assert_eq!(frames.valid_samples_in_frame(), 7);
        assert_eq!(frames.frame_start_sample(), Some(2));
    }

    #[test]
    fn test_frames_overlap() {
        let data: Vec<f64> = (0..10).map(f64::from).collect();
        let mut frames = provider(data, 4, 2);

        assert_eq!(frames.next_frame().unwrap().to_vec(), vec![0.0, 1.0, 2.0, 3.0]);
        assert_eq!(frames.next_frame().unwrap().to_vec(), vec![2.0, 3.0, 4.0, 5.0]);
        assert_eq!(frames.frame_start_sample(), Some(2));
        assert_eq!(frames.next_frame().unwrap().to_vec(), vec![4.0, 5.0, 6.0, 7.0]);
        assert_eq!(frames.next_frame().unwrap().to_vec(), vec![6.0, 7.0, 8.0, 9.0]);
        assert!(frames.next_frame().is_none());
        assert_eq!(frames.frames_read(), 4);
    }

    #[test]
    fn test_continue_after_end_drains_memory() {
        let data: Vec<f64> = (1..=6).map(f64::from).collect();
        let mut frames = provider(data, 4, 2).with_stop_when_touching_end(false);

        frames.next_frame();
        frames.next_frame();
        assert_eq!(frames.valid_samples_in_frame(), 4);
        assert_eq!(frames.next_frame().unwrap().to_vec(), vec![5.0, 6.0, 0.0, 0.0]);
        assert_eq!(frames.valid_samples_in_frame(), 2);
        assert!(!frames.has_more());
    }

    #[test]
    fn test_shift_longer_than_frame_skips_samples() {
        let data: Vec<f64> = (0..10).map(f64::from).collect();
        let mut frames = provider(data, 2, 3);
        assert_eq!(frames.next_frame().unwrap().to_vec(), vec![0.0, 1.0]);
        assert_eq!(frames.next_frame().unwrap().to_vec(), vec![3.0, 4.0]);
        assert_eq!(frames.frame_start_time(), Some(3.0 / 16_000.0));
    }

    #[test]
    fn test_processor_does_not_touch_memory() {
        let mut frames = provider(vec![1.0; 6], 4, 2)
            .with_processor(Box::new(Window::new(WindowKind::Bartlett, 4)));
        let first = frames.next_frame().unwrap().to_vec();
        assert_eq!(first[0], 0.0);
        // the overlap comes from raw samples, not windowed ones
        let second = frames.next_frame().unwrap().to_vec();
        assert!((second[1] - 2.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_reset_timer() {
        let mut frames = provider(vec![0.0; 12], 4, 2);
        frames.next_frame();
        frames.next_frame();
        frames.reset_timer();
        assert_eq!(frames.frames_read(), 0);
        frames.next_frame();
        assert_eq!(frames.frame_start_sample(), Some(0));
        assert_eq!(frames.frames_read(), 1);
    }

    #[test]
    fn test_rejects_rate_mismatch() {
        let source = BufferedSource::new(vec![0.0; 4]).with_sample_rate(8_000);
        assert!(FrameProvider::new(Box::new(source), 4, 2, 16_000).is_err());
    }

    proptest! {
        #[test]
        fn prop_valid_counts_cover_signal(len in 1usize..200, frame in 2usize..32, shift_div in 1usize..4) {
            let shift = (frame / shift_div).max(1);
            let data: Vec<f64> = (0..len).map(|i| i as f64 + 1.0).collect();
            let mut frames = provider(data, frame, shift);

            let mut last_start = 0;
            let mut last_valid = 0;
            while let Some(f) = frames.next_frame() {
                let f = f.to_vec();
                let start = frames.frame_start_sample().unwrap();
                let valid = frames.valid_samples_in_frame();
                prop_assert!(valid <= frame);
                for (i, x) in f.iter().enumerate() {
                    if i < valid {
                        prop_assert_eq!(*x, (start + i) as f64 + 1.0);
                    } else {
                        prop_assert_eq!(*x, 0.0);
                    }
                }
                last_start = start;
                last_valid = valid;
            }
            // the final frame touches the last sample
            prop_assert_eq!(last_start + last_valid, len);
        }
    }
}
