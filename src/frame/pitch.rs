//! Pitch-synchronous framing.

use super::InlineProcessor;
use crate::error::{Error, Result};
use crate::pitchmarks::{PitchMarks, VoiceRange};
use crate::source::SampleSource;
use crate::window::{TwoHalvesWindow, WindowKind};
use tracing::{debug, trace};

const READ_CHUNK: usize = 1024;

/// Produces frames spanning `frame_periods` consecutive pitch periods, each
/// shifted by `shift_periods` periods from the previous one.
///
/// Frame `k` is anchored at pitch mark `k * shift_periods`. By default the
/// anchor is the frame's first mark and only frames made of real periods are
/// produced. [`centered`](Self::centered) puts `frame_periods / 2` periods
/// before the anchor and zero-pads periods missing at either end of the
/// signal, using the length of the nearest real period.
///
/// Every period is checked against the plausible voice range the first time
/// it enters a frame.
pub struct PitchFrameProvider {
    source: Box<dyn SampleSource>,
    marks: PitchMarks,
    sample_rate: u32,
    frame_periods: usize,
    shift_periods: usize,
    lead_periods: usize,
    pad_edges: bool,
    voice_range: VoiceRange,
    window: Option<TwoHalvesWindow>,
    processor: Option<Box<dyn InlineProcessor>>,
    history: Vec<f64>,
    history_start: usize,
    source_end: Option<usize>,
    frame: Vec<f64>,
    valid_in_frame: usize,
    center_offset: usize,
    next_index: usize,
    checked_periods: usize,
}

impl PitchFrameProvider {
    pub fn new(
        source: Box<dyn SampleSource>,
        marks: PitchMarks,
        frame_periods: usize,
        shift_periods: usize,
        sample_rate: u32,
    ) -> Result<Self> {
        if frame_periods == 0 || shift_periods == 0 {
            return Err(Error::frame_config(format!(
                "frame periods {} and shift periods {} must be positive",
                frame_periods, shift_periods
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
        debug!(
            marks = marks.len(),
            frame_periods, shift_periods, "pitch frame provider configured"
        );
        Ok(Self {
            source,
            marks,
            sample_rate,
            frame_periods,
            shift_periods,
            lead_periods: 0,
            pad_edges: false,
            voice_range: VoiceRange::default(),
            window: None,
            processor: None,
            history: Vec::new(),
            history_start: 0,
            source_end: None,
            frame: Vec::new(),
            valid_in_frame: 0,
            center_offset: 0,
            next_index: 0,
            checked_periods: 0,
        })
    }

    /// Centres frames on their anchor mark and pads missing edge periods.
    pub fn centered(mut self) -> Self {
        self.lead_periods = self.frame_periods / 2;
        self.pad_edges = true;
        self
    }

    pub fn with_voice_range(mut self, range: VoiceRange) -> Self {
        self.voice_range = range;
        self
    }

    /// Asymmetric window split at the anchor mark.
    pub fn with_two_halves_window(mut self, kind: WindowKind) -> Self {
        self.window = Some(TwoHalvesWindow::new(kind));
        self
    }

    pub fn with_processor(mut self, processor: Box<dyn InlineProcessor>) -> Self {
        self.processor = Some(processor);
        self
    }

    pub fn marks(&self) -> &PitchMarks {
        &self.marks
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Total number of frames this provider yields.
    pub fn frame_count(&self) -> usize {
        let periods = self.marks.num_periods();
        if self.pad_edges {
            periods.div_ceil(self.shift_periods)
        } else if periods < self.frame_periods {
            0
        } else {
            (periods - self.frame_periods) / self.shift_periods + 1
        }
    }

    /// Index of the frame the next call returns.
    pub fn next_index(&self) -> usize {
        self.next_index
    }

    pub fn has_more(&self) -> bool {
        self.next_index < self.frame_count()
    }

    pub fn valid_samples_in_frame(&self) -> usize {
        self.valid_in_frame
    }

    /// Offset of the anchor mark inside the current frame.
    pub fn center_offset(&self) -> usize {
        self.center_offset
    }

    /// Samples before the first pitch mark. Only available before the first
    /// frame is read.
    pub fn leading_samples(&mut self) -> Vec<f64> {
        let first = self.marks.marks()[0];
        if self.history_start != 0 || first == 0 {
            return Vec::new();
        }
        self.load_until(first);
        self.history[..first].to_vec()
    }

    /// Returns the next frame, or `None` once every frame has been produced.
    pub fn next_frame(&mut self) -> Result<Option<&mut [f64]>> {
        if !self.has_more() {
            self.valid_in_frame = 0;
            return Ok(None);
        }
        let anchor = (self.next_index * self.shift_periods) as isize;
        let first = anchor - self.lead_periods as isize;
        let periods: Vec<isize> = (first..first + self.frame_periods as isize).collect();

        for &p in &periods {
            self.check_period(self.clamp_period(p))?;
        }

        let lengths: Vec<usize> = periods
            .iter()
            .map(|&p| self.marks.period(self.clamp_period(p)))
            .collect();
        let total: usize = lengths.iter().sum();
        self.center_offset = lengths[..self.lead_periods].iter().sum();

        self.frame.clear();
        self.frame.resize(total, 0.0);
        self.valid_in_frame = 0;

        let mut offset = 0;
        for (&p, &len) in periods.iter().zip(&lengths) {
            if p >= 0 && (p as usize) < self.marks.num_periods() {
                let start = self.marks.marks()[p as usize];
                self.load_until(start + len);
                let from = start - self.history_start;
                self.frame[offset..offset + len].copy_from_slice(&self.history[from..from + len]);
                self.valid_in_frame += match self.source_end {
                    Some(end) => end.saturating_sub(start).min(len),
                    None => len,
                };
            }
            offset += len;
        }
        trace!(
            frame = self.next_index,
            length = total,
            center = self.center_offset,
            "pitch frame"
        );

        self.next_index += 1;
        let next_first = (self.next_index * self.shift_periods) as isize - self.lead_periods as isize;
        let keep_from = self.marks.marks()[self.clamp_period(next_first.max(0))];
        self.discard_before(keep_from);

        if let Some(window) = &self.window {
            window.apply(&mut self.frame, self.center_offset);
        }
        if let Some(processor) = self.processor.as_mut() {
            processor.apply_inline(&mut self.frame);
        }
        Ok(Some(&mut self.frame))
    }

    fn clamp_period(&self, p: isize) -> usize {
        p.clamp(0, self.marks.num_periods() as isize - 1) as usize
    }

    fn check_period(&mut self, index: usize) -> Result<()> {
        while self.checked_periods <= index {
            let i = self.checked_periods;
            self.voice_range
                .check(i, self.marks.period(i), self.sample_rate)?;
            self.checked_periods += 1;
        }
        Ok(())
    }

    /// Reads from the source until `end` (exclusive) is buffered, padding
    /// with zeros past the end of the signal.
    fn load_until(&mut self, end: usize) {
        let mut chunk = [0.0; READ_CHUNK];
        while self.history_start + self.history.len() < end {
            let missing = end - self.history_start - self.history.len();
            let want = missing.min(READ_CHUNK);
            let read = if self.source_end.is_none() {
                self.source.read(&mut chunk[..want])
            } else {
                0
            };
            if read == 0 {
                if self.source_end.is_none() {
                    self.source_end = Some(self.history_start + self.history.len());
                }
                self.history.resize(self.history.len() + missing, 0.0);
            } else {
                self.history.extend_from_slice(&chunk[..read]);
            }
        }
    }

    fn discard_before(&mut self, position: usize) {
        if position <= self.history_start {
            return;
        }
        let loaded_end = self.history_start + self.history.len();
        if position <= loaded_end {
            self.history.drain(..position - self.history_start);
        } else {
            self.history.clear();
            self.load_until(position);
            self.history.clear();
        }
        self.history_start = position;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::BufferedSource;
    use pretty_assertions::assert_eq;

    fn ramp(len: usize) -> Box<dyn SampleSource> {
        Box::new(BufferedSource::new((0..len).map(|i| i as f64).collect()))
    }

    #[test]
    fn test_frames_follow_pitch_marks() {
        let marks = PitchMarks::new(vec![2, 22, 42, 72, 92]).unwrap();
        let mut frames = PitchFrameProvider::new(ramp(100), marks, 2, 1, 16_000).unwrap();
        assert_eq!(frames.frame_count(), 3);

        let first = frames.next_frame().unwrap().unwrap().to_vec();
        assert_eq!(first.len(), 40);
        assert_eq!(first[0], 2.0);
        assert_eq!(first[39], 41.0);

        let second = frames.next_frame().unwrap().unwrap().to_vec();
        assert_eq!(second.len(), 50);
        assert_eq!(second[0], 22.0);

        let third = frames.next_frame().unwrap().unwrap().to_vec();
        assert_eq!(third.len(), 50);
        assert_eq!(third[49], 91.0);
        assert_eq!(frames.valid_samples_in_frame(), 50);
        assert!(frames.next_frame().unwrap().is_none());
    }

    #[test]
    fn test_leading_samples() {
        let marks = PitchMarks::new(vec![3, 23, 43]).unwrap();
        let mut frames = PitchFrameProvider::new(ramp(50), marks, 1, 1, 16_000).unwrap();
        assert_eq!(frames.leading_samples(), vec![0.0, 1.0, 2.0]);
        assert_eq!(frames.next_frame().unwrap().unwrap()[0], 3.0);
    }

    #[test]
    fn test_centered_frames_pad_edges() {
        let marks = PitchMarks::new(vec![0, 20, 50]).unwrap();
        let mut frames = PitchFrameProvider::new(ramp(50), marks, 2, 1, 16_000)
            .unwrap()
            .centered();
        assert_eq!(frames.frame_count(), 2);

        // one padded period of 20 before mark 0
        let first = frames.next_frame().unwrap().unwrap().to_vec();
        assert_eq!(first.len(), 40);
        assert_eq!(frames.center_offset(), 20);
        assert_eq!(&first[..20], &[0.0; 20]);
        assert_eq!(first[20], 0.0);
        assert_eq!(first[21], 1.0);
        assert_eq!(frames.valid_samples_in_frame(), 20);

        let second = frames.next_frame().unwrap().unwrap().to_vec();
        assert_eq!(second.len(), 50);
        assert_eq!(frames.center_offset(), 20);
        assert_eq!(second[20], 20.0);
    }

    #[test]
    fn test_signal_end_is_zero_padded() {
        let marks = PitchMarks::new(vec![0, 20, 40]).unwrap().with_total_zeros_to_pad(5);
        let mut frames = PitchFrameProvider::new(ramp(35), marks, 2, 1, 16_000).unwrap();
        let frame = frames.next_frame().unwrap().unwrap().to_vec();
        assert_eq!(frame[34], 34.0);
        assert_eq!(&frame[35..], &[0.0; 5]);
        assert_eq!(frames.valid_samples_in_frame(), 35);
    }

    #[test]
    fn test_two_halves_window_splits_at_anchor() {
        let marks = PitchMarks::new(vec![0, 20, 60]).unwrap();
        let source = Box::new(BufferedSource::new(vec![1.0; 60]));
        let mut frames = PitchFrameProvider::new(source, marks, 2, 1, 16_000)
            .unwrap()
            .centered()
            .with_two_halves_window(WindowKind::Hann);
        frames.next_frame().unwrap();
        let frame = frames.next_frame().unwrap().unwrap().to_vec();
        // peak sits on the anchor mark, 20 samples in
        assert!((frame[20] - 1.0).abs() < 1e-12);
        assert!(frame[10] < 1.0 && frame[40] < 1.0);
    }

    #[test]
    fn test_implausible_period_is_rejected() {
        // 640 samples at 16 kHz is a 40 ms period
        let marks = PitchMarks::new(vec![0, 160, 800, 960]).unwrap();
        let mut frames = PitchFrameProvider::new(ramp(1_000), marks, 1, 1, 16_000).unwrap();
        assert!(frames.next_frame().is_ok());
        assert!(matches!(
            frames.next_frame(),
            Err(Error::ImplausiblePeriod { index: 1, samples: 640, .. })
        ));
    }

    #[test]
    fn test_too_few_marks_for_a_frame() {
        let marks = PitchMarks::new(vec![0, 20]).unwrap();
        let mut frames = PitchFrameProvider::new(ramp(40), marks, 3, 1, 16_000).unwrap();
        assert_eq!(frames.frame_count(), 0);
        assert!(frames.next_frame().unwrap().is_none());
    }
}
