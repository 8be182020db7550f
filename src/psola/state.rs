//! Synthesis state threaded through the per-period PSOLA loop.

use crate::dsp::round_to_len;
use crate::error::Result;
use crate::source::SampleSink;
use tracing::trace;

const STAGE_CHUNK: usize = 4096;

/// Counters describing one synthesis run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessingStats {
    /// Input frames visited.
    pub frames: usize,
    /// Input frames dropped to shorten the output.
    pub skipped: usize,
    /// Emissions beyond the first one of a frame.
    pub repeated: usize,
    /// Frames rebuilt through spectral warping.
    pub warped: usize,
    /// Samples handed to the sink.
    pub written: usize,
}

/// Ring of weighted partial sums for overlap-add.
///
/// Offsets are relative to the read cursor. A position is final once the
/// cursor is about to pass it; [`drain`](Self::drain) normalises it by its
/// accumulated weight, clears it and advances.
#[derive(Debug, Clone)]
pub struct OverlapAddBuffer {
    y: Vec<f64>,
    w: Vec<f64>,
    cursor: usize,
}

impl OverlapAddBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            y: vec![0.0; capacity],
            w: vec![0.0; capacity],
            cursor: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.y.len()
    }

    fn slot(&self, offset: usize) -> usize {
        debug_assert!(offset < self.capacity());
        (self.cursor + offset) % self.capacity()
    }

    pub fn add(&mut self, offset: usize, value: f64, weight: f64) {
        let i = self.slot(offset);
        self.y[i] += value;
        self.w[i] += weight;
    }

    /// Overwrites a position with an unweighted value.
    pub fn assign(&mut self, offset: usize, value: f64) {
        let i = self.slot(offset);
        self.y[i] = value;
        self.w[i] = 1.0;
    }

    /// Adds an unweighted value and pins the weight to one.
    pub fn add_unweighted(&mut self, offset: usize, value: f64) {
        let i = self.slot(offset);
        self.y[i] += value;
        self.w[i] = 1.0;
    }

    /// Emits `count` normalised samples from the cursor onwards.
    pub fn drain(&mut self, count: usize, out: &mut Vec<f64>) {
        for _ in 0..count {
            let i = self.cursor;
            let value = if self.w[i] > 0.0 {
                self.y[i] / self.w[i]
            } else {
                self.y[i]
            };
            out.push(value);
            self.y[i] = 0.0;
            self.w[i] = 0.0;
            self.cursor = (self.cursor + 1) % self.capacity();
        }
    }
}

/// Staging buffer in front of the sink. With a target length it drops
/// samples past the target and zero-pads up to it on finish.
#[derive(Debug)]
pub struct OutputStage {
    buffer: Vec<f64>,
    target_len: Option<usize>,
    written: usize,
}

impl OutputStage {
    pub fn new(target_len: Option<usize>) -> Self {
        Self {
            buffer: Vec::with_capacity(STAGE_CHUNK),
            target_len,
            written: 0,
        }
    }

    /// Samples accepted so far.
    pub fn written(&self) -> usize {
        self.written
    }

    pub fn push<K: SampleSink + ?Sized>(&mut self, samples: &[f64], sink: &mut K) -> Result<()> {
        let accepted = match self.target_len {
            Some(target) => samples.len().min(target.saturating_sub(self.written)),
            None => samples.len(),
        };
        for chunk in samples[..accepted].chunks(STAGE_CHUNK) {
            if self.buffer.len() + chunk.len() > STAGE_CHUNK {
                sink.write(&self.buffer)?;
                self.buffer.clear();
            }
            self.buffer.extend_from_slice(chunk);
        }
        self.written += accepted;
        Ok(())
    }

    /// Pads to the target length and flushes everything to the sink.
    pub fn finish<K: SampleSink + ?Sized>(&mut self, sink: &mut K) -> Result<usize> {
        if let Some(target) = self.target_len {
            let missing = target.saturating_sub(self.written);
            if missing > 0 {
                trace!(missing, "padding output to target length");
                self.push(&vec![0.0; missing], sink)?;
            }
        }
        if !self.buffer.is_empty() {
            sink.write(&self.buffer)?;
            self.buffer.clear();
        }
        sink.flush()?;
        Ok(self.written)
    }
}

/// How a frame is laid into the ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// First emission of the run: the first half goes in unwindowed.
    First,
    /// Final emission of the run: the second half goes in unwindowed.
    Last,
    Normal,
}

/// Mutable state carried from one pitch period to the next.
#[derive(Debug)]
pub struct SynthesisState {
    ring: OverlapAddBuffer,
    next_add: f64,
    sum_local_dur_diffs: f64,
    synth_start: usize,
    synth_total: usize,
    emitted: usize,
    stage: OutputStage,
    drained: Vec<f64>,
    pub(crate) stats: ProcessingStats,
}

impl SynthesisState {
    /// `capacity` bounds the longest frame and the longest skip.
    pub fn new(capacity: usize, target_len: Option<usize>) -> Self {
        Self {
            ring: OverlapAddBuffer::new(capacity.max(1)),
            next_add: 0.0,
            sum_local_dur_diffs: 0.0,
            synth_start: 0,
            synth_total: 0,
            emitted: 0,
            stage: OutputStage::new(target_len),
            drained: Vec::new(),
            stats: ProcessingStats::default(),
        }
    }

    pub fn stats(&self) -> ProcessingStats {
        self.stats
    }

    /// Output position of the next frame start, not counting samples
    /// written before the first pitch mark.
    pub fn synth_start(&self) -> usize {
        self.synth_start
    }

    /// Number of emissions so far.
    pub fn emitted(&self) -> usize {
        self.emitted
    }

    /// Decides how often the current frame is emitted so that the output
    /// tracks `frame_size * tscale` overall. Returns 0 for a skipped frame.
    ///
    /// Local errors within a tenth of the new period are tolerated and
    /// carried; the last frame is repeated until the accumulated error is
    /// used up.
    pub fn plan_emissions(
        &mut self,
        frame_size: usize,
        new_frame_size: usize,
        tscale: f64,
        num_periods: usize,
        is_last: bool,
    ) -> usize {
        let np = num_periods as f64;
        let new_period = round_to_len(new_frame_size as f64 / np).max(1) as f64;
        let tolerance = 0.1 * new_period;

        let mut local =
            self.next_add + (frame_size as f64 * tscale - new_frame_size as f64) / np;
        self.next_add = 0.0;
        let mut count: i64 = 0;

        if local < -tolerance {
            count = -1;
            if !is_last {
                self.next_add = local + new_period;
                local = 0.0;
            }
        } else if local > tolerance {
            while local > tolerance {
                count += 1;
                local -= new_period;
            }
            if !is_last {
                self.next_add = local;
                local = 0.0;
            }
        }
        self.sum_local_dur_diffs += local;

        if is_last {
            let mut remaining = self.sum_local_dur_diffs;
            while remaining > 0.0 {
                count += 1;
                remaining -= new_period;
            }
            count += 1;
        }

        let emissions = (count + 1).max(0) as usize;
        if emissions == 0 {
            self.stats.skipped += 1;
        } else {
            self.stats.repeated += emissions - 1;
        }
        trace!(local, count, emissions, next_add = self.next_add, "duration plan");
        emissions
    }

    /// Placement for the next emission.
    pub fn placement(&self, is_final: bool) -> Placement {
        if self.emitted == 0 {
            Placement::First
        } else if is_final {
            Placement::Last
        } else {
            Placement::Normal
        }
    }

    /// Overlap-adds `frame` under `window` at the current output position.
    ///
    /// Frames must fit the ring: the state is sized for the longest frame
    /// the caller will place. Samples beyond the ring capacity are dropped
    /// rather than wrapped onto sums that are still accumulating.
    pub fn place(&mut self, frame: &[f64], window: &[f64], placement: Placement) {
        let n = frame.len().min(self.ring.capacity());
        let half = (frame.len() + 1) / 2;
        for (k, (&x, &w)) in frame.iter().zip(window).take(n).enumerate() {
            match placement {
                Placement::First if k < half => self.ring.assign(k, x),
                Placement::Last if k >= half => self.ring.add_unweighted(k, x),
                _ => self.ring.add(k, x * w, w * w),
            }
        }
        self.synth_total = self.synth_total.max(self.synth_start + n);
        self.emitted += 1;
    }

    /// Emits the `skip` samples the next frame no longer overlaps.
    pub fn advance<K: SampleSink + ?Sized>(&mut self, skip: usize, sink: &mut K) -> Result<()> {
        self.drained.clear();
        self.ring.drain(skip, &mut self.drained);
        self.synth_start += skip;
        self.stage.push(&self.drained, sink)
    }

    /// Sends samples straight to the output, ahead of anything in the ring.
    pub fn write_direct<K: SampleSink + ?Sized>(&mut self, samples: &[f64], sink: &mut K) -> Result<()> {
        self.stage.push(samples, sink)
    }

    /// Drains what is left in the ring and closes the output.
    pub fn finish<K: SampleSink + ?Sized>(&mut self, sink: &mut K) -> Result<ProcessingStats> {
        let remaining = self
            .synth_total
            .saturating_sub(self.synth_start)
            .min(self.ring.capacity());
        self.advance(remaining, sink)?;
        self.stats.written = self.stage.finish(sink)?;
        Ok(self.stats)
    }
}
