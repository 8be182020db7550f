//! Window functions used for analysis and overlap-add synthesis.

use crate::frame::InlineProcessor;
use dasp::window::{Hanning, Window as DaspWindow};
use std::f64::consts::PI;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WindowKind {
    Rectangular,
    Bartlett,
    Hann,
    Hamming,
    Blackman,
}

impl WindowKind {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "rect" | "rectangular" => Some(Self::Rectangular),
            "bartlett" | "triangular" => Some(Self::Bartlett),
            "hann" | "hanning" => Some(Self::Hann),
            "hamming" => Some(Self::Hamming),
            "blackman" => Some(Self::Blackman),
            _ => None,
        }
    }

    /// Window value at `phase` in `[0, 1]`.
    pub fn value(self, phase: f64) -> f64 {
        match self {
            Self::Rectangular => 1.0,
            Self::Bartlett => 1.0 - (2.0 * phase - 1.0).abs(),
            Self::Hann => <Hanning as DaspWindow<f64>>::window(phase),
            Self::Hamming => 0.54 - 0.46 * (2.0 * PI * phase).cos(),
            Self::Blackman => {
                0.42 - 0.5 * (2.0 * PI * phase).cos() + 0.08 * (4.0 * PI * phase).cos()
            }
        }
    }

    /// Fraction of a frame shared with the next one when this window is used
    /// for overlap-add, or `None` if the window has no reconstruction rule.
    pub fn overlap_fraction(self) -> Option<f64> {
        match self {
            Self::Hann => Some(0.75),
            Self::Hamming | Self::Blackman => Some(0.875),
            Self::Rectangular | Self::Bartlett => None,
        }
    }
}

/// A symmetric window with a constant pre-scaling factor.
#[derive(Debug, Clone)]
pub struct Window {
    kind: WindowKind,
    values: Vec<f64>,
    prescale: f64,
}

impl Window {
    pub fn new(kind: WindowKind, length: usize) -> Self {
        Self::with_prescale(kind, length, 1.0)
    }

    pub fn with_prescale(kind: WindowKind, length: usize, prescale: f64) -> Self {
        let values = match length {
            0 => Vec::new(),
            1 => vec![prescale * kind.value(0.5)],
            n => (0..n)
                .map(|i| prescale * kind.value(i as f64 / (n - 1) as f64))
                .collect(),
        };
        Self {
            kind,
            values,
            prescale,
        }
    }

    /// The first `length` values of a window one sample longer, so shifted
    /// copies tile without a double zero at the joins.
    pub fn periodic(kind: WindowKind, length: usize) -> Self {
        let mut window = Self::new(kind, length + 1);
        window.values.truncate(length);
        window
    }

    pub fn kind(&self) -> WindowKind {
        self.kind
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn prescale(&self) -> f64 {
        self.prescale
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn value(&self, i: usize) -> f64 {
        self.values[i]
    }

    /// Multiplies `data` by the window. Samples past the window's end are
    /// left untouched.
    pub fn apply(&self, data: &mut [f64]) {
        for (x, w) in data.iter_mut().zip(&self.values) {
            *x *= w;
        }
    }

    /// Writes `src * window` into `dst`.
    pub fn apply_to(&self, src: &[f64], dst: &mut [f64]) {
        for ((d, s), w) in dst.iter_mut().zip(src).zip(&self.values) {
            *d = s * w;
        }
    }
}

impl InlineProcessor for Window {
    fn apply_inline(&mut self, data: &mut [f64]) {
        self.apply(data);
    }
}

/// Window whose length follows each frame, caching the last coefficients.
#[derive(Debug, Clone)]
pub struct DynamicWindow {
    kind: WindowKind,
    cached: Option<Window>,
}

impl DynamicWindow {
    pub fn new(kind: WindowKind) -> Self {
        Self { kind, cached: None }
    }

    pub fn kind(&self) -> WindowKind {
        self.kind
    }

    /// Coefficients for a window of `length` samples.
    pub fn values(&mut self, length: usize) -> &[f64] {
        let kind = self.kind;
        let window = match self.cached.take() {
            Some(w) if w.len() == length => w,
            _ => Window::new(kind, length),
        };
        self.cached.insert(window).values()
    }
}

impl InlineProcessor for DynamicWindow {
    fn apply_inline(&mut self, data: &mut [f64]) {
        let len = data.len();
        for (x, w) in data.iter_mut().zip(self.values(len)) {
            *x *= w;
        }
    }
}

/// Asymmetric window built from the rising half of one window and the
/// falling half of another, joined at a centre offset.
#[derive(Debug, Clone, Copy)]
pub struct TwoHalvesWindow {
    kind: WindowKind,
}

impl TwoHalvesWindow {
    pub fn new(kind: WindowKind) -> Self {
        Self { kind }
    }

    /// Applies the left half to `data[..center]` and the right half to
    /// `data[center..]`.
    pub fn apply(&self, data: &mut [f64], center: usize) {
        let center = center.min(data.len());
        let (left, right) = data.split_at_mut(center);

        // the left half stops short of the peak, the right half starts on it
        let full = Window::new(self.kind, 2 * left.len() + 1);
        for (x, w) in left.iter_mut().zip(full.values()) {
            *x *= w;
        }

        let n = right.len();
        if n > 0 {
            let full = Window::new(self.kind, 2 * n - 1);
            for (x, w) in right.iter_mut().zip(&full.values()[n - 1..]) {
                *x *= w;
            }
        }
    }
}
