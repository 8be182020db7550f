//! Small numeric helpers shared by the frame processors.

/// Smallest energy value returned by [`energy`].
pub const MIN_ENERGY: f64 = 1e-100;

/// Linear interpolation between two values
pub fn lerp(a: f64, b: f64, t: f64) -> f64 {
    a + t * (b - a)
}

/// Rounds half-way cases towards positive infinity, the way sample counts
/// are rounded everywhere in the synthesis loop.
pub fn round_half_up(x: f64) -> i64 {
    (x + 0.5).floor() as i64
}

/// Same as [`round_half_up`], saturating at zero.
pub fn round_to_len(x: f64) -> usize {
    round_half_up(x).max(0) as usize
}

/// Rounds up to the next even number, then raises to `min`.
pub fn even_at_least(n: usize, min: usize) -> usize {
    let n = if n % 2 == 1 { n + 1 } else { n };
    n.max(min)
}

/// Resamples `values` onto `new_len` points by linear interpolation.
///
/// A single value is broadcast, and the end points of the input map onto the
/// end points of the output.
pub fn resample_linear(values: &[f64], new_len: usize) -> Vec<f64> {
    match (values.len(), new_len) {
        (_, 0) => Vec::new(),
        (0, n) => vec![0.0; n],
        (1, n) => vec![values[0]; n],
        (len, 1) => vec![values[len / 2]],
        (len, n) => {
            let step = (len - 1) as f64 / (n - 1) as f64;
            (0..n)
                .map(|i| {
                    let pos = i as f64 * step;
                    let left = (pos.floor() as usize).min(len - 1);
                    let right = (left + 1).min(len - 1);
                    lerp(values[left], values[right], pos - left as f64)
                })
                .collect()
        }
    }
}

/// L2 norm of a frame, floored at [`MIN_ENERGY`].
pub fn energy(samples: &[f64]) -> f64 {
    samples
        .iter()
        .map(|x| x * x)
        .sum::<f64>()
        .sqrt()
        .max(MIN_ENERGY)
}

/// Mean of the squared samples.
pub fn average_sample_energy(samples: &[f64]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    samples.iter().map(|x| x * x).sum::<f64>() / samples.len() as f64
}

/// Largest absolute sample value.
pub fn abs_max(samples: &[f64]) -> f64 {
    samples.iter().fold(0.0, |m, x| m.max(x.abs()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rounding_helpers() {
        assert_eq!(round_half_up(2.5), 3);
        assert_eq!(round_half_up(-2.5), -2);
        assert_eq!(round_to_len(-3.0), 0);
        assert_eq!(even_at_least(5, 4), 6);
        assert_eq!(even_at_least(1, 4), 4);
        assert_eq!(even_at_least(480, 4), 480);
    }

    #[test]
    fn test_resample_linear() {
        assert_eq!(resample_linear(&[2.0], 3), vec![2.0, 2.0, 2.0]);
        assert_eq!(resample_linear(&[0.0, 1.0], 5), vec![0.0, 0.25, 0.5, 0.75, 1.0]);

        let down = resample_linear(&[0.0, 1.0, 2.0, 3.0, 4.0], 3);
        assert_eq!(down, vec![0.0, 2.0, 4.0]);
    }

    #[test]
    fn test_energy_floor() {
        assert_eq!(energy(&[0.0; 8]), MIN_ENERGY);
        assert!((energy(&[3.0, 4.0]) - 5.0).abs() < 1e-12);
        assert_eq!(average_sample_energy(&[]), 0.0);
        assert_eq!(abs_max(&[0.5, -0.75, 0.25]), 0.75);
    }
}
