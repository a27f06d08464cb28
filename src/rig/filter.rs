//! Moving-average smoothing for per-wheel velocity estimates.

/// Number of slots in the circular buffer.
pub const FILTER_LEN: usize = 5;

/// Fixed-length circular moving average.
///
/// NaN and infinite entries are skipped when averaging; a buffer with no
/// finite entries averages to 0.
#[derive(Debug, Clone)]
pub struct MovingAverage {
    slots: [f32; FILTER_LEN],
    index: usize,
}

impl MovingAverage {
    pub fn new() -> Self {
        Self {
            slots: [0.0; FILTER_LEN],
            index: 0,
        }
    }

    /// Overwrite the next slot with `value` and return the new average.
    pub fn push(&mut self, value: f32) -> f32 {
        self.slots[self.index] = value;
        self.index = (self.index + 1) % FILTER_LEN;
        self.average()
    }

    /// Mean of the finite entries currently buffered.
    pub fn average(&self) -> f32 {
        finite_mean(&self.slots)
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }
}

impl Default for MovingAverage {
    fn default() -> Self {
        Self::new()
    }
}

/// Mean of the finite values in `values`, 0 when there are none.
pub fn finite_mean(values: &[f32]) -> f32 {
    let (sum, count) = values
        .iter()
        .filter(|v| v.is_finite())
        .fold((0.0f32, 0usize), |(s, c), v| (s + v, c + 1));
    if count > 0 {
        sum / count as f32
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_skips_nan_and_infinity() {
        let avg = finite_mean(&[f32::NAN, 1.0, 2.0, f32::INFINITY, 3.0]);
        assert!((avg - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_all_invalid_is_zero() {
        assert_eq!(finite_mean(&[f32::NAN, f32::INFINITY, f32::NEG_INFINITY]), 0.0);
        assert_eq!(finite_mean(&[]), 0.0);
    }

    #[test]
    fn test_buffer_through_push() {
        let mut f = MovingAverage::new();
        for v in [f32::NAN, 1.0, 2.0, f32::INFINITY] {
            f.push(v);
        }
        let avg = f.push(3.0);
        assert!((avg - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_initial_zeros_count() {
        // Unfilled slots start at 0 and take part in the average
        let mut f = MovingAverage::new();
        let avg = f.push(5.0);
        assert!((avg - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_wraps_around() {
        let mut f = MovingAverage::new();
        for _ in 0..FILTER_LEN {
            f.push(10.0);
        }
        let avg = f.push(0.0);
        assert!((avg - 8.0).abs() < 1e-6);
    }

    #[test]
    fn test_reset() {
        let mut f = MovingAverage::new();
        f.push(4.0);
        f.reset();
        assert_eq!(f.average(), 0.0);
    }
}
