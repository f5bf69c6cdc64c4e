use ndarray::{Array3, Zip};

use crate::{
    error::{Result, StyleError},
    image_utils::Raster,
};

/// Streaming per-pixel arithmetic mean.
///
/// The mean is updated incrementally (`mean += (x - mean) / n`) so the
/// accumulator never holds more than one working-resolution array and is a
/// usable partial estimate after every sample. Partial accumulators built on
/// separate workers combine with [`MeanAccumulator::merge`].
#[derive(Debug, Clone)]
pub struct MeanAccumulator {
    mean: Array3<f64>,
    count: usize,
}

impl MeanAccumulator {
    pub fn new(height: usize, width: usize, channels: usize) -> Self {
        Self {
            mean: Array3::zeros((height, width, channels)),
            count: 0,
        }
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn dim(&self) -> (usize, usize, usize) {
        self.mean.dim()
    }

    /// Current mean, or `None` before the first sample.
    pub fn mean(&self) -> Option<&Array3<f64>> {
        (self.count > 0).then_some(&self.mean)
    }

    pub fn push(&mut self, sample: &Raster) -> Result<()> {
        if sample.dim() != self.mean.dim() {
            return Err(StyleError::InvalidParameter(format!(
                "sample shape {:?} does not match accumulator shape {:?}",
                sample.dim(),
                self.mean.dim()
            )));
        }

        self.count += 1;
        let inv = 1.0 / self.count as f64;
        Zip::from(&mut self.mean)
            .and(sample)
            .for_each(|m, &x| *m += (x as f64 - *m) * inv);

        Ok(())
    }

    /// Folds `other` in as a count-weighted mean.
    pub fn merge(&mut self, other: &MeanAccumulator) -> Result<()> {
        if other.mean.dim() != self.mean.dim() {
            return Err(StyleError::InvalidParameter(format!(
                "cannot merge accumulator of shape {:?} into {:?}",
                other.mean.dim(),
                self.mean.dim()
            )));
        }

        if other.count == 0 {
            return Ok(());
        }
        if self.count == 0 {
            *self = other.clone();
            return Ok(());
        }

        let total = self.count + other.count;
        let weight = other.count as f64 / total as f64;
        Zip::from(&mut self.mean)
            .and(&other.mean)
            .for_each(|m, &o| *m += (o - *m) * weight);
        self.count = total;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(value: f32) -> Raster {
        Raster::from_elem((2, 3, 1), value)
    }

    #[test]
    fn test_empty_accumulator_has_no_mean() {
        let acc = MeanAccumulator::new(2, 3, 1);
        assert!(acc.is_empty());
        assert!(acc.mean().is_none());
    }

    #[test]
    fn test_incremental_mean() {
        let mut acc = MeanAccumulator::new(2, 3, 1);
        for v in [0.1, 0.2, 0.6] {
            acc.push(&sample(v)).unwrap();
        }
        assert_eq!(acc.count(), 3);
        let mean = acc.mean().unwrap();
        assert!(mean.iter().all(|m| (m - 0.3).abs() < 1e-7));
    }

    #[test]
    fn test_partial_mean_is_valid_after_each_sample() {
        let mut acc = MeanAccumulator::new(2, 3, 1);
        acc.push(&sample(0.8)).unwrap();
        assert!(acc.mean().unwrap().iter().all(|m| (m - 0.8).abs() < 1e-7));
        acc.push(&sample(0.4)).unwrap();
        assert!(acc.mean().unwrap().iter().all(|m| (m - 0.6).abs() < 1e-7));
    }

    #[test]
    fn test_merge_matches_sequential_mean() {
        let values = [0.05, 0.9, 0.3, 0.45, 0.7];

        let mut sequential = MeanAccumulator::new(2, 3, 1);
        values.iter().for_each(|&v| sequential.push(&sample(v)).unwrap());

        let mut left = MeanAccumulator::new(2, 3, 1);
        let mut right = MeanAccumulator::new(2, 3, 1);
        values[..2].iter().for_each(|&v| left.push(&sample(v)).unwrap());
        values[2..].iter().for_each(|&v| right.push(&sample(v)).unwrap());
        left.merge(&right).unwrap();

        assert_eq!(left.count(), 5);
        for (a, b) in left.mean().unwrap().iter().zip(sequential.mean().unwrap()) {
            assert!((a - b).abs() < 1e-9);
        }
    }

    #[test]
    fn test_merge_with_empty_sides() {
        let mut filled = MeanAccumulator::new(2, 3, 1);
        filled.push(&sample(0.5)).unwrap();

        let mut empty = MeanAccumulator::new(2, 3, 1);
        empty.merge(&filled).unwrap();
        assert_eq!(empty.count(), 1);

        filled.merge(&MeanAccumulator::new(2, 3, 1)).unwrap();
        assert_eq!(filled.count(), 1);
    }

    #[test]
    fn test_shape_mismatch_is_rejected() {
        let mut acc = MeanAccumulator::new(2, 3, 1);
        assert!(acc.push(&Raster::zeros((3, 2, 1))).is_err());
        assert!(acc.merge(&MeanAccumulator::new(2, 3, 3)).is_err());
        assert!(acc.is_empty());
    }
}
