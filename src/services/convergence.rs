use crate::models::factors::FactorMatrix;
use crate::models::ratings::SparseRatingMatrix;
use crate::services::vector_math::{choose_about_n_from_stream, dot};
use ndarray::Array2;
use rand::Rng;
use std::fmt;

/// Rows and columns sampled for the convergence test.
pub const NUM_USER_ITEMS_TO_TEST_CONVERGENCE: usize = 100;

/// Running weighted mean; `NaN` until some positive weight has been seen.
#[derive(Debug, Clone, Copy, Default)]
pub struct WeightedMean {
    weighted_sum: f64,
    total_weight: f64,
    count: usize,
}

impl WeightedMean {
    pub fn increment(&mut self, value: f64, weight: f64) {
        self.weighted_sum += value * weight;
        self.total_weight += weight;
        self.count += 1;
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn result(&self) -> f64 {
        if self.total_weight > 0.0 {
            self.weighted_sum / self.total_weight
        } else {
            f64::NAN
        }
    }
}

impl fmt::Display for WeightedMean {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.result())
    }
}

/// A fixed grid of (row, column) pairs whose predicted scores are tracked
/// across iterations.
#[derive(Debug, Clone)]
pub struct ConvergenceSample {
    row_ids: Vec<u64>,
    column_ids: Vec<u64>,
    estimates: Array2<f64>,
}

impl ConvergenceSample {
    /// Draws about [`NUM_USER_ITEMS_TO_TEST_CONVERGENCE`] rows and columns.
    /// Estimates start at zero.
    pub fn draw<R: Rng + ?Sized>(ratings: &SparseRatingMatrix, rng: &mut R) -> Self {
        let row_ids = choose_about_n_from_stream(
            NUM_USER_ITEMS_TO_TEST_CONVERGENCE,
            ratings.row_ids().iter().copied(),
            ratings.num_rows(),
            rng,
        );
        let column_ids = choose_about_n_from_stream(
            NUM_USER_ITEMS_TO_TEST_CONVERGENCE,
            ratings.column_ids().iter().copied(),
            ratings.num_columns(),
            rng,
        );
        Self::from_ids(row_ids, column_ids)
    }

    pub fn from_ids(row_ids: Vec<u64>, column_ids: Vec<u64>) -> Self {
        let estimates = Array2::zeros((row_ids.len(), column_ids.len()));
        ConvergenceSample {
            row_ids,
            column_ids,
            estimates,
        }
    }

    pub fn row_ids(&self) -> &[u64] {
        &self.row_ids
    }

    pub fn column_ids(&self) -> &[u64] {
        &self.column_ids
    }

    pub fn estimates(&self) -> &Array2<f64> {
        &self.estimates
    }

    /// Replaces every estimate with the current `x · y` score and returns the
    /// mean of `|new - old|` weighted by `max(0, new)`. Pairs with a missing
    /// vector are skipped.
    pub fn update(&mut self, x: &FactorMatrix, y: &FactorMatrix) -> WeightedMean {
        let mut diff = WeightedMean::default();
        for (i, &row_id) in self.row_ids.iter().enumerate() {
            let Some(x_vector) = x.get(row_id) else {
                continue;
            };
            for (j, &column_id) in self.column_ids.iter().enumerate() {
                let Some(y_vector) = y.get(column_id) else {
                    continue;
                };
                let new_value = dot(x_vector, y_vector);
                let old_value = self.estimates[(i, j)];
                self.estimates[(i, j)] = new_value;
                diff.increment((new_value - old_value).abs(), new_value.max(0.0));
            }
        }
        diff
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_weighted_mean() {
        let mut mean = WeightedMean::default();
        assert!(mean.result().is_nan());
        mean.increment(1.0, 1.0);
        mean.increment(4.0, 3.0);
        mean.increment(100.0, 0.0);
        assert_eq!(mean.count(), 3);
        assert!((mean.result() - 13.0 / 4.0).abs() < 1e-12);
    }

    #[test]
    fn test_update_tracks_differences() {
        let x = FactorMatrix::from_vectors(vec![(1, vec![1.0, 0.0]), (2, vec![0.0, 1.0])]).unwrap();
        let y = FactorMatrix::from_vectors(vec![(10, vec![2.0, 0.0]), (20, vec![0.0, -1.0])]).unwrap();
        let mut sample = ConvergenceSample::from_ids(vec![1, 2], vec![10, 20]);

        let first = sample.update(&x, &y);
        // only the positive score (1,10) = 2 carries weight
        assert!((first.result() - 2.0).abs() < 1e-12);
        assert_eq!(sample.estimates()[(0, 0)], 2.0);
        assert_eq!(sample.estimates()[(1, 1)], -1.0);

        let second = sample.update(&x, &y);
        assert_eq!(second.result(), 0.0);
    }

    #[test]
    fn test_no_positive_scores_is_not_finite() {
        let x = FactorMatrix::from_vectors(vec![(1, vec![1.0])]).unwrap();
        let y = FactorMatrix::from_vectors(vec![(10, vec![-1.0])]).unwrap();
        let mut sample = ConvergenceSample::from_ids(vec![1], vec![10]);
        assert!(!sample.update(&x, &y).result().is_finite());
    }
}
