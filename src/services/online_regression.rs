//! Online linear regression trained one example at a time.
//!
//! Learning rates anneal globally with the step count and per feature with
//! how often that feature has been seen. Instances trained on partitioned
//! data are combined afterwards with [`OnlineRegression::merge`].

use crate::models::config::OnlineRegressionConfig;
use crate::models::error::{Error, Result};
use crate::services::prior::Prior;
use ndarray::{Array1, Array2, ArrayView1, Axis, Zip};
use std::io::{Read, Write};

/// Leading tag of the serialized state.
pub const WRITABLE_VERSION: i32 = 1;

#[derive(Debug, Clone, PartialEq)]
pub struct OnlineRegression {
    learning_rate: f64,
    decay_factor: f64,
    lambda: f64,
    step_offset: i32,
    step: i32,
    forgetting_exponent: f64,
    per_term_annealing_offset: i32,
    num_categories: i32,
    /// `(num_categories - 1) x num_features`
    beta: Array2<f64>,
    prior: Prior,
    update_counts: Array1<f64>,
    update_steps: Array1<f64>,
    sealed: bool,
}

impl OnlineRegression {
    pub fn new(
        num_categories: usize,
        num_features: usize,
        prior: Prior,
        config: OnlineRegressionConfig,
    ) -> Result<Self> {
        if num_categories < 2 {
            return Err(Error::invalid_argument(format!(
                "need at least two categories: {}",
                num_categories
            )));
        }
        if num_features == 0 {
            return Err(Error::invalid_argument("features must be positive: 0"));
        }
        let num_categories = i32::try_from(num_categories)
            .map_err(|_| Error::invalid_argument("too many categories"))?;
        Ok(OnlineRegression {
            learning_rate: config.learning_rate,
            decay_factor: config.decay_factor,
            lambda: config.lambda,
            step_offset: config.step_offset,
            step: 0,
            forgetting_exponent: -config.forgetting_exponent.abs(),
            per_term_annealing_offset: config.per_term_annealing_offset,
            num_categories,
            beta: Array2::zeros((num_categories as usize - 1, num_features)),
            prior,
            update_counts: Array1::from_elem(num_features, config.per_term_annealing_offset as f64),
            update_steps: Array1::zeros(num_features),
            sealed: false,
        })
    }

    pub fn num_categories(&self) -> usize {
        self.num_categories as usize
    }

    pub fn num_features(&self) -> usize {
        self.beta.ncols()
    }

    pub fn step(&self) -> i32 {
        self.step
    }

    pub fn prior(&self) -> Prior {
        self.prior
    }

    pub fn beta(&self) -> &Array2<f64> {
        &self.beta
    }

    pub fn set_beta(&mut self, beta: Array2<f64>) -> Result<()> {
        if beta.dim() != self.beta.dim() {
            return Err(Error::invalid_argument(format!(
                "beta shape {:?} does not match {:?}",
                beta.dim(),
                self.beta.dim()
            )));
        }
        self.beta = beta;
        Ok(())
    }

    pub fn update_counts(&self) -> &Array1<f64> {
        &self.update_counts
    }

    pub fn update_steps(&self) -> &Array1<f64> {
        &self.update_steps
    }

    pub fn current_learning_rate(&self) -> f64 {
        self.learning_rate
            * self.decay_factor.powi(self.step)
            * (self.step as f64 + self.step_offset as f64).powf(self.forgetting_exponent)
    }

    pub fn per_term_learning_rate(&self, j: usize) -> f64 {
        (self.per_term_annealing_offset as f64 / self.update_counts[j]).sqrt()
    }

    /// Linear prediction for `instance`, without a link function.
    pub fn score(&self, instance: ArrayView1<f64>) -> f64 {
        self.beta.row(0).dot(&instance)
    }

    /// One stochastic gradient step on a single example.
    ///
    /// Pending prior shrinkage is applied first to the features present in
    /// `instance`, then the coefficients of those features move along the
    /// residual `actual - score`.
    pub fn train(
        &mut self,
        tracking_key: u64,
        group_key: Option<&str>,
        actual: f64,
        instance: ArrayView1<f64>,
    ) -> Result<()> {
        if instance.len() != self.num_features() {
            return Err(Error::invalid_argument(format!(
                "instance has {} features, expected {}",
                instance.len(),
                self.num_features()
            )));
        }
        log::trace!("Training on {} (group {:?})", tracking_key, group_key);
        self.sealed = false;
        let learning_rate = self.current_learning_rate();

        self.regularize(instance);

        let gradient_base = actual - self.score(instance);
        for (j, &x) in instance.indexed_iter().filter(|(_, &x)| x != 0.0) {
            let rate = learning_rate * self.per_term_learning_rate(j);
            self.beta[(0, j)] += gradient_base * rate * x;
        }

        let step = self.step as f64;
        for (j, _) in instance.indexed_iter().filter(|(_, &x)| x != 0.0) {
            self.update_steps[j] = step;
            self.update_counts[j] += 1.0;
        }
        self.step += 1;
        Ok(())
    }

    /// Catches the coefficients of the non-zero features of `instance` up
    /// with the prior for every step they were skipped.
    fn regularize(&mut self, instance: ArrayView1<f64>) {
        if self.sealed {
            return;
        }
        let learning_rate = self.current_learning_rate();
        let step = self.step as f64;
        for (j, _) in instance.indexed_iter().filter(|(_, &x)| x != 0.0) {
            let missing_updates = step - self.update_steps[j];
            if missing_updates > 0.0 {
                let rate = self.lambda * learning_rate * self.per_term_learning_rate(j);
                for i in 0..self.beta.nrows() {
                    self.beta[(i, j)] = self.prior.age(self.beta[(i, j)], missing_updates, rate);
                }
                self.update_steps[j] = step;
            }
        }
    }

    /// Applies all outstanding regularization and seals the model until the
    /// next training example.
    pub fn close(&mut self) {
        if !self.sealed {
            self.step += 1;
            let all = Array1::<f64>::ones(self.num_features());
            self.regularize(all.view());
            self.sealed = true;
        }
    }

    pub fn copy_from(&mut self, other: &OnlineRegression) {
        self.clone_from(other);
    }

    pub fn copy(&mut self) -> OnlineRegression {
        self.close();
        self.clone()
    }

    /// Moves this model `1 / batch_size` of the way toward `other`.
    pub fn merge(&mut self, other: &OnlineRegression, batch_size: usize) -> Result<()> {
        if batch_size == 0 {
            return Err(Error::invalid_argument("batch size must be positive"));
        }
        if other.beta.dim() != self.beta.dim() {
            return Err(Error::invalid_argument(format!(
                "cannot merge beta of shape {:?} into {:?}",
                other.beta.dim(),
                self.beta.dim()
            )));
        }
        let scale = batch_size as f64;
        Zip::from(&mut self.beta)
            .and(&other.beta)
            .for_each(|w, &o| *w += (o - *w) / scale);
        Ok(())
    }

    /// Writes the versioned state record.
    pub fn write_to<W: Write>(&self, mut out: W) -> Result<()> {
        bincode::serialize_into(&mut out, &WRITABLE_VERSION)?;
        bincode::serialize_into(&mut out, &self.learning_rate)?;
        bincode::serialize_into(&mut out, &self.decay_factor)?;
        bincode::serialize_into(&mut out, &self.step_offset)?;
        bincode::serialize_into(&mut out, &self.step)?;
        bincode::serialize_into(&mut out, &self.forgetting_exponent)?;
        bincode::serialize_into(&mut out, &self.per_term_annealing_offset)?;
        bincode::serialize_into(&mut out, &self.num_categories)?;
        bincode::serialize_into(&mut out, &self.beta)?;
        bincode::serialize_into(&mut out, &self.prior)?;
        bincode::serialize_into(&mut out, &self.update_counts)?;
        bincode::serialize_into(&mut out, &self.update_steps)?;
        out.flush()?;
        Ok(())
    }

    /// Reads a record written by [`write_to`](Self::write_to). The regularization
    /// strength is not part of the record and comes from `config`.
    pub fn read_from<R: Read>(mut input: R, config: &OnlineRegressionConfig) -> Result<Self> {
        let version: i32 = bincode::deserialize_from(&mut input)?;
        if version != WRITABLE_VERSION {
            return Err(Error::VersionMismatch {
                expected: WRITABLE_VERSION,
                found: version,
            });
        }
        let learning_rate = bincode::deserialize_from(&mut input)?;
        let decay_factor = bincode::deserialize_from(&mut input)?;
        let step_offset = bincode::deserialize_from(&mut input)?;
        let step = bincode::deserialize_from(&mut input)?;
        let forgetting_exponent = bincode::deserialize_from(&mut input)?;
        let per_term_annealing_offset = bincode::deserialize_from(&mut input)?;
        let num_categories: i32 = bincode::deserialize_from(&mut input)?;
        let beta: Array2<f64> = bincode::deserialize_from(&mut input)?;
        let prior = bincode::deserialize_from(&mut input)?;
        let update_counts: Array1<f64> = bincode::deserialize_from(&mut input)?;
        let update_steps: Array1<f64> = bincode::deserialize_from(&mut input)?;

        let features = beta.len_of(Axis(1));
        if num_categories < 2
            || beta.nrows() != num_categories as usize - 1
            || update_counts.len() != features
            || update_steps.len() != features
        {
            return Err(Error::Serialization(Box::new(bincode::ErrorKind::Custom(
                format!(
                    "inconsistent state: {} categories, beta {:?}, {} counts, {} steps",
                    num_categories,
                    beta.dim(),
                    update_counts.len(),
                    update_steps.len()
                ),
            ))));
        }

        Ok(OnlineRegression {
            learning_rate,
            decay_factor,
            lambda: config.lambda,
            step_offset,
            step,
            forgetting_exponent,
            per_term_annealing_offset,
            num_categories,
            beta,
            prior,
            update_counts,
            update_steps,
            sealed: false,
        })
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut bytes = Vec::new();
        self.write_to(&mut bytes)?;
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn trainer(features: usize) -> OnlineRegression {
        OnlineRegression::new(2, features, Prior::Uniform, OnlineRegressionConfig::default()).unwrap()
    }

    #[test]
    fn test_construction() {
        let t = trainer(4);
        assert_eq!(t.beta().dim(), (1, 4));
        assert!(t.update_counts().iter().all(|&c| c == 20.0));
        assert_eq!(t.per_term_learning_rate(0), 1.0);
        assert!(OnlineRegression::new(1, 4, Prior::L1, OnlineRegressionConfig::default()).is_err());
        assert!(OnlineRegression::new(2, 0, Prior::L1, OnlineRegressionConfig::default()).is_err());
    }

    #[test]
    fn test_decay_exponent_is_made_negative() {
        let config = OnlineRegressionConfig {
            forgetting_exponent: 0.5,
            ..OnlineRegressionConfig::default()
        };
        let t = OnlineRegression::new(2, 1, Prior::Uniform, config).unwrap();
        let expected = 1.0 / 10f64.sqrt();
        assert!((t.current_learning_rate() - expected).abs() < 1e-12);
    }

    #[test]
    fn test_train_touches_only_non_zero_features() {
        let mut t = trainer(3);
        t.train(1, None, 2.0, array![1.0, 0.0, 0.5].view()).unwrap();
        assert!(t.beta()[(0, 0)] > 0.0);
        assert_eq!(t.beta()[(0, 1)], 0.0);
        assert!(t.beta()[(0, 2)] > 0.0);
        assert_eq!(t.update_counts().to_vec(), vec![21.0, 20.0, 21.0]);
        assert_eq!(t.update_steps().to_vec(), vec![0.0, 0.0, 0.0]);
        assert_eq!(t.step(), 1);
    }

    #[test]
    fn test_learns_linear_target() {
        let mut t = trainer(2);
        let examples = [array![1.0, 0.0], array![0.0, 1.0], array![1.0, 1.0]];
        for k in 0..3000 {
            let x = &examples[k % examples.len()];
            let target = 2.0 * x[0] - 1.0 * x[1];
            t.train(k as u64, Some("g"), target, x.view()).unwrap();
        }
        assert!((t.beta()[(0, 0)] - 2.0).abs() < 0.1, "beta {:?}", t.beta());
        assert!((t.beta()[(0, 1)] + 1.0).abs() < 0.1, "beta {:?}", t.beta());
    }

    #[test]
    fn test_l1_prior_shrinks_skipped_features() {
        let config = OnlineRegressionConfig {
            lambda: 0.5,
            ..OnlineRegressionConfig::default()
        };
        let mut t = OnlineRegression::new(2, 2, Prior::L1, config).unwrap();
        t.set_beta(array![[1.0, 1.0]]).unwrap();
        for k in 0..10 {
            t.train(k, None, 1.0, array![1.0, 0.0].view()).unwrap();
        }
        let before = t.beta()[(0, 1)];
        assert_eq!(before, 1.0);
        t.close();
        assert!(t.beta()[(0, 1)] < before);
    }

    #[test]
    fn test_merge_blends() {
        let mut a = trainer(2);
        let mut b = trainer(2);
        a.set_beta(array![[0.0, 4.0]]).unwrap();
        b.set_beta(array![[2.0, 0.0]]).unwrap();
        a.merge(&b, 2).unwrap();
        assert_eq!(a.beta(), &array![[1.0, 2.0]]);
        assert!(a.merge(&b, 0).is_err());
        assert!(a.merge(&trainer(3), 1).is_err());
    }

    #[test]
    fn test_wrong_instance_length() {
        let mut t = trainer(2);
        assert!(matches!(
            t.train(0, None, 1.0, array![1.0].view()),
            Err(Error::InvalidArgument(_))
        ));
    }
}
