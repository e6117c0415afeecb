use crate::models::config::LogisticRegressionConfig;
use crate::models::error::{Error, Result};
use ndarray::{Array1, Array2, ArrayView2, Axis, Zip};

const PROBABILITY_FLOOR: f64 = 1.0e-12;

/// Weight and bias updates from one batch, already scaled by the learning
/// rate.
#[derive(Debug, Clone, PartialEq)]
pub struct LogisticRegressionGradient {
    pub w_gradient: Array2<f64>,
    pub b_gradient: Array1<f64>,
}

/// Batch logistic regression with `inputs` features and `outputs` labels.
#[derive(Debug, Clone, PartialEq)]
pub struct LogisticRegression {
    n_in: usize,
    n_out: usize,
    /// `n_in x n_out`
    w: Array2<f64>,
    b: Array1<f64>,
    l2: f64,
    use_regularization: bool,
}

impl LogisticRegression {
    pub fn new(config: LogisticRegressionConfig) -> Result<Self> {
        if config.inputs == 0 || config.outputs == 0 {
            return Err(Error::invalid_argument(format!(
                "inputs and outputs must be positive: {} x {}",
                config.inputs, config.outputs
            )));
        }
        let w = match config.initial_weights {
            Some(w) if w.dim() != (config.inputs, config.outputs) => {
                return Err(Error::invalid_argument(format!(
                    "initial weights have shape {:?}, expected {:?}",
                    w.dim(),
                    (config.inputs, config.outputs)
                )))
            }
            Some(w) => w,
            None => Array2::zeros((config.inputs, config.outputs)),
        };
        let b = match config.initial_bias {
            Some(b) if b.len() != config.outputs => {
                return Err(Error::invalid_argument(format!(
                    "initial bias has length {}, expected {}",
                    b.len(),
                    config.outputs
                )))
            }
            Some(b) => b,
            None => Array1::zeros(config.outputs),
        };
        Ok(LogisticRegression {
            n_in: config.inputs,
            n_out: config.outputs,
            w,
            b,
            l2: config.l2,
            use_regularization: config.use_regularization,
        })
    }

    pub fn weights(&self) -> &Array2<f64> {
        &self.w
    }

    pub fn bias(&self) -> &Array1<f64> {
        &self.b
    }

    pub fn inputs(&self) -> usize {
        self.n_in
    }

    pub fn outputs(&self) -> usize {
        self.n_out
    }

    /// One gradient step on the batch `x` (one example per row) with 0/1
    /// labels `y`.
    pub fn train(&mut self, x: ArrayView2<f64>, y: ArrayView2<f64>, learning_rate: f64) -> Result<()> {
        let gradient = self.gradient(x, y, learning_rate)?;
        self.w += &gradient.w_gradient;
        self.b += &gradient.b_gradient;
        Ok(())
    }

    /// With regularization on, the label error is averaged over the batch
    /// and the weights decay by `l2`.
    pub fn gradient(
        &self,
        x: ArrayView2<f64>,
        y: ArrayView2<f64>,
        learning_rate: f64,
    ) -> Result<LogisticRegressionGradient> {
        self.check_batch(x, y)?;
        let p_y_given_x = self.linear(x).mapv(sigmoid);
        let mut dy = &y - &p_y_given_x;
        if self.use_regularization {
            dy /= x.nrows() as f64;
        }
        let mut w_gradient = x.t().dot(&dy);
        if self.use_regularization {
            w_gradient.scaled_add(-self.l2, &self.w);
        }
        w_gradient *= learning_rate;
        let b_gradient = dy.sum_axis(Axis(0)) * learning_rate;
        Ok(LogisticRegressionGradient {
            w_gradient,
            b_gradient,
        })
    }

    /// Per-row probability distribution over the outputs.
    pub fn predict(&self, x: ArrayView2<f64>) -> Result<Array2<f64>> {
        self.check_inputs(x)?;
        Ok(softmax(self.linear(x)))
    }

    /// Mean over outputs of the column-summed cross entropy, plus
    /// `l2 / 2 · ΣW²` when regularization is on.
    pub fn negative_log_likelihood(&self, x: ArrayView2<f64>, y: ArrayView2<f64>) -> Result<f64> {
        self.check_batch(x, y)?;
        let activation = softmax(self.linear(x));
        let mut cross_entropy = Array2::<f64>::zeros(activation.dim());
        Zip::from(&mut cross_entropy)
            .and(&y)
            .and(&activation)
            .for_each(|c, &label, &p| {
                let p = p.clamp(PROBABILITY_FLOOR, 1.0 - PROBABILITY_FLOOR);
                *c = label * p.ln() + (1.0 - label) * (1.0 - p).ln();
            });
        let nll = -cross_entropy.sum_axis(Axis(0)).mean().unwrap_or(0.0);
        if self.use_regularization {
            Ok(nll + self.l2 / 2.0 * self.w.mapv(|v| v * v).sum())
        } else {
            Ok(nll)
        }
    }

    /// Moves weights and bias `1 / batch_size` of the way toward `other`.
    pub fn merge(&mut self, other: &LogisticRegression, batch_size: usize) -> Result<()> {
        if batch_size == 0 {
            return Err(Error::invalid_argument("batch size must be positive"));
        }
        if other.w.dim() != self.w.dim() {
            return Err(Error::invalid_argument(format!(
                "cannot merge weights of shape {:?} into {:?}",
                other.w.dim(),
                self.w.dim()
            )));
        }
        let scale = batch_size as f64;
        Zip::from(&mut self.w)
            .and(&other.w)
            .for_each(|w, &o| *w += (o - *w) / scale);
        Zip::from(&mut self.b)
            .and(&other.b)
            .for_each(|b, &o| *b += (o - *b) / scale);
        Ok(())
    }

    fn linear(&self, x: ArrayView2<f64>) -> Array2<f64> {
        x.dot(&self.w) + &self.b
    }

    fn check_inputs(&self, x: ArrayView2<f64>) -> Result<()> {
        if x.ncols() != self.n_in {
            return Err(Error::invalid_argument(format!(
                "input has {} columns, expected {}",
                x.ncols(),
                self.n_in
            )));
        }
        Ok(())
    }

    fn check_batch(&self, x: ArrayView2<f64>, y: ArrayView2<f64>) -> Result<()> {
        self.check_inputs(x)?;
        if x.nrows() != y.nrows() {
            return Err(Error::invalid_argument(format!(
                "{} input rows but {} label rows",
                x.nrows(),
                y.nrows()
            )));
        }
        if y.ncols() != self.n_out {
            return Err(Error::invalid_argument(format!(
                "labels have {} columns, expected {}",
                y.ncols(),
                self.n_out
            )));
        }
        if y.iter().any(|&v| v != 0.0 && v != 1.0) {
            return Err(Error::invalid_argument("labels must be 0 or 1"));
        }
        Ok(())
    }
}

fn sigmoid(v: f64) -> f64 {
    1.0 / (1.0 + (-v).exp())
}

fn softmax(mut m: Array2<f64>) -> Array2<f64> {
    for mut row in m.rows_mut() {
        let max = row.fold(f64::NEG_INFINITY, |a, &b| a.max(b));
        row.mapv_inplace(|v| (v - max).exp());
        let sum = row.sum();
        row /= sum;
    }
    m
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn data() -> (Array2<f64>, Array2<f64>) {
        let x = array![
            [1.0, 1.0, 0.0, 0.0],
            [1.0, 0.8, 0.1, 0.0],
            [0.9, 1.0, 0.0, 0.2],
            [0.0, 0.1, 1.0, 1.0],
            [0.0, 0.0, 0.9, 1.0],
            [0.2, 0.0, 1.0, 0.8]
        ];
        let y = array![
            [1.0, 0.0],
            [1.0, 0.0],
            [1.0, 0.0],
            [0.0, 1.0],
            [0.0, 1.0],
            [0.0, 1.0]
        ];
        (x, y)
    }

    #[test]
    fn test_training_separates_classes() {
        let (x, y) = data();
        let mut model = LogisticRegression::new(LogisticRegressionConfig::new(4, 2)).unwrap();
        let before = model.negative_log_likelihood(x.view(), y.view()).unwrap();
        for _ in 0..500 {
            model.train(x.view(), y.view(), 0.5).unwrap();
        }
        let after = model.negative_log_likelihood(x.view(), y.view()).unwrap();
        assert!(after < before);

        let predictions = model.predict(x.view()).unwrap();
        for (row, labels) in predictions.rows().into_iter().zip(y.rows()) {
            assert!((row.sum() - 1.0).abs() < 1e-9);
            let predicted = if row[0] > row[1] { 0 } else { 1 };
            let actual = if labels[0] == 1.0 { 0 } else { 1 };
            assert_eq!(predicted, actual);
        }
    }

    #[test]
    fn test_initial_parameters_are_checked() {
        let mut config = LogisticRegressionConfig::new(2, 2);
        config.initial_weights = Some(Array2::ones((3, 2)));
        assert!(LogisticRegression::new(config).is_err());

        let mut config = LogisticRegressionConfig::new(2, 2);
        config.initial_weights = Some(Array2::ones((2, 2)));
        config.initial_bias = Some(array![0.5, -0.5]);
        let model = LogisticRegression::new(config).unwrap();
        assert_eq!(model.weights(), &Array2::<f64>::ones((2, 2)));
        assert_eq!(model.bias(), &array![0.5, -0.5]);
    }

    #[test]
    fn test_invalid_labels_rejected() {
        let (x, _) = data();
        let model = LogisticRegression::new(LogisticRegressionConfig::new(4, 2)).unwrap();
        let bad = Array2::from_elem((6, 2), 0.5);
        assert!(matches!(
            model.gradient(x.view(), bad.view(), 0.1),
            Err(Error::InvalidArgument(_))
        ));
        let short = Array2::<f64>::zeros((5, 2));
        assert!(model.gradient(x.view(), short.view(), 0.1).is_err());
    }

    #[test]
    fn test_merge_blends_weights_and_bias() {
        let mut a = LogisticRegression::new(LogisticRegressionConfig::new(1, 2)).unwrap();
        let mut config = LogisticRegressionConfig::new(1, 2);
        config.initial_weights = Some(array![[4.0, -4.0]]);
        config.initial_bias = Some(array![2.0, 2.0]);
        let b = LogisticRegression::new(config).unwrap();
        a.merge(&b, 4).unwrap();
        assert_eq!(a.weights(), &array![[1.0, -1.0]]);
        assert_eq!(a.bias(), &array![0.5, 0.5]);
    }
}
