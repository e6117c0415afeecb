use serde::{Deserialize, Serialize};

/// Prior distribution over coefficients, applied lazily as a shrinkage
/// toward zero for the steps a coefficient was not touched.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Prior {
    /// No shrinkage.
    Uniform,
    /// Laplacian prior: constant pull toward zero, clamped at zero.
    L1,
    /// Gaussian prior: multiplicative decay.
    L2 { scale: f64 },
    /// Gaussian decay followed by an L1 pull.
    ElasticBand { alpha_by_lambda: f64 },
}

impl Default for Prior {
    fn default() -> Self {
        Prior::L1
    }
}

impl Prior {
    /// The value of `old` after `generations` missed regularization steps at
    /// `learning_rate`.
    pub fn age(&self, old: f64, generations: f64, learning_rate: f64) -> f64 {
        match *self {
            Prior::Uniform => old,
            Prior::L1 => pull_toward_zero(old, generations, learning_rate),
            Prior::L2 { .. } => old * (1.0 - learning_rate).powf(generations),
            Prior::ElasticBand { alpha_by_lambda } => {
                let decayed = old * (1.0 - alpha_by_lambda * learning_rate).powf(generations);
                pull_toward_zero(decayed, generations, learning_rate)
            }
        }
    }
}

fn pull_toward_zero(old: f64, generations: f64, learning_rate: f64) -> f64 {
    let new = old - old.signum() * learning_rate * generations;
    if new * old < 0.0 {
        0.0
    } else {
        new
    }
}
