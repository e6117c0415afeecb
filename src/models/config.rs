use crate::models::error::{Error, Result};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use std::str::FromStr;

pub const DEFAULT_FEATURES: usize = 30;
/// Confidence scale applied to ratings.
pub const DEFAULT_ALPHA: f64 = 1.0;
/// Regularization factor; multiplied by alpha when applied.
pub const DEFAULT_LAMBDA: f64 = 0.1;
pub const DEFAULT_CONVERGENCE_THRESHOLD: f64 = 0.001;
pub const DEFAULT_MAX_ITERATIONS: usize = 30;

/// Hyperparameters and switches for one ALS run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlsConfig {
    /// Number of latent features, must be positive.
    pub features: usize,
    pub alpha: f64,
    pub lambda: f64,
    /// Iteration stops once the weighted mean change of sampled estimates
    /// falls below this value. Must lie in (0, 1).
    pub convergence_threshold: f64,
    /// Caps the number of iterations. Zero means no cap.
    pub max_iterations: usize,
    /// Worker threads; `None` uses one per available core.
    pub threads: Option<usize>,
    /// Reconstruct R itself rather than the preference matrix P = R > 0.
    pub reconstruct_r_matrix: bool,
    /// Leave entries that are absent from the input out of the loss.
    pub loss_ignores_unspecified: bool,
    /// When false, X is solved once from the initial Y and the run stops.
    pub iterate: bool,
    /// Fixed seed for reproducible runs.
    pub seed: Option<u64>,
}

impl Default for AlsConfig {
    fn default() -> Self {
        AlsConfig {
            features: DEFAULT_FEATURES,
            alpha: DEFAULT_ALPHA,
            lambda: DEFAULT_LAMBDA,
            convergence_threshold: DEFAULT_CONVERGENCE_THRESHOLD,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            threads: None,
            reconstruct_r_matrix: false,
            loss_ignores_unspecified: false,
            iterate: true,
            seed: None,
        }
    }
}

impl AlsConfig {
    /// Reads overrides from the process environment, loading `.env` first.
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds a config from defaults plus whatever `lookup` returns for the
    /// `ALS_*` keys.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = AlsConfig::default();
        if let Some(features) = parse_var(&lookup, "ALS_FEATURES")? {
            config.features = features;
        }
        if let Some(alpha) = parse_var(&lookup, "ALS_ALPHA")? {
            config.alpha = alpha;
        }
        if let Some(lambda) = parse_var(&lookup, "ALS_LAMBDA")? {
            config.lambda = lambda;
        }
        if let Some(threshold) = parse_var(&lookup, "ALS_CONVERGENCE_THRESHOLD")? {
            config.convergence_threshold = threshold;
        }
        if let Some(max_iterations) = parse_var(&lookup, "ALS_MAX_ITERATIONS")? {
            config.max_iterations = max_iterations;
        }
        if let Some(threads) = parse_var(&lookup, "ALS_THREADS")? {
            config.threads = Some(threads);
        }
        if let Some(reconstruct) = parse_var(&lookup, "ALS_RECONSTRUCT_R_MATRIX")? {
            config.reconstruct_r_matrix = reconstruct;
        }
        if let Some(ignores) = parse_var(&lookup, "ALS_LOSS_IGNORES_UNSPECIFIED")? {
            config.loss_ignores_unspecified = ignores;
        }
        if let Some(iterate) = parse_var(&lookup, "ALS_ITERATE")? {
            config.iterate = iterate;
        }
        if let Some(seed) = parse_var(&lookup, "ALS_SEED")? {
            config.seed = Some(seed);
        }
        Ok(config)
    }

    /// Loads hyperparameters saved by [`save_json`](Self::save_json).
    pub fn load_json<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        let config: AlsConfig = serde_json::from_reader(BufReader::new(file))?;
        config.validate()?;
        Ok(config)
    }

    pub fn save_json<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(&mut writer, self)?;
        writer.flush()?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.features == 0 {
            return Err(Error::invalid_argument(format!(
                "features must be positive: {}",
                self.features
            )));
        }
        if !(self.convergence_threshold > 0.0 && self.convergence_threshold < 1.0) {
            return Err(Error::invalid_argument(format!(
                "threshold must be in (0,1): {}",
                self.convergence_threshold
            )));
        }
        if self.threads == Some(0) {
            return Err(Error::invalid_argument("threads must be positive: 0"));
        }
        Ok(())
    }
}

fn parse_var<F, T>(lookup: &F, key: &str) -> Result<Option<T>>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| Error::invalid_argument(format!("{} = '{}': {}", key, raw, e))),
        None => Ok(None),
    }
}

/// Annealing and regularization settings for the online trainer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OnlineRegressionConfig {
    pub learning_rate: f64,
    /// Exponential decay rate of the learning rate, applied as `decay_factor^step`.
    pub decay_factor: f64,
    pub lambda: f64,
    pub step_offset: i32,
    /// Exponent of the `(step + step_offset)^x` annealing term. Positive
    /// values are negated.
    pub forgetting_exponent: f64,
    pub per_term_annealing_offset: i32,
}

impl Default for OnlineRegressionConfig {
    fn default() -> Self {
        OnlineRegressionConfig {
            learning_rate: 1.0,
            decay_factor: 1.0 - 1.0e-3,
            lambda: 1.0e-5,
            step_offset: 10,
            forgetting_exponent: -0.5,
            per_term_annealing_offset: 20,
        }
    }
}

/// Shape and optional starting parameters of a batch logistic regression.
#[derive(Debug, Clone)]
pub struct LogisticRegressionConfig {
    pub inputs: usize,
    pub outputs: usize,
    pub initial_weights: Option<Array2<f64>>,
    pub initial_bias: Option<Array1<f64>>,
    pub l2: f64,
    pub use_regularization: bool,
}

impl LogisticRegressionConfig {
    pub fn new(inputs: usize, outputs: usize) -> Self {
        LogisticRegressionConfig {
            inputs,
            outputs,
            initial_weights: None,
            initial_bias: None,
            l2: 0.01,
            use_regularization: true,
        }
    }
}
