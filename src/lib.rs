//! Training primitives for recommendation and regression: implicit-feedback
//! alternating least squares, batch logistic regression and an online
//! regression trainer whose instances can be merged.

pub mod models;
pub mod services;

pub use models::config::{AlsConfig, LogisticRegressionConfig, OnlineRegressionConfig};
pub use models::error::{Error, Result};
pub use models::factors::FactorMatrix;
pub use models::ratings::{RatingEntry, SparseRatingMatrix};
pub use services::als::{AlsOutcome, AlsState, ALS};
pub use services::logistic::LogisticRegression;
pub use services::memory::{MemoryProbe, MemoryUsage};
pub use services::online_regression::OnlineRegression;
pub use services::prior::Prior;
pub use services::reshape::VectorTransform;
