pub mod als;
pub mod convergence;
pub mod gram;
pub mod logistic;
pub mod memory;
pub mod online_regression;
pub mod prior;
pub mod reshape;
pub mod solver;
pub mod vector_math;
