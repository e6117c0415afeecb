pub mod config;
pub mod error;
pub mod factors;
pub mod ratings;
