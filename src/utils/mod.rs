//! Shared helpers used across pipeline stages and backends

pub mod preprocessing;
pub mod validation;

pub use preprocessing::TensorPreprocessor;
pub use validation::NumericValidator;
