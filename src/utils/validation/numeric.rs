//! Numeric validation utilities
//!
//! Provides safe numeric conversions and range validation for request
//! parameters, configuration values and scaling arithmetic.

use crate::error::{BgRemovalError, Result};

/// Validator for numeric operations and conversions
pub struct NumericValidator;

impl NumericValidator {
    /// Safely convert f32 to u32 with bounds checking
    pub fn validate_f32_to_u32(value: f32) -> Result<u32> {
        if !value.is_finite() {
            return Err(BgRemovalError::internal(format!(
                "Cannot convert non-finite value {} to u32",
                value
            )));
        }

        if value < 0.0 {
            return Err(BgRemovalError::internal(format!(
                "Cannot convert negative value {} to u32",
                value
            )));
        }

        if value > u32::MAX as f32 {
            return Err(BgRemovalError::internal(format!(
                "Value {} exceeds u32::MAX ({})",
                value,
                u32::MAX
            )));
        }

        Ok(value as u32)
    }

    /// Validate a ratio value (0.0 to 1.0)
    pub fn validate_ratio(value: f32, name: &str) -> Result<f32> {
        if !value.is_finite() || !(0.0..=1.0).contains(&value) {
            return Err(BgRemovalError::config_value_error(name, value, "0.0-1.0", None));
        }
        Ok(value)
    }

    /// Validate thread count
    pub fn validate_thread_count(value: usize) -> Result<usize> {
        const MAX_THREADS: usize = 256;

        if value > MAX_THREADS {
            return Err(BgRemovalError::invalid_config(format!(
                "Thread count {} exceeds maximum allowed ({})",
                value, MAX_THREADS
            )));
        }

        Ok(value)
    }

    /// Validate a caller-supplied parameter against an inclusive range
    ///
    /// Out-of-range values are reported as validation errors, since they
    /// originate from the request rather than from the service configuration.
    pub fn validate_range<T>(value: T, min: T, max: T, name: &str) -> Result<T>
    where
        T: PartialOrd + std::fmt::Display + Copy,
    {
        if value < min || value > max {
            return Err(BgRemovalError::validation(format!(
                "{} must be between {} and {}, got {}",
                name, min, max, value
            )));
        }
        Ok(value)
    }

    /// Validate that a configuration value is positive
    pub fn validate_positive<T>(value: T, name: &str) -> Result<T>
    where
        T: PartialOrd + std::fmt::Display + Copy + Default,
    {
        if value <= T::default() {
            return Err(BgRemovalError::invalid_config(format!(
                "{} must be positive, got {}",
                name, value
            )));
        }
        Ok(value)
    }

    /// Safely multiply two u32 values checking for overflow
    pub fn safe_multiply_u32(a: u32, b: u32) -> Result<u32> {
        a.checked_mul(b).ok_or_else(|| {
            BgRemovalError::internal(format!("Multiplication overflow: {} * {}", a, b))
        })
    }

    /// Validate normalization parameters (mean and std triples)
    pub fn validate_normalization_params(mean: &[f32], std: &[f32]) -> Result<()> {
        if mean.len() != 3 || std.len() != 3 {
            return Err(BgRemovalError::model(format!(
                "Normalization expects 3 channels, got mean={} std={}",
                mean.len(),
                std.len()
            )));
        }

        for (i, &value) in mean.iter().enumerate() {
            if !value.is_finite() {
                return Err(BgRemovalError::model(format!(
                    "Mean value at index {} is not finite: {}",
                    i, value
                )));
            }
        }

        for (i, &value) in std.iter().enumerate() {
            if !value.is_finite() || value <= 0.0 {
                return Err(BgRemovalError::model(format!(
                    "Std value at index {} must be positive and finite: {}",
                    i, value
                )));
            }
        }

        Ok(())
    }
}
