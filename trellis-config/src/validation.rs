// Configuration validation

use crate::{ConfigError, Result};

/// Trait for validating configuration
pub trait Validate {
    fn validate(&self) -> Result<()>;
}

/// Configuration validator with rules
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate that a value is not empty
    pub fn not_empty(value: &str, field: &str) -> Result<()> {
        if value.trim().is_empty() {
            return Err(ConfigError::ValidationError(format!(
                "{} cannot be empty",
                field
            )));
        }
        Ok(())
    }

    /// Validate that a number is within range
    pub fn in_range<T: PartialOrd + std::fmt::Display>(
        value: T,
        min: T,
        max: T,
        field: &str,
    ) -> Result<()> {
        if value < min || value > max {
            return Err(ConfigError::ValidationError(format!(
                "{} must be between {} and {}",
                field, min, max
            )));
        }
        Ok(())
    }

    /// Validate that a value is one of `allowed`, ignoring case
    pub fn one_of(value: &str, allowed: &[&str], field: &str) -> Result<()> {
        if !allowed.iter().any(|a| a.eq_ignore_ascii_case(value.trim())) {
            return Err(ConfigError::ValidationError(format!(
                "{} must be one of {}, got `{}`",
                field,
                allowed.join(", "),
                value
            )));
        }
        Ok(())
    }

    /// Validate that a path-like setting starts and ends with '/'
    pub fn is_dir_path(value: &str, field: &str) -> Result<()> {
        if !value.starts_with('/') || !value.ends_with('/') {
            return Err(ConfigError::ValidationError(format!(
                "{} must start and end with '/': {}",
                field, value
            )));
        }
        Ok(())
    }
}
