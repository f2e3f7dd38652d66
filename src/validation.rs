//! Configuration validation utilities.

use std::time::Duration;

use crate::types::{Error, Result};

/// Validate that a count is positive.
pub fn validate_positive(n: u64, field: &str) -> Result<()> {
    if n == 0 {
        return Err(Error::config(format!("{} must be positive", field)));
    }
    Ok(())
}

/// Validate that a rate is finite and strictly positive.
pub fn validate_rate(rate: f64, field: &str) -> Result<()> {
    if !rate.is_finite() || rate <= 0.0 {
        return Err(Error::config(format!(
            "{} must be a positive finite number, got {}",
            field, rate
        )));
    }
    Ok(())
}

/// Validate that a duration is non-zero.
pub fn validate_non_zero(duration: Duration, field: &str) -> Result<()> {
    if duration.is_zero() {
        return Err(Error::config(format!("{} must be greater than zero", field)));
    }
    Ok(())
}

/// Validate that `value` is one of `allowed` (case-insensitive).
pub fn validate_one_of(value: &str, allowed: &[&str], field: &str) -> Result<()> {
    if allowed.iter().any(|a| a.eq_ignore_ascii_case(value)) {
        return Ok(());
    }
    Err(Error::config(format!(
        "{} must be one of [{}], got {:?}",
        field,
        allowed.join(", "),
        value
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validators_accept_good_values() {
        assert!(validate_positive(1, "max_requests").is_ok());
        assert!(validate_rate(0.5, "refill_rate").is_ok());
        assert!(validate_non_zero(Duration::from_millis(1), "window").is_ok());
        assert!(validate_one_of("WARN", &["info", "warn"], "log_level").is_ok());
    }

    #[test]
    fn test_validators_reject_bad_values_with_field_name() {
        let cases = [
            validate_positive(0, "max_requests"),
            validate_rate(f64::NAN, "refill_rate"),
            validate_rate(0.0, "refill_rate"),
            validate_non_zero(Duration::ZERO, "window"),
            validate_one_of("loud", &["info", "warn"], "log_level"),
        ];
        for result in cases {
            let err = result.unwrap_err();
            assert_eq!(err.code(), "INVALID_CONFIG");
        }
        let err = validate_positive(0, "max_requests").unwrap_err();
        assert!(err.to_string().contains("max_requests"));
    }
}
