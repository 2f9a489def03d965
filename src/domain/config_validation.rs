//! Configuration validation.
//!
//! Validates every config field before a run starts.

use crate::domain::error::StratsimError;
use crate::ports::config_port::ConfigPort;

pub fn validate_strategy_config(config: &dyn ConfigPort) -> Result<(), StratsimError> {
    validate_starting_equity(config)?;
    validate_non_negative_int(config, "strategy", "trade_lag")?;
    validate_periods_per_year(config)?;
    Ok(())
}

pub fn validate_data_config(config: &dyn ConfigPort) -> Result<(), StratsimError> {
    let start = config.get_date("data", "start_date")?;
    let end = config.get_date("data", "end_date")?;
    if let (Some(start), Some(end)) = (start, end) {
        if start > end {
            return Err(invalid("data", "start_date", "start_date must not be after end_date"));
        }
    }
    Ok(())
}

pub fn validate_preset_config(config: &dyn ConfigPort) -> Result<(), StratsimError> {
    let fast = validate_positive_int(config, "fast_period", 10)?;
    let slow = validate_positive_int(config, "slow_period", 30)?;
    if slow <= fast {
        return Err(invalid(
            "preset",
            "slow_period",
            "slow_period must be greater than fast_period",
        ));
    }
    if config.get_double("preset", "order_size", 100.0) <= 0.0 {
        return Err(invalid("preset", "order_size", "order_size must be positive"));
    }
    for key in ["commission_per_trade", "commission_pct"] {
        if config.get_double("preset", key, 0.0) < 0.0 {
            return Err(invalid("preset", key, &format!("{key} must be non-negative")));
        }
    }
    Ok(())
}

/// All sections at once, in the order they are read.
pub fn validate_config(config: &dyn ConfigPort) -> Result<(), StratsimError> {
    validate_strategy_config(config)?;
    validate_data_config(config)?;
    validate_preset_config(config)
}

fn invalid(section: &str, key: &str, reason: &str) -> StratsimError {
    StratsimError::ConfigInvalid {
        section: section.to_string(),
        key: key.to_string(),
        reason: reason.to_string(),
    }
}

fn validate_starting_equity(config: &dyn ConfigPort) -> Result<(), StratsimError> {
    if config.get_string("strategy", "starting_equity").is_none() {
        return Err(StratsimError::ConfigMissing {
            section: "strategy".to_string(),
            key: "starting_equity".to_string(),
        });
    }
    let value = config.get_double("strategy", "starting_equity", 0.0);
    if !(value > 0.0) {
        return Err(invalid(
            "strategy",
            "starting_equity",
            "starting_equity must be positive",
        ));
    }
    Ok(())
}

fn validate_periods_per_year(config: &dyn ConfigPort) -> Result<(), StratsimError> {
    let value = config.get_double("strategy", "periods_per_year", 0.0);
    if value < 0.0 || !value.is_finite() {
        return Err(invalid(
            "strategy",
            "periods_per_year",
            "periods_per_year must be 0 (infer) or positive",
        ));
    }
    Ok(())
}

fn validate_non_negative_int(
    config: &dyn ConfigPort,
    section: &str,
    key: &str,
) -> Result<i64, StratsimError> {
    let value = config.get_int(section, key, 0);
    if value < 0 {
        return Err(invalid(section, key, &format!("{key} must be non-negative")));
    }
    Ok(value)
}

fn validate_positive_int(config: &dyn ConfigPort, key: &str, default: i64) -> Result<i64, StratsimError> {
    let value = config.get_int("preset", key, default);
    if value <= 0 {
        return Err(invalid("preset", key, &format!("{key} must be positive")));
    }
    Ok(value)
}
