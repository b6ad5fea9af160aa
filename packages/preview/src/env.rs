// ABOUTME: Environment variable parsing utilities
// ABOUTME: Validated numeric overrides and optional string settings for provisioning

use std::str::FromStr;
use tracing;

/// Parse an environment variable with validation
/// Returns the parsed value if it passes validation, otherwise returns the default
/// Logs warnings when environment variables are set but fail validation or parsing
pub fn parse_env_or_default_with_validation<T, F>(var_name: &str, default: T, validator: F) -> T
where
    T: FromStr + Copy + std::fmt::Display,
    F: Fn(T) -> bool,
{
    match std::env::var(var_name) {
        Ok(raw_value) => match raw_value.parse::<T>() {
            Ok(parsed_value) if validator(parsed_value) => parsed_value,
            Ok(_) => {
                tracing::warn!(
                    "Environment variable {} has invalid value '{}', using default: {}",
                    var_name,
                    raw_value,
                    default
                );
                default
            }
            Err(_) => {
                tracing::warn!(
                    "Environment variable {} has unparseable value '{}', using default: {}",
                    var_name,
                    raw_value,
                    default
                );
                default
            }
        },
        // Not set is the normal case
        Err(_) => default,
    }
}

/// Read an optional string variable, treating blank values as unset
pub fn parse_env_optional(var_name: &str) -> Option<String> {
    std::env::var(var_name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
