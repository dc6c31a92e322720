use std::str::FromStr;

use crate::error::ConfigError;

/// Read an environment variable, treating unset and empty as `None`.
pub(crate) fn optional_env(key: &str) -> Result<Option<String>, ConfigError> {
    match std::env::var(key) {
        Ok(value) if value.trim().is_empty() => Ok(None),
        Ok(value) => Ok(Some(value)),
        Err(std::env::VarError::NotPresent) => Ok(None),
        Err(std::env::VarError::NotUnicode(_)) => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: "not valid unicode".to_string(),
        }),
    }
}

/// Parse an optional environment variable, falling back to `default`.
pub(crate) fn parse_optional_env<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    optional_env(key)?
        .map(|s| {
            s.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
                key: key.to_string(),
                message: e.to_string(),
            })
        })
        .transpose()
        .map(|v| v.unwrap_or(default))
}

#[cfg(test)]
mod tests {
    use super::*;

    // Each test owns a distinct variable so they can run in parallel.

    #[test]
    fn test_optional_env_unset_is_none() {
        assert_eq!(
            optional_env("EPHEMERAL_PG_TEST_HELPERS_UNSET").unwrap(),
            None
        );
    }

    #[test]
    fn test_optional_env_empty_is_none() {
        // SAFETY: variable is unique to this test.
        unsafe { std::env::set_var("EPHEMERAL_PG_TEST_HELPERS_EMPTY", "  ") };
        assert_eq!(
            optional_env("EPHEMERAL_PG_TEST_HELPERS_EMPTY").unwrap(),
            None
        );
    }

    #[test]
    fn test_parse_optional_env_default_and_value() {
        assert_eq!(
            parse_optional_env("EPHEMERAL_PG_TEST_HELPERS_MISSING", 7u64).unwrap(),
            7
        );

        // SAFETY: variable is unique to this test.
        unsafe { std::env::set_var("EPHEMERAL_PG_TEST_HELPERS_NUM", "42") };
        assert_eq!(
            parse_optional_env("EPHEMERAL_PG_TEST_HELPERS_NUM", 7u64).unwrap(),
            42
        );
    }

    #[test]
    fn test_parse_optional_env_invalid() {
        // SAFETY: variable is unique to this test.
        unsafe { std::env::set_var("EPHEMERAL_PG_TEST_HELPERS_BAD", "soon") };
        let err = parse_optional_env("EPHEMERAL_PG_TEST_HELPERS_BAD", 7u64).unwrap_err();
        assert!(err.to_string().contains("EPHEMERAL_PG_TEST_HELPERS_BAD"));
    }
}
