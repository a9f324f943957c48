//! Environment variable utilities
//!
//! Generic `env_get<T>` function for parsing environment variables with defaults.
//! Used by [`ServerConfig::from_env`](crate::config::ServerConfig::from_env)
//! and by the demo binary for its own knobs.
//!
//! # Usage
//!
//! ```ignore
//! use portico_core::env::{env_get, env_get_bool};
//!
//! let port: u16 = env_get("PORTICO_PORT", 6502);
//! let tls: bool = env_get_bool("PORTICO_TLS", false);
//! ```

use std::str::FromStr;

/// Get environment variable parsed as type T, or return default
///
/// Unset and unparsable values both yield `default`.
#[inline]
pub fn env_get<T>(key: &str, default: T) -> T
where
    T: FromStr,
{
    env_get_opt(key).unwrap_or(default)
}

/// Get environment variable as boolean
///
/// Accepts: "1", "true", "yes", "on" (case-insensitive) as true.
/// Any other value is false; unset returns the default.
#[inline]
pub fn env_get_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(val) => matches!(
            val.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        ),
        Err(_) => default,
    }
}

/// Get environment variable as optional value
#[inline]
pub fn env_get_opt<T>(key: &str) -> Option<T>
where
    T: FromStr,
{
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

/// Get environment variable as string, or return default
#[inline]
pub fn env_get_str(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_get_default() {
        let val: usize = env_get("__PORTICO_UNSET_VAR__", 42);
        assert_eq!(val, 42);
        let val: Option<u16> = env_get_opt("__PORTICO_UNSET_VAR__");
        assert!(val.is_none());
        assert_eq!(env_get_str("__PORTICO_UNSET_VAR__", "*"), "*");
    }

    #[test]
    fn test_env_get_with_set_var() {
        std::env::set_var("__PORTICO_TEST_NUM__", " 8080 ");
        let val: u16 = env_get("__PORTICO_TEST_NUM__", 0);
        assert_eq!(val, 8080);
        std::env::remove_var("__PORTICO_TEST_NUM__");
    }

    #[test]
    fn test_env_get_invalid_parse() {
        std::env::set_var("__PORTICO_TEST_INVALID__", "not_a_port");
        let val: u16 = env_get("__PORTICO_TEST_INVALID__", 99);
        assert_eq!(val, 99);
        std::env::remove_var("__PORTICO_TEST_INVALID__");
    }

    #[test]
    fn test_env_get_bool_variants() {
        for truthy in ["1", "true", "TRUE", "yes", "on"] {
            std::env::set_var("__PORTICO_TEST_BOOL__", truthy);
            assert!(env_get_bool("__PORTICO_TEST_BOOL__", false), "{truthy}");
        }
        for falsy in ["0", "false", "off", "garbage"] {
            std::env::set_var("__PORTICO_TEST_BOOL__", falsy);
            assert!(!env_get_bool("__PORTICO_TEST_BOOL__", true), "{falsy}");
        }
        std::env::remove_var("__PORTICO_TEST_BOOL__");
        assert!(env_get_bool("__PORTICO_TEST_BOOL__", true));
    }
}
