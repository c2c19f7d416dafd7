//! Secret reference resolution for configuration values.
//!
//! - `env::VAR_NAME` reads `$VAR_NAME` from the environment
//! - anything else is returned as-is (plain text)

/// Resolves a value that may contain a secret reference prefix.
pub fn resolve(value: &str) -> Result<String, String> {
    match value.strip_prefix("env::") {
        Some(var) => {
            std::env::var(var).map_err(|_| format!("environment variable `{}` is not set", var))
        }
        None => Ok(value.to_string()),
    }
}
