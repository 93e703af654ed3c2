//! Helpers for layered configuration.
//!
//! Settings are resolved from several sources, each overriding the ones before it: built-in
//! defaults, a JSON configuration file, command-line flags, and finally environment variables.
//! Sources that do not mention a setting leave it untouched, and an empty value counts as not
//! mentioning it.
use std::{
    fmt::Display,
    fs, io,
    path::{Path, PathBuf},
    str::FromStr,
};

use serde::de::DeserializeOwned;
use thiserror::Error;

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The command line could not be parsed, or help was requested.
    #[error("{0}")]
    Usage(String),

    /// The configuration file could not be read.
    #[error("failed to read config file '{}': {source}", path.display())]
    Read {
        /// Path of the configuration file.
        path: PathBuf,

        /// The underlying error.
        #[source]
        source: io::Error,
    },

    /// The configuration file is not valid.
    #[error("failed to parse config file '{}': {source}", path.display())]
    Parse {
        /// Path of the configuration file.
        path: PathBuf,

        /// The underlying error.
        #[source]
        source: serde_json::Error,
    },

    /// A setting has an invalid value.
    #[error("invalid value '{value}' for {name}: {reason}")]
    Invalid {
        /// Name of the flag or variable.
        name: String,

        /// The offending value.
        value: String,

        /// Why the value was rejected.
        reason: String,
    },
}

/// Reads a JSON configuration file.
///
/// # Errors
///
/// Fails if the file cannot be read or does not hold a valid configuration.
pub fn read_file<T: DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let data =
        fs::read(path).map_err(|source| ConfigError::Read { path: path.to_owned(), source })?;
    serde_json::from_slice(&data)
        .map_err(|source| ConfigError::Parse { path: path.to_owned(), source })
}

/// Overrides `slot` with `raw` parsed as `T`, if `raw` is set and non-empty.
///
/// # Errors
///
/// Fails if `raw` does not parse as `T`.
pub fn apply<T>(slot: &mut T, name: &str, raw: Option<String>) -> Result<(), ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    apply_with(slot, name, raw, |value| value.parse::<T>().map_err(|e| e.to_string()))
}

/// Overrides a boolean `slot` with `raw`, if `raw` is set and non-empty.
///
/// Accepts `true`, `false`, `1` and `0`, in any case.
///
/// # Errors
///
/// Fails if `raw` is not a boolean.
pub fn apply_bool(slot: &mut bool, name: &str, raw: Option<String>) -> Result<(), ConfigError> {
    apply_with(slot, name, raw, |value| match value.to_ascii_lowercase().as_str() {
        "true" | "1" => Ok(true),
        "false" | "0" => Ok(false),
        _ => Err("expected a boolean".to_owned()),
    })
}

/// Overrides an optional path `slot` with `raw`, if `raw` is set and non-empty.
pub fn apply_path(slot: &mut Option<PathBuf>, raw: Option<String>) {
    if let Some(raw) = raw.as_deref().map(str::trim).filter(|raw| !raw.is_empty()) {
        *slot = Some(PathBuf::from(raw));
    }
}

fn apply_with<T, F>(
    slot: &mut T,
    name: &str,
    raw: Option<String>,
    parse: F,
) -> Result<(), ConfigError>
where
    F: FnOnce(&str) -> Result<T, String>,
{
    let Some(raw) = raw.filter(|raw| !raw.is_empty()) else {
        return Ok(());
    };
    *slot = parse(raw.trim()).map_err(|reason| ConfigError::Invalid {
        name: name.to_owned(),
        value: raw.clone(),
        reason,
    })?;
    Ok(())
}
