//! Application configuration loading and validation.
//!
//! The TOML file has three sections: `[logger]`, `[relay]` and
//! `[transport]` (the broker settings from `eventbee_mqtt`). Every field has
//! a default, so an empty file is a valid configuration pointing at a local
//! broker. The configuration is loaded once at startup and never changes.

use std::{
    fmt, fs,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use time::{format_description::well_known::Rfc3339, OffsetDateTime};
use validator::Validate;

use self::{logger::LoggerConfig, relay::RelayConfig};

pub mod logger;
pub mod relay;

pub type TransportConfig = eventbee_mqtt::Config;

pub const CONFIG_ENV: &str = "EVENTBEE_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "/etc/eventbee/config.toml";

/// Severity used by the `print_*` macros.
#[doc(hidden)]
#[derive(Debug, Clone, Copy)]
pub enum PrintLevel {
    Info,
    Warn,
    Error,
}

/// Writes a timestamped line to stdout. Used before the tracing subscriber
/// exists.
#[doc(hidden)]
pub fn print_line(level: PrintLevel, args: fmt::Arguments<'_>) {
    let now = OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_default();
    let level = match level {
        PrintLevel::Info => console::style("INFO").green(),
        PrintLevel::Warn => console::style("WARN").yellow(),
        PrintLevel::Error => console::style("ERROR").red(),
    };
    println!("{}  {} {}", console::style(now).dim(), level, args);
}

#[macro_export]
macro_rules! print_info {
    ($($arg:tt)*) => {
        $crate::config::print_line($crate::config::PrintLevel::Info, format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! print_warn {
    ($($arg:tt)*) => {
        $crate::config::print_line($crate::config::PrintLevel::Warn, format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! print_error {
    ($($arg:tt)*) => {
        $crate::config::print_line($crate::config::PrintLevel::Error, format_args!($($arg)*))
    };
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error while reading configuration: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Parse error while reading configuration: {0}")]
    ParseError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

/// Top-level application configuration.
#[derive(Serialize, Deserialize, Debug, Validate, Clone, Default)]
#[serde(default)]
pub struct Config {
    #[validate(nested)]
    pub logger: LoggerConfig,

    #[validate(nested)]
    pub relay: RelayConfig,

    #[validate(nested)]
    pub transport: TransportConfig,
}

impl Config {
    /// Locates the configuration file and loads it.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if no file is found or it cannot be read,
    /// parsed or validated.
    pub fn new() -> Result<Self, ConfigError> {
        let config_path = Self::get_config_path()?;
        Self::load(&config_path)
    }

    /// `EVENTBEE_CONFIG` if set, otherwise `/etc/eventbee/config.toml`.
    fn get_config_path() -> Result<PathBuf, ConfigError> {
        if let Ok(config_path) = std::env::var(CONFIG_ENV) {
            let path = PathBuf::from(config_path);
            print_info!("Using config from {}: {}", CONFIG_ENV, path.display());
            return Ok(path);
        }

        let fallback = Path::new(DEFAULT_CONFIG_PATH);
        if fallback.exists() {
            print_info!("Using default config path: {}", fallback.display());
            return Ok(fallback.to_path_buf());
        }

        Err(ConfigError::Config(format!(
            "No configuration file found, set {CONFIG_ENV} or create {DEFAULT_CONFIG_PATH}"
        )))
    }

    /// Loads and validates the configuration at `path`.
    pub fn load(path: &Path) -> Result<Config, ConfigError> {
        print_info!("Loading configuration from: {}", path.display());

        if !path.exists() {
            return Err(ConfigError::Config(format!(
                "{} does not exist",
                path.display()
            )));
        }

        let config = Self::parse(&fs::read_to_string(path)?)?;
        print_info!("Successfully loaded config from: {}", path.display());
        Ok(config)
    }

    /// Parses and validates a TOML document.
    pub fn parse(source: &str) -> Result<Config, ConfigError> {
        let config: Config =
            toml::from_str(source).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        config
            .validate()
            .map_err(|e| ConfigError::ValidationError(e.to_string()))?;

        Ok(config)
    }
}
