use serde::{Deserialize, Serialize};

use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::time::Duration;
use backtrace::Backtrace;
use log::{error, info};
use thiserror::Error;

pub const APP_DIR: &str = "postbox";
const CONFIG_FILE: &str = "config.yaml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot access config {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse config {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid config: {0}")]
    Invalid(String),

    #[error("no per-user config directory on this platform")]
    NoConfigDir,
}

// Main configuration struct
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub imap_host: String,
    pub imap_port: u16,
    pub smtp_host: String,
    pub smtp_port: u16,
    pub email: String,
    /// Key id handed to the signing engine.
    pub gpg_recipient: String,
    pub shortcuts: Shortcuts,
    pub theme: Theme,
    /// Deadline for a single IMAP/SMTP round trip.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// How many of the newest messages a folder listing fetches.
    #[serde(default = "default_fetch_limit")]
    pub fetch_limit: usize,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Shortcuts {
    pub quit: String,
    pub back: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    #[default]
    Monokai,
    Light,
    Plain,
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_fetch_limit() -> usize {
    50
}

impl Default for Config {
    fn default() -> Self {
        Config {
            imap_host: String::new(),
            imap_port: 993,
            smtp_host: String::new(),
            smtp_port: 587,
            email: String::new(),
            gpg_recipient: String::new(),
            shortcuts: Shortcuts {
                quit: "q".to_string(),
                back: "b".to_string(),
            },
            theme: Theme::default(),
            timeout_secs: default_timeout_secs(),
            fetch_limit: default_fetch_limit(),
        }
    }
}

impl Config {
    pub fn round_trip_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Checks the values serde cannot: empty strings, zero ports and
    /// shortcut keys that would clash with numbered menu entries.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut problems = Vec::new();

        for (field, value) in [
            ("imap_host", &self.imap_host),
            ("smtp_host", &self.smtp_host),
            ("email", &self.email),
        ] {
            if value.trim().is_empty() {
                problems.push(format!("{field} must not be empty"));
            }
        }
        if self.imap_port == 0 {
            problems.push("imap_port must not be 0".to_string());
        }
        if self.smtp_port == 0 {
            problems.push("smtp_port must not be 0".to_string());
        }
        if self.timeout_secs == 0 {
            problems.push("timeout_secs must not be 0".to_string());
        }

        for (action, key) in [("quit", &self.shortcuts.quit), ("back", &self.shortcuts.back)] {
            if key.trim().is_empty() {
                problems.push(format!("shortcut for {action} must not be empty"));
            } else if key.chars().all(|c| c.is_ascii_digit()) {
                problems.push(format!("shortcut for {action} must not be a number"));
            }
        }
        if self.shortcuts.quit == self.shortcuts.back {
            problems.push("quit and back shortcuts must differ".to_string());
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(problems.join("; ")))
        }
    }
}

pub fn default_config_path() -> Result<PathBuf, ConfigError> {
    dirs::config_dir()
        .map(|dir| dir.join(APP_DIR).join(CONFIG_FILE))
        .ok_or(ConfigError::NoConfigDir)
}

pub fn load_settings(path: &Path) -> Result<Config, ConfigError> {
    // Open the YAML file
    let file = File::open(path).map_err(|source| {
        log_with_backtrace(&source);
        ConfigError::Io { path: path.to_path_buf(), source }
    })?;

    let reader = BufReader::new(file);

    // Parse the YAML file into the Config struct
    serde_yaml::from_reader(reader).map_err(|source| {
        log_with_backtrace(&source);
        ConfigError::Parse { path: path.to_path_buf(), source }
    })
}

/// Loads the config at `path`, writing and returning the default one when
/// the file does not exist yet. The flag tells whether it was created.
pub fn load_or_create(path: &Path) -> Result<(Config, bool), ConfigError> {
    if path.exists() {
        return load_settings(path).map(|config| (config, false));
    }

    let config = Config::default();
    save_settings(path, &config)?;
    info!("Created default config at {}", path.display());
    Ok((config, true))
}

pub fn save_settings(path: &Path, config: &Config) -> Result<(), ConfigError> {
    let io_error = |source| ConfigError::Io { path: path.to_path_buf(), source };

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(io_error)?;
    }
    let file = File::create(path).map_err(io_error)?;
    serde_yaml::to_writer(BufWriter::new(file), config).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn log_with_backtrace(err: &dyn std::error::Error) {
    error!("Error: {}", err);

    // Capture and print the backtrace
    let backtrace = Backtrace::new();
    error!("Backtrace:\n{:?}", backtrace);
}
