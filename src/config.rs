//! Configuration
//!
//! Read from `config.toml` in the XDG config directory (`~/.config/mailq/config.toml`), or from
//! an explicit path. Every field has a default, so an empty or missing file is fine.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use log::LevelFilter;

/// Configuration for the whole application
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Scheduling policy
    pub actions: ActionsConfig,

    /// Logger setup
    pub log: LogConfig,

    /// Behavior of the simulated backend worker
    pub simulator: SimulatorConfig,
}

impl Config {
    /// Reads the config from the given file
    pub fn load(path: impl AsRef<Path>) -> Result<Config> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("could not read config file {}", path.display()))?;
        Config::from_toml(&contents)
            .with_context(|| format!("could not parse config file {}", path.display()))
    }

    /// Parses the config from a string
    pub fn from_toml(contents: &str) -> Result<Config> {
        Ok(toml::from_str(contents)?)
    }

    /// Reads the config from the XDG config directory, or falls back to the defaults
    pub fn discover() -> Result<Config> {
        let xdg = xdg::BaseDirectories::with_prefix("mailq")?;
        match xdg.find_config_file("config.toml") {
            Some(path) => {
                debug!("using config file {}", path.display());
                Config::load(path)
            }
            None => Ok(Config::default()),
        }
    }
}

/// Scheduling policy for the action manager
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct ActionsConfig {
    /// How many times one operation may be restarted after internal state resets
    pub reset_retry_limit: u32,

    /// Ignore `reset_retry_limit` and restart for as long as the backend keeps resetting
    pub unbounded_reset_retries: bool,
}

impl Default for ActionsConfig {
    fn default() -> Self {
        ActionsConfig {
            reset_retry_limit: 3,
            unbounded_reset_retries: false,
        }
    }
}

impl ActionsConfig {
    /// The limit in the form the action manager takes it
    pub fn retry_limit(&self) -> Option<u32> {
        if self.unbounded_reset_retries {
            None
        } else {
            Some(self.reset_retry_limit)
        }
    }
}

/// Logger setup
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct LogConfig {
    /// One of `off`, `error`, `warn`, `info`, `debug`, `trace`
    pub level: String,

    /// File to log to; `~` is expanded. Logs go to stderr if unset.
    pub file: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            level: "info".to_owned(),
            file: None,
        }
    }
}

impl LogConfig {
    /// The configured level as a filter
    pub fn level_filter(&self) -> Result<LevelFilter> {
        self.level
            .parse()
            .map_err(|_| anyhow!("invalid log level {:?}", self.level))
    }

    /// The log file with `~` expanded
    pub fn file_path(&self) -> Option<PathBuf> {
        self.file
            .as_ref()
            .map(|file| PathBuf::from(shellexpand::tilde(file).into_owned()))
    }
}

/// Behavior of the simulated backend worker
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct SimulatorConfig {
    /// Progress steps per operation
    pub steps: u32,

    /// Delay between progress steps, in milliseconds
    pub step_delay_ms: u64,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        SimulatorConfig {
            steps: 4,
            step_delay_ms: 250,
        }
    }
}

impl SimulatorConfig {
    /// Delay between progress steps
    pub fn step_delay(&self) -> Duration {
        Duration::from_millis(self.step_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.actions.retry_limit(), Some(3));
        assert_eq!(config.log.level_filter().unwrap(), LevelFilter::Info);
    }

    #[test]
    fn partial_config() {
        let config = Config::from_toml(
            r#"
            [actions]
            unbounded_reset_retries = true

            [log]
            level = "debug"
            file = "/tmp/mailq.log"

            [simulator]
            step_delay_ms = 10
            "#,
        )
        .unwrap();

        assert_eq!(config.actions.retry_limit(), None);
        assert_eq!(config.log.level_filter().unwrap(), LevelFilter::Debug);
        assert_eq!(config.log.file_path(), Some(PathBuf::from("/tmp/mailq.log")));
        assert_eq!(config.simulator.steps, 4);
        assert_eq!(config.simulator.step_delay(), Duration::from_millis(10));
    }

    #[test]
    fn bad_values_are_errors() {
        assert!(Config::from_toml("[actions]\nreset_retry_limit = \"many\"").is_err());
        let log = LogConfig {
            level: "loud".to_owned(),
            file: None,
        };
        assert!(log.level_filter().is_err());
    }
}
