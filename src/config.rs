use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::orchestration::{
    CompletionClassifier, DispatchSettings, ExecutorConfig, Markers, TimeLimits,
    DEFAULT_POLL_INTERVAL_SECS,
};
use crate::{flog_debug, Error, Result};

pub const DEFAULT_MAX_CONCURRENT: usize = 3;
pub const DEFAULT_LOG_DIR: &str = "migration-logs";

/// Run configuration.
///
/// Only ever read from a file the operator names on the command line; command
/// line flags override individual fields afterwards.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    pub task_timeout_secs: Option<u64>,
    pub run_timeout_secs: Option<u64>,
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
    #[serde(default)]
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub markers: Markers,
}

fn default_max_concurrent() -> usize {
    DEFAULT_MAX_CONCURRENT
}

fn default_poll_interval() -> u64 {
    DEFAULT_POLL_INTERVAL_SECS
}

fn default_log_dir() -> String {
    DEFAULT_LOG_DIR.to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            task_timeout_secs: None,
            run_timeout_secs: None,
            log_dir: default_log_dir(),
            executor: ExecutorConfig::default(),
            markers: Markers::default(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        flog_debug!("Config::load path={}", path.display());
        let contents = fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read config {}: {}", path.display(), e))
        })?;
        let config = Self::from_toml(&contents)?;
        flog_debug!(
            "Config loaded: max_concurrent={}, poll_interval_secs={}, program={:?}",
            config.max_concurrent,
            config.poll_interval_secs,
            config.executor.program
        );
        Ok(config)
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    pub fn log_dir(&self) -> PathBuf {
        expand_tilde(&self.log_dir)
    }

    /// Validate the configuration into dispatcher settings.
    pub fn settings(&self) -> Result<DispatchSettings> {
        if self.poll_interval_secs == 0 {
            return Err(Error::Config("poll_interval_secs must be at least 1".into()));
        }
        if self.executor.program.trim().is_empty() {
            return Err(Error::Config("executor program must not be empty".into()));
        }
        if self.markers.success.is_empty() || self.markers.no_op.is_empty() {
            return Err(Error::Config("markers must not be empty".into()));
        }

        let mut limits = TimeLimits::none();
        if let Some(secs) = self.task_timeout_secs {
            limits = limits.with_task_timeout(positive_secs("task_timeout_secs", secs)?);
        }
        if let Some(secs) = self.run_timeout_secs {
            limits = limits.with_run_timeout(positive_secs("run_timeout_secs", secs)?);
        }

        Ok(DispatchSettings::new(self.max_concurrent, self.log_dir())?
            .with_poll_interval(Duration::from_secs(self.poll_interval_secs))
            .with_limits(limits))
    }

    pub fn classifier(&self) -> CompletionClassifier {
        CompletionClassifier::new(self.markers.clone())
    }
}

fn positive_secs(name: &str, secs: u64) -> Result<Duration> {
    if secs == 0 {
        return Err(Error::Config(format!("{} must be at least 1", name)));
    }
    Ok(Duration::from_secs(secs))
}

pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}
