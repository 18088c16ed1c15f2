use crate::error::JobError;
use crate::liveness::parse_signal;
use crate::orchestrator::{CleanupMode, StalePolicy, WaitOptions};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable that overrides the job directory.
pub const DIR_ENV: &str = "ASYNCJOB_DIR";

/// Top-level configuration, loaded from ~/.config/asyncjob/config.yaml
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_async_dir")]
    pub async_dir: String,
    #[serde(default)]
    pub wait: WaitDefaults,
    #[serde(default = "default_kill_signal")]
    pub kill_signal: String,
    #[serde(default)]
    pub stale_alias: StalePolicy,
    #[serde(default)]
    pub launcher: LauncherConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaitDefaults {
    #[serde(default = "default_retries")]
    pub retries: u32,
    #[serde(default = "default_delay_secs")]
    pub delay_secs: u64,
    #[serde(default)]
    pub cleanup: CleanupMode,
    #[serde(default = "default_true")]
    pub cleanup_on_failure: bool,
}

impl Default for WaitDefaults {
    fn default() -> Self {
        Self {
            retries: default_retries(),
            delay_secs: default_delay_secs(),
            cleanup: CleanupMode::default(),
            cleanup_on_failure: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LauncherConfig {
    /// Program re-executed as the job wrapper. Defaults to the running binary.
    #[serde(default)]
    pub wrapper_program: Option<PathBuf>,
    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout_secs: u64,
}

impl Default for LauncherConfig {
    fn default() -> Self {
        Self {
            wrapper_program: None,
            handshake_timeout_secs: default_handshake_timeout(),
        }
    }
}

fn default_async_dir() -> String {
    "~/.asyncjob".to_string()
}

fn default_kill_signal() -> String {
    "TERM".to_string()
}

fn default_retries() -> u32 {
    100
}

fn default_delay_secs() -> u64 {
    5
}

fn default_handshake_timeout() -> u64 {
    10
}

fn default_true() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            async_dir: default_async_dir(),
            wait: WaitDefaults::default(),
            kill_signal: default_kill_signal(),
            stale_alias: StalePolicy::default(),
            launcher: LauncherConfig::default(),
        }
    }
}

impl Config {
    /// Load config from the default path, or defaults if there is none.
    pub fn load_default() -> Result<Self, JobError> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn load_from(path: &Path) -> Result<Self, JobError> {
        let contents = std::fs::read_to_string(path).map_err(|e| JobError::io(path, e))?;
        serde_yaml::from_str(&contents)
            .map_err(|e| JobError::Config(format!("{}: {}", path.display(), e)))
    }

    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("/etc"))
            .join("asyncjob")
            .join("config.yaml")
    }

    /// Job directory: explicit override, then `ASYNCJOB_DIR`, then the file.
    pub fn job_dir(&self, override_dir: Option<&Path>) -> PathBuf {
        if let Some(dir) = override_dir {
            return expand_tilde(&dir.to_string_lossy());
        }
        match std::env::var(DIR_ENV) {
            Ok(dir) if !dir.is_empty() => expand_tilde(&dir),
            _ => expand_tilde(&self.async_dir),
        }
    }

    pub fn kill_signal(&self) -> Result<i32, JobError> {
        parse_signal(&self.kill_signal)
    }

    pub fn wait_options(&self) -> WaitOptions {
        WaitOptions {
            retries: self.wait.retries,
            delay: Duration::from_secs(self.wait.delay_secs),
            cleanup: self.wait.cleanup,
            cleanup_on_failure: self.wait.cleanup_on_failure,
        }
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.launcher.handshake_timeout_secs)
    }
}

pub fn expand_tilde(path: &str) -> PathBuf {
    match path.strip_prefix('~') {
        Some(rest) if rest.is_empty() || rest.starts_with('/') => dirs::home_dir()
            .map(|home| home.join(rest.trim_start_matches('/')))
            .unwrap_or_else(|| PathBuf::from(path)),
        _ => PathBuf::from(path),
    }
}
