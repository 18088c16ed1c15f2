use asyncjob_core::config::Config;
use asyncjob_core::error::JobError;
use asyncjob_core::{Orchestrator, SystemProcessTable, Tracker};
use asyncjob_local::LocalLauncher;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Resolved configuration plus the job directory every command works in.
pub struct Context {
    pub config: Config,
    pub config_path: PathBuf,
    pub root: PathBuf,
}

impl Context {
    pub fn load(config_path: Option<&Path>, dir: Option<&Path>) -> Result<Self, JobError> {
        let config_path = config_path
            .map(Path::to_path_buf)
            .unwrap_or_else(Config::default_path);
        // A missing file means defaults, so `config --init` can create it.
        let config = if config_path.exists() {
            Config::load_from(&config_path)?
        } else {
            Config::default()
        };
        let root = config.job_dir(dir);
        debug!("Job directory: {}", root.display());
        Ok(Self {
            config,
            config_path,
            root,
        })
    }

    pub fn tracker(&self) -> Tracker {
        Tracker::new(&self.root, Arc::new(SystemProcessTable::new()))
    }

    /// Tracker, kill controller and local launcher wired from config.
    pub fn orchestrator(&self) -> Result<Orchestrator, JobError> {
        let launcher = LocalLauncher::new(&self.root, self.wrapper_program()?)
            .with_handshake_timeout(self.config.handshake_timeout());
        Ok(Orchestrator::new(self.tracker(), Arc::new(launcher))
            .with_stale_policy(self.config.stale_alias))
    }

    fn wrapper_program(&self) -> Result<PathBuf, JobError> {
        match &self.config.launcher.wrapper_program {
            Some(program) => Ok(program.clone()),
            None => std::env::current_exe()
                .map_err(|e| JobError::Launch(format!("Locating the asyncjob binary: {}", e))),
        }
    }
}
