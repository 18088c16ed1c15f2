use crate::alias::AliasIndex;
use crate::error::JobError;
use crate::job::{CommandSpec, JobState, Target};
use crate::kill::KillController;
use crate::launcher::Launcher;
use crate::tracker::{StatusMode, StatusReport, Tracker};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// What a finished wait erases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CleanupMode {
    Alias,
    #[default]
    Full,
}

impl CleanupMode {
    pub fn status_mode(self) -> StatusMode {
        match self {
            CleanupMode::Alias => StatusMode::Cleanup,
            CleanupMode::Full => StatusMode::FullCleanup,
        }
    }
}

/// What `ensure_running` does when the alias points at a killed job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StalePolicy {
    #[default]
    Fail,
    Relaunch,
}

#[derive(Debug, Clone)]
pub struct WaitOptions {
    pub retries: u32,
    pub delay: Duration,
    pub cleanup: CleanupMode,
    /// Also erase failed and killed jobs. Successful jobs are always erased.
    pub cleanup_on_failure: bool,
}

impl Default for WaitOptions {
    fn default() -> Self {
        Self {
            retries: 100,
            delay: Duration::from_secs(5),
            cleanup: CleanupMode::Full,
            cleanup_on_failure: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Ensured {
    pub report: StatusReport,
    pub launched: bool,
}

/// Find-or-launch, then poll to a terminal state and clean up.
pub struct Orchestrator {
    tracker: Tracker,
    killer: KillController,
    launcher: Arc<dyn Launcher>,
    stale: StalePolicy,
}

impl Orchestrator {
    pub fn new(tracker: Tracker, launcher: Arc<dyn Launcher>) -> Self {
        Self {
            killer: KillController::new(tracker.clone()),
            tracker,
            launcher,
            stale: StalePolicy::default(),
        }
    }

    pub fn with_stale_policy(mut self, stale: StalePolicy) -> Self {
        self.stale = stale;
        self
    }

    pub fn tracker(&self) -> &Tracker {
        &self.tracker
    }

    pub fn killer(&self) -> &KillController {
        &self.killer
    }

    /// Launch `spec` under `alias` unless a job is already registered there.
    pub async fn ensure_running(
        &self,
        alias: &str,
        spec: &CommandSpec,
        async_timeout: Option<Duration>,
    ) -> Result<Ensured, JobError> {
        AliasIndex::validate(alias)?;
        let target = Target::Alias(alias.to_string());
        let current = self.tracker.status(&target).await?;

        if current.state == JobState::Killed {
            let jid = current
                .job_id
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_default();
            match self.stale {
                StalePolicy::Fail => {
                    return Err(JobError::StaleAlias {
                        alias: alias.to_string(),
                        jid,
                        path: self.tracker.aliases().path(alias),
                    })
                }
                StalePolicy::Relaunch => {
                    info!("Alias '{}' refers to killed job {}, relaunching", alias, jid);
                    self.tracker
                        .status_with_mode(&target, StatusMode::FullCleanup)
                        .await?;
                }
            }
        } else if current.job_id.is_some() {
            debug!("Alias '{}' already has job {:?} ({})", alias, current.job_id, current.state);
            return Ok(Ensured {
                report: current,
                launched: false,
            });
        }

        let jid = self.launcher.launch(spec, async_timeout).await?;
        info!(
            "Launched job {} for alias '{}' via {}: {}",
            jid,
            alias,
            self.launcher.name(),
            spec.describe()
        );

        if let Err(e) = self.tracker.aliases().link(alias, &jid) {
            // Another invocation registered the alias first; don't leave a duplicate running.
            warn!("Could not register alias '{}' for job {}: {}", alias, jid, e);
            let orphan = Target::Jid(jid);
            if let Err(kill_err) = self.killer.kill(&orphan, libc::SIGTERM).await {
                warn!("Failed to stop unregistered {}: {}", orphan, kill_err);
            }
            return Err(e);
        }

        let report = self.tracker.status(&target).await?;
        Ok(Ensured {
            report,
            launched: true,
        })
    }

    /// Poll until `until` holds, at most `retries` times, sleeping `delay`
    /// between polls. Any status error aborts the wait immediately.
    pub async fn wait_until<F>(
        &self,
        target: &Target,
        retries: u32,
        delay: Duration,
        until: F,
    ) -> Result<StatusReport, JobError>
    where
        F: Fn(&StatusReport) -> bool,
    {
        let retries = retries.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            let mut report = self.tracker.status(target).await?;
            report.attempts = Some(attempt);

            if report.job_id.is_none() {
                return Err(JobError::JobNotFound(format!("{} is not registered", target)));
            }
            if until(&report) {
                debug!("{} reached {} after {} attempt(s)", target, report.state, attempt);
                return Ok(report);
            }
            if attempt >= retries {
                return Err(JobError::RanOutOfAttempts {
                    target: target.to_string(),
                    attempts: attempt,
                });
            }
            debug!(
                "Retrying {}: attempt {} of {} ({} left), state {}",
                target,
                attempt,
                retries,
                retries - attempt,
                report.state
            );
            tokio::time::sleep(delay).await;
        }
    }

    /// Wait for a terminal state, then erase what `opts` asks for.
    /// Exhaustion leaves the alias and record untouched.
    pub async fn wait_and_cleanup(
        &self,
        target: &Target,
        opts: &WaitOptions,
    ) -> Result<StatusReport, JobError> {
        let mut report = self
            .wait_until(target, opts.retries, opts.delay, StatusReport::is_terminal)
            .await?;

        let succeeded = report.state == JobState::Finished;
        if succeeded || opts.cleanup_on_failure {
            let cleaned = self
                .tracker
                .status_with_mode(target, opts.cleanup.status_mode())
                .await?;
            report.erased = cleaned.erased;
            report.cleanup = true;
        } else {
            info!("Keeping {} ({}) for inspection", target, report.state);
        }
        Ok(report)
    }

    /// `ensure_running` followed by `wait_and_cleanup` on the alias.
    pub async fn run(
        &self,
        alias: &str,
        spec: &CommandSpec,
        async_timeout: Option<Duration>,
        opts: &WaitOptions,
    ) -> Result<StatusReport, JobError> {
        self.ensure_running(alias, spec, async_timeout).await?;
        self.wait_and_cleanup(&Target::Alias(alias.to_string()), opts)
            .await
    }
}
