use crate::alias::AliasIndex;
use crate::error::JobError;
use crate::job::{JobId, JobState, Target};
use crate::liveness::ProcessTable;
use crate::record::{JobRecord, JobStore};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusMode {
    #[default]
    Status,
    /// Erase the alias (or, for a bare jid, the record) of a terminal job.
    Cleanup,
    /// Erase both alias and record of a terminal job.
    FullCleanup,
}

impl FromStr for StatusMode {
    type Err = JobError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "status" => Ok(StatusMode::Status),
            "cleanup" => Ok(StatusMode::Cleanup),
            "full_cleanup" | "full-cleanup" => Ok(StatusMode::FullCleanup),
            other => Err(JobError::Config(format!("unknown status mode: {}", other))),
        }
    }
}

impl fmt::Display for StatusMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusMode::Status => write!(f, "status"),
            StatusMode::Cleanup => write!(f, "cleanup"),
            StatusMode::FullCleanup => write!(f, "full_cleanup"),
        }
    }
}

/// What a status query returns: the control flags plus the record's payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    pub job_id: Option<JobId>,
    pub alias: Option<String>,
    pub state: JobState,
    pub started: bool,
    pub finished: bool,
    pub failed: bool,
    pub killed: bool,
    pub results_file: Option<PathBuf>,
    pub alias_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub erased: Vec<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempts: Option<u32>,
    #[serde(default)]
    pub cleanup: bool,
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl StatusReport {
    fn quiescent(job_id: Option<JobId>, alias: Option<String>) -> Self {
        Self {
            job_id,
            alias,
            state: JobState::NotStarted,
            started: false,
            finished: false,
            failed: false,
            killed: false,
            results_file: None,
            alias_path: None,
            erased: Vec::new(),
            attempts: None,
            cleanup: false,
            payload: Map::new(),
        }
    }

    fn for_job(located: &Located, record: Option<&JobRecord>, state: JobState) -> Self {
        let mut report = Self::quiescent(Some(located.jid.clone()), located.alias.clone());
        report.results_file = Some(located.record_path.clone());
        report.alias_path = located.alias_path.clone();
        report.state = state;
        if let Some(record) = record {
            report.started = true;
            report.finished = !record.is_running_marker();
            report.failed = record.is_failed();
            report.killed = record.flag("killed");
            // A payload key must not shadow the struct's own fields when flattened.
            report.payload = record
                .payload()
                .into_iter()
                .filter(|(k, _)| !REPORT_KEYS.contains(&k.as_str()))
                .collect();
        }
        report
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}

const REPORT_KEYS: [&str; 12] = [
    "job_id",
    "alias",
    "state",
    "started",
    "finished",
    "failed",
    "killed",
    "results_file",
    "alias_path",
    "erased",
    "attempts",
    "cleanup",
];

/// A job that the target resolved to.
#[derive(Debug, Clone)]
pub struct Located {
    pub jid: JobId,
    pub record_path: PathBuf,
    pub alias: Option<String>,
    pub alias_path: Option<PathBuf>,
}

/// Record plus reconciled liveness for one job.
#[derive(Debug, Clone)]
pub struct Inspection {
    pub record: Option<JobRecord>,
    pub state: JobState,
    /// Live wrapper pids; only populated for `Running`.
    pub owners: Vec<u32>,
}

/// Answers "what state is this job in" from the record and the process table.
#[derive(Clone)]
pub struct Tracker {
    store: JobStore,
    aliases: AliasIndex,
    procs: Arc<dyn ProcessTable>,
}

impl Tracker {
    pub fn new(root: impl Into<PathBuf>, procs: Arc<dyn ProcessTable>) -> Self {
        let root = root.into();
        Self {
            store: JobStore::new(root.clone()),
            aliases: AliasIndex::new(root),
            procs,
        }
    }

    pub fn store(&self) -> &JobStore {
        &self.store
    }

    pub fn aliases(&self) -> &AliasIndex {
        &self.aliases
    }

    pub fn procs(&self) -> &Arc<dyn ProcessTable> {
        &self.procs
    }

    /// `Ok(None)` for an alias that was never registered.
    pub fn locate(&self, target: &Target) -> Result<Option<Located>, JobError> {
        match target {
            Target::Jid(jid) => {
                let record_path = self.store.path(jid);
                if !record_path.exists() {
                    return Err(JobError::JobNotFound(format!(
                        "{} (no record at {})",
                        jid,
                        record_path.display()
                    )));
                }
                Ok(Some(Located {
                    jid: jid.clone(),
                    record_path,
                    alias: None,
                    alias_path: None,
                }))
            }
            Target::Alias(alias) => {
                let jid = match self.aliases.resolve(alias)? {
                    Some(jid) => jid,
                    None => return Ok(None),
                };
                Ok(Some(Located {
                    record_path: self.store.path(&jid),
                    jid,
                    alias: Some(alias.clone()),
                    alias_path: Some(self.aliases.path(alias)),
                }))
            }
        }
    }

    pub async fn status(&self, target: &Target) -> Result<StatusReport, JobError> {
        self.status_with_mode(target, StatusMode::Status).await
    }

    pub async fn status_with_mode(
        &self,
        target: &Target,
        mode: StatusMode,
    ) -> Result<StatusReport, JobError> {
        let located = match self.locate(target) {
            Ok(Some(located)) => located,
            Ok(None) => {
                let alias = match target {
                    Target::Alias(a) => Some(a.clone()),
                    Target::Jid(_) => None,
                };
                debug!("{} is not registered", target);
                return Ok(StatusReport::quiescent(None, alias));
            }
            Err(JobError::DanglingAlias { alias, path, .. }) if mode != StatusMode::Status => {
                warn!("Clearing dangling alias {}", path.display());
                self.aliases.unlink(&alias)?;
                let mut report = StatusReport::quiescent(None, Some(alias));
                report.alias_path = Some(path.clone());
                report.erased.push(path);
                return Ok(report);
            }
            Err(e) => return Err(e),
        };

        let inspection = self.inspect(&located).await?;
        let mut report = StatusReport::for_job(&located, inspection.record.as_ref(), inspection.state);

        if mode != StatusMode::Status {
            if inspection.state.is_terminal() {
                report.erased = self.erase(&located, mode)?;
            } else {
                debug!(
                    "Not erasing {} in {} mode: job is {}",
                    located.jid, mode, inspection.state
                );
            }
        }
        Ok(report)
    }

    /// Read the record and reconcile it with the process table.
    pub async fn inspect(&self, located: &Located) -> Result<Inspection, JobError> {
        let record = match self.store.read(&located.jid)? {
            Some(record) => record,
            None => {
                return Ok(Inspection {
                    record: None,
                    state: JobState::NotStarted,
                    owners: Vec::new(),
                })
            }
        };

        let state = record.state();
        if state != JobState::Running {
            return Ok(Inspection {
                record: Some(record),
                state,
                owners: Vec::new(),
            });
        }

        let owners = self.owners(&located.jid).await?;
        if !owners.is_empty() {
            return Ok(Inspection {
                record: Some(record),
                state,
                owners,
            });
        }

        // The job may have finished while we were looking for its wrapper.
        match self.store.read(&located.jid)? {
            Some(fresh) if fresh.state() != JobState::Running => {
                let state = fresh.state();
                Ok(Inspection {
                    record: Some(fresh),
                    state,
                    owners: Vec::new(),
                })
            }
            _ => Err(JobError::ProcessVanished {
                jid: located.jid.to_string(),
                path: located.record_path.clone(),
            }),
        }
    }

    /// Live wrapper pids for a job. The pid encoded in the jid is only
    /// believed when the process-table scan agrees, since pids get recycled.
    pub async fn owners(&self, jid: &JobId) -> Result<Vec<u32>, JobError> {
        let pid = jid.pid();
        let alive = self.procs.is_alive(pid).await?;
        let mut found = self.procs.find_by_job_id(jid).await?;
        found.sort_unstable();
        found.dedup();

        match (alive, found.contains(&pid)) {
            (true, true) => {}
            (true, false) if found.is_empty() => {
                warn!("Pid {} of job {} is alive but is not its wrapper (recycled)", pid, jid)
            }
            (false, _) if !found.is_empty() => {
                info!("Job {} reconciled via process table: {:?}", jid, found)
            }
            _ => {}
        }
        Ok(found)
    }

    fn erase(&self, located: &Located, mode: StatusMode) -> Result<Vec<PathBuf>, JobError> {
        let mut erased = Vec::new();
        if let (Some(alias), Some(path)) = (&located.alias, &located.alias_path) {
            if self.aliases.unlink(alias)? {
                erased.push(path.clone());
            }
        }
        let erase_record = match mode {
            StatusMode::FullCleanup => true,
            StatusMode::Cleanup => located.alias.is_none(),
            StatusMode::Status => false,
        };
        if erase_record && self.store.remove(&located.jid)? {
            erased.push(located.record_path.clone());
        }
        info!("Cleaned up {} ({}): {:?}", located.jid, mode, erased);
        Ok(erased)
    }
}
