use crate::error::JobError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

/// Token that precedes the job stamp on the wrapper's command line.
pub const WRAPPER_MARKER: &str = "--job-stamp";

/// Job identifier: `<unix-seconds>[.<fraction>].<wrapper-pid>`.
///
/// The stamp (everything before the last `.`) is chosen by the launcher
/// before the wrapper exists; the pid suffix is the wrapper's own pid.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct JobId(String);

impl JobId {
    pub fn parse(s: &str) -> Result<Self, JobError> {
        let invalid = |reason| JobError::InvalidJobId {
            jid: s.to_string(),
            reason,
        };

        let (stamp, pid) = s.rsplit_once('.').ok_or_else(|| invalid("missing pid suffix"))?;
        validate_stamp(stamp).map_err(invalid)?;
        match pid.parse::<u32>() {
            Ok(p) if p > 0 && p <= i32::MAX as u32 && pid.bytes().all(|b| b.is_ascii_digit()) => {}
            _ => return Err(invalid("pid suffix is not a positive integer")),
        }
        Ok(Self(s.to_string()))
    }

    pub fn from_parts(stamp: &str, pid: u32) -> Self {
        Self(format!("{}.{}", stamp, pid))
    }

    /// A fresh `<seconds>.<microseconds>` stamp for the next launch.
    pub fn new_stamp() -> String {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        format!("{}.{:06}", now.as_secs(), now.subsec_micros())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn stamp(&self) -> &str {
        self.0.rsplit_once('.').map(|(stamp, _)| stamp).unwrap_or(&self.0)
    }

    /// Pid of the wrapper that owns the job. Weak: the OS recycles pids.
    pub fn pid(&self) -> u32 {
        self.0
            .rsplit_once('.')
            .and_then(|(_, pid)| pid.parse().ok())
            .unwrap_or(0)
    }

    /// Substring that identifies this job's wrapper in a process listing.
    pub fn wrapper_pattern(&self) -> String {
        format!("{} {}", WRAPPER_MARKER, self.stamp())
    }
}

fn validate_stamp(stamp: &str) -> Result<(), &'static str> {
    let digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
    let ok = match stamp.split_once('.') {
        Some((secs, frac)) => digits(secs) && digits(frac),
        None => digits(stamp),
    };
    if ok {
        Ok(())
    } else {
        Err("timestamp prefix is not numeric")
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for JobId {
    type Err = JobError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for JobId {
    type Error = JobError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<JobId> for String {
    fn from(jid: JobId) -> Self {
        jid.0
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    NotStarted,
    Running,
    Finished,
    Failed,
    Killed,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Finished | JobState::Failed | JobState::Killed)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobState::NotStarted => write!(f, "not_started"),
            JobState::Running => write!(f, "running"),
            JobState::Finished => write!(f, "finished"),
            JobState::Failed => write!(f, "failed"),
            JobState::Killed => write!(f, "killed"),
        }
    }
}

/// What a control operation acts on: exactly one of jid or alias.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Jid(JobId),
    Alias(String),
}

impl Target {
    pub fn from_args(jid: Option<&str>, alias: Option<&str>) -> Result<Self, JobError> {
        let jid = jid.filter(|s| !s.is_empty());
        let alias = alias.filter(|s| !s.is_empty());
        match (jid, alias) {
            (Some(jid), Some(alias)) => Err(JobError::ConflictingTarget {
                jid: jid.to_string(),
                alias: alias.to_string(),
            }),
            (Some(jid), None) => Ok(Target::Jid(JobId::parse(jid)?)),
            (None, Some(alias)) => Ok(Target::Alias(alias.to_string())),
            (None, None) => Err(JobError::MissingTarget),
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Jid(jid) => write!(f, "job {}", jid),
            Target::Alias(alias) => write!(f, "alias '{}'", alias),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CommandKind {
    Shell { script: String },
    Argv { program: String, args: Vec<String> },
}

/// A command handed to the launcher.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommandSpec {
    #[serde(flatten)]
    pub kind: CommandKind,
    #[serde(default)]
    pub chdir: Option<PathBuf>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl CommandSpec {
    pub fn shell(script: impl Into<String>) -> Self {
        Self {
            kind: CommandKind::Shell {
                script: script.into(),
            },
            chdir: None,
            env: BTreeMap::new(),
        }
    }

    pub fn argv(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            kind: CommandKind::Argv {
                program: program.into(),
                args,
            },
            chdir: None,
            env: BTreeMap::new(),
        }
    }

    /// Full argv the wrapper executes.
    pub fn to_argv(&self) -> Vec<String> {
        match &self.kind {
            CommandKind::Shell { script } => {
                vec!["sh".to_string(), "-c".to_string(), script.clone()]
            }
            CommandKind::Argv { program, args } => {
                let mut argv = Vec::with_capacity(args.len() + 1);
                argv.push(program.clone());
                argv.extend(args.iter().cloned());
                argv
            }
        }
    }

    /// Short human-readable form for logs and records.
    pub fn describe(&self) -> String {
        match &self.kind {
            CommandKind::Shell { script } => script.clone(),
            CommandKind::Argv { program, args } => {
                std::iter::once(program.as_str())
                    .chain(args.iter().map(String::as_str))
                    .collect::<Vec<_>>()
                    .join(" ")
            }
        }
    }
}
