use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum JobError {
    #[error("could not find job: {0}")]
    JobNotFound(String),

    #[error("unexpected job id format '{jid}': {reason}")]
    InvalidJobId { jid: String, reason: &'static str },

    #[error("invalid alias '{alias}': {reason}")]
    InvalidAlias { alias: String, reason: &'static str },

    #[error("one of jid or alias is required")]
    MissingTarget,

    #[error("jid and alias are mutually exclusive (jid {jid}, alias {alias})")]
    ConflictingTarget { jid: String, alias: String },

    #[error("could not parse job record {}: {source}", path.display())]
    CorruptRecord {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error(
        "alias '{alias}' at {} points to missing record {}; delete the alias to clear it",
        path.display(),
        target.display()
    )]
    DanglingAlias {
        alias: String,
        path: PathBuf,
        target: PathBuf,
    },

    #[error("alias '{alias}' is already registered at {} for job {jid}", path.display())]
    AliasExists {
        alias: String,
        path: PathBuf,
        jid: String,
    },

    #[error(
        "alias '{alias}' refers to killed job {jid}; clean up {} before relaunching",
        path.display()
    )]
    StaleAlias {
        alias: String,
        jid: String,
        path: PathBuf,
    },

    #[error(
        "can't find alive process for job {jid}: the wrapper probably died unexpectedly; check {} and delete its alias if it failed",
        path.display()
    )]
    ProcessVanished { jid: String, path: PathBuf },

    #[error("no permission to {op} process {pid}")]
    PermissionDenied { pid: i32, op: &'static str },

    #[error("ran out of attempts waiting for {target} after {attempts} attempt(s)")]
    RanOutOfAttempts { target: String, attempts: u32 },

    #[error("launch failed: {0}")]
    Launch(String),

    #[error("process error: {0}")]
    Process(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("IO error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Coarse classification used by callers to pick an exit code or decide
/// between retry and abort.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    JobNotFound,
    RanOutOfAttempts,
    ProcessVanished,
    PermissionDenied,
    Input,
    Consistency,
    Other,
}

impl JobError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        JobError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            JobError::JobNotFound(_) => ErrorKind::JobNotFound,
            JobError::RanOutOfAttempts { .. } => ErrorKind::RanOutOfAttempts,
            JobError::ProcessVanished { .. } => ErrorKind::ProcessVanished,
            JobError::PermissionDenied { .. } => ErrorKind::PermissionDenied,
            JobError::Io { source, .. }
                if source.kind() == std::io::ErrorKind::PermissionDenied =>
            {
                ErrorKind::PermissionDenied
            }
            JobError::InvalidJobId { .. }
            | JobError::InvalidAlias { .. }
            | JobError::MissingTarget
            | JobError::ConflictingTarget { .. }
            | JobError::AliasExists { .. }
            | JobError::StaleAlias { .. }
            | JobError::Config(_) => ErrorKind::Input,
            JobError::CorruptRecord { .. } | JobError::DanglingAlias { .. } => {
                ErrorKind::Consistency
            }
            JobError::Launch(_) | JobError::Process(_) | JobError::Io { .. } | JobError::Json(_) => {
                ErrorKind::Other
            }
        }
    }
}
