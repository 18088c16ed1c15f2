use crate::error::JobError;
use crate::job::JobId;
use std::io;
use tokio::process::Command;
use tracing::{debug, warn};

/// Process-table access used to decide whether a job's wrapper is alive and
/// to signal it. The system implementation talks to the kernel; tests swap
/// in a fake.
#[async_trait::async_trait]
pub trait ProcessTable: Send + Sync {
    /// Zero-signal probe. `Ok(false)` only for "no such process".
    async fn is_alive(&self, pid: u32) -> Result<bool, JobError>;

    /// Pids of live wrapper processes whose command line names this job.
    async fn find_by_job_id(&self, jid: &JobId) -> Result<Vec<u32>, JobError>;

    /// Deliver `signal` to the process group led by `pid`.
    /// `Ok(false)` when the group no longer exists.
    async fn signal_group(&self, pid: u32, signal: i32) -> Result<bool, JobError>;
}

/// The real process table: `kill(2)` probes and a `ps` scan.
#[derive(Debug, Clone, Default)]
pub struct SystemProcessTable;

impl SystemProcessTable {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait::async_trait]
impl ProcessTable for SystemProcessTable {
    async fn is_alive(&self, pid: u32) -> Result<bool, JobError> {
        let pid = to_pid(pid)?;
        // SAFETY: signal 0 performs the permission and existence checks only.
        let rc = unsafe { libc::kill(pid, 0) };
        if rc == 0 {
            return Ok(true);
        }
        classify_errno(io::Error::last_os_error(), pid, "signal")
    }

    async fn find_by_job_id(&self, jid: &JobId) -> Result<Vec<u32>, JobError> {
        let output = Command::new("ps")
            .args(["-e", "-ww", "-o", "pid=,args="])
            .output()
            .await
            .map_err(|e| JobError::Process(format!("Failed to run ps: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(JobError::Process(format!("ps failed: {}", stderr.trim())));
        }

        let listing = String::from_utf8_lossy(&output.stdout);
        let pids = match_wrappers(&listing, jid, std::process::id());
        debug!("Process-table scan for {} found {:?}", jid, pids);
        Ok(pids)
    }

    async fn signal_group(&self, pid: u32, signal: i32) -> Result<bool, JobError> {
        let pid = to_pid(pid)?;
        // SAFETY: plain syscalls on integer ids.
        let pgid = unsafe { libc::getpgid(pid) };
        if pgid < 0 {
            return classify_errno(io::Error::last_os_error(), pid, "signal");
        }
        let own_group = unsafe { libc::getpgrp() };
        let rc = if pgid == own_group {
            // The wrapper never got its own group; don't take ourselves down with it.
            warn!("Process {} shares our process group, signalling it alone", pid);
            unsafe { libc::kill(pid, signal) }
        } else {
            unsafe { libc::killpg(pgid, signal) }
        };
        if rc == 0 {
            return Ok(true);
        }
        classify_errno(io::Error::last_os_error(), pid, "signal")
    }
}

fn to_pid(pid: u32) -> Result<libc::pid_t, JobError> {
    match libc::pid_t::try_from(pid) {
        Ok(p) if p > 0 => Ok(p),
        _ => Err(JobError::Process(format!("pid {} out of range", pid))),
    }
}

fn classify_errno(err: io::Error, pid: libc::pid_t, op: &'static str) -> Result<bool, JobError> {
    match err.raw_os_error() {
        Some(libc::ESRCH) => Ok(false),
        Some(libc::EPERM) => Err(JobError::PermissionDenied { pid, op }),
        _ => Err(JobError::Process(format!("Unknown error signalling {}: {}", pid, err))),
    }
}

/// Pick the pids out of `ps -o pid=,args=` output whose arguments carry the
/// job's wrapper pattern.
pub fn match_wrappers(listing: &str, jid: &JobId, exclude: u32) -> Vec<u32> {
    let pattern = jid.wrapper_pattern();
    let mut pids: Vec<u32> = listing
        .lines()
        .filter_map(|line| {
            let line = line.trim_start();
            let (pid, args) = line.split_once(char::is_whitespace)?;
            let pid: u32 = pid.parse().ok()?;
            let hit = args
                .split_whitespace()
                .collect::<Vec<_>>()
                .windows(2)
                .any(|w| format!("{} {}", w[0], w[1]) == pattern);
            (hit && pid != exclude).then_some(pid)
        })
        .collect();
    pids.sort_unstable();
    pids.dedup();
    pids
}

/// Accepts `TERM`, `SIGTERM`, `sigterm` or a number.
pub fn parse_signal(s: &str) -> Result<i32, JobError> {
    let trimmed = s.trim();
    if let Ok(n) = trimmed.parse::<i32>() {
        if n > 0 && n < 65 {
            return Ok(n);
        }
        return Err(JobError::Config(format!("signal number out of range: {}", n)));
    }
    let upper = trimmed.to_ascii_uppercase();
    let name = upper.strip_prefix("SIG").unwrap_or(&upper);
    let signal = match name {
        "HUP" => libc::SIGHUP,
        "INT" => libc::SIGINT,
        "QUIT" => libc::SIGQUIT,
        "KILL" => libc::SIGKILL,
        "USR1" => libc::SIGUSR1,
        "USR2" => libc::SIGUSR2,
        "TERM" => libc::SIGTERM,
        "CONT" => libc::SIGCONT,
        "STOP" => libc::SIGSTOP,
        _ => return Err(JobError::Config(format!("unknown signal: {}", s))),
    };
    Ok(signal)
}
