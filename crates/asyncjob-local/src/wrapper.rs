use asyncjob_core::error::JobError;
use asyncjob_core::job::JobId;
use asyncjob_core::record::{JobRecord, JobStore};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::io::Write;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{info, warn};

/// Everything the `wrap` subcommand receives from the launcher.
#[derive(Debug, Clone)]
pub struct WrapRequest {
    pub stamp: String,
    pub root: PathBuf,
    pub timeout: Option<Duration>,
    pub chdir: Option<PathBuf>,
    pub argv: Vec<String>,
}

/// How the supervised command ended.
#[derive(Debug)]
enum Outcome {
    Exited {
        rc: i64,
        stdout: String,
        stderr: String,
    },
    TimedOut,
    SpawnFailed(String),
}

/// Supervise one job: placeholder record, handshake, run, final overlay.
///
/// Runs inside the process group the launcher created, so a group signal
/// from the kill path reaches both this process and the command.
pub async fn run(req: WrapRequest) -> Result<(), JobError> {
    let jid = JobId::from_parts(&req.stamp, std::process::id());
    let store = JobStore::new(&req.root);
    let results_file = store.path(&jid);
    store.write(&jid, &JobRecord::placeholder(&jid, &results_file))?;
    announce(&jid)?;

    let start = Utc::now();
    let outcome = supervise(&req).await;
    let end = Utc::now();

    let fields = final_fields(&req, &outcome, start, end);
    store.overlay(&jid, fields)?;
    info!("Job {} finished: {:?}", jid, outcome_label(&outcome));

    if matches!(outcome, Outcome::TimedOut) {
        // The record is written; take down whatever the command left behind, us included.
        // SAFETY: signals our own process group.
        unsafe {
            libc::killpg(libc::getpgrp(), libc::SIGKILL);
        }
    }
    Ok(())
}

fn announce(jid: &JobId) -> Result<(), JobError> {
    let mut out = std::io::stdout().lock();
    writeln!(out, "{}", jid)
        .and_then(|_| out.flush())
        .map_err(|e| JobError::Launch(format!("Announcing job {}: {}", jid, e)))
}

async fn supervise(req: &WrapRequest) -> Outcome {
    let (program, args) = match req.argv.split_first() {
        Some(split) => split,
        None => return Outcome::SpawnFailed("empty command".to_string()),
    };

    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = &req.chdir {
        cmd.current_dir(dir);
    }

    let child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => return Outcome::SpawnFailed(format!("Failed to spawn {}: {}", program, e)),
    };

    let waited = match req.timeout {
        Some(limit) => match tokio::time::timeout(limit, child.wait_with_output()).await {
            Ok(waited) => waited,
            Err(_) => return Outcome::TimedOut,
        },
        None => child.wait_with_output().await,
    };

    match waited {
        Ok(output) => Outcome::Exited {
            rc: exit_code(&output.status),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        },
        Err(e) => Outcome::SpawnFailed(format!("Waiting for {}: {}", program, e)),
    }
}

fn exit_code(status: &std::process::ExitStatus) -> i64 {
    use std::os::unix::process::ExitStatusExt;
    match (status.code(), status.signal()) {
        (Some(code), _) => code as i64,
        (None, Some(sig)) => -(sig as i64),
        (None, None) => -1,
    }
}

fn final_fields(
    req: &WrapRequest,
    outcome: &Outcome,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Map<String, Value> {
    let mut fields = Map::new();
    fields.insert("finished".into(), Value::from(1));
    fields.insert("cmd".into(), Value::from(req.argv.clone()));
    fields.insert("start".into(), Value::from(start.to_rfc3339()));
    fields.insert("end".into(), Value::from(end.to_rfc3339()));
    fields.insert("delta".into(), Value::from(format_delta(end - start)));

    match outcome {
        Outcome::Exited { rc, stdout, stderr } => {
            fields.insert("rc".into(), Value::from(*rc));
            fields.insert("stdout".into(), Value::from(stdout.trim_end_matches('\n')));
            fields.insert("stderr".into(), Value::from(stderr.trim_end_matches('\n')));
            fields.insert("failed".into(), Value::Bool(*rc != 0));
            fields.insert("changed".into(), Value::Bool(true));
        }
        Outcome::TimedOut => {
            let secs = req.timeout.map(|t| t.as_secs()).unwrap_or_default();
            warn!("Job exceeded its {}s timeout", secs);
            fields.insert("failed".into(), Value::Bool(true));
            fields.insert("msg".into(), Value::from("timeout exceeded"));
            fields.insert("timeout".into(), Value::from(secs));
        }
        Outcome::SpawnFailed(msg) => {
            warn!("{}", msg);
            fields.insert("rc".into(), Value::from(127));
            fields.insert("failed".into(), Value::Bool(true));
            fields.insert("msg".into(), Value::from(msg.as_str()));
        }
    }
    fields
}

fn format_delta(delta: chrono::Duration) -> String {
    let micros = delta.num_microseconds().unwrap_or(0).max(0);
    let secs = micros / 1_000_000;
    format!(
        "{}:{:02}:{:02}.{:06}",
        secs / 3600,
        (secs / 60) % 60,
        secs % 60,
        micros % 1_000_000
    )
}

fn outcome_label(outcome: &Outcome) -> String {
    match outcome {
        Outcome::Exited { rc, .. } => format!("rc={}", rc),
        Outcome::TimedOut => "timeout".to_string(),
        Outcome::SpawnFailed(_) => "spawn failed".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(argv: &[&str], timeout: Option<Duration>) -> WrapRequest {
        WrapRequest {
            stamp: "1700000000.000001".into(),
            root: PathBuf::from("/unused"),
            timeout,
            chdir: None,
            argv: argv.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_delta_is_clock_formatted() {
        let d = chrono::Duration::milliseconds(3_723_500);
        assert_eq!(format_delta(d), "1:02:03.500000");
    }

    #[tokio::test]
    async fn test_captures_output_and_rc() {
        let req = request(&["sh", "-c", "echo out; echo err >&2; exit 3"], None);
        match supervise(&req).await {
            Outcome::Exited { rc, stdout, stderr } => {
                assert_eq!(rc, 3);
                assert_eq!(stdout, "out\n");
                assert_eq!(stderr, "err\n");
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_timeout_is_reported() {
        let req = request(&["sleep", "5"], Some(Duration::from_millis(100)));
        assert!(matches!(supervise(&req).await, Outcome::TimedOut));
    }

    #[tokio::test]
    async fn test_missing_program_is_spawn_failure() {
        let req = request(&["/nonexistent/program"], None);
        let outcome = supervise(&req).await;
        assert!(matches!(outcome, Outcome::SpawnFailed(_)));

        let now = Utc::now();
        let fields = final_fields(&req, &outcome, now, now);
        assert_eq!(fields["rc"], Value::from(127));
        assert_eq!(fields["failed"], Value::Bool(true));
        assert_eq!(fields["finished"], Value::from(1));
    }

    #[test]
    fn test_successful_exit_fields() {
        let req = request(&["true"], None);
        let outcome = Outcome::Exited {
            rc: 0,
            stdout: "hello\n".into(),
            stderr: String::new(),
        };
        let now = Utc::now();
        let fields = final_fields(&req, &outcome, now, now);
        assert_eq!(fields["stdout"], Value::from("hello"));
        assert_eq!(fields["failed"], Value::Bool(false));
        assert!(!fields.contains_key("started"));
    }
}
