use asyncjob_core::error::{ErrorKind, JobError};
use asyncjob_core::{JobState, StatusReport};
use serde::Serialize;
use std::io::Write;

/// Print a JSON document on stdout.
pub fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Print a status report and pick the exit code for it: a failed or killed
/// job exits 1 so scripts can branch on it.
pub fn print_report(report: &StatusReport) -> anyhow::Result<i32> {
    print_json(report)?;
    Ok(match report.state {
        JobState::Failed | JobState::Killed => 1,
        _ => 0,
    })
}

pub fn exit_code(kind: ErrorKind) -> i32 {
    match kind {
        ErrorKind::JobNotFound => 2,
        ErrorKind::RanOutOfAttempts => 3,
        ErrorKind::ProcessVanished => 4,
        ErrorKind::PermissionDenied => 5,
        ErrorKind::Input => 6,
        ErrorKind::Consistency | ErrorKind::Other => 1,
    }
}

#[derive(Serialize)]
struct ErrorDoc<'a> {
    failed: bool,
    error: &'a str,
    msg: String,
}

/// Report an error as JSON on stdout and return the process exit code.
pub fn print_error(err: &anyhow::Error) -> i32 {
    let (label, code) = match err.downcast_ref::<JobError>() {
        Some(job_err) => (kind_label(job_err.kind()), exit_code(job_err.kind())),
        None => ("other", 1),
    };
    let doc = ErrorDoc {
        failed: true,
        error: label,
        msg: format!("{:#}", err),
    };
    match serde_json::to_string_pretty(&doc) {
        Ok(text) => println!("{}", text),
        Err(_) => eprintln!("Error: {:#}", err),
    }
    code
}

/// Plain-text error on stderr, for when stdout is not ours to write to.
/// The reader may already be gone, so write failures are ignored.
pub fn report_to_stderr(err: &anyhow::Error) -> i32 {
    let _ = writeln!(std::io::stderr(), "asyncjob: {:#}", err);
    match err.downcast_ref::<JobError>() {
        Some(job_err) => exit_code(job_err.kind()),
        None => 1,
    }
}

fn kind_label(kind: ErrorKind) -> &'static str {
    match kind {
        ErrorKind::JobNotFound => "job_not_found",
        ErrorKind::RanOutOfAttempts => "ran_out_of_attempts",
        ErrorKind::ProcessVanished => "process_vanished",
        ErrorKind::PermissionDenied => "permission_denied",
        ErrorKind::Input => "input",
        ErrorKind::Consistency => "consistency",
        ErrorKind::Other => "other",
    }
}
