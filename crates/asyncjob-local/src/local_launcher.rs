use asyncjob_core::error::JobError;
use asyncjob_core::job::{CommandSpec, JobId, WRAPPER_MARKER};
use asyncjob_core::launcher::Launcher;
use asyncjob_core::record::JobStore;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{ChildStderr, Command};
use tracing::{debug, info};

/// Local launcher: re-executes a wrapper program (normally this binary's
/// `wrap` subcommand) in its own process group and waits for it to announce
/// the job id once the placeholder record is on disk.
pub struct LocalLauncher {
    root: PathBuf,
    wrapper_program: PathBuf,
    handshake_timeout: Duration,
}

impl LocalLauncher {
    pub fn new(root: impl Into<PathBuf>, wrapper_program: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            wrapper_program: wrapper_program.into(),
            handshake_timeout: Duration::from_secs(10),
        }
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Arguments after the wrapper program, in the order `wrap` parses them.
    fn wrapper_args(
        &self,
        stamp: &str,
        spec: &CommandSpec,
        async_timeout: Option<Duration>,
    ) -> Vec<String> {
        let mut args = vec![
            "wrap".to_string(),
            WRAPPER_MARKER.to_string(),
            stamp.to_string(),
            "--dir".to_string(),
            self.root.to_string_lossy().into_owned(),
        ];
        if let Some(timeout) = async_timeout {
            args.push("--timeout".to_string());
            args.push(timeout.as_secs().max(1).to_string());
        }
        if let Some(chdir) = &spec.chdir {
            args.push("--chdir".to_string());
            args.push(chdir.to_string_lossy().into_owned());
        }
        args.push("--".to_string());
        args.extend(spec.to_argv());
        args
    }
}

#[async_trait::async_trait]
impl Launcher for LocalLauncher {
    fn name(&self) -> &str {
        "local"
    }

    async fn launch(
        &self,
        spec: &CommandSpec,
        async_timeout: Option<Duration>,
    ) -> Result<JobId, JobError> {
        JobStore::new(&self.root).check_writable()?;
        let stamp = JobId::new_stamp();
        let args = self.wrapper_args(&stamp, spec, async_timeout);
        debug!("Local launch: {} {}", self.wrapper_program.display(), args.join(" "));

        let mut child = Command::new(&self.wrapper_program)
            .args(&args)
            .envs(&spec.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .spawn()
            .map_err(|e| {
                JobError::Launch(format!(
                    "Failed to spawn wrapper {}: {}",
                    self.wrapper_program.display(),
                    e
                ))
            })?;

        let pid = child
            .id()
            .ok_or_else(|| JobError::Launch("Wrapper exited before reporting its pid".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| JobError::Launch("Wrapper stdout was not captured".into()))?;

        let stderr = child.stderr.take();

        let announced = tokio::time::timeout(self.handshake_timeout, async {
            BufReader::new(stdout).lines().next_line().await
        })
        .await
        .map_err(|_| {
            JobError::Launch(format!(
                "Wrapper {} did not announce job stamp {} within {:?} (job dir {})",
                pid,
                stamp,
                self.handshake_timeout,
                self.root.display()
            ))
        })?
        .map_err(|e| JobError::Launch(format!("Reading wrapper handshake: {}", e)))?;

        let jid = match announced.as_deref().map(|line| JobId::parse(line.trim())) {
            Some(Ok(jid)) => jid,
            _ => {
                let detail = wrapper_stderr(stderr).await;
                return Err(JobError::Launch(format!(
                    "Wrapper {} exited without starting a job in {}: {}",
                    pid,
                    self.root.display(),
                    detail
                )));
            }
        };
        let expected = JobId::from_parts(&stamp, pid);
        if jid != expected {
            return Err(JobError::Launch(format!(
                "Wrapper announced {} but {} was expected",
                jid, expected
            )));
        }

        info!("Job {} started locally (wrapper pid {})", jid, pid);
        Ok(jid)
    }
}

/// Whatever the wrapper said on stderr before giving up.
async fn wrapper_stderr(stderr: Option<ChildStderr>) -> String {
    let mut text = String::new();
    if let Some(mut stderr) = stderr {
        let read = stderr.read_to_string(&mut text);
        if tokio::time::timeout(Duration::from_secs(1), read).await.is_err() {
            debug!("Wrapper stderr still open, reporting what was read");
        }
    }
    match text.trim() {
        "" => "no diagnostics on stderr".to_string(),
        trimmed => trimmed.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrapper_args_carry_stamp_and_command() {
        let launcher = LocalLauncher::new("/tmp/jobs", "/usr/bin/asyncjob");
        let mut spec = CommandSpec::shell("echo hi");
        spec.chdir = Some(PathBuf::from("/srv"));
        let args = launcher.wrapper_args("1700000000.000001", &spec, Some(Duration::from_secs(30)));
        assert_eq!(
            args,
            vec![
                "wrap",
                "--job-stamp",
                "1700000000.000001",
                "--dir",
                "/tmp/jobs",
                "--timeout",
                "30",
                "--chdir",
                "/srv",
                "--",
                "sh",
                "-c",
                "echo hi"
            ]
        );
    }

    #[tokio::test]
    async fn test_missing_wrapper_program_fails_launch() {
        let dir = tempfile::TempDir::new().unwrap();
        let launcher = LocalLauncher::new(dir.path(), "/nonexistent/asyncjob-wrapper");
        let err = launcher
            .launch(&CommandSpec::shell("true"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::Launch(_)));
    }

    #[tokio::test]
    async fn test_wrapper_exiting_without_handshake_fails_launch() {
        let dir = tempfile::TempDir::new().unwrap();
        let launcher = LocalLauncher::new(dir.path(), "false")
            .with_handshake_timeout(Duration::from_secs(2));
        let err = launcher
            .launch(&CommandSpec::shell("true"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::Launch(_)));
    }

    #[tokio::test]
    async fn test_wrapper_failure_carries_its_stderr() {
        let dir = tempfile::TempDir::new().unwrap();
        // `sh wrap ...` fails to open a script named `wrap` and says so on stderr.
        let launcher = LocalLauncher::new(dir.path(), "sh");
        let err = launcher
            .launch(&CommandSpec::shell("true"), None)
            .await
            .unwrap_err();
        match err {
            JobError::Launch(msg) => {
                assert!(msg.contains("wrap"), "{msg}");
                assert!(msg.contains(&dir.path().display().to_string()), "{msg}");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unwritable_job_dir_fails_before_spawn() {
        let launcher = LocalLauncher::new("/proc/self", "/nonexistent/asyncjob-wrapper");
        let err = launcher
            .launch(&CommandSpec::shell("true"), None)
            .await
            .unwrap_err();
        match err {
            JobError::Io { path, .. } => assert_eq!(path, PathBuf::from("/proc/self")),
            other => panic!("unexpected error {other:?}"),
        }
    }
}
