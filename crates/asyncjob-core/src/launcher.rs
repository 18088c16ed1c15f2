use crate::error::JobError;
use crate::job::{CommandSpec, JobId};
use std::time::Duration;

/// The executor that actually starts background commands.
///
/// A launcher returns only once the job's record exists at `<root>/<jid>`
/// (at least as a placeholder), and guarantees a terminal record is written
/// there eventually.
#[async_trait::async_trait]
pub trait Launcher: Send + Sync {
    /// Name of this launcher, for logs.
    fn name(&self) -> &str;

    /// Start `spec` in the background, killing it after `async_timeout`.
    async fn launch(
        &self,
        spec: &CommandSpec,
        async_timeout: Option<Duration>,
    ) -> Result<JobId, JobError>;
}
