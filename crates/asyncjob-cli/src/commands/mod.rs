pub mod alias;
pub mod config;
pub mod kill;
pub mod list;
pub mod run;
pub mod start;
pub mod status;
pub mod wait;
pub mod wrap;

pub use alias::run as alias;
pub use config::run as config;
pub use kill::run as kill;
pub use list::run as list;
pub use run::run;
pub use start::run as start;
pub use status::run as status;
pub use wait::run as wait;
pub use wrap::run as wrap;

use crate::{CommandArgs, TargetArgs, WaitArgs};
use anyhow::Context as _;
use asyncjob_core::error::JobError;
use asyncjob_core::{CleanupMode, CommandSpec, Target, WaitOptions};
use std::time::Duration;

pub(crate) fn target(args: &TargetArgs) -> Result<Target, JobError> {
    Target::from_args(args.jid.as_deref(), args.alias.as_deref())
}

/// Build the command to launch from `--shell` or the trailing argv.
pub(crate) fn command_spec(args: &CommandArgs) -> anyhow::Result<CommandSpec> {
    let mut spec = match (&args.shell, args.argv.split_first()) {
        (Some(script), None) => CommandSpec::shell(script.clone()),
        (None, Some((program, rest))) => CommandSpec::argv(program.clone(), rest.to_vec()),
        (Some(_), Some(_)) => {
            return Err(JobError::Config(
                "give either --shell or a command after --, not both".into(),
            )
            .into())
        }
        (None, None) => {
            return Err(
                JobError::Config("no command: use --shell or -- <program> [args]".into()).into(),
            )
        }
    };
    spec.chdir = args.chdir.clone();
    for pair in &args.env {
        let (key, value) = pair
            .split_once('=')
            .filter(|(key, _)| !key.is_empty())
            .ok_or_else(|| JobError::Config(format!("--env expects KEY=VALUE, got '{}'", pair)))
            .context("parsing environment")?;
        spec.env.insert(key.to_string(), value.to_string());
    }
    Ok(spec)
}

pub(crate) fn async_timeout(args: &CommandArgs) -> Option<Duration> {
    args.async_timeout.filter(|secs| *secs > 0).map(Duration::from_secs)
}

/// Config defaults, overridden by whatever flags were given.
pub(crate) fn wait_options(
    defaults: WaitOptions,
    args: &WaitArgs,
) -> Result<WaitOptions, JobError> {
    let mut opts = defaults;
    if let Some(retries) = args.retries {
        opts.retries = retries;
    }
    if let Some(delay) = args.delay {
        opts.delay = Duration::from_secs(delay);
    }
    if let Some(cleanup) = &args.cleanup {
        opts.cleanup = match cleanup.as_str() {
            "alias" => CleanupMode::Alias,
            "full" => CleanupMode::Full,
            other => return Err(JobError::Config(format!("unknown cleanup mode: {}", other))),
        };
    }
    if args.keep_on_failure {
        opts.cleanup_on_failure = false;
    }
    Ok(opts)
}
