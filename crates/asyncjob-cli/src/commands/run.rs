use super::{async_timeout, command_spec, wait_options};
use crate::dispatch::Context;
use crate::output;
use crate::{CommandArgs, WaitArgs};
use asyncjob_core::Target;

pub async fn run(
    ctx: &Context,
    alias: &str,
    command: &CommandArgs,
    wait: &WaitArgs,
    no_wait: bool,
) -> anyhow::Result<i32> {
    if no_wait {
        return super::start(ctx, alias, command).await;
    }

    let spec = command_spec(command)?;
    let opts = wait_options(ctx.config.wait_options(), wait)?;
    let orchestrator = ctx.orchestrator()?;

    orchestrator
        .ensure_running(alias, &spec, async_timeout(command))
        .await?;
    let report = orchestrator
        .wait_and_cleanup(&Target::Alias(alias.to_string()), &opts)
        .await?;
    output::print_report(&report)
}
