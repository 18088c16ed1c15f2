use super::{target, wait_options};
use crate::dispatch::Context;
use crate::output;
use crate::{TargetArgs, WaitArgs};

pub async fn run(ctx: &Context, args: &TargetArgs, wait: &WaitArgs) -> anyhow::Result<i32> {
    let target = target(args)?;
    let opts = wait_options(ctx.config.wait_options(), wait)?;
    let report = ctx
        .orchestrator()?
        .wait_and_cleanup(&target, &opts)
        .await?;
    output::print_report(&report)
}
