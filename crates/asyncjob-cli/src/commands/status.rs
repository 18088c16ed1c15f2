use super::target;
use crate::dispatch::Context;
use crate::output;
use crate::TargetArgs;
use asyncjob_core::StatusMode;

pub async fn run(ctx: &Context, args: &TargetArgs, mode: &str) -> anyhow::Result<i32> {
    let target = target(args)?;
    let mode: StatusMode = mode.parse()?;
    let report = ctx.tracker().status_with_mode(&target, mode).await?;
    output::print_json(&report)?;
    Ok(0)
}
