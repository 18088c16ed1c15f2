use super::target;
use crate::dispatch::Context;
use crate::output;
use crate::TargetArgs;
use asyncjob_core::liveness::parse_signal;
use asyncjob_core::KillController;

pub async fn run(ctx: &Context, args: &TargetArgs, signal: Option<&str>) -> anyhow::Result<i32> {
    let target = target(args)?;
    let signal = match signal {
        Some(name) => parse_signal(name)?,
        None => ctx.config.kill_signal()?,
    };
    let report = KillController::new(ctx.tracker())
        .kill(&target, signal)
        .await?;
    output::print_json(&report)?;
    Ok(0)
}
