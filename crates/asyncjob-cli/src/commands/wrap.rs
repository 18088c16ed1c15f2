use crate::dispatch::Context;
use asyncjob_local::WrapRequest;
use std::path::PathBuf;
use std::time::Duration;

pub async fn run(
    ctx: &Context,
    stamp: String,
    timeout: Option<u64>,
    chdir: Option<PathBuf>,
    argv: Vec<String>,
) -> anyhow::Result<i32> {
    asyncjob_local::wrapper::run(WrapRequest {
        stamp,
        root: ctx.root.clone(),
        timeout: timeout.filter(|secs| *secs > 0).map(Duration::from_secs),
        chdir,
        argv,
    })
    .await?;
    Ok(0)
}
