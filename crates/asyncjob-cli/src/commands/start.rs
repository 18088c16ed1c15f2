use super::{async_timeout, command_spec};
use crate::dispatch::Context;
use crate::output;
use crate::CommandArgs;
use tracing::info;

pub async fn run(ctx: &Context, alias: &str, args: &CommandArgs) -> anyhow::Result<i32> {
    let spec = command_spec(args)?;
    let orchestrator = ctx.orchestrator()?;
    let ensured = orchestrator
        .ensure_running(alias, &spec, async_timeout(args))
        .await?;

    if !ensured.launched {
        info!("Alias '{}' already registered, nothing launched", alias);
    }
    let mut doc = serde_json::to_value(&ensured.report)?;
    if let Some(fields) = doc.as_object_mut() {
        fields.insert("changed".into(), ensured.launched.into());
    }
    output::print_json(&doc)?;
    Ok(0)
}
