use crate::dispatch::Context;
use crate::output;
use asyncjob_core::error::JobError;
use asyncjob_core::{AliasIndex, JobId, JobStore};
use serde_json::json;

pub fn run(ctx: &Context, jid: &str, name: &str) -> anyhow::Result<i32> {
    let jid = JobId::parse(jid)?;
    let store = JobStore::new(&ctx.root);
    if !store.exists(&jid) {
        return Err(JobError::JobNotFound(format!(
            "no record for job {} at {}",
            jid,
            store.path(&jid).display()
        ))
        .into());
    }

    let path = AliasIndex::new(&ctx.root).link(name, &jid)?;
    output::print_json(&json!({
        "changed": true,
        "job_id": jid,
        "alias": name,
        "alias_path": path,
        "results_file": store.path(&jid),
    }))?;
    Ok(0)
}
