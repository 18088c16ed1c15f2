use crate::dispatch::Context;
use crate::output;
use asyncjob_core::{AliasIndex, JobId, JobState, JobStore};
use serde::Serialize;
use std::path::PathBuf;
use tracing::warn;

#[derive(Serialize)]
struct JobRow {
    job_id: JobId,
    state: Option<JobState>,
    aliases: Vec<String>,
    results_file: PathBuf,
}

#[derive(Serialize)]
struct AliasRow {
    alias: String,
    job_id: Option<JobId>,
    dangling: bool,
    alias_path: PathBuf,
}

#[derive(Serialize)]
struct Listing {
    jobs: Vec<JobRow>,
    aliases: Vec<AliasRow>,
}

/// Records and aliases as they are on disk. States come from the record
/// alone; use `status` for a liveness-checked answer.
pub fn run(ctx: &Context, json: bool) -> anyhow::Result<i32> {
    let store = JobStore::new(&ctx.root);
    let aliases = AliasIndex::new(&ctx.root).list()?;

    let mut jobs = Vec::new();
    for jid in store.list()? {
        let state = match store.read(&jid) {
            Ok(record) => Some(record.map(|r| r.state()).unwrap_or(JobState::NotStarted)),
            Err(e) => {
                warn!("Skipping unreadable record {}: {}", jid, e);
                None
            }
        };
        jobs.push(JobRow {
            aliases: aliases
                .iter()
                .filter(|a| a.jid.as_ref() == Some(&jid))
                .map(|a| a.name.clone())
                .collect(),
            results_file: store.path(&jid),
            job_id: jid,
            state,
        });
    }
    let listing = Listing {
        jobs,
        aliases: aliases
            .into_iter()
            .map(|a| AliasRow {
                alias: a.name,
                job_id: a.jid,
                dangling: a.dangling,
                alias_path: a.path,
            })
            .collect(),
    };

    if json {
        output::print_json(&listing)?;
        return Ok(0);
    }

    if listing.jobs.is_empty() && listing.aliases.is_empty() {
        println!("No jobs in {}.", ctx.root.display());
        return Ok(0);
    }
    println!("{:<32} {:<12} {:<20}", "JOB ID", "STATE", "ALIASES");
    println!("{}", "-".repeat(64));
    for job in &listing.jobs {
        println!(
            "{:<32} {:<12} {:<20}",
            job.job_id,
            job.state.map(|s| s.to_string()).unwrap_or_else(|| "corrupt".into()),
            job.aliases.join(","),
        );
    }
    for alias in listing.aliases.iter().filter(|a| a.dangling) {
        println!("dangling alias: {} -> {}", alias.alias, alias.alias_path.display());
    }
    Ok(0)
}
