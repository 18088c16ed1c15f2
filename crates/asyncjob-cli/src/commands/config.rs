use crate::dispatch::Context;
use crate::output;
use serde_json::json;

const SAMPLE_CONFIG: &str = r#"# asyncjob configuration

# Directory holding job records and aliases (overridden by ASYNCJOB_DIR or --dir)
async_dir: ~/.asyncjob

wait:
  retries: 100
  delay_secs: 5
  # full: erase alias and record once done; alias: erase only the alias
  cleanup: full
  # false keeps failed and killed jobs around for inspection
  cleanup_on_failure: true

kill_signal: TERM

# What `start`/`run` do when the alias points at a killed job: fail | relaunch
stale_alias: fail

launcher:
  # wrapper_program: /usr/local/bin/asyncjob
  handshake_timeout_secs: 10
"#;

pub fn run(ctx: &Context, path: bool, init: bool) -> anyhow::Result<i32> {
    if path {
        println!("{}", ctx.config_path.display());
        return Ok(0);
    }

    if init {
        let config_path = &ctx.config_path;
        if config_path.exists() {
            println!("Config already exists at: {}", config_path.display());
            println!("Remove it first if you want to reinitialize.");
            return Ok(0);
        }

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(config_path, SAMPLE_CONFIG)?;
        println!("Sample config written to: {}", config_path.display());
        return Ok(0);
    }

    output::print_json(&json!({
        "config_path": ctx.config_path,
        "config_found": ctx.config_path.exists(),
        "job_dir": ctx.root,
        "config": ctx.config,
    }))?;
    Ok(0)
}
