use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;
mod dispatch;
mod output;

#[derive(Parser)]
#[command(name = "asyncjob")]
#[command(about = "Start, poll, kill and clean up background jobs tracked in a shared directory", long_about = None)]
struct Cli {
    /// Job directory (overrides ASYNCJOB_DIR and the config file)
    #[arg(long, global = true)]
    dir: Option<PathBuf>,

    /// Config file (default: ~/.config/asyncjob/config.yaml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// More logging on stderr
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

/// Exactly one of --jid / --alias.
#[derive(Args, Debug)]
pub struct TargetArgs {
    /// Job id
    #[arg(long)]
    pub jid: Option<String>,

    /// Job alias
    #[arg(long)]
    pub alias: Option<String>,
}

#[derive(Args, Debug)]
pub struct CommandArgs {
    /// Shell script, run with `sh -c`
    #[arg(long)]
    pub shell: Option<String>,

    /// Working directory for the command
    #[arg(long)]
    pub chdir: Option<PathBuf>,

    /// Extra environment, KEY=VALUE (repeatable)
    #[arg(long = "env", value_name = "KEY=VALUE")]
    pub env: Vec<String>,

    /// Kill the job after this many seconds
    #[arg(long = "async", value_name = "SECS")]
    pub async_timeout: Option<u64>,

    /// Program and arguments, after `--`
    #[arg(last = true)]
    pub argv: Vec<String>,
}

#[derive(Args, Debug)]
pub struct WaitArgs {
    /// Maximum number of polls
    #[arg(long)]
    pub retries: Option<u32>,

    /// Seconds between polls
    #[arg(long)]
    pub delay: Option<u64>,

    /// What to erase once the job is done: alias or full
    #[arg(long)]
    pub cleanup: Option<String>,

    /// Leave failed and killed jobs in place for inspection
    #[arg(long)]
    pub keep_on_failure: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Launch a job under an alias unless one is already registered
    Start {
        /// Alias to register the job under
        alias: String,

        #[command(flatten)]
        command: CommandArgs,
    },

    /// Start (or find) a job, wait for it and clean up
    Run {
        /// Alias to register the job under
        alias: String,

        #[command(flatten)]
        command: CommandArgs,

        #[command(flatten)]
        wait: WaitArgs,

        /// Return once the job is running instead of waiting for it
        #[arg(long)]
        no_wait: bool,
    },

    /// Show job status, optionally erasing a finished job
    Status {
        #[command(flatten)]
        target: TargetArgs,

        /// status, cleanup or full_cleanup
        #[arg(long, default_value = "status")]
        mode: String,
    },

    /// Poll a job until it finishes, then clean up
    Wait {
        #[command(flatten)]
        target: TargetArgs,

        #[command(flatten)]
        wait: WaitArgs,
    },

    /// Kill a running job and everything it spawned
    Kill {
        #[command(flatten)]
        target: TargetArgs,

        /// Signal name or number (default from config, TERM)
        #[arg(short, long)]
        signal: Option<String>,
    },

    /// Register an existing job under an alias
    Alias {
        /// Job id
        jid: String,

        /// Alias name
        name: String,
    },

    /// List job records and aliases
    List {
        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Show or initialise the config file
    Config {
        /// Print the config file path
        #[arg(long)]
        path: bool,

        /// Write a sample config
        #[arg(long)]
        init: bool,
    },

    /// Supervise one job (started by the launcher)
    #[command(hide = true)]
    Wrap {
        #[arg(long = "job-stamp")]
        job_stamp: String,

        #[arg(long)]
        timeout: Option<u64>,

        #[arg(long)]
        chdir: Option<PathBuf>,

        #[arg(last = true, required = true)]
        argv: Vec<String>,
    },
}

fn init_tracing(verbose: u8) {
    let default = if verbose > 0 { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_env("ASYNCJOB_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    // While wrapping, stdout is the launcher's handshake pipe.
    let wrapping = matches!(cli.command, Commands::Wrap { .. });
    let code = match run(cli).await {
        Ok(code) => code,
        Err(e) if wrapping => output::report_to_stderr(&e),
        Err(e) => output::print_error(&e),
    };
    std::process::exit(code);
}

async fn run(cli: Cli) -> Result<i32> {
    use Commands::*;

    let ctx = dispatch::Context::load(cli.config.as_deref(), cli.dir.as_deref())?;

    match cli.command {
        Start { alias, command } => commands::start(&ctx, &alias, &command).await,
        Run {
            alias,
            command,
            wait,
            no_wait,
        } => commands::run(&ctx, &alias, &command, &wait, no_wait).await,
        Status { target, mode } => commands::status(&ctx, &target, &mode).await,
        Wait { target, wait } => commands::wait(&ctx, &target, &wait).await,
        Kill { target, signal } => commands::kill(&ctx, &target, signal.as_deref()).await,
        Alias { jid, name } => commands::alias(&ctx, &jid, &name),
        List { json } => commands::list(&ctx, json),
        Config { path, init } => commands::config(&ctx, path, init),
        Wrap {
            job_stamp,
            timeout,
            chdir,
            argv,
        } => commands::wrap(&ctx, job_stamp, timeout, chdir, argv).await,
    }
}
