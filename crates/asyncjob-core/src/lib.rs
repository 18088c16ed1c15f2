pub mod alias;
pub mod config;
pub mod error;
pub mod job;
pub mod kill;
pub mod launcher;
pub mod liveness;
pub mod orchestrator;
pub mod record;
pub mod tracker;

pub use alias::AliasIndex;
pub use config::Config;
pub use error::{ErrorKind, JobError};
pub use job::{CommandSpec, JobId, JobState, Target};
pub use kill::KillController;
pub use launcher::Launcher;
pub use liveness::{ProcessTable, SystemProcessTable};
pub use orchestrator::{CleanupMode, Ensured, Orchestrator, StalePolicy, WaitOptions};
pub use record::{JobRecord, JobStore};
pub use tracker::{StatusMode, StatusReport, Tracker};
