use crate::error::JobError;
use crate::job::{JobState, Target};
use crate::tracker::{StatusReport, Tracker};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

/// Durably marks a job killed, then signals its process groups.
#[derive(Clone)]
pub struct KillController {
    tracker: Tracker,
}

impl KillController {
    pub fn new(tracker: Tracker) -> Self {
        Self { tracker }
    }

    /// Idempotent: a job that is already terminal is reported as-is.
    pub async fn kill(&self, target: &Target, signal: i32) -> Result<StatusReport, JobError> {
        let located = match self.tracker.locate(target)? {
            Some(located) => located,
            None => {
                debug!("{} is not registered, nothing to kill", target);
                return self.tracker.status(target).await;
            }
        };

        let (state, owners) = match self.tracker.inspect(&located).await {
            Ok(inspection) => (inspection.state, inspection.owners),
            // No wrapper left to signal, but the kill intent still gets recorded.
            Err(JobError::ProcessVanished { jid, .. }) => {
                warn!("Job {} has no live wrapper; recording kill without signalling", jid);
                (JobState::Running, Vec::new())
            }
            Err(e) => return Err(e),
        };

        match state {
            JobState::Running => {}
            JobState::NotStarted => {
                debug!("Job {} has not written its record yet, nothing to kill", located.jid);
                return self.tracker.status(target).await;
            }
            terminal => {
                debug!("Job {} is already {}, nothing to kill", located.jid, terminal);
                return self.tracker.status(target).await;
            }
        }

        // Record intent before signalling so a crash in between still reads as killed.
        let mut fields = Map::new();
        fields.insert("killed".into(), Value::Bool(true));
        fields.insert("signal".into(), Value::from(signal));
        self.tracker.store().overlay(&located.jid, fields.clone())?;

        for pid in &owners {
            match self.tracker.procs().signal_group(*pid, signal).await? {
                true => info!("Sent signal {} to process group of {} (job {})", signal, pid, located.jid),
                false => debug!("Process group of {} already gone (job {})", pid, located.jid),
            }
        }

        // The executor's final write may have renamed over our overlay.
        let overwritten = self
            .tracker
            .store()
            .read(&located.jid)?
            .is_some_and(|record| !record.flag("killed"));
        if overwritten {
            warn!("Kill mark on job {} was overwritten by a concurrent finish, re-applying", located.jid);
            self.tracker.store().overlay(&located.jid, fields)?;
        }

        self.tracker.status(target).await
    }
}
