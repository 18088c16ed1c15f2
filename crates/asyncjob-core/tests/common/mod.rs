#![allow(dead_code)]

use asyncjob_core::error::JobError;
use asyncjob_core::job::{CommandSpec, JobId};
use asyncjob_core::launcher::Launcher;
use asyncjob_core::liveness::ProcessTable;
use asyncjob_core::record::{JobRecord, JobStore};
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

type SignalHook = Box<dyn Fn(u32) + Send + Sync>;

/// In-memory process table: which pids answer a zero-signal probe, which
/// pids show up in a scan for a job, and which signals were delivered.
#[derive(Default)]
pub struct FakeProcessTable {
    alive: Mutex<HashSet<u32>>,
    wrappers: Mutex<HashMap<String, Vec<u32>>>,
    denied: Mutex<HashSet<u32>>,
    signals: Mutex<Vec<(u32, i32)>>,
    on_signal: Mutex<Option<SignalHook>>,
}

impl FakeProcessTable {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_alive(&self, pid: u32) {
        self.alive.lock().unwrap().insert(pid);
    }

    pub fn set_dead(&self, pid: u32) {
        self.alive.lock().unwrap().remove(&pid);
    }

    pub fn add_wrapper(&self, jid: &JobId, pid: u32) {
        self.wrappers
            .lock()
            .unwrap()
            .entry(jid.stamp().to_string())
            .or_default()
            .push(pid);
    }

    pub fn clear_wrappers(&self, jid: &JobId) {
        self.wrappers.lock().unwrap().remove(jid.stamp());
    }

    /// A wrapper that is alive and findable under its own pid.
    pub fn spawn_wrapper(&self, jid: &JobId) {
        self.set_alive(jid.pid());
        self.add_wrapper(jid, jid.pid());
    }

    pub fn deny(&self, pid: u32) {
        self.denied.lock().unwrap().insert(pid);
    }

    pub fn signals(&self) -> Vec<(u32, i32)> {
        self.signals.lock().unwrap().clone()
    }

    /// Run `hook` with the pid each time a signal is delivered, standing in
    /// for whatever the dying process does on its way out.
    pub fn on_signal(&self, hook: impl Fn(u32) + Send + Sync + 'static) {
        *self.on_signal.lock().unwrap() = Some(Box::new(hook));
    }
}

#[async_trait::async_trait]
impl ProcessTable for FakeProcessTable {
    async fn is_alive(&self, pid: u32) -> Result<bool, JobError> {
        if self.denied.lock().unwrap().contains(&pid) {
            return Err(JobError::PermissionDenied {
                pid: pid as i32,
                op: "signal",
            });
        }
        Ok(self.alive.lock().unwrap().contains(&pid))
    }

    async fn find_by_job_id(&self, jid: &JobId) -> Result<Vec<u32>, JobError> {
        Ok(self
            .wrappers
            .lock()
            .unwrap()
            .get(jid.stamp())
            .cloned()
            .unwrap_or_default())
    }

    async fn signal_group(&self, pid: u32, signal: i32) -> Result<bool, JobError> {
        if self.denied.lock().unwrap().contains(&pid) {
            return Err(JobError::PermissionDenied {
                pid: pid as i32,
                op: "signal",
            });
        }
        self.signals.lock().unwrap().push((pid, signal));
        let was_alive = self.alive.lock().unwrap().remove(&pid);
        for pids in self.wrappers.lock().unwrap().values_mut() {
            pids.retain(|p| *p != pid);
        }
        if let Some(hook) = self.on_signal.lock().unwrap().as_ref() {
            hook(pid);
        }
        Ok(was_alive)
    }
}

/// Launcher that writes the placeholder record itself and registers a fake
/// wrapper process, so no real process is ever started.
pub struct FakeLauncher {
    store: JobStore,
    procs: Arc<FakeProcessTable>,
    next_pid: AtomicU32,
    launches: AtomicU32,
}

impl FakeLauncher {
    pub fn new(store: JobStore, procs: Arc<FakeProcessTable>) -> Arc<Self> {
        Arc::new(Self {
            store,
            procs,
            next_pid: AtomicU32::new(40_000),
            launches: AtomicU32::new(0),
        })
    }

    pub fn launches(&self) -> u32 {
        self.launches.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Launcher for FakeLauncher {
    fn name(&self) -> &str {
        "fake"
    }

    async fn launch(
        &self,
        _spec: &CommandSpec,
        _async_timeout: Option<Duration>,
    ) -> Result<JobId, JobError> {
        let pid = self.next_pid.fetch_add(1, Ordering::SeqCst);
        let jid = JobId::from_parts(&JobId::new_stamp(), pid);
        self.store
            .write(&jid, &JobRecord::placeholder(&jid, &self.store.path(&jid)))?;
        self.procs.spawn_wrapper(&jid);
        self.launches.fetch_add(1, Ordering::SeqCst);
        Ok(jid)
    }
}

pub fn fields(v: Value) -> Map<String, Value> {
    match v {
        Value::Object(map) => map,
        other => panic!("expected an object, got {other}"),
    }
}

/// Overlay the executor's final flush onto a running job.
pub fn finish(store: &JobStore, jid: &JobId, rc: i64) {
    store
        .overlay(
            jid,
            fields(serde_json::json!({
                "finished": 1,
                "rc": rc,
                "stdout": "done",
                "failed": rc != 0,
            })),
        )
        .unwrap();
}
