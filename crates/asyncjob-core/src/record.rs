use crate::alias::ALIAS_PREFIX;
use crate::error::JobError;
use crate::job::{JobId, JobState};
use serde_json::{Map, Value};
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

/// Keys the lifecycle protocol owns. Everything else is executor payload.
pub const CONTROL_KEYS: [&str; 5] = ["started", "finished", "failed", "killed", "job_id"];

/// One job's state document, as written by the executor and the kill path.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobRecord(Map<String, Value>);

impl JobRecord {
    pub fn new() -> Self {
        Self(Map::new())
    }

    pub fn from_map(map: Map<String, Value>) -> Self {
        Self(map)
    }

    /// The record an executor writes before the command has produced anything.
    pub fn placeholder(jid: &JobId, results_file: &Path) -> Self {
        let mut map = Map::new();
        map.insert("started".into(), Value::from(1));
        map.insert("finished".into(), Value::from(0));
        map.insert("job_id".into(), Value::from(jid.as_str()));
        map.insert(
            "results_file".into(),
            Value::from(results_file.to_string_lossy().into_owned()),
        );
        Self(map)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }

    /// Truthiness of a flag field. Executors write these as bools, ints or strings.
    pub fn flag(&self, key: &str) -> bool {
        match self.0.get(key) {
            Some(Value::Bool(b)) => *b,
            Some(Value::Number(n)) => n.as_f64().is_some_and(|v| v != 0.0),
            Some(Value::String(s)) => matches!(
                s.to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            ),
            _ => false,
        }
    }

    pub fn rc(&self) -> Option<i64> {
        match self.0.get("rc") {
            Some(Value::Number(n)) => n.as_i64(),
            Some(Value::String(s)) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// A record carrying `started` without a truthy `finished` is still running.
    /// Anything else was produced by the executor's final flush.
    pub fn is_running_marker(&self) -> bool {
        self.0.contains_key("started") && !self.flag("finished")
    }

    pub fn is_failed(&self) -> bool {
        self.flag("failed") || self.rc().is_some_and(|rc| rc != 0)
    }

    /// State as far as the document alone can tell. `Running` still has to
    /// be confirmed against the process table.
    pub fn state(&self) -> JobState {
        if self.flag("killed") {
            JobState::Killed
        } else if self.is_running_marker() {
            JobState::Running
        } else if self.is_failed() {
            JobState::Failed
        } else {
            JobState::Finished
        }
    }

    /// Field-wise union; `overlay` wins on conflicts.
    pub fn merge(&mut self, overlay: Map<String, Value>) {
        for (k, v) in overlay {
            self.0.insert(k, v);
        }
    }

    /// Payload fields, i.e. everything but the control keys.
    pub fn payload(&self) -> Map<String, Value> {
        self.0
            .iter()
            .filter(|(k, _)| !CONTROL_KEYS.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

/// Directory of job records, `<root>/<jid>`. No caching: every call hits disk.
#[derive(Debug, Clone)]
pub struct JobStore {
    root: PathBuf,
}

impl JobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path(&self, jid: &JobId) -> PathBuf {
        self.root.join(jid.as_str())
    }

    pub fn exists(&self, jid: &JobId) -> bool {
        self.path(jid).exists()
    }

    /// Replace the record atomically: temp file in the same directory, fsync, rename.
    pub fn write(&self, jid: &JobId, record: &JobRecord) -> Result<(), JobError> {
        fs::create_dir_all(&self.root).map_err(|e| JobError::io(&self.root, e))?;
        let path = self.path(jid);
        let data = serde_json::to_vec(record.fields())?;
        let tmp = self.temp_path(jid);

        if let Err(e) = write_synced(&tmp, &data) {
            let _ = fs::remove_file(&tmp);
            return Err(JobError::io(&tmp, e));
        }
        if let Err(e) = fs::rename(&tmp, &path) {
            let _ = fs::remove_file(&tmp);
            return Err(JobError::io(&path, e));
        }
        sync_dir(&self.root);
        debug!("Wrote job record {}", path.display());
        Ok(())
    }

    /// Create the directory if needed and prove a record can be created in
    /// it, so a launcher can fail with the real I/O error and path before
    /// handing the job to a wrapper.
    pub fn check_writable(&self) -> Result<(), JobError> {
        fs::create_dir_all(&self.root).map_err(|e| JobError::io(&self.root, e))?;
        let probe = self.root.join(format!(".writable-{}", std::process::id()));
        OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&probe)
            .map_err(|e| JobError::io(&self.root, e))?;
        let _ = fs::remove_file(&probe);
        Ok(())
    }

    /// `Ok(None)` means the executor has not produced the record yet.
    pub fn read(&self, jid: &JobId) -> Result<Option<JobRecord>, JobError> {
        let path = self.path(jid);
        let data = match fs::read(&path) {
            Ok(d) => d,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(JobError::io(&path, e)),
        };
        if data.iter().all(u8::is_ascii_whitespace) {
            return Ok(None);
        }
        match serde_json::from_slice::<Value>(&data) {
            Ok(Value::Object(map)) => Ok(Some(JobRecord(map))),
            Ok(_) => Err(JobError::CorruptRecord {
                path,
                source: serde::de::Error::custom("record is not a JSON object"),
            }),
            Err(source) => Err(JobError::CorruptRecord { path, source }),
        }
    }

    /// Read-modify-write merge under the same temp+rename discipline.
    ///
    /// Two overlays racing on one job still resolve last-rename-wins; the
    /// read-modify-write only guarantees neither blindly drops the other's
    /// earlier fields.
    pub fn overlay(
        &self,
        jid: &JobId,
        fields: Map<String, Value>,
    ) -> Result<JobRecord, JobError> {
        let mut record = self.read(jid)?.unwrap_or_default();
        record.merge(fields);
        self.write(jid, &record)?;
        Ok(record)
    }

    /// Idempotent. Returns whether a file was removed.
    pub fn remove(&self, jid: &JobId) -> Result<bool, JobError> {
        let path = self.path(jid);
        match fs::remove_file(&path) {
            Ok(()) => {
                debug!("Erased job record {}", path.display());
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(JobError::io(&path, e)),
        }
    }

    /// Every job id with a record in the directory, oldest first.
    pub fn list(&self) -> Result<Vec<JobId>, JobError> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(JobError::io(&self.root, e)),
        };
        let mut jids = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| JobError::io(&self.root, e))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') || name.starts_with(ALIAS_PREFIX) {
                continue;
            }
            match JobId::parse(&name) {
                Ok(jid) => jids.push(jid),
                Err(_) => warn!("Skipping unrecognised entry {}", entry.path().display()),
            }
        }
        jids.sort();
        Ok(jids)
    }

    fn temp_path(&self, jid: &JobId) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        self.root
            .join(format!(".{}.tmp-{}-{}", jid, std::process::id(), nanos))
    }
}

fn write_synced(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
    file.write_all(data)?;
    file.sync_all()
}

fn sync_dir(dir: &Path) {
    if let Err(e) = File::open(dir).and_then(|d| d.sync_all()) {
        debug!("Directory fsync on {} failed: {}", dir.display(), e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(v: Value) -> JobRecord {
        match v {
            Value::Object(map) => JobRecord::from_map(map),
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_placeholder_is_running() {
        let jid = JobId::parse("100.5").unwrap();
        let rec = JobRecord::placeholder(&jid, Path::new("/tmp/100.5"));
        assert_eq!(rec.state(), JobState::Running);
    }

    #[test]
    fn test_record_without_started_is_finished() {
        assert_eq!(record(json!({"rc": 0, "stdout": "x"})).state(), JobState::Finished);
        assert_eq!(record(json!({"rc": 2})).state(), JobState::Failed);
        assert_eq!(record(json!({"failed": true})).state(), JobState::Failed);
    }

    #[test]
    fn test_killed_takes_precedence_over_finished() {
        let rec = record(json!({"started": 1, "finished": 1, "rc": 0, "killed": true}));
        assert_eq!(rec.state(), JobState::Killed);
        assert_eq!(rec.payload().get("rc"), Some(&json!(0)));
    }

    #[test]
    fn test_flags_accept_common_encodings() {
        let rec = record(json!({"a": 1, "b": "true", "c": 0, "d": false, "e": "no"}));
        assert!(rec.flag("a") && rec.flag("b"));
        assert!(!rec.flag("c") && !rec.flag("d") && !rec.flag("e") && !rec.flag("missing"));
    }
}
