mod common;

#[cfg(test)]
mod tests {
    use super::common::fields;
    use asyncjob_core::error::JobError;
    use asyncjob_core::job::{JobId, JobState};
    use asyncjob_core::record::{JobRecord, JobStore};
    use serde_json::json;
    use tempfile::TempDir;

    fn jid(s: &str) -> JobId {
        JobId::parse(s).unwrap()
    }

    #[test]
    fn test_read_missing_record_is_not_started() {
        let dir = TempDir::new().unwrap();
        let store = JobStore::new(dir.path());
        assert!(store.read(&jid("1700000000.1.123")).unwrap().is_none());
    }

    #[test]
    fn test_write_then_read() {
        let dir = TempDir::new().unwrap();
        let store = JobStore::new(dir.path());
        let id = jid("1700000000.1.123");
        let record = JobRecord::placeholder(&id, &store.path(&id));
        store.write(&id, &record).unwrap();

        let read = store.read(&id).unwrap().unwrap();
        assert_eq!(read, record);
        assert_eq!(read.state(), JobState::Running);
        assert!(store.path(&id).exists());
    }

    #[test]
    fn test_write_leaves_no_temp_files() {
        let dir = TempDir::new().unwrap();
        let store = JobStore::new(dir.path());
        let id = jid("1700000000.1.123");
        for rc in 0..5 {
            let mut record = JobRecord::new();
            record.set("rc", rc);
            store.write(&id, &record).unwrap();
        }
        let names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec![id.to_string()]);
    }

    #[test]
    fn test_overlay_is_fieldwise_union() {
        let dir = TempDir::new().unwrap();
        let store = JobStore::new(dir.path());
        let id = jid("1700000000.1.123");
        store
            .write(
                &id,
                &JobRecord::from_map(fields(json!({"started": 1, "finished": 0, "rc": 0, "stdout": "a"}))),
            )
            .unwrap();

        store
            .overlay(&id, fields(json!({"killed": true, "stdout": "b"})))
            .unwrap();

        let read = store.read(&id).unwrap().unwrap();
        assert_eq!(
            read.fields(),
            &fields(json!({"started": 1, "finished": 0, "rc": 0, "stdout": "b", "killed": true}))
        );
        assert_eq!(read.state(), JobState::Killed);
    }

    #[test]
    fn test_corrupt_record_is_an_error() {
        let dir = TempDir::new().unwrap();
        let store = JobStore::new(dir.path());
        let id = jid("1700000000.1.123");
        std::fs::write(store.path(&id), "{\"started\": 1, \"fini").unwrap();

        match store.read(&id) {
            Err(JobError::CorruptRecord { path, .. }) => assert_eq!(path, store.path(&id)),
            other => panic!("expected CorruptRecord, got {other:?}"),
        }
    }

    #[test]
    fn test_non_object_record_is_corrupt() {
        let dir = TempDir::new().unwrap();
        let store = JobStore::new(dir.path());
        let id = jid("1700000000.1.123");
        std::fs::write(store.path(&id), "[1, 2]").unwrap();
        assert!(matches!(store.read(&id), Err(JobError::CorruptRecord { .. })));
    }

    #[test]
    fn test_empty_file_reads_as_not_written() {
        let dir = TempDir::new().unwrap();
        let store = JobStore::new(dir.path());
        let id = jid("1700000000.1.123");
        std::fs::write(store.path(&id), "").unwrap();
        assert!(store.read(&id).unwrap().is_none());
    }

    #[test]
    fn test_remove_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = JobStore::new(dir.path());
        let id = jid("1700000000.1.123");
        store.write(&id, &JobRecord::new()).unwrap();
        assert!(store.remove(&id).unwrap());
        assert!(!store.remove(&id).unwrap());
        assert!(!store.exists(&id));
    }

    #[test]
    fn test_list_skips_aliases_and_temp_files() {
        let dir = TempDir::new().unwrap();
        let store = JobStore::new(dir.path());
        let a = jid("1700000000.1.10");
        let b = jid("1700000001.2.11");
        store.write(&b, &JobRecord::new()).unwrap();
        store.write(&a, &JobRecord::new()).unwrap();
        std::fs::write(dir.path().join(".1700000000.1.10.tmp-1-2"), "{").unwrap();
        std::os::unix::fs::symlink(store.path(&a), dir.path().join("alias:x")).unwrap();

        assert_eq!(store.list().unwrap(), vec![a, b]);
    }

    #[test]
    fn test_list_of_missing_dir_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = JobStore::new(dir.path().join("nope"));
        assert!(store.list().unwrap().is_empty());
    }
}
