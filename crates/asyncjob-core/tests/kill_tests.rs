mod common;

#[cfg(test)]
mod tests {
    use super::common::{fields, finish, FakeProcessTable};
    use asyncjob_core::error::ErrorKind;
    use asyncjob_core::job::{JobId, JobState, Target};
    use asyncjob_core::kill::KillController;
    use asyncjob_core::record::JobRecord;
    use asyncjob_core::tracker::Tracker;
    use std::sync::Arc;
    use tempfile::TempDir;

    const SIGTERM: i32 = 15;

    fn setup() -> (TempDir, Arc<FakeProcessTable>, Tracker, KillController, JobId) {
        let dir = TempDir::new().unwrap();
        let procs = FakeProcessTable::new();
        let tracker = Tracker::new(dir.path(), procs.clone());
        let jid = JobId::parse("1700000000.750000.6262").unwrap();
        tracker
            .store()
            .write(&jid, &JobRecord::placeholder(&jid, &tracker.store().path(&jid)))
            .unwrap();
        tracker.aliases().link("x", &jid).unwrap();
        let killer = KillController::new(tracker.clone());
        (dir, procs, tracker, killer, jid)
    }

    #[tokio::test]
    async fn test_kill_running_job_signals_group() {
        let (_dir, procs, tracker, killer, jid) = setup();
        procs.spawn_wrapper(&jid);

        let report = killer.kill(&Target::Alias("x".into()), SIGTERM).await.unwrap();
        assert!(report.killed);
        assert_eq!(report.state, JobState::Killed);
        assert_eq!(procs.signals(), vec![(jid.pid(), SIGTERM)]);

        let record = tracker.store().read(&jid).unwrap().unwrap();
        assert!(record.flag("killed"));
        assert!(record.flag("started"));
    }

    #[tokio::test]
    async fn test_kill_twice_is_idempotent() {
        let (_dir, procs, _tracker, killer, jid) = setup();
        procs.spawn_wrapper(&jid);
        let target = Target::Alias("x".into());

        let first = killer.kill(&target, SIGTERM).await.unwrap();
        let second = killer.kill(&target, SIGTERM).await.unwrap();
        assert!(first.killed);
        assert!(second.killed);
        assert_eq!(procs.signals().len(), 1);
    }

    #[tokio::test]
    async fn test_kill_signals_reconciled_wrappers() {
        let (_dir, procs, _tracker, killer, jid) = setup();
        procs.add_wrapper(&jid, 9001);
        procs.add_wrapper(&jid, 9002);

        let report = killer.kill(&Target::Jid(jid.clone()), SIGTERM).await.unwrap();
        assert!(report.killed);
        assert_eq!(procs.signals(), vec![(9001, SIGTERM), (9002, SIGTERM)]);
    }

    #[tokio::test]
    async fn test_kill_survives_process_exiting_first() {
        let (_dir, procs, tracker, killer, jid) = setup();
        // Scan still lists the wrapper, but it is gone by the time the signal lands.
        procs.add_wrapper(&jid, jid.pid());

        let report = killer.kill(&Target::Alias("x".into()), SIGTERM).await.unwrap();
        assert!(report.killed);
        assert!(tracker.store().read(&jid).unwrap().unwrap().flag("killed"));
    }

    #[tokio::test]
    async fn test_kill_finished_job_is_noop() {
        let (_dir, procs, tracker, killer, jid) = setup();
        finish(tracker.store(), &jid, 0);

        let report = killer.kill(&Target::Alias("x".into()), SIGTERM).await.unwrap();
        assert!(!report.killed);
        assert_eq!(report.state, JobState::Finished);
        assert!(procs.signals().is_empty());
        assert!(!tracker.store().read(&jid).unwrap().unwrap().flag("killed"));
    }

    #[tokio::test]
    async fn test_kill_unregistered_alias_reports_not_started() {
        let (_dir, procs, _tracker, killer, _jid) = setup();

        let report = killer.kill(&Target::Alias("other".into()), SIGTERM).await.unwrap();
        assert!(!report.killed);
        assert_eq!(report.state, JobState::NotStarted);
        assert!(procs.signals().is_empty());
    }

    #[tokio::test]
    async fn test_kill_marks_record_before_permission_failure() {
        let (_dir, procs, tracker, killer, jid) = setup();
        procs.add_wrapper(&jid, 4444);
        procs.set_alive(4444);
        procs.deny(4444);

        let err = killer.kill(&Target::Alias("x".into()), SIGTERM).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PermissionDenied);
        assert!(tracker.store().read(&jid).unwrap().unwrap().flag("killed"));
    }

    #[tokio::test]
    async fn test_kill_vanished_wrapper_records_intent() {
        let (_dir, procs, tracker, killer, jid) = setup();

        let report = killer.kill(&Target::Alias("x".into()), SIGTERM).await.unwrap();
        assert!(report.killed);
        assert!(procs.signals().is_empty());
        let record = tracker.store().read(&jid).unwrap().unwrap();
        assert!(record.flag("killed"));
        assert!(!record.flag("finished"));
    }

    #[tokio::test]
    async fn test_kill_racing_natural_finish_keeps_payload() {
        let (_dir, procs, tracker, killer, jid) = setup();
        procs.spawn_wrapper(&jid);
        let target = Target::Alias("x".into());

        killer.kill(&target, SIGTERM).await.unwrap();
        // Executor's final flush lands after the kill overlay.
        finish(tracker.store(), &jid, 0);

        let report = tracker.status(&target).await.unwrap();
        assert_eq!(report.state, JobState::Killed);
        assert!(report.killed && report.finished);
        assert_eq!(report.payload.get("stdout"), Some(&serde_json::json!("done")));
    }

    #[tokio::test]
    async fn test_kill_reapplied_after_blind_final_write() {
        let (_dir, procs, tracker, killer, jid) = setup();
        procs.spawn_wrapper(&jid);

        // The executor's last write replaces the whole record without reading
        // it, landing between the kill overlay and the re-check.
        let store = tracker.store().clone();
        let blind = jid.clone();
        procs.on_signal(move |_| {
            let record = JobRecord::from_map(fields(serde_json::json!({
                "started": 1,
                "finished": 1,
                "rc": 0,
                "stdout": "done",
            })));
            store.write(&blind, &record).unwrap();
        });

        let report = killer
            .kill(&Target::Alias("x".into()), SIGTERM)
            .await
            .unwrap();
        assert_eq!(report.state, JobState::Killed);
        assert!(report.killed);

        let record = tracker.store().read(&jid).unwrap().unwrap();
        assert!(record.flag("killed"));
        assert_eq!(record.rc(), Some(0));
        assert_eq!(record.get("stdout"), Some(&serde_json::json!("done")));
    }
}
