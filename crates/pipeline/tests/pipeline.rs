use std::fs;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use anyhow::bail;
use file_system::{ChangeCategories, FileSystemCollector};
use pipeline::{
    export_comparison, export_monitor, resolve_latest, resolve_latest_pair, run_collect, run_compare, run_monitor,
    CollectOptions, CollectorStatus, MonitorSession, PipelineError,
};
use run_store::{ComparisonStatus, Db, RunMeta, StoreError};
use surface_core::{
    ChangeType, CollectContext, Collector, Emitter, FileMonitorEvent, FileSystemObject, Filter, OpenPortObject,
    Record, ResultType, RunType,
};

struct Fake {
    name: &'static str,
    kind: ResultType,
    records: Vec<Record>,
    fail: bool,
    supported: bool,
}

impl Fake {
    fn new(name: &'static str, kind: ResultType, records: Vec<Record>) -> Box<dyn Collector> {
        Box::new(Fake { name, kind, records, fail: false, supported: true })
    }

    fn failing(name: &'static str, kind: ResultType, records: Vec<Record>) -> Box<dyn Collector> {
        Box::new(Fake { name, kind, records, fail: true, supported: true })
    }

    fn unsupported(name: &'static str, kind: ResultType) -> Box<dyn Collector> {
        Box::new(Fake { name, kind, records: Vec::new(), fail: false, supported: false })
    }
}

impl Collector for Fake {
    fn name(&self) -> &'static str {
        self.name
    }

    fn kind(&self) -> ResultType {
        self.kind
    }

    fn can_run_on_platform(&self) -> bool {
        self.supported
    }

    fn collect(&self, _ctx: &CollectContext<'_>, out: &mut Emitter<'_>) -> anyhow::Result<()> {
        for r in &self.records {
            out.emit(r.clone());
        }
        if self.fail {
            bail!("source went away");
        }
        Ok(())
    }
}

fn file(path: &str, size: u64) -> Record {
    FileSystemObject { path: path.into(), size: Some(size), ..Default::default() }.into()
}

fn port(port: u16) -> Record {
    OpenPortObject {
        family: "InterNetwork".into(),
        address: "0.0.0.0".into(),
        transport: "tcp".into(),
        port,
        process_name: None,
    }
    .into()
}

fn opts(run_id: &str) -> CollectOptions {
    CollectOptions { run_id: Some(run_id.into()), ..Default::default() }
}

#[test]
fn collect_dedups_and_finishes_the_run() {
    let mut db = Db::open_in_memory().unwrap();
    let collectors = vec![Fake::new("files", ResultType::File, vec![file("/a", 1), file("/a", 1), file("/b", 2)])];
    let report = run_collect(&mut db, &collectors, &Filter::empty(), &opts("r1")).unwrap();

    assert!(report.success());
    assert_eq!(report.collected(), 2);
    match &report.outcomes[0].status {
        CollectorStatus::Completed { stats } => assert_eq!(stats.duplicates, 1),
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(db.count_records("r1", ResultType::File).unwrap(), 2);
    assert!(db.get_run("r1").unwrap().unwrap().is_finished());
}

#[test]
fn filter_drops_matching_records() {
    let mut db = Db::open_in_memory().unwrap();
    let filter = Filter::from_json(r#"{"*":{"*":{"File":{"Path":{"Exclude":["^/tmp"]}}}}}"#).unwrap();
    let collectors = vec![Fake::new("files", ResultType::File, vec![file("/tmp/x", 1), file("/etc/y", 1)])];
    run_collect(&mut db, &collectors, &filter, &opts("r1")).unwrap();
    assert_eq!(db.count_records("r1", ResultType::File).unwrap(), 1);
}

#[test]
fn duplicate_run_id_is_rejected_unless_overwriting() {
    let mut db = Db::open_in_memory().unwrap();
    let first = vec![Fake::new("files", ResultType::File, vec![file("/a", 1), file("/b", 1)])];
    run_collect(&mut db, &first, &Filter::empty(), &opts("same")).unwrap();

    let second = vec![Fake::new("files", ResultType::File, vec![file("/c", 1)])];
    let err = run_collect(&mut db, &second, &Filter::empty(), &opts("same")).unwrap_err();
    assert!(matches!(err, PipelineError::Store(StoreError::DuplicateRunId(ref id)) if id == "same"));
    assert_eq!(db.count_records("same", ResultType::File).unwrap(), 2);

    let overwrite = CollectOptions { overwrite: true, ..opts("same") };
    run_collect(&mut db, &second, &Filter::empty(), &overwrite).unwrap();
    assert_eq!(db.count_records("same", ResultType::File).unwrap(), 1);
}

#[test]
fn failing_collector_is_isolated_from_siblings() {
    let mut db = Db::open_in_memory().unwrap();
    let collectors = vec![
        Fake::failing("ports", ResultType::Port, vec![port(22), port(80)]),
        Fake::new("files", ResultType::File, vec![file("/a", 1)]),
    ];
    let report = run_collect(&mut db, &collectors, &Filter::empty(), &opts("r1")).unwrap();

    assert!(!report.success());
    assert!(matches!(report.outcomes[0].status, CollectorStatus::Failed(ref msg) if msg.contains("source went away")));
    assert!(matches!(report.outcomes[1].status, CollectorStatus::Completed { .. }));
    // the failed collector's partial writes were rolled back
    assert_eq!(db.count_records("r1", ResultType::Port).unwrap(), 0);
    assert_eq!(db.count_records("r1", ResultType::File).unwrap(), 1);

    let run = db.get_run("r1").unwrap().unwrap();
    assert!(!run.meta.collects(ResultType::Port));
    assert!(run.meta.collects(ResultType::File));
    assert!(run.is_finished());
}

#[test]
fn unsupported_collector_is_skipped_without_failing() {
    let mut db = Db::open_in_memory().unwrap();
    let collectors = vec![
        Fake::unsupported("registry", ResultType::Registry),
        Fake::new("files", ResultType::File, vec![file("/a", 1)]),
    ];
    let report = run_collect(&mut db, &collectors, &Filter::empty(), &opts("r1")).unwrap();
    assert!(report.success());
    assert_eq!(report.outcomes[0].status, CollectorStatus::Skipped);
    assert!(!db.get_run("r1").unwrap().unwrap().meta.collects(ResultType::Registry));
}

#[test]
fn flag_update_failure_does_not_abort_the_run() {
    let mut db = Db::open_in_memory().unwrap();
    db.conn
        .execute_batch(
            "CREATE TRIGGER refuse_registry_flag BEFORE UPDATE OF registry ON runs
             BEGIN SELECT RAISE(ABORT, 'flag is locked'); END;",
        )
        .unwrap();
    let collectors = vec![
        Fake::unsupported("registry", ResultType::Registry),
        Fake::new("files", ResultType::File, vec![file("/a", 1)]),
    ];
    let report = run_collect(&mut db, &collectors, &Filter::empty(), &opts("r1")).unwrap();
    assert_eq!(report.outcomes.len(), 2);
    assert_eq!(report.outcomes[0].status, CollectorStatus::Skipped);
    assert!(matches!(report.outcomes[1].status, CollectorStatus::Completed { .. }));
    assert_eq!(db.count_records("r1", ResultType::File).unwrap(), 1);
    assert!(db.get_run("r1").unwrap().unwrap().is_finished());
}

#[test]
fn no_collectors_is_an_invalid_argument() {
    let mut db = Db::open_in_memory().unwrap();
    let err = run_collect(&mut db, &[], &Filter::empty(), &opts("r1")).unwrap_err();
    assert!(matches!(err, PipelineError::InvalidArgument(_)));
    assert!(!db.run_exists("r1").unwrap());
}

#[test]
fn match_run_id_reuses_the_earlier_selection() {
    let mut db = Db::open_in_memory().unwrap();
    let only_files = vec![Fake::new("files", ResultType::File, vec![file("/a", 1)])];
    run_collect(&mut db, &only_files, &Filter::empty(), &opts("first")).unwrap();

    let both = vec![
        Fake::new("files", ResultType::File, vec![file("/a", 1)]),
        Fake::new("ports", ResultType::Port, vec![port(22)]),
    ];
    let matched = CollectOptions { match_run_id: Some("first".into()), ..opts("second") };
    let report = run_collect(&mut db, &both, &Filter::empty(), &matched).unwrap();
    assert_eq!(report.outcomes.len(), 1);
    assert_eq!(report.outcomes[0].kind, ResultType::File);

    let missing = CollectOptions { match_run_id: Some("nope".into()), ..opts("third") };
    let err = run_collect(&mut db, &both, &Filter::empty(), &missing).unwrap_err();
    assert!(matches!(err, PipelineError::Store(StoreError::RunNotFound(_))));
}

fn two_runs(db: &mut Db) {
    let base = vec![
        Fake::new("files", ResultType::File, vec![file("/a", 1), file("/gone", 1), file("/same", 3)]),
        Fake::new("ports", ResultType::Port, vec![port(22)]),
    ];
    run_collect(db, &base, &Filter::empty(), &opts("base")).unwrap();
    let cmp = vec![Fake::new("files", ResultType::File, vec![file("/a", 2), file("/new", 1), file("/same", 3)])];
    run_collect(db, &cmp, &Filter::empty(), &opts("cmp")).unwrap();
}

#[test]
fn compare_covers_kinds_collected_by_both_runs() {
    let mut db = Db::open_in_memory().unwrap();
    two_runs(&mut db);

    let report = run_compare(&mut db, "base", "cmp").unwrap();
    assert!(report.success());
    assert_eq!(report.results.len(), 1);
    let files = &report.results[0];
    assert_eq!(files.kind, ResultType::File);
    assert_eq!((files.added.len(), files.removed.len(), files.modified.len()), (1, 1, 1));
    assert_eq!(db.comparison_status("base", "cmp").unwrap(), Some(ComparisonStatus::Completed));
}

#[test]
fn unchanged_tree_collected_twice_compares_clean() {
    let dir = tempfile::tempdir().unwrap();
    fs::create_dir(dir.path().join("etc")).unwrap();
    fs::write(dir.path().join("etc/hosts"), "127.0.0.1 localhost\n").unwrap();
    fs::write(dir.path().join("etc/motd"), "welcome\n").unwrap();
    fs::write(dir.path().join("run.sh"), "#!/bin/sh\necho hi\n").unwrap();

    let mut db = Db::open_in_memory().unwrap();
    for run_id in ["a", "b"] {
        let collectors: Vec<Box<dyn Collector>> =
            vec![Box::new(FileSystemCollector::new(vec![dir.path().to_path_buf()]).with_hashing(true))];
        let report = run_collect(&mut db, &collectors, &Filter::empty(), &opts(run_id)).unwrap();
        assert!(report.success());
    }
    assert!(db.count_records("a", ResultType::File).unwrap() >= 5);
    assert_eq!(
        db.count_records("a", ResultType::File).unwrap(),
        db.count_records("b", ResultType::File).unwrap()
    );

    let report = run_compare(&mut db, "a", "b").unwrap();
    assert!(report.success());
    assert_eq!(report.results.len(), 1);
    let files = &report.results[0];
    assert_eq!(files.kind, ResultType::File);
    assert_eq!((files.added.len(), files.removed.len(), files.modified.len()), (0, 0, 0));
}

#[test]
fn compare_validates_its_arguments() {
    let mut db = Db::open_in_memory().unwrap();
    two_runs(&mut db);
    assert!(matches!(run_compare(&mut db, "", "cmp"), Err(PipelineError::InvalidArgument(_))));
    assert!(matches!(
        run_compare(&mut db, "base", "missing"),
        Err(PipelineError::Store(StoreError::RunNotFound(_)))
    ));

    db.register_run(&RunMeta::new("open", RunType::Collect, [ResultType::File]), false).unwrap();
    assert!(matches!(
        run_compare(&mut db, "base", "open"),
        Err(PipelineError::Store(StoreError::RunIncomplete(_)))
    ));
    assert_eq!(db.comparison_status("base", "open").unwrap(), None);
}

#[test]
fn latest_pair_is_older_then_newer() {
    let mut db = Db::open_in_memory().unwrap();
    assert!(resolve_latest_pair(&db).is_err());
    two_runs(&mut db);
    assert_eq!(resolve_latest_pair(&db).unwrap(), ("base".to_string(), "cmp".to_string()));
    assert_eq!(resolve_latest(&db, RunType::Collect).unwrap(), "cmp");
    assert!(resolve_latest(&db, RunType::Monitor).is_err());
}

#[test]
fn comparison_export_writes_kind_files_and_summary() {
    let mut db = Db::open_in_memory().unwrap();
    two_runs(&mut db);
    let out = tempfile::tempdir().unwrap();
    assert!(export_comparison(&db, "base", "cmp", out.path()).is_err());

    run_compare(&mut db, "base", "cmp").unwrap();
    let written = export_comparison(&db, "base", "cmp", out.path()).unwrap();
    assert_eq!(written.len(), 2);

    let files: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(out.path().join("base_vs_cmp_FILE.json")).unwrap()).unwrap();
    let rows = files.as_array().unwrap();
    assert_eq!(rows.len(), 3);
    let modified = rows.iter().find(|r| r["ChangeType"] == "MODIFIED").unwrap();
    assert_eq!(modified["Base"]["Path"], "/a");
    assert_eq!(modified["Compare"]["Size"], 2);
    let added = rows.iter().find(|r| r["ChangeType"] == "CREATED").unwrap();
    assert!(added["Base"].is_null());

    let summary: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(out.path().join("base_vs_cmp_summary.json")).unwrap()).unwrap();
    assert_eq!(summary["Counts"]["FILE"]["Added"], 1);
    assert_eq!(summary["Counts"]["PORT"]["Removed"], 0);
}

#[test]
fn monitor_export_lists_events_in_order() {
    let mut db = Db::open_in_memory().unwrap();
    db.register_run(&RunMeta::new("mon", RunType::Monitor, [ResultType::File]), false).unwrap();
    let event = |path: &str, change_type| FileMonitorEvent {
        change_type,
        path: path.into(),
        old_path: None,
        name: path.trim_start_matches('/').into(),
        old_name: None,
        timestamp: 1,
        notify_filters: "Creation".into(),
        extended: None,
    };
    db.insert_monitor_events("mon", &[event("/x", ChangeType::Created), event("/y", ChangeType::Deleted)]).unwrap();
    db.finish_run("mon").unwrap();

    let out = tempfile::tempdir().unwrap();
    let path = export_monitor(&db, "mon", out.path()).unwrap();
    assert!(path.ends_with("mon_Monitoring_FILE.json"));
    let v: serde_json::Value = serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap();
    assert_eq!(v[0]["Path"], "/x");
    assert_eq!(v[1]["ChangeType"], "DELETED");

    assert!(matches!(
        export_monitor(&db, "ghost", out.path()),
        Err(PipelineError::Store(StoreError::RunNotFound(_)))
    ));
}

fn session(root: &std::path::Path, run_id: &str) -> MonitorSession {
    MonitorSession {
        run_id: Some(run_id.into()),
        overwrite: false,
        roots: vec![root.to_path_buf()],
        categories: ChangeCategories::ALL,
        interrogate: false,
        duration: None,
    }
}

#[test]
fn monitor_with_stop_raised_finishes_an_empty_run() {
    let mut db = Db::open_in_memory().unwrap();
    let dir = tempfile::tempdir().unwrap();
    let stop = AtomicBool::new(true);
    let report = run_monitor(&mut db, Arc::new(Filter::empty()), &session(dir.path(), "m1"), &stop).unwrap();
    assert_eq!(report.run_id, "m1");
    let run = db.get_run("m1").unwrap().unwrap();
    assert_eq!(run.meta.run_type, RunType::Monitor);
    assert!(run.is_finished());
}

#[test]
fn monitor_without_roots_is_invalid() {
    let mut db = Db::open_in_memory().unwrap();
    let dir = tempfile::tempdir().unwrap();
    let mut s = session(dir.path(), "m1");
    s.roots.clear();
    let err = run_monitor(&mut db, Arc::new(Filter::empty()), &s, &AtomicBool::new(false)).unwrap_err();
    assert!(matches!(err, PipelineError::InvalidArgument(_)));
}

#[cfg(target_os = "linux")]
#[test]
fn monitor_records_live_changes_until_the_duration_elapses() {
    use std::time::Duration;

    let mut db = Db::open_in_memory().unwrap();
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("written.txt");
    let writer = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(300));
        fs::write(target, b"data").unwrap();
    });

    let mut s = session(dir.path(), "live");
    s.duration = Some(Duration::from_secs(2));
    let report = run_monitor(&mut db, Arc::new(Filter::empty()), &s, &AtomicBool::new(false)).unwrap();
    writer.join().unwrap();

    assert!(report.events > 0);
    let events = db.monitor_events("live").unwrap();
    assert!(events.iter().any(|e| e.name == "written.txt" && e.change_type == ChangeType::Created));
}
