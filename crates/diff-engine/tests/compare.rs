use diff_engine::{compare_kind, CompareError, Comparator};
use run_store::{Db, RunMeta, StoreError};
use surface_core::{
    ChangeType, FileSystemObject, OpenPortObject, Record, RecordSink, ResultType, RunType,
    UserAccountObject,
};

fn seed(db: &mut Db, run_id: &str, kind: ResultType, records: Vec<Record>) {
    db.register_run(&RunMeta::new(run_id, RunType::Collect, [kind]), false).unwrap();
    let mut w = db.begin_batch(run_id, kind).unwrap();
    for r in &records {
        w.write(r).unwrap();
    }
    w.commit().unwrap();
    db.finish_run(run_id).unwrap();
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
        process_name: Some("nginx".into()),
    }
    .into()
}

fn user(name: &str, uid: &str, shell: &str) -> Record {
    UserAccountObject {
        name: name.into(),
        uid: uid.into(),
        shell: Some(shell.into()),
        ..Default::default()
    }
    .into()
}

fn paths(results: &[surface_core::CompareResult], pick_base: bool) -> Vec<String> {
    results
        .iter()
        .map(|r| {
            let rec = if pick_base { r.base.as_ref() } else { r.compare.as_ref() };
            match rec {
                Some(Record::File(f)) => f.path.clone(),
                other => panic!("unexpected payload {other:?}"),
            }
        })
        .collect()
}

#[test]
fn file_changes_follow_path_identity() {
    let mut db = Db::open_in_memory().unwrap();
    seed(&mut db, "base", ResultType::File, vec![file("/a", 1), file("/b", 1), file("/same", 7)]);
    seed(&mut db, "cmp", ResultType::File, vec![file("/a", 2), file("/c", 1), file("/same", 7)]);

    let res = compare_kind(&mut db, ResultType::File, "base", "cmp").unwrap();
    assert_eq!(paths(&res.modified, true), vec!["/a"]);
    assert_eq!(paths(&res.modified, false), vec!["/a"]);
    assert_eq!(paths(&res.removed, true), vec!["/b"]);
    assert_eq!(paths(&res.added, false), vec!["/c"]);
    assert!(res.added[0].base.is_none() && res.added[0].base_row_key.is_none());
    assert!(res.removed[0].compare.is_none() && res.removed[0].compare_row_key.is_none());
    assert_eq!(res.modified[0].change_type, ChangeType::Modified);

    let rows = db.comparison_rows("base", "cmp", ResultType::File).unwrap();
    assert_eq!(rows.len(), 3);
}

#[test]
fn port_add_and_remove_are_symmetric() {
    let mut db = Db::open_in_memory().unwrap();
    seed(&mut db, "one", ResultType::Port, vec![port(80)]);
    seed(&mut db, "two", ResultType::Port, vec![port(80), port(443)]);

    let fwd = compare_kind(&mut db, ResultType::Port, "one", "two").unwrap();
    assert_eq!(fwd.added.len(), 1);
    assert!(fwd.removed.is_empty() && fwd.modified.is_empty());
    assert_eq!(fwd.added[0].compare, Some(port(443)));

    let back = compare_kind(&mut db, ResultType::Port, "two", "one").unwrap();
    assert_eq!(back.removed.len(), 1);
    assert!(back.added.is_empty() && back.modified.is_empty());
    assert_eq!(back.removed[0].base, Some(port(443)));
}

#[test]
fn user_matched_by_uid_after_rename_is_modified() {
    let mut db = Db::open_in_memory().unwrap();
    seed(&mut db, "b", ResultType::User, vec![user("alice", "1000", "/bin/bash")]);
    seed(&mut db, "c", ResultType::User, vec![user("alicia", "1000", "/bin/bash")]);

    let res = compare_kind(&mut db, ResultType::User, "b", "c").unwrap();
    assert_eq!(res.modified.len(), 1);
    assert!(res.added.is_empty() && res.removed.is_empty());
}

#[test]
fn user_name_match_outranks_uid_match() {
    let mut db = Db::open_in_memory().unwrap();
    seed(&mut db, "b", ResultType::User, vec![user("alice", "1000", "/bin/sh")]);
    seed(
        &mut db,
        "c",
        ResultType::User,
        vec![user("bob", "1000", "/bin/sh"), user("alice", "1001", "/bin/sh")],
    );

    let res = compare_kind(&mut db, ResultType::User, "b", "c").unwrap();
    assert_eq!(res.modified.len(), 1);
    assert_eq!(res.modified[0].compare, Some(user("alice", "1001", "/bin/sh")));
    assert_eq!(res.added[0].compare, Some(user("bob", "1000", "/bin/sh")));
}

#[test]
fn undecodable_rows_are_skipped() {
    let mut db = Db::open_in_memory().unwrap();
    seed(&mut db, "base", ResultType::File, vec![file("/a", 1)]);
    seed(&mut db, "cmp", ResultType::File, vec![file("/a", 1)]);
    db.conn
        .execute(
            "INSERT INTO file_system(run_id,row_key,path,serialized) VALUES ('cmp','junk','/junk',x'00ff00ff')",
            [],
        )
        .unwrap();

    let res = Comparator::<FileSystemObject>::new().compare(&mut db, "base", "cmp").unwrap();
    assert_eq!(res.skipped, 1);
    assert!(res.is_empty());
}

#[test]
fn blank_run_ids_are_rejected() {
    let mut db = Db::open_in_memory().unwrap();
    let err = compare_kind(&mut db, ResultType::File, "  ", "x").unwrap_err();
    assert!(matches!(err, CompareError::InvalidArgument(_)));
    let err = compare_kind(&mut db, ResultType::File, "x", "").unwrap_err();
    assert!(matches!(err, CompareError::InvalidArgument(_)));
}

#[test]
fn unfinished_runs_are_refused() {
    let mut db = Db::open_in_memory().unwrap();
    seed(&mut db, "done", ResultType::File, vec![file("/a", 1)]);
    db.register_run(&RunMeta::new("pending", RunType::Collect, [ResultType::File]), false).unwrap();

    let err = compare_kind(&mut db, ResultType::File, "done", "pending").unwrap_err();
    assert!(matches!(err, CompareError::Store(StoreError::RunIncomplete(_))));
    let err = compare_kind(&mut db, ResultType::File, "done", "ghost").unwrap_err();
    assert!(matches!(err, CompareError::Store(StoreError::RunNotFound(_))));
}

#[test]
fn repeated_comparison_replaces_rows() {
    let mut db = Db::open_in_memory().unwrap();
    seed(&mut db, "base", ResultType::File, vec![file("/a", 1)]);
    seed(&mut db, "cmp", ResultType::File, vec![file("/a", 2), file("/b", 1)]);

    compare_kind(&mut db, ResultType::File, "base", "cmp").unwrap();
    compare_kind(&mut db, ResultType::File, "base", "cmp").unwrap();
    assert_eq!(db.comparison_rows("base", "cmp", ResultType::File).unwrap().len(), 2);
}
