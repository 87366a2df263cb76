use missionctl::core::error::MissionctlError;
use missionctl::core::lock::{self, LockMode};
use missionctl::core::store::{Collection, Store};
use missionctl::plugins::missions::{self, Mission, NewMission, NewTask, Task, TaskKind};
use std::fs;
use std::io::Write;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;
use tempfile::tempdir;

fn mission(store: &Store, title: &str) -> Mission {
    missions::create_mission(
        store,
        NewMission {
            title: title.to_string(),
            ..NewMission::default()
        },
    )
    .expect("create mission")
}

#[test]
fn round_trip_preserves_insertion_order_for_any_n() {
    for n in [0usize, 1, 25] {
        let tmp = tempdir().expect("tempdir");
        let store = Store::open(tmp.path()).expect("open");
        let written: Vec<Mission> = (0..n).map(|i| mission(&store, &format!("m{}", i))).collect();

        let reloaded: Vec<Mission> = Store::open(tmp.path()).expect("reopen").list().expect("list");
        assert_eq!(reloaded, written, "n = {}", n);
    }
}

#[test]
fn collection_files_are_one_record_per_line() {
    let tmp = tempdir().expect("tempdir");
    let store = Store::open(tmp.path()).expect("open");
    mission(&store, "a");
    mission(&store, "b");

    let raw = fs::read_to_string(store.collection_path(Collection::Missions)).expect("read");
    let lines: Vec<&str> = raw.lines().collect();
    assert_eq!(lines.len(), 2);
    for line in lines {
        let v: serde_json::Value = serde_json::from_str(line).expect("each line is JSON");
        assert!(v["id"].as_str().unwrap().starts_with("mission_"));
    }
}

#[test]
fn concurrent_appends_lose_nothing_and_never_interleave() {
    const WRITERS: usize = 16;
    let tmp = tempdir().expect("tempdir");
    let store = Arc::new(Store::open(tmp.path()).expect("open"));
    let barrier = Arc::new(Barrier::new(WRITERS));

    let handles: Vec<_> = (0..WRITERS)
        .map(|i| {
            let store = Arc::clone(&store);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                mission(&store, &format!("writer-{}", i)).id
            })
        })
        .collect();
    let mut ids: Vec<String> = handles.into_iter().map(|h| h.join().expect("join")).collect();

    let raw = fs::read_to_string(store.collection_path(Collection::Missions)).expect("read");
    assert_eq!(raw.lines().count(), WRITERS);
    for line in raw.lines() {
        serde_json::from_str::<Mission>(line).expect("no torn or interleaved line");
    }
    let mut listed: Vec<String> = store
        .list::<Mission>()
        .expect("list")
        .into_iter()
        .map(|m| m.id)
        .collect();
    ids.sort();
    listed.sort();
    assert_eq!(ids, listed);
}

#[test]
fn concurrent_updates_serialize() {
    let tmp = tempdir().expect("tempdir");
    let store = Arc::new(Store::open(tmp.path()).expect("open"));
    let m = mission(&store, "counter");

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let store = Arc::clone(&store);
            let id = m.id.clone();
            thread::spawn(move || {
                store
                    .update::<Mission, _>(&id, |m| {
                        m.tags.push("hit".to_string());
                        Ok(())
                    })
                    .expect("update")
            })
        })
        .collect();
    for h in handles {
        h.join().expect("join");
    }
    let reloaded: Mission = store.get(&m.id).expect("get");
    assert_eq!(reloaded.tags.len(), 8);
}

#[test]
fn malformed_lines_are_skipped_and_survive_rewrites() {
    let tmp = tempdir().expect("tempdir");
    let store = Store::open(tmp.path()).expect("open");
    let first = mission(&store, "first");
    {
        let mut f = fs::OpenOptions::new()
            .append(true)
            .open(store.collection_path(Collection::Missions))
            .expect("open collection");
        writeln!(f, "{{not json").expect("write garbage");
    }
    let second = mission(&store, "second");

    let listed: Vec<Mission> = store.list().expect("list");
    assert_eq!(listed, vec![first.clone(), second.clone()]);

    store
        .update::<Mission, _>(&second.id, |m| {
            m.description = "edited".to_string();
            Ok(())
        })
        .expect("update");
    let raw = fs::read_to_string(store.collection_path(Collection::Missions)).expect("read");
    assert!(raw.contains("{not json"), "bad line is carried, not dropped");
    assert_eq!(store.get::<Mission>(&second.id).unwrap().description, "edited");
}

#[test]
fn line_with_valid_id_but_bad_body_is_skipped_by_every_lookup() {
    let tmp = tempdir().expect("tempdir");
    let store = Store::open(tmp.path()).expect("open");
    let good = mission(&store, "good");
    {
        let mut f = fs::OpenOptions::new()
            .append(true)
            .open(store.collection_path(Collection::Missions))
            .expect("open collection");
        writeln!(f, r#"{{"id":"mission_broken","title":5}}"#).expect("write bad body");
    }

    assert_eq!(store.list::<Mission>().unwrap(), vec![good.clone()]);
    assert!(matches!(
        store.get::<Mission>("mission_broken"),
        Err(MissionctlError::NotFound(_))
    ));
    assert!(matches!(
        store.update::<Mission, _>("mission_broken", |_| Ok(())),
        Err(MissionctlError::NotFound(_))
    ));

    let mut repaired = good.clone();
    repaired.id = "mission_broken".to_string();
    repaired.title = "repaired".to_string();
    let (stored, inserted) = store.insert_if_absent(repaired).expect("insert_if_absent");
    assert!(inserted);
    assert_eq!(stored.title, "repaired");
    assert_eq!(store.get::<Mission>("mission_broken").unwrap().title, "repaired");
}

#[test]
fn get_missing_id_is_not_found() {
    let tmp = tempdir().expect("tempdir");
    let store = Store::open(tmp.path()).expect("open");
    match store.get::<Mission>("mission_nope") {
        Err(MissionctlError::NotFound(what)) => assert!(what.contains("mission_nope")),
        other => panic!("expected NotFound, got {:?}", other),
    }
    assert!(matches!(
        store.update::<Mission, _>("mission_nope", |_| Ok(())),
        Err(MissionctlError::NotFound(_))
    ));
}

#[test]
fn duplicate_ids_are_rejected_but_insert_if_absent_returns_existing() {
    let tmp = tempdir().expect("tempdir");
    let store = Store::open(tmp.path()).expect("open");
    let m = mission(&store, "only");

    assert!(matches!(
        store.append(&m),
        Err(MissionctlError::ValidationError(_))
    ));
    let mut clone = m.clone();
    clone.title = "different".to_string();
    let (stored, inserted) = store.insert_if_absent(clone).expect("insert_if_absent");
    assert!(!inserted);
    assert_eq!(stored.title, "only");
    assert_eq!(store.list::<Mission>().unwrap().len(), 1);
}

#[test]
fn held_exclusive_lock_times_out_readers_and_writers() {
    let tmp = tempdir().expect("tempdir");
    let store = Store::open(tmp.path())
        .expect("open")
        .with_lock_timeout(Duration::from_millis(60));
    mission(&store, "before");

    let guard = lock::acquire(
        &store.lock_path(Collection::Missions),
        "missions",
        LockMode::Exclusive,
        Duration::from_secs(1),
    )
    .expect("hold lock");

    match store.list::<Mission>() {
        Err(MissionctlError::LockTimeout { collection, .. }) => assert_eq!(collection, "missions"),
        other => panic!("expected LockTimeout, got {:?}", other),
    }
    assert!(matches!(
        missions::create_mission(
            &store,
            NewMission {
                title: "blocked".to_string(),
                ..NewMission::default()
            }
        ),
        Err(MissionctlError::LockTimeout { .. })
    ));

    // Other collections are not affected.
    assert!(store.list::<Task>().expect("tasks unaffected").is_empty());

    drop(guard);
    assert_eq!(store.list::<Mission>().expect("list after release").len(), 1);
}

#[test]
fn referential_integrity_is_checked_at_creation() {
    let tmp = tempdir().expect("tempdir");
    let store = Store::open(tmp.path()).expect("open");
    let err = missions::create_task(
        &store,
        "mission_missing",
        NewTask {
            name: "scan".to_string(),
            description: String::new(),
            kind: TaskKind::ListFiles,
            params: Default::default(),
        },
    )
    .unwrap_err();
    assert!(matches!(err, MissionctlError::NotFound(_)));

    let err = missions::create_job(&store, "task_missing", Default::default()).unwrap_err();
    assert!(matches!(err, MissionctlError::NotFound(_)));
    assert!(store.list::<Task>().unwrap().is_empty());
}

#[test]
fn find_task_by_name_is_scoped_to_the_mission() {
    let tmp = tempdir().expect("tempdir");
    let store = Store::open(tmp.path()).expect("open");
    let a = mission(&store, "a");
    let b = mission(&store, "b");
    let new_task = || NewTask {
        name: "scan".to_string(),
        description: String::new(),
        kind: TaskKind::ListFiles,
        params: Default::default(),
    };
    let ta = missions::create_task(&store, &a.id, new_task()).unwrap();
    let tb = missions::create_task(&store, &b.id, new_task()).unwrap();

    assert_eq!(missions::find_task_by_name(&store, &a.id, "scan").unwrap().unwrap().id, ta.id);
    assert_eq!(missions::find_task_by_name(&store, &b.id, "scan").unwrap().unwrap().id, tb.id);
    assert!(missions::find_task_by_name(&store, &a.id, "other").unwrap().is_none());
}
