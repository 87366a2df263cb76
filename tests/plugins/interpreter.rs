use missionctl::core::config::Config;
use missionctl::core::error::MissionctlError;
use missionctl::plugins::interpreter::{EffectSummary, Interpreter, Limits, followup_job_id};
use missionctl::plugins::lifecycle::{Orchestrator, SyncOutcome};
use missionctl::plugins::missions::{
    self, Job, JobStatus, Mission, NewMission, NewTask, Task, TaskKind,
};
use missionctl::plugins::protocol::{Action, FollowupSpec};
use missionctl::plugins::workspace::Workspace;
use serde_json::{Value, json};
use std::fs;
use std::path::Path;
use tempfile::tempdir;

fn orchestrator(root: &Path, tweak: impl FnOnce(&mut Config)) -> Orchestrator {
    let mut config = Config::default();
    tweak(&mut config);
    Orchestrator::from_config(config.resolved(root)).expect("orchestrator")
}

fn seed(orch: &Orchestrator) -> (Mission, Task, Job) {
    let mission = orch
        .create_mission(NewMission {
            title: "Build a module".to_string(),
            ..NewMission::default()
        })
        .expect("mission");
    let task = orch
        .create_task(
            &mission.id,
            NewTask {
                name: "discover".to_string(),
                description: String::new(),
                kind: TaskKind::ListFiles,
                params: Default::default(),
            },
        )
        .expect("task");
    let job = orch.create_job(&task.id, Default::default()).expect("job");
    orch.dispatch(&job.id).expect("dispatch");
    (mission, task, job)
}

fn respond(orch: &Orchestrator, job_id: &str, body: Value) {
    let path = orch.bridge().result_path(job_id).expect("result path");
    fs::write(path, serde_json::to_vec(&body).unwrap()).expect("write result");
}

fn followup(task: &str, params: Value) -> Value {
    json!({
        "ok": true,
        "action": "create_followup_jobs",
        "new_jobs": [{"task": task, "params": params}]
    })
}

#[test]
fn followup_creates_exactly_one_task_and_job_in_the_same_mission() {
    let tmp = tempdir().expect("tempdir");
    let orch = orchestrator(tmp.path(), |_| {});
    let (mission, task, job) = seed(&orch);

    respond(&orch, &job.id, followup("write_python_module", json!({"file": "new.py"})));
    let outcome = orch.sync(&job.id).expect("sync");
    let SyncOutcome::Synced {
        effect, dispatched, ..
    } = outcome
    else {
        panic!("expected Synced, got {:?}", outcome);
    };

    let tasks = missions::list_tasks(orch.store(), Some(&mission.id)).unwrap();
    assert_eq!(tasks.len(), 2);
    let new_task = tasks.iter().find(|t| t.id != task.id).unwrap();
    assert_eq!(new_task.kind, TaskKind::Custom("write_python_module".to_string()));
    assert_eq!(new_task.name, "write_python_module");
    assert_eq!(new_task.mission_id, mission.id);

    let new_jobs = missions::list_jobs(orch.store(), Some(&new_task.id)).unwrap();
    assert_eq!(new_jobs.len(), 1);
    let child = &new_jobs[0];
    assert_eq!(child.payload["file"], "new.py");
    assert_eq!(child.depth, 1);
    assert_eq!(child.parent_job_id.as_deref(), Some(job.id.as_str()));
    assert_eq!(effect.spawned_job_ids(), &[child.id.clone()]);

    // Auto-dispatched into the outbound queue.
    assert_eq!(dispatched, vec![child.id.clone()]);
    assert_eq!(child.status, JobStatus::Dispatched);
    assert!(orch.bridge().descriptor_path(&child.id).unwrap().exists());
}

#[test]
fn second_sync_is_a_no_op() {
    let tmp = tempdir().expect("tempdir");
    let orch = orchestrator(tmp.path(), |c| c.keep_results = true);
    let (_, _, job) = seed(&orch);

    respond(&orch, &job.id, followup("write_python_module", json!({"file": "new.py"})));
    let first = orch.sync(&job.id).expect("first sync");
    assert!(matches!(first, SyncOutcome::Synced { .. }));
    let jobs_after_first = missions::list_jobs(orch.store(), None).unwrap().len();

    let second = orch.sync(&job.id).expect("second sync");
    let SyncOutcome::Replayed { job: replayed } = second else {
        panic!("expected Replayed, got {:?}", second);
    };
    assert_eq!(replayed.result, first.job().result);
    assert_eq!(replayed.effect, first.job().effect);
    assert_eq!(missions::list_jobs(orch.store(), None).unwrap().len(), jobs_after_first);
}

#[test]
fn interrupted_interpretation_resumes_onto_the_same_records() {
    let tmp = tempdir().expect("tempdir");
    let orch = orchestrator(tmp.path(), |c| c.auto_dispatch_followups = false);
    let (_, _, job) = seed(&orch);

    respond(
        &orch,
        &job.id,
        json!({
            "ok": true,
            "action": "create_followup_jobs",
            "new_jobs": [{"task": "analyze_file", "params": {"file": "a.py"}},
                         {"task": "analyze_file", "params": {"file": "b.py"}}]
        }),
    );
    let SyncOutcome::Synced { effect, .. } = orch.sync(&job.id).expect("sync") else {
        panic!("expected Synced");
    };
    let total = missions::list_jobs(orch.store(), None).unwrap().len();
    assert_eq!(total, 3);

    // Crash between committing `synced` and recording the effect.
    orch.store()
        .update::<Job, _>(&job.id, |j| {
            j.effect = None;
            Ok(())
        })
        .unwrap();

    let SyncOutcome::Synced {
        effect: resumed,
        dispatched,
        ..
    } = orch.sync(&job.id).expect("resume")
    else {
        panic!("expected Synced on resume");
    };
    assert_eq!(resumed, effect);
    assert!(dispatched.is_empty());
    assert_eq!(missions::list_jobs(orch.store(), None).unwrap().len(), total);
    // Both follow-ups share one task.
    let EffectSummary::FollowupsCreated { task_ids, .. } = resumed else {
        panic!("expected FollowupsCreated");
    };
    assert_eq!(task_ids[0], task_ids[1]);
}

#[test]
fn depth_guard_stops_the_loop() {
    let tmp = tempdir().expect("tempdir");
    let orch = orchestrator(tmp.path(), |c| c.max_followup_depth = 3);
    let (_, _, root_job) = seed(&orch);

    let mut current = root_job.id.clone();
    let mut tripped_at = None;
    for step in 0..10 {
        respond(&orch, &current, followup("write_python_module", json!({"step": step})));
        match orch.sync(&current).expect("sync") {
            SyncOutcome::Synced { effect, .. } => {
                current = effect.spawned_job_ids()[0].clone();
            }
            SyncOutcome::Failed { job, code } => {
                assert_eq!(code, "FOLLOWUP_LIMIT_EXCEEDED");
                assert_eq!(job.status, JobStatus::Failed);
                assert!(job.error.unwrap().contains("max_followup_depth"));
                tripped_at = Some(step);
                break;
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }
    assert_eq!(tripped_at, Some(3));
    let jobs = missions::list_jobs(orch.store(), None).unwrap();
    assert_eq!(jobs.len(), 4);
    assert_eq!(jobs.iter().map(|j| j.depth).max(), Some(3));
}

#[test]
fn outstanding_guard_is_all_or_nothing() {
    let tmp = tempdir().expect("tempdir");
    let orch = orchestrator(tmp.path(), |c| c.max_outstanding_jobs = 2);
    let (_, _, job) = seed(&orch);

    respond(
        &orch,
        &job.id,
        json!({
            "ok": true,
            "action": "create_followup_jobs",
            "new_jobs": [{"task": "a"}, {"task": "b"}, {"task": "c"}]
        }),
    );
    let outcome = orch.sync(&job.id).expect("sync");
    assert!(matches!(
        outcome,
        SyncOutcome::Failed {
            code: "FOLLOWUP_LIMIT_EXCEEDED",
            ..
        }
    ));
    assert_eq!(missions::list_jobs(orch.store(), None).unwrap().len(), 1);
    assert_eq!(missions::list_tasks(orch.store(), None).unwrap().len(), 1);
}

#[test]
fn zero_depth_disables_followups() {
    let tmp = tempdir().expect("tempdir");
    let orch = orchestrator(tmp.path(), |c| c.max_followup_depth = 0);
    let (_, _, job) = seed(&orch);
    respond(&orch, &job.id, followup("next", json!({})));
    assert!(matches!(
        orch.sync(&job.id).expect("sync"),
        SyncOutcome::Failed { .. }
    ));
}

#[test]
fn interpreter_applies_record_only_actions_without_new_jobs() {
    let tmp = tempdir().expect("tempdir");
    let orch = orchestrator(tmp.path(), |_| {});
    let (_, task, job) = seed(&orch);
    let workspace = Workspace::new(tmp.path());
    let interpreter = Interpreter::new(orch.store(), &workspace, Limits::default());

    let effect = interpreter
        .apply(
            &task,
            &job,
            &Action::ListFilesResult {
                files: vec!["a.py".to_string(), "b.py".to_string()],
            },
        )
        .unwrap();
    assert_eq!(effect, EffectSummary::FilesRecorded { count: 2 });

    let effect = interpreter
        .apply(
            &task,
            &job,
            &Action::AnalysisResult {
                target_file: "a.py".to_string(),
                summary: None,
                issues: vec!["x".to_string()],
                recommendations: vec![],
            },
        )
        .unwrap();
    assert_eq!(
        effect,
        EffectSummary::AnalysisRecorded {
            target_file: "a.py".to_string(),
            issues: 1,
            recommendations: 0
        }
    );
    assert_eq!(missions::list_jobs(orch.store(), None).unwrap().len(), 1);
}

#[test]
fn interpreter_followups_are_deterministic() {
    let tmp = tempdir().expect("tempdir");
    let orch = orchestrator(tmp.path(), |_| {});
    let (_, task, job) = seed(&orch);
    let workspace = Workspace::new(tmp.path());
    let interpreter = Interpreter::new(orch.store(), &workspace, Limits::default());
    let action = Action::CreateFollowupJobs {
        new_jobs: vec![FollowupSpec {
            task: "discover".to_string(),
            params: Default::default(),
        }],
    };

    let first = interpreter.apply(&task, &job, &action).unwrap();
    let second = interpreter.apply(&task, &job, &action).unwrap();
    assert_eq!(first, second);
    assert_eq!(first.spawned_job_ids(), &[followup_job_id(&job.id, 0)]);
    // "discover" already names the originating task, so it is reused.
    let EffectSummary::FollowupsCreated { task_ids, .. } = &first else {
        panic!("expected FollowupsCreated");
    };
    assert_eq!(task_ids, &vec![task.id.clone()]);
    assert_eq!(missions::list_jobs(orch.store(), None).unwrap().len(), 2);
}

#[test]
fn invalid_followup_kind_creates_nothing() {
    let tmp = tempdir().expect("tempdir");
    let orch = orchestrator(tmp.path(), |_| {});
    let (_, task, job) = seed(&orch);
    let workspace = Workspace::new(tmp.path());
    let interpreter = Interpreter::new(orch.store(), &workspace, Limits::default());
    let action = Action::CreateFollowupJobs {
        new_jobs: vec![
            FollowupSpec {
                task: "fine".to_string(),
                params: Default::default(),
            },
            FollowupSpec {
                task: "not a kind".to_string(),
                params: Default::default(),
            },
        ],
    };
    assert!(matches!(
        interpreter.apply(&task, &job, &action),
        Err(MissionctlError::EffectFailure(_))
    ));
    assert_eq!(missions::list_tasks(orch.store(), None).unwrap().len(), 1);
    assert_eq!(missions::list_jobs(orch.store(), None).unwrap().len(), 1);
}

fn patch_response() -> Value {
    json!({
        "ok": true,
        "action": "patch_file",
        "file": "a.txt",
        "patch": "--- a/a.txt\n+++ b/a.txt\n@@ -1 +1 @@\n-a\n+b\n"
    })
}

#[test]
fn resumed_patch_after_crash_is_not_applied_twice() {
    let tmp = tempdir().expect("tempdir");
    let orch = orchestrator(tmp.path(), |_| {});
    fs::write(tmp.path().join("a.txt"), "a\n").unwrap();
    let (_, _, job) = seed(&orch);

    respond(&orch, &job.id, patch_response());
    let SyncOutcome::Synced { effect, .. } = orch.sync(&job.id).expect("sync") else {
        panic!("expected Synced");
    };
    assert_eq!(fs::read_to_string(tmp.path().join("a.txt")).unwrap(), "b\n");

    // Crash after the file was patched but before the effect was recorded.
    orch.store()
        .update::<Job, _>(&job.id, |j| {
            j.effect = None;
            Ok(())
        })
        .unwrap();

    let resumed = orch.sync(&job.id).expect("resume");
    let SyncOutcome::Synced {
        job: resumed_job,
        effect: resumed_effect,
        ..
    } = resumed
    else {
        panic!("expected Synced on resume, got {:?}", resumed);
    };
    assert_eq!(resumed_job.status, JobStatus::Synced);
    assert!(resumed_job.error.is_none());
    assert_eq!(resumed_effect, effect);
    assert_eq!(fs::read_to_string(tmp.path().join("a.txt")).unwrap(), "b\n");
}

#[test]
fn overlapping_syncs_apply_a_patch_once() {
    for round in 0..4 {
        let tmp = tempdir().expect("tempdir");
        let orch = orchestrator(tmp.path(), |_| {});
        fs::write(tmp.path().join("a.txt"), "a\n").unwrap();
        let (_, _, job) = seed(&orch);
        respond(&orch, &job.id, patch_response());

        let barrier = std::sync::Barrier::new(2);
        let outcomes: Vec<SyncOutcome> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..2)
                .map(|_| {
                    let (orch, barrier, job_id) = (&orch, &barrier, job.id.as_str());
                    scope.spawn(move || {
                        barrier.wait();
                        orch.sync(job_id).expect("sync")
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        let synced = outcomes
            .iter()
            .filter(|o| matches!(o, SyncOutcome::Synced { .. }))
            .count();
        let replayed = outcomes
            .iter()
            .filter(|o| matches!(o, SyncOutcome::Replayed { .. }))
            .count();
        assert_eq!((synced, replayed), (1, 1), "round {}: {:?}", round, outcomes);

        let stored = orch.get_job(&job.id).unwrap();
        assert_eq!(stored.status, JobStatus::Synced);
        assert!(matches!(
            stored.effect,
            Some(EffectSummary::FilePatched { hunks_applied: 1, .. })
        ));
        assert_eq!(fs::read_to_string(tmp.path().join("a.txt")).unwrap(), "b\n");
        let effects = orch
            .audit()
            .events()
            .unwrap()
            .into_iter()
            .filter(|e| e.op == "job.effect")
            .count();
        assert_eq!(effects, 1);
    }
}
