use missionctl::plugins::protocol::{self, Action, FollowupSpec, ValidatedResponse};
use serde_json::{Value, json};

fn accept(raw: Value) -> Action {
    match protocol::validate(&raw) {
        Ok(ValidatedResponse::Success(action)) => action,
        other => panic!("expected success for {}, got {:?}", raw, other),
    }
}

fn reject_path(raw: Value) -> String {
    match protocol::validate(&raw) {
        Err(rejection) => rejection.path,
        Ok(resp) => panic!("expected rejection for {}, got {:?}", raw, resp),
    }
}

#[test]
fn each_documented_action_validates() {
    assert_eq!(
        accept(json!({"ok": true, "action": "list_files_result", "files": ["a.py", "b/c.py"]})),
        Action::ListFilesResult {
            files: vec!["a.py".to_string(), "b/c.py".to_string()]
        }
    );
    assert_eq!(
        accept(json!({
            "ok": true,
            "action": "analysis_result",
            "target_file": "a.py",
            "summary": "fine",
            "issues": ["unused import"],
            "recommendations": ["remove it"]
        })),
        Action::AnalysisResult {
            target_file: "a.py".to_string(),
            summary: Some("fine".to_string()),
            issues: vec!["unused import".to_string()],
            recommendations: vec!["remove it".to_string()],
        }
    );
    assert_eq!(
        accept(json!({
            "ok": true,
            "action": "create_followup_jobs",
            "new_jobs": [{"task": "write_python_module", "params": {"file": "new.py"}}]
        })),
        Action::CreateFollowupJobs {
            new_jobs: vec![FollowupSpec {
                task: "write_python_module".to_string(),
                params: json!({"file": "new.py"}).as_object().unwrap().clone(),
            }]
        }
    );
    assert_eq!(
        accept(json!({"ok": true, "action": "write_file", "file": "new.py", "content": "x = 1\n"})),
        Action::WriteFile {
            file: "new.py".to_string(),
            content: "x = 1\n".to_string()
        }
    );
    assert_eq!(
        accept(json!({"ok": true, "action": "patch_file", "file": "main.py", "patch": "diff..."})),
        Action::PatchFile {
            file: "main.py".to_string(),
            patch: "diff...".to_string()
        }
    );
}

#[test]
fn error_shape_is_always_accepted() {
    assert_eq!(
        protocol::validate(&json!({"ok": false, "error": "worker crashed"})).unwrap(),
        ValidatedResponse::WorkerError {
            error: "worker crashed".to_string()
        }
    );
    // Extra fields on the error shape are not interpreted.
    assert!(matches!(
        protocol::validate(&json!({"ok": false, "error": "x", "action": "bogus"})),
        Ok(ValidatedResponse::WorkerError { .. })
    ));
    assert_eq!(reject_path(json!({"ok": false})), "error");
}

#[test]
fn unknown_action_is_rejected_naming_the_field() {
    let rejection =
        protocol::validate(&json!({"ok": true, "action": "delete_everything"})).unwrap_err();
    assert_eq!(rejection.path, "action");
    assert!(rejection.reason.contains("delete_everything"), "{}", rejection.reason);
}

#[test]
fn ok_flag_is_checked_independently_of_the_action() {
    assert_eq!(reject_path(json!({"action": "write_file", "file": "a", "content": ""})), "ok");
    assert_eq!(
        reject_path(json!({"ok": "true", "action": "write_file", "file": "a", "content": ""})),
        "ok"
    );
    assert_eq!(
        reject_path(json!({
            "ok": true,
            "error": "but also failed",
            "action": "write_file",
            "file": "a",
            "content": ""
        })),
        "error"
    );
}

#[test]
fn missing_and_mistyped_fields_name_their_path() {
    assert_eq!(reject_path(json!({"ok": true})), "action");
    assert_eq!(reject_path(json!({"ok": true, "action": "list_files_result"})), "files");
    assert_eq!(
        reject_path(json!({"ok": true, "action": "list_files_result", "files": ["a", 2]})),
        "files[1]"
    );
    assert_eq!(reject_path(json!({"ok": true, "action": "analysis_result"})), "target_file");
    assert_eq!(
        reject_path(json!({"ok": true, "action": "analysis_result", "target_file": "a", "issues": "none"})),
        "issues"
    );
    assert_eq!(
        reject_path(json!({"ok": true, "action": "write_file", "file": "a"})),
        "content"
    );
    assert_eq!(
        reject_path(json!({"ok": true, "action": "patch_file", "file": "a", "patch": 3})),
        "patch"
    );
    assert_eq!(
        reject_path(json!({"ok": true, "action": "create_followup_jobs", "new_jobs": {}})),
        "new_jobs"
    );
    assert_eq!(
        reject_path(json!({
            "ok": true,
            "action": "create_followup_jobs",
            "new_jobs": [{"task": "a"}, {"params": {}}]
        })),
        "new_jobs[1].task"
    );
    assert_eq!(
        reject_path(json!({
            "ok": true,
            "action": "create_followup_jobs",
            "new_jobs": [{"task": "a", "params": [1]}]
        })),
        "new_jobs[0].params"
    );
    assert_eq!(reject_path(json!(["not", "an", "object"])), "$");
}

#[test]
fn schema_lists_every_action() {
    let schema = protocol::schema();
    for action in protocol::ACTIONS {
        assert!(schema["actions"].get(action).is_some(), "schema missing {}", action);
    }
}
