//! Worker response protocol: a closed vocabulary of actions keyed by `action`.
//!
//! Validation is pure and fails closed. Any missing field, wrong type or
//! unknown action yields a [`Rejection`] naming the offending field path;
//! nothing is accepted on a best-effort basis.
//!
//! Wire shapes:
//!
//! ```text
//! {"ok": true, "action": "list_files_result", "files": [string]}
//! {"ok": true, "action": "analysis_result", "target_file": string,
//!  "summary"?: string, "issues"?: [string], "recommendations"?: [string]}
//! {"ok": true, "action": "create_followup_jobs",
//!  "new_jobs": [{"task": string, "params"?: object}]}
//! {"ok": true, "action": "write_file", "file": string, "content": string}
//! {"ok": true, "action": "patch_file", "file": string, "patch": string}
//! {"ok": false, "error": string}
//! ```

use crate::core::error::MissionctlError;
use crate::plugins::missions::{Params, json_type_name};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

pub const ACTIONS: [&str; 5] = [
    "list_files_result",
    "analysis_result",
    "create_followup_jobs",
    "write_file",
    "patch_file",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FollowupSpec {
    pub task: String,
    #[serde(default)]
    pub params: Params,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    ListFilesResult {
        files: Vec<String>,
    },
    AnalysisResult {
        target_file: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        summary: Option<String>,
        #[serde(default)]
        issues: Vec<String>,
        #[serde(default)]
        recommendations: Vec<String>,
    },
    CreateFollowupJobs {
        new_jobs: Vec<FollowupSpec>,
    },
    WriteFile {
        file: String,
        content: String,
    },
    PatchFile {
        file: String,
        patch: String,
    },
}

impl Action {
    pub fn name(&self) -> &'static str {
        match self {
            Action::ListFilesResult { .. } => "list_files_result",
            Action::AnalysisResult { .. } => "analysis_result",
            Action::CreateFollowupJobs { .. } => "create_followup_jobs",
            Action::WriteFile { .. } => "write_file",
            Action::PatchFile { .. } => "patch_file",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ValidatedResponse {
    Success(Action),
    /// `{ok: false, error}`: terminal failure reported by the worker.
    WorkerError { error: String },
}

impl ValidatedResponse {
    /// The response as it is recorded on the job.
    pub fn to_record(&self) -> Result<Params, MissionctlError> {
        let mut map = Params::new();
        match self {
            ValidatedResponse::Success(action) => {
                map.insert("ok".to_string(), Value::Bool(true));
                if let Value::Object(fields) = serde_json::to_value(action)? {
                    map.extend(fields);
                }
            }
            ValidatedResponse::WorkerError { error } => {
                map.insert("ok".to_string(), Value::Bool(false));
                map.insert("error".to_string(), Value::String(error.clone()));
            }
        }
        Ok(map)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub path: String,
    pub reason: String,
}

impl Rejection {
    fn new(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.reason)
    }
}

impl From<Rejection> for MissionctlError {
    fn from(r: Rejection) -> Self {
        MissionctlError::ValidationRejection {
            path: r.path,
            reason: r.reason,
        }
    }
}

type Obj = serde_json::Map<String, Value>;

fn expect_type(path: &str, v: Option<&Value>, expected: &str) -> Rejection {
    match v {
        None => Rejection::new(path, format!("missing required field (expected {})", expected)),
        Some(v) => Rejection::new(
            path,
            format!("expected {}, got {}", expected, json_type_name(v)),
        ),
    }
}

fn required_str(obj: &Obj, key: &str) -> Result<String, Rejection> {
    match obj.get(key) {
        Some(Value::String(s)) => Ok(s.clone()),
        other => Err(expect_type(key, other, "string")),
    }
}

fn string_array(path: &str, v: Option<&Value>) -> Result<Vec<String>, Rejection> {
    let Some(Value::Array(items)) = v else {
        return Err(expect_type(path, v, "array of strings"));
    };
    items
        .iter()
        .enumerate()
        .map(|(i, item)| match item {
            Value::String(s) => Ok(s.clone()),
            other => Err(expect_type(&format!("{}[{}]", path, i), Some(other), "string")),
        })
        .collect()
}

fn optional_string_array(obj: &Obj, key: &str) -> Result<Vec<String>, Rejection> {
    match obj.get(key) {
        None => Ok(Vec::new()),
        v => string_array(key, v),
    }
}

fn followup_specs(obj: &Obj) -> Result<Vec<FollowupSpec>, Rejection> {
    let Some(Value::Array(items)) = obj.get("new_jobs") else {
        return Err(expect_type("new_jobs", obj.get("new_jobs"), "array"));
    };
    let mut specs = Vec::with_capacity(items.len());
    for (i, item) in items.iter().enumerate() {
        let path = format!("new_jobs[{}]", i);
        let Value::Object(spec) = item else {
            return Err(expect_type(&path, Some(item), "object"));
        };
        let task = match spec.get("task") {
            Some(Value::String(s)) if !s.trim().is_empty() => s.clone(),
            Some(Value::String(_)) => {
                return Err(Rejection::new(format!("{}.task", path), "must not be empty"));
            }
            other => return Err(expect_type(&format!("{}.task", path), other, "string")),
        };
        let params = match spec.get("params") {
            None => Params::new(),
            Some(Value::Object(p)) => p.clone(),
            other => return Err(expect_type(&format!("{}.params", path), other, "object")),
        };
        specs.push(FollowupSpec { task, params });
    }
    Ok(specs)
}

/// Validate a raw worker response object.
pub fn validate(raw: &Value) -> Result<ValidatedResponse, Rejection> {
    let Value::Object(obj) = raw else {
        return Err(expect_type("$", Some(raw), "object"));
    };

    let ok = match obj.get("ok") {
        Some(Value::Bool(b)) => *b,
        other => return Err(expect_type("ok", other, "boolean")),
    };

    if !ok {
        let error = required_str(obj, "error")?;
        return Ok(ValidatedResponse::WorkerError { error });
    }

    // Success is judged on `ok` alone; an error payload contradicts it.
    if obj.get("error").is_some_and(|e| !e.is_null()) {
        return Err(Rejection::new(
            "error",
            "success response (ok=true) must not carry an error payload",
        ));
    }

    let action = required_str(obj, "action")?;
    let parsed = match action.as_str() {
        "list_files_result" => Action::ListFilesResult {
            files: string_array("files", obj.get("files"))?,
        },
        "analysis_result" => Action::AnalysisResult {
            target_file: required_str(obj, "target_file")?,
            summary: match obj.get("summary") {
                None => None,
                Some(Value::String(s)) => Some(s.clone()),
                other => return Err(expect_type("summary", other, "string")),
            },
            issues: optional_string_array(obj, "issues")?,
            recommendations: optional_string_array(obj, "recommendations")?,
        },
        "create_followup_jobs" => Action::CreateFollowupJobs {
            new_jobs: followup_specs(obj)?,
        },
        "write_file" => Action::WriteFile {
            file: required_str(obj, "file")?,
            content: required_str(obj, "content")?,
        },
        "patch_file" => Action::PatchFile {
            file: required_str(obj, "file")?,
            patch: required_str(obj, "patch")?,
        },
        other => {
            return Err(Rejection::new(
                "action",
                format!(
                    "unsupported action '{}' (allowed: {})",
                    other,
                    ACTIONS.join(", ")
                ),
            ));
        }
    };
    Ok(ValidatedResponse::Success(parsed))
}

pub fn schema() -> serde_json::Value {
    serde_json::json!({
        "name": "protocol",
        "version": "1.0.0",
        "description": "Worker response protocol (closed action vocabulary)",
        "actions": {
            "list_files_result": { "required": ["files"] },
            "analysis_result": { "required": ["target_file"], "optional": ["summary", "issues", "recommendations"] },
            "create_followup_jobs": { "required": ["new_jobs"], "item": { "required": ["task"], "optional": ["params"] } },
            "write_file": { "required": ["file", "content"] },
            "patch_file": { "required": ["file", "patch"] }
        },
        "error_shape": { "ok": false, "error": "string" }
    })
}
