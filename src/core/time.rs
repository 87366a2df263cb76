//! Shared timestamp/identifier helpers for records and envelopes.

use serde_json::{Map, Value as JsonValue};
use sha2::{Digest, Sha256};
use ulid::Ulid;

/// Returns unix-epoch seconds with `Z` suffix (e.g. `1771220592Z`).
pub fn now_epoch_z() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    format!("{}Z", secs)
}

pub fn new_event_id() -> String {
    Ulid::new().to_string()
}

/// Fresh record id, e.g. `job_01J9...`.
pub fn new_record_id(prefix: &str) -> String {
    format!("{}_{}", prefix, Ulid::new())
}

/// Record id derived from its inputs, so re-deriving it yields the same id.
///
/// Used where an interrupted operation may be resumed and must land on the
/// record it already created instead of minting a second one.
pub fn derived_record_id(prefix: &str, parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update(b"\0");
    }
    let digest = format!("{:x}", hasher.finalize());
    format!("{}_{}", prefix, &digest[..26])
}

/// JSON envelope every CLI command prints; `extra` fields are merged in at
/// the top level and may not override the envelope keys.
pub fn command_envelope(cmd: &str, status: &str, extra: JsonValue) -> JsonValue {
    let mut envelope = Map::new();
    if let JsonValue::Object(fields) = extra {
        envelope.extend(fields);
    }
    envelope.insert("envelope_version".into(), "1.0.0".into());
    envelope.insert("ts".into(), now_epoch_z().into());
    envelope.insert("event_id".into(), new_event_id().into());
    envelope.insert("cmd".into(), cmd.into());
    envelope.insert("status".into(), status.into());
    JsonValue::Object(envelope)
}
