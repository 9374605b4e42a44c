//! Wire types for the Manager HTTP API consumed by the worker.
//!
//! One request/response struct pair per endpoint in the table the worker
//! talks to, plus small constant modules for headers and endpoint paths.

use crate::timing::Timing;
use serde::{Deserialize, Serialize};

/// One scheduling unit fetched from `/task`: an id plus an ordered list of
/// commands to run, and metadata used only for logging.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    #[serde(rename = "_id")]
    pub id: String,
    pub commands: Vec<Command>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// One step of a task: a command name plus its opaque settings. The
/// concrete shape of `settings` is owned entirely by whichever command
/// implementation `name` resolves to in the registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Command {
    pub name: String,
    #[serde(default)]
    pub settings: serde_json::Value,
}

/// Request body for `POST /register-worker`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterWorkerRequest {
    pub secret: String,
    pub platform: Platform,
    pub supported_task_types: Vec<String>,
    pub nickname: String,
}

/// Response body for a successful `POST /register-worker`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterWorkerResponse {
    #[serde(rename = "_id")]
    pub id: String,
}

/// Worker operating system, reported at registration. Anything else is a
/// fatal startup error.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Linux,
    Windows,
    Darwin,
}

impl Platform {
    pub fn detect() -> Option<Self> {
        match std::env::consts::OS {
            "linux" => Some(Platform::Linux),
            "windows" => Some(Platform::Windows),
            "macos" => Some(Platform::Darwin),
            _ => None,
        }
    }
}

/// Request body for `POST /sign-on`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignOnRequest {
    pub supported_task_types: Vec<String>,
    pub nickname: String,
}

/// Response body for `POST /task` when the Manager replies 423: apply a
/// status change without handing over a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusRequested {
    pub status_requested: String,
}

/// Response body for `GET /may-i-run/{id}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MayIRunResponse {
    pub may_keep_running: bool,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub status_requested: Option<String>,
}

/// Response body for `GET /status-change` (200 case; 204 means no change).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusChangeResponse {
    pub status_requested: String,
}

/// Request body for `POST /tasks/{id}/update`: the coalesced
/// activity/log/status payload built by the Core's push logic.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskUpdateRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub activity: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_command_idx: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_progress_percentage: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command_progress_percentage: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timing: Option<Timing>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub log: Vec<LogEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp_utc: String,
    pub text: String,
}

/// Request body for `POST /output-produced`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputProducedRequest {
    pub paths: Vec<String>,
}

/// Generic error payload the worker logs verbatim when a Manager response
/// carries a JSON error body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    pub error: String,
}

/// HTTP header names used by the Upstream Client.
pub mod headers {
    pub const AUTHORIZATION: &str = "Authorization";
}

/// Manager endpoint paths, as literal templates; `{id}`/`{state}` are
/// substituted by the caller.
pub mod endpoints {
    pub const REGISTER_WORKER: &str = "/register-worker";
    pub const SIGN_ON: &str = "/sign-on";
    pub const SIGN_OFF: &str = "/sign-off";
    pub const TASK: &str = "/task";
    pub const OUTPUT_PRODUCED: &str = "/output-produced";
    pub const STATUS_CHANGE: &str = "/status-change";

    pub fn ack_status_change(state: &str) -> String {
        format!("/ack-status-change/{}", state)
    }

    pub fn may_i_run(task_id: &str) -> String {
        format!("/may-i-run/{}", task_id)
    }

    pub fn task_update(task_id: &str) -> String {
        format!("/tasks/{}/update", task_id)
    }

    pub fn task_return(task_id: &str) -> String {
        format!("/tasks/{}/return", task_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn platform_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Platform::Linux).unwrap(), "\"linux\"");
        assert_eq!(serde_json::to_string(&Platform::Darwin).unwrap(), "\"darwin\"");
    }

    #[test]
    fn task_update_request_omits_absent_fields() {
        let req = TaskUpdateRequest {
            task_status: Some("active".to_string()),
            ..Default::default()
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["task_status"], "active");
        assert!(json.get("activity").is_none());
        assert!(json.get("log").is_none());
    }

    #[test]
    fn endpoint_helpers_substitute_parameters() {
        assert_eq!(endpoints::may_i_run("T1"), "/may-i-run/T1");
        assert_eq!(endpoints::task_update("T1"), "/tasks/T1/update");
        assert_eq!(endpoints::ack_status_change("asleep"), "/ack-status-change/asleep");
    }

    #[test]
    fn task_deserializes_manager_id_field() {
        let json = r#"{"_id":"T1","commands":[{"name":"echo","settings":{"message":"hi"}}]}"#;
        let task: Task = serde_json::from_str(json).unwrap();
        assert_eq!(task.id, "T1");
        assert_eq!(task.commands[0].name, "echo");
    }
}
