//! Provider task-status model.
//!
//! The provider answers `GET /tasks/{id}` with loosely-typed JSON. This
//! module turns that JSON into a [`TaskStatus`] once, at the edge, so the
//! polling loop only ever matches on a closed set of variants. Shapes we do
//! not recognise become [`TaskStatus::Unrecognized`] instead of a panic.

use serde::Deserialize;
use serde_json::Value;

/// The state of one remote task as reported by the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskStatus {
    /// Accepted but not started (`waiting` / `queued`).
    Queued,
    /// Work in progress.
    Processing,
    /// Terminal success. `result_url` is `None` when the provider broke its
    /// contract and omitted the result location.
    Finished { result_url: Option<String> },
    /// Terminal failure with the provider's message, when it sent one.
    Error { message: Option<String> },
    /// A status string we do not know.
    Unrecognized(String),
}

impl TaskStatus {
    /// Short lowercase label used in logs and progress events.
    pub fn label(&self) -> &str {
        match self {
            TaskStatus::Queued => "queued",
            TaskStatus::Processing => "processing",
            TaskStatus::Finished { .. } => "finished",
            TaskStatus::Error { .. } => "error",
            TaskStatus::Unrecognized(s) => s.as_str(),
        }
    }

    /// True for `Finished` and `Error`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Finished { .. } | TaskStatus::Error { .. })
    }
}

#[derive(Debug, Deserialize)]
struct RawTask {
    status: Option<String>,
    message: Option<String>,
    result: Option<RawResult>,
}

#[derive(Debug, Deserialize)]
struct RawResult {
    url: Option<String>,
    #[serde(default)]
    files: Vec<RawFile>,
}

#[derive(Debug, Deserialize)]
struct RawFile {
    url: Option<String>,
}

/// Unwrap the provider's `{ "data": { ... } }` envelope if present.
pub(crate) fn unwrap_data(body: &Value) -> &Value {
    match body.get("data") {
        Some(inner) if inner.is_object() => inner,
        _ => body,
    }
}

/// Parse a task-status response body.
///
/// Never fails: a body without a usable `status` string is reported as
/// `Unrecognized`, which the poller treats as a terminal failure.
pub fn parse_task_status(body: &Value) -> TaskStatus {
    let task: RawTask = match serde_json::from_value(unwrap_data(body).clone()) {
        Ok(t) => t,
        Err(e) => return TaskStatus::Unrecognized(format!("malformed task body: {e}")),
    };

    let Some(status) = task.status else {
        return TaskStatus::Unrecognized("missing status field".to_string());
    };

    match status.as_str() {
        "waiting" | "queued" => TaskStatus::Queued,
        "processing" => TaskStatus::Processing,
        "finished" => TaskStatus::Finished {
            result_url: task.result.and_then(result_url),
        },
        "error" => TaskStatus::Error {
            message: task.message.filter(|m| !m.is_empty()),
        },
        other => TaskStatus::Unrecognized(other.to_string()),
    }
}

/// Upload tasks publish `result.url`; conversion tasks publish
/// `result.files[0].url`.
fn result_url(result: RawResult) -> Option<String> {
    result
        .url
        .or_else(|| result.files.into_iter().next().and_then(|f| f.url))
        .filter(|u| !u.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_wrapped_and_bare_bodies() {
        let wrapped = json!({ "data": { "status": "processing" } });
        let bare = json!({ "status": "processing" });
        assert_eq!(parse_task_status(&wrapped), TaskStatus::Processing);
        assert_eq!(parse_task_status(&bare), TaskStatus::Processing);
    }

    #[test]
    fn waiting_is_queued() {
        assert_eq!(
            parse_task_status(&json!({ "status": "waiting" })),
            TaskStatus::Queued
        );
    }

    #[test]
    fn finished_upload_task_uses_result_url() {
        let body = json!({ "data": { "status": "finished", "result": { "url": "https://up" } } });
        assert_eq!(
            parse_task_status(&body),
            TaskStatus::Finished {
                result_url: Some("https://up".into())
            }
        );
    }

    #[test]
    fn finished_convert_task_uses_first_file() {
        let body = json!({
            "status": "finished",
            "result": { "files": [ { "filename": "out.docx", "url": "https://dl/1" }, { "url": "https://dl/2" } ] }
        });
        assert_eq!(
            parse_task_status(&body),
            TaskStatus::Finished {
                result_url: Some("https://dl/1".into())
            }
        );
    }

    #[test]
    fn finished_without_result_has_no_url() {
        let body = json!({ "status": "finished" });
        assert_eq!(
            parse_task_status(&body),
            TaskStatus::Finished { result_url: None }
        );
        let empty_files = json!({ "status": "finished", "result": { "files": [] } });
        assert_eq!(
            parse_task_status(&empty_files),
            TaskStatus::Finished { result_url: None }
        );
    }

    #[test]
    fn error_keeps_message() {
        let body = json!({ "status": "error", "message": "unsupported font" });
        assert_eq!(
            parse_task_status(&body),
            TaskStatus::Error {
                message: Some("unsupported font".into())
            }
        );
    }

    #[test]
    fn only_finished_and_error_are_terminal() {
        assert!(!TaskStatus::Queued.is_terminal());
        assert!(!TaskStatus::Processing.is_terminal());
        assert!(!TaskStatus::Unrecognized("exploded".into()).is_terminal());
        assert!(TaskStatus::Finished { result_url: None }.is_terminal());
        assert!(TaskStatus::Error { message: None }.is_terminal());
    }

    #[test]
    fn garbage_is_unrecognized() {
        assert!(matches!(
            parse_task_status(&json!({ "state": "ok" })),
            TaskStatus::Unrecognized(_)
        ));
        assert!(matches!(
            parse_task_status(&json!({ "status": "exploded" })),
            TaskStatus::Unrecognized(s) if s == "exploded"
        ));
        assert!(matches!(
            parse_task_status(&json!({ "status": 7 })),
            TaskStatus::Unrecognized(_)
        ));
    }
}
