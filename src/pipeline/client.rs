//! Remote API client: the provider's four HTTP operations, nothing more.
//!
//! [`ProviderApi`] is the seam the orchestrator talks to. The production
//! implementation, [`HttpProviderClient`], is stateless apart from its
//! connection pool and is shared by every job. Tests inject scripted
//! implementations through [`crate::config::ConversionConfig::provider`].
//!
//! No retries happen here. Each call reports raw success or failure; the
//! polling loop in [`crate::pipeline::poll`] decides what is worth another
//! attempt.

use crate::config::ConversionConfig;
use crate::error::{redact, ConvertError};
use crate::pipeline::input::DocumentFormat;
use crate::pipeline::task::{parse_task_status, unwrap_data, TaskStatus};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::CONTENT_TYPE;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::time::Duration;
use tracing::debug;

/// Environment variable consulted when no credential is configured.
pub const API_KEY_ENV: &str = "KONVRT_API_KEY";

/// Identifiers the provider assigns when a job is created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteJob {
    pub job_id: String,
    pub upload_task_id: String,
    pub convert_task_id: String,
    pub export_task_id: Option<String>,
}

/// What to ask the provider for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSpec {
    pub source: DocumentFormat,
    pub target: DocumentFormat,
    /// Provider-side conversion engine, e.g. `libreoffice`.
    pub engine: Option<String>,
}

/// The provider's HTTP surface.
#[async_trait]
pub trait ProviderApi: Send + Sync {
    /// `POST /jobs` with an upload → convert → export task graph.
    async fn create_job(&self, spec: &JobSpec) -> Result<RemoteJob, ConvertError>;

    /// `GET /tasks/{id}`. Never mutates remote state.
    async fn task_status(&self, task_id: &str) -> Result<TaskStatus, ConvertError>;

    /// Raw `PUT` of the whole buffer to a presigned URL.
    async fn upload(&self, url: &str, bytes: Bytes) -> Result<(), ConvertError>;

    /// Raw `GET` of the finished artifact from a presigned URL.
    async fn download(&self, url: &str) -> Result<Bytes, ConvertError>;
}

/// [`ProviderApi`] over reqwest.
pub struct HttpProviderClient {
    http: reqwest::Client,
    base_url: String,
    api_key: SecretString,
}

impl fmt::Debug for HttpProviderClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpProviderClient")
            .field("base_url", &self.base_url)
            .field("api_key", &"<redacted>")
            .finish()
    }
}

impl HttpProviderClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: SecretString,
        request_timeout: Duration,
    ) -> Result<Self, ConvertError> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| ConvertError::Internal(format!("HTTP client: {}", redact(e))))?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        })
    }

    /// Build a client from configuration, falling back to
    /// [`API_KEY_ENV`] when the config carries no credential.
    pub fn from_config(config: &ConversionConfig) -> Result<Self, ConvertError> {
        let api_key = match config.api_key.clone() {
            Some(key) => key,
            None => std::env::var(API_KEY_ENV)
                .ok()
                .filter(|k| !k.trim().is_empty())
                .map(SecretString::from)
                .ok_or_else(|| {
                    ConvertError::InvalidConfig(format!(
                        "no provider credential configured.\nSet {API_KEY_ENV} or pass an API key."
                    ))
                })?,
        };
        Self::new(
            config.api_base_url.clone(),
            api_key,
            Duration::from_secs(config.request_timeout_secs),
        )
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl ProviderApi for HttpProviderClient {
    async fn create_job(&self, spec: &JobSpec) -> Result<RemoteJob, ConvertError> {
        let body = job_request_body(spec);
        debug!("Creating remote job: {} → {}", spec.source, spec.target);

        let resp = self
            .http
            .post(format!("{}/jobs", self.base_url))
            .bearer_auth(self.api_key.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|e| ConvertError::provider(format!("job creation request failed: {}", redact(e))))?;

        let status = resp.status();
        if !status.is_success() {
            let snippet = body_snippet(resp).await;
            return Err(ConvertError::provider_status(
                status.as_u16(),
                format!("job creation rejected with HTTP {status}: {snippet}"),
            ));
        }

        let json: Value = resp.json().await.map_err(|e| {
            ConvertError::provider_status(
                status.as_u16(),
                format!("job creation response is not JSON: {}", redact(e)),
            )
        })?;

        parse_remote_job(&json).map_err(|reason| {
            ConvertError::provider_status(
                status.as_u16(),
                format!("unexpected job creation response: {reason}"),
            )
        })
    }

    async fn task_status(&self, task_id: &str) -> Result<TaskStatus, ConvertError> {
        let resp = self
            .http
            .get(format!("{}/tasks/{}", self.base_url, task_id))
            .bearer_auth(self.api_key.expose_secret())
            .send()
            .await
            .map_err(|e| ConvertError::provider(format!("status check failed: {}", redact(e))))?;

        let status = resp.status();
        if !status.is_success() {
            let snippet = body_snippet(resp).await;
            return Err(ConvertError::provider_status(
                status.as_u16(),
                format!("status check for task {task_id} returned HTTP {status}: {snippet}"),
            ));
        }

        let json: Value = resp.json().await.map_err(|e| {
            ConvertError::provider_status(
                status.as_u16(),
                format!("status response is not JSON: {}", redact(e)),
            )
        })?;
        Ok(parse_task_status(&json))
    }

    async fn upload(&self, url: &str, bytes: Bytes) -> Result<(), ConvertError> {
        let len = bytes.len();
        let resp = self
            .http
            .put(url)
            .header(CONTENT_TYPE, "application/octet-stream")
            .body(bytes)
            .send()
            .await
            .map_err(|e| ConvertError::Upload { detail: redact(e) })?;

        let status = resp.status();
        if !status.is_success() {
            return Err(ConvertError::Upload {
                detail: format!("upload target answered HTTP {status}"),
            });
        }
        debug!("Uploaded {} bytes", len);
        Ok(())
    }

    async fn download(&self, url: &str) -> Result<Bytes, ConvertError> {
        let resp = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| ConvertError::Download { detail: redact(e) })?;

        let status = resp.status();
        if !status.is_success() {
            return Err(ConvertError::Download {
                detail: format!("result location answered HTTP {status}"),
            });
        }

        let bytes = resp
            .bytes()
            .await
            .map_err(|e| ConvertError::Download { detail: redact(e) })?;
        if bytes.is_empty() {
            return Err(ConvertError::Download {
                detail: "provider returned an empty file".to_string(),
            });
        }
        Ok(bytes)
    }
}

/// The task graph sent to `POST /jobs`.
pub fn job_request_body(spec: &JobSpec) -> Value {
    let mut convert = json!({
        "operation": "convert",
        "input": ["upload"],
        "input_format": spec.source.extension(),
        "output_format": spec.target.extension(),
    });
    if let Some(ref engine) = spec.engine {
        convert["engine"] = json!(engine);
    }
    json!({
        "tasks": {
            "upload": { "operation": "import/upload" },
            "convert": convert,
            "export": { "operation": "export/url", "input": ["convert"] },
        }
    })
}

/// Extract job and task identifiers from a job-creation response.
pub fn parse_remote_job(body: &Value) -> Result<RemoteJob, String> {
    let data = unwrap_data(body);
    let job_id = data
        .get("id")
        .and_then(Value::as_str)
        .ok_or("missing job id")?
        .to_string();
    let tasks = data
        .get("tasks")
        .and_then(Value::as_array)
        .ok_or("missing task list")?;

    let task_id = |name: &str| -> Option<String> {
        tasks
            .iter()
            .find(|t| t.get("name").and_then(Value::as_str) == Some(name))
            .and_then(|t| t.get("id"))
            .and_then(Value::as_str)
            .map(str::to_string)
    };

    Ok(RemoteJob {
        upload_task_id: task_id("upload").ok_or("no 'upload' task in job")?,
        convert_task_id: task_id("convert").ok_or("no 'convert' task in job")?,
        export_task_id: task_id("export"),
        job_id,
    })
}

/// First 200 characters of an error body, for diagnostics.
async fn body_snippet(resp: reqwest::Response) -> String {
    match resp.text().await {
        Ok(text) if text.trim().is_empty() => "<empty body>".to_string(),
        Ok(text) => text.chars().take(200).collect(),
        Err(_) => "<unreadable body>".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_body_has_named_task_graph() {
        let body = job_request_body(&JobSpec {
            source: DocumentFormat::Pdf,
            target: DocumentFormat::Docx,
            engine: Some("libreoffice".into()),
        });
        assert_eq!(body["tasks"]["upload"]["operation"], "import/upload");
        assert_eq!(body["tasks"]["convert"]["input"][0], "upload");
        assert_eq!(body["tasks"]["convert"]["output_format"], "docx");
        assert_eq!(body["tasks"]["convert"]["input_format"], "pdf");
        assert_eq!(body["tasks"]["convert"]["engine"], "libreoffice");
        assert_eq!(body["tasks"]["export"]["input"][0], "convert");
    }

    #[test]
    fn request_body_omits_engine_when_unset() {
        let body = job_request_body(&JobSpec {
            source: DocumentFormat::Txt,
            target: DocumentFormat::Pdf,
            engine: None,
        });
        assert!(body["tasks"]["convert"].get("engine").is_none());
    }

    #[test]
    fn parses_job_with_all_tasks() {
        let body = json!({
            "data": {
                "id": "job-1",
                "tasks": [
                    { "id": "t-up", "name": "upload" },
                    { "id": "t-cv", "name": "convert" },
                    { "id": "t-ex", "name": "export" }
                ]
            }
        });
        let job = parse_remote_job(&body).unwrap();
        assert_eq!(job.job_id, "job-1");
        assert_eq!(job.upload_task_id, "t-up");
        assert_eq!(job.convert_task_id, "t-cv");
        assert_eq!(job.export_task_id.as_deref(), Some("t-ex"));
    }

    #[test]
    fn malformed_job_responses_are_rejected() {
        assert_eq!(
            parse_remote_job(&json!({ "data": { "id": "j" } })).unwrap_err(),
            "missing task list"
        );
        assert_eq!(
            parse_remote_job(&json!({ "tasks": [] })).unwrap_err(),
            "missing job id"
        );
        let no_convert = json!({ "id": "j", "tasks": [ { "id": "u", "name": "upload" } ] });
        assert_eq!(
            parse_remote_job(&no_convert).unwrap_err(),
            "no 'convert' task in job"
        );
    }

    #[test]
    fn debug_output_redacts_credential() {
        let client = HttpProviderClient::new(
            "https://api.example.test/v2/",
            SecretString::from("super-secret-token".to_string()),
            Duration::from_secs(5),
        )
        .unwrap();
        let dbg = format!("{client:?}");
        assert!(!dbg.contains("super-secret-token"));
        assert_eq!(client.base_url(), "https://api.example.test/v2");
    }
}
