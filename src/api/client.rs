//! HTTP implementation of `TaskApi`

use std::path::{Path, PathBuf};

use reqwest::header::CONTENT_DISPOSITION;
use reqwest::{Client as HttpClient, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info};
use url::Url;

use super::{ListQuery, LogChunk, NewTask, Task, TaskApi, TaskId, TaskPage, null_as_default};
use crate::error::{ActionError, LoadError};

/// Response envelope wrapped around every JSON payload
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(default)]
    success: bool,
    #[serde(default = "Option::default")]
    data: Option<T>,
    #[serde(default)]
    error: String,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct LogsPayload {
    #[serde(default, deserialize_with = "null_as_default")]
    logs: Vec<String>,
    #[serde(default)]
    total_lines: u64,
}

/// Why a response could not be turned into a payload
#[derive(Debug, PartialEq, Eq)]
enum Failure {
    Status { status: u16, message: String },
    Rejected(String),
    Decode(String),
}

impl From<Failure> for LoadError {
    fn from(failure: Failure) -> Self {
        match failure {
            Failure::Status { status, message } => LoadError::Status { status, message },
            Failure::Rejected(msg) => LoadError::Rejected(msg),
            Failure::Decode(msg) => LoadError::Decode(msg),
        }
    }
}

impl From<Failure> for ActionError {
    fn from(failure: Failure) -> Self {
        match failure {
            Failure::Status { status, message } => ActionError::Status { status, message },
            Failure::Rejected(msg) => ActionError::Rejected(msg),
            Failure::Decode(msg) => ActionError::Transport(msg),
        }
    }
}

/// Decode an envelope, treating non-2xx statuses and `success: false` as failures
fn decode_envelope<T: DeserializeOwned>(status: StatusCode, body: &str) -> Result<Option<T>, Failure> {
    let parsed = serde_json::from_str::<Envelope<T>>(body);

    if !status.is_success() {
        let message = match &parsed {
            Ok(env) if !env.error.is_empty() => env.error.clone(),
            Ok(env) => env.message.clone(),
            Err(_) => body.trim().to_string(),
        };
        return Err(Failure::Status {
            status: status.as_u16(),
            message,
        });
    }

    let envelope = parsed.map_err(|e| Failure::Decode(e.to_string()))?;
    if !envelope.success {
        let msg = if envelope.error.is_empty() {
            "request was not successful".to_string()
        } else {
            envelope.error
        };
        return Err(Failure::Rejected(msg));
    }
    Ok(envelope.data)
}

/// Extract the file name from a `Content-Disposition` header value
pub fn disposition_filename(header: &str) -> Option<String> {
    header
        .split(';')
        .map(str::trim)
        .filter_map(|part| {
            let (key, value) = part.split_once('=')?;
            key.trim().starts_with("filename").then_some(value.trim())
        })
        .map(|value| {
            let value = value.strip_prefix("UTF-8''").unwrap_or(value);
            value.trim_matches(|c| c == '"' || c == '\'').to_string()
        })
        // Never let the server pick a directory
        .filter_map(|name| {
            Path::new(&name)
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
        })
        .find(|name| !name.is_empty())
}

/// REST client for the task service
#[derive(Debug, Clone)]
pub struct RestClient {
    http_client: HttpClient,
    base_url: Url,
}

impl RestClient {
    pub fn new(base_url: Url) -> Result<Self, LoadError> {
        let http_client = HttpClient::builder()
            .user_agent(concat!("taskdeck/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http_client,
            base_url: normalize_base(base_url),
        })
    }

    /// Create a client from a base URL string such as `http://localhost:8888/api/v1`
    pub fn from_url(base_url: &str) -> Result<Self, LoadError> {
        Self::new(Url::parse(base_url)?)
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Resolve a path relative to the API base
    pub fn endpoint(&self, path: &str) -> Result<Url, url::ParseError> {
        self.base_url.join(path.trim_start_matches('/'))
    }

    pub fn tasks_url(&self, query: &ListQuery) -> Result<Url, url::ParseError> {
        let mut url = self.endpoint("tasks")?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs
                .append_pair("offset", &query.offset.to_string())
                .append_pair("limit", &query.limit.to_string());
            if let Some(status) = query.status {
                pairs.append_pair("status", &u8::from(status).to_string());
            }
        }
        Ok(url)
    }

    /// URL of a log range request.
    ///
    /// The server rejects `from >= to`, so a single-line request asks for one
    /// extra line which `LogChunk::from_wire` discards.
    pub fn logs_url(&self, task_id: TaskId, from: u64, to: u64) -> Result<Url, url::ParseError> {
        let mut url = self.endpoint(&format!("tasks/{}/logs", task_id))?;
        if from > 0 && to > 0 {
            let to = if to <= from { from + 1 } else { to };
            url.query_pairs_mut()
                .append_pair("from", &from.to_string())
                .append_pair("to", &to.to_string());
        }
        Ok(url)
    }

    pub fn events_url(&self) -> Result<Url, url::ParseError> {
        self.endpoint("events")
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<Option<T>, SendError> {
        let response = request.send().await.map_err(SendError::Http)?;
        let status = response.status();
        let body = response.text().await.map_err(SendError::Http)?;
        decode_envelope(status, &body).map_err(SendError::Api)
    }
}

fn normalize_base(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}

enum SendError {
    Http(reqwest::Error),
    Api(Failure),
}

impl From<SendError> for LoadError {
    fn from(err: SendError) -> Self {
        match err {
            SendError::Http(e) => e.into(),
            SendError::Api(f) => f.into(),
        }
    }
}

impl From<SendError> for ActionError {
    fn from(err: SendError) -> Self {
        match err {
            SendError::Http(e) => e.into(),
            SendError::Api(f) => f.into(),
        }
    }
}

#[async_trait::async_trait]
impl TaskApi for RestClient {
    async fn list_tasks(&self, query: &ListQuery) -> Result<TaskPage, LoadError> {
        let url = self.tasks_url(query)?;
        debug!(%url, "listing tasks");
        let page: Option<TaskPage> = self.send(self.http_client.get(url)).await?;
        Ok(page.unwrap_or_default())
    }

    async fn fetch_log_range(
        &self,
        task_id: TaskId,
        from: u64,
        to: u64,
    ) -> Result<LogChunk, LoadError> {
        if (from == 0) != (to == 0) || (from > 0 && to < from) {
            return Err(LoadError::InvalidRange { from, to });
        }

        let url = self.logs_url(task_id, from, to)?;
        debug!(%url, task_id, from, to, "fetching log range");
        let payload: Option<LogsPayload> = self.send(self.http_client.get(url)).await?;
        let payload =
            payload.ok_or_else(|| LoadError::Rejected("No logs data found".to_string()))?;
        Ok(LogChunk::from_wire(from, to, payload.logs, payload.total_lines))
    }

    async fn create_task(&self, task: &NewTask) -> Result<Task, ActionError> {
        let url = self.endpoint("tasks")?;
        info!(name = %task.name, command = %task.command, "creating task");
        let created: Option<Task> = self.send(self.http_client.post(url).json(task)).await?;
        created.ok_or_else(|| ActionError::Rejected("server returned no task".to_string()))
    }

    async fn cancel_task(&self, task_id: TaskId) -> Result<(), ActionError> {
        let url = self.endpoint(&format!("tasks/{}/cancel", task_id))?;
        info!(task_id, "cancelling task");
        let _: Option<serde_json::Value> = self.send(self.http_client.delete(url)).await?;
        Ok(())
    }

    async fn download_logs(&self, task_id: TaskId, dir: &Path) -> Result<PathBuf, ActionError> {
        let url = self.endpoint(&format!("tasks/{}/logs/download", task_id))?;
        debug!(%url, task_id, "downloading logs");

        let response = self.http_client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await?;
            return Err(match decode_envelope::<serde_json::Value>(status, &body) {
                Err(failure) => failure.into(),
                Ok(_) => ActionError::Status {
                    status: status.as_u16(),
                    message: body,
                },
            });
        }

        let filename = response
            .headers()
            .get(CONTENT_DISPOSITION)
            .and_then(|v| v.to_str().ok())
            .and_then(disposition_filename)
            .unwrap_or_else(|| format!("task-{}-logs.txt", task_id));

        let bytes = response.bytes().await?;
        tokio::fs::create_dir_all(dir).await?;
        let path = dir.join(filename);
        tokio::fs::write(&path, &bytes).await?;

        info!(task_id, path = %path.display(), bytes = bytes.len(), "saved task logs");
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::TaskStatus;

    fn client() -> RestClient {
        RestClient::from_url("http://localhost:8888/api/v1").unwrap()
    }

    #[test]
    fn test_base_url_keeps_version_prefix() {
        let client = client();
        assert_eq!(client.base_url().as_str(), "http://localhost:8888/api/v1/");
        assert_eq!(
            client.events_url().unwrap().as_str(),
            "http://localhost:8888/api/v1/events"
        );
    }

    #[test]
    fn test_tasks_url_query() {
        let query = ListQuery {
            offset: 20,
            limit: 10,
            status: Some(TaskStatus::Running),
        };
        let url = client().tasks_url(&query).unwrap();
        assert_eq!(
            url.as_str(),
            "http://localhost:8888/api/v1/tasks?offset=20&limit=10&status=2"
        );
    }

    #[test]
    fn test_logs_url_variants() {
        let client = client();
        assert_eq!(
            client.logs_url(7, 0, 0).unwrap().as_str(),
            "http://localhost:8888/api/v1/tasks/7/logs"
        );
        assert_eq!(
            client.logs_url(7, 400, 499).unwrap().query(),
            Some("from=400&to=499")
        );
        assert_eq!(client.logs_url(7, 1, 1).unwrap().query(), Some("from=1&to=2"));
    }

    #[tokio::test]
    async fn test_half_open_range_is_rejected_locally() {
        let err = client().fetch_log_range(7, 10, 0).await.unwrap_err();
        assert_eq!(err, LoadError::InvalidRange { from: 10, to: 0 });
    }

    #[test]
    fn test_decode_success_envelope() {
        let body = r#"{"success":true,"code":200,"data":{"logs":["a","b"],"total_lines":2},"error":"","message":""}"#;
        let payload: LogsPayload = decode_envelope(StatusCode::OK, body).unwrap().unwrap();
        assert_eq!(payload.logs, vec!["a", "b"]);
        assert_eq!(payload.total_lines, 2);
    }

    #[test]
    fn test_decode_null_logs() {
        let body = r#"{"success":true,"data":{"logs":null,"total_lines":0}}"#;
        let payload: LogsPayload = decode_envelope(StatusCode::OK, body).unwrap().unwrap();
        assert!(payload.logs.is_empty());
    }

    #[test]
    fn test_decode_error_status_uses_envelope_message() {
        let body = r#"{"success":false,"code":400,"data":null,"error":"from must be less than to"}"#;
        let failure = decode_envelope::<LogsPayload>(StatusCode::BAD_REQUEST, body).unwrap_err();
        assert_eq!(
            failure,
            Failure::Status {
                status: 400,
                message: "from must be less than to".to_string()
            }
        );
    }

    #[test]
    fn test_decode_unsuccessful_ok_response() {
        let body = r#"{"success":false,"error":"task is not running"}"#;
        let failure = decode_envelope::<serde_json::Value>(StatusCode::OK, body).unwrap_err();
        assert_eq!(failure, Failure::Rejected("task is not running".to_string()));
    }

    #[test]
    fn test_decode_garbage_body() {
        let failure = decode_envelope::<TaskPage>(StatusCode::OK, "<html>").unwrap_err();
        assert!(matches!(failure, Failure::Decode(_)));
    }

    #[test]
    fn test_disposition_filename() {
        assert_eq!(
            disposition_filename(r#"attachment; filename="task-7.log""#),
            Some("task-7.log".to_string())
        );
        assert_eq!(
            disposition_filename("attachment; filename*=UTF-8''task-8.log"),
            Some("task-8.log".to_string())
        );
        assert_eq!(
            disposition_filename(r#"attachment; filename="../../etc/passwd""#),
            Some("passwd".to_string())
        );
        assert_eq!(disposition_filename("inline"), None);
    }
}
