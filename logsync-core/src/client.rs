use std::collections::HashSet;
use std::time::{Duration, SystemTime};

use reqwest::header::RETRY_AFTER;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

const GRAPHQL_PATH: &str = "/graphql";

const UPLOADED_LOGS_QUERY: &str =
    "query GetUploadedLogs { selfLookup { logbook { originalFileName } } }";
const CREATE_UPLOAD_URLS_MUTATION: &str = "mutation CreateUserRecordUploadUrl($requestedPaths: [String!]!) { createUserRecordUploadUrl(requestedPaths: $requestedPaths) }";

#[derive(Debug, Error)]
pub enum LogsyncError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("api returned {status}: {body}")]
    Api {
        status: StatusCode,
        body: String,
        retry_after: Option<u64>,
    },
    #[error("graphql errors: {}", .0.join("; "))]
    GraphQl(Vec<String>),
    #[error("response is missing {0}")]
    MissingData(&'static str),
    #[error("upload url at position {index} is null")]
    NullDestination { index: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorClass {
    Auth,
    RateLimit,
    Transient,
    Permanent,
}

/// Client for the activity-log backend: which logs were ingested already, and
/// where new ones may be uploaded.
#[derive(Clone)]
pub struct LogsyncClient {
    http: Client,
    base_url: Url,
    token: String,
}

impl LogsyncClient {
    pub fn with_base_url(base_url: &str, token: impl Into<String>) -> Result<Self, LogsyncError> {
        Ok(Self {
            http: Client::new(),
            base_url: Url::parse(base_url)?,
            token: token.into(),
        })
    }

    /// Applies a per-request timeout to every backend call.
    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self, LogsyncError> {
        self.http = Client::builder().timeout(timeout).build()?;
        Ok(self)
    }

    /// Names of the log files the backend has already ingested for the current
    /// session. Stored names may carry a key prefix; only the last path segment
    /// is returned.
    pub async fn fetch_uploaded_log_names(&self) -> Result<HashSet<String>, LogsyncError> {
        let data: UploadedLogsData = self
            .graphql(&GraphQlRequest {
                query: UPLOADED_LOGS_QUERY,
                variables: None::<()>,
            })
            .await?;
        let logbook = data
            .self_lookup
            .ok_or(LogsyncError::MissingData("selfLookup"))?
            .logbook
            .ok_or(LogsyncError::MissingData("logbook"))?;
        Ok(logbook
            .into_iter()
            .map(|entry| upload_file_name(&entry.original_file_name).to_string())
            .filter(|name| !name.is_empty())
            .collect())
    }

    /// Requests one single-use upload url per filename. The returned list keeps
    /// the request order; its length is not validated here.
    pub async fn create_upload_urls(
        &self,
        requested_paths: &[String],
    ) -> Result<Vec<Url>, LogsyncError> {
        let data: UploadUrlsData = self
            .graphql(&GraphQlRequest {
                query: CREATE_UPLOAD_URLS_MUTATION,
                variables: Some(UploadUrlsVariables { requested_paths }),
            })
            .await?;
        let urls = data
            .create_user_record_upload_url
            .ok_or(LogsyncError::MissingData("createUserRecordUploadUrl"))?;
        urls.into_iter()
            .enumerate()
            .map(|(index, url)| {
                let url = url.ok_or(LogsyncError::NullDestination { index })?;
                Ok(Url::parse(&url)?)
            })
            .collect()
    }

    fn auth_header_value(&self) -> String {
        format!("Bearer {}", self.token)
    }

    fn endpoint(&self, path: &str) -> Result<Url, LogsyncError> {
        Ok(self.base_url.join(path)?)
    }

    async fn graphql<V: Serialize, T: serde::de::DeserializeOwned>(
        &self,
        request: &GraphQlRequest<'_, V>,
    ) -> Result<T, LogsyncError> {
        let url = self.endpoint(GRAPHQL_PATH)?;
        let response = self
            .http
            .post(url)
            .header("Authorization", self.auth_header_value())
            .json(request)
            .send()
            .await?;
        let payload: GraphQlResponse<T> = Self::handle_response(response).await?;
        if !payload.errors.is_empty() {
            return Err(LogsyncError::GraphQl(
                payload.errors.into_iter().map(|err| err.message).collect(),
            ));
        }
        payload.data.ok_or(LogsyncError::MissingData("data"))
    }

    async fn handle_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, LogsyncError> {
        if response.status().is_success() {
            Ok(response.json::<T>().await?)
        } else {
            let status = response.status();
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|value| value.to_str().ok())
                .and_then(parse_retry_after);
            let body = response.text().await.unwrap_or_default();
            Err(LogsyncError::Api {
                status,
                body,
                retry_after,
            })
        }
    }
}

impl LogsyncError {
    pub fn classification(&self) -> Option<ApiErrorClass> {
        match self {
            LogsyncError::Api { status, .. } => Some(classify_api_status(*status)),
            LogsyncError::Request(err) if err.is_timeout() || err.is_connect() => {
                Some(ApiErrorClass::Transient)
            }
            _ => None,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self.classification(),
            Some(ApiErrorClass::RateLimit | ApiErrorClass::Transient)
        )
    }

    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            LogsyncError::Api { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

/// Last `/`-separated segment of a stored log name.
pub fn upload_file_name(original: &str) -> &str {
    original.rsplit('/').next().unwrap_or(original)
}

fn classify_api_status(status: StatusCode) -> ApiErrorClass {
    if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
        ApiErrorClass::Auth
    } else if status == StatusCode::TOO_MANY_REQUESTS {
        ApiErrorClass::RateLimit
    } else if status.is_server_error()
        || matches!(
            status,
            StatusCode::REQUEST_TIMEOUT | StatusCode::CONFLICT | StatusCode::TOO_EARLY
        )
    {
        ApiErrorClass::Transient
    } else {
        ApiErrorClass::Permanent
    }
}

fn parse_retry_after(value: &str) -> Option<u64> {
    let value = value.trim();
    if let Ok(seconds) = value.parse::<u64>() {
        return Some(seconds);
    }
    let at = httpdate::parse_http_date(value).ok()?;
    Some(
        at.duration_since(SystemTime::now())
            .map(|left| left.as_secs())
            .unwrap_or(0),
    )
}

#[derive(Debug, Serialize)]
struct GraphQlRequest<'a, V> {
    query: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    variables: Option<V>,
}

#[derive(Debug, Deserialize)]
struct GraphQlResponse<T> {
    data: Option<T>,
    #[serde(default)]
    errors: Vec<GraphQlErrorMessage>,
}

#[derive(Debug, Deserialize)]
struct GraphQlErrorMessage {
    message: String,
}

#[derive(Debug, Deserialize)]
struct UploadedLogsData {
    #[serde(rename = "selfLookup")]
    self_lookup: Option<SelfLookup>,
}

#[derive(Debug, Deserialize)]
struct SelfLookup {
    logbook: Option<Vec<LogbookEntry>>,
}

#[derive(Debug, Deserialize)]
struct LogbookEntry {
    #[serde(rename = "originalFileName")]
    original_file_name: String,
}

#[derive(Debug, Serialize)]
struct UploadUrlsVariables<'a> {
    #[serde(rename = "requestedPaths")]
    requested_paths: &'a [String],
}

#[derive(Debug, Deserialize)]
struct UploadUrlsData {
    #[serde(rename = "createUserRecordUploadUrl")]
    create_user_record_upload_url: Option<Vec<Option<String>>>,
}
