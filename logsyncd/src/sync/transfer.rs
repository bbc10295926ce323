use std::{io, path::Path, sync::Arc, time::Duration};

use reqwest::Client;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio_util::io::ReaderStream;
use url::Url;

const DEFAULT_CONTENT_TYPE: &str = "application/zip";
const DEFAULT_UPLOAD_TIMEOUT_SECS: u64 = 120;

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("upload limiter is closed")]
    ConcurrencyClosed,
    #[error("upload rejected with status {status}")]
    Rejected { status: reqwest::StatusCode },
}

impl TransferError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, TransferError::Request(err) if err.is_timeout())
    }
}

/// PUTs log files to pre-authorized upload urls, one at a time.
#[derive(Clone)]
pub struct TransferClient {
    http: Client,
    in_flight: Arc<Semaphore>,
    content_type: String,
    timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct TransferConfig {
    pub upload_timeout: Duration,
    pub content_type: String,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            upload_timeout: Duration::from_secs(DEFAULT_UPLOAD_TIMEOUT_SECS),
            content_type: DEFAULT_CONTENT_TYPE.to_string(),
        }
    }
}

impl TransferClient {
    pub fn new() -> Self {
        Self::with_config(TransferConfig::default())
    }

    pub fn with_config(config: TransferConfig) -> Self {
        Self {
            http: Client::new(),
            in_flight: Arc::new(Semaphore::new(1)),
            content_type: config.content_type,
            timeout: config.upload_timeout,
        }
    }

    /// Sends the raw bytes of `source` in a single PUT. Only a 2xx status
    /// counts as success.
    pub async fn upload_file(&self, href: &str, source: &Path) -> Result<(), TransferError> {
        let _permit = self
            .in_flight
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| TransferError::ConcurrencyClosed)?;
        let url = Url::parse(href)?;
        let file = tokio::fs::File::open(source).await?;
        let length = file.metadata().await?.len();
        let body = reqwest::Body::wrap_stream(ReaderStream::new(file));
        let response = self
            .http
            .put(url)
            .timeout(self.timeout)
            .header(CONTENT_TYPE, &self.content_type)
            .header(CONTENT_LENGTH, length)
            .body(body)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(TransferError::Rejected { status });
        }
        Ok(())
    }
}

impl Default for TransferClient {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use wiremock::matchers::{body_bytes, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn uploads_raw_bytes_with_zip_content_type() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/upload"))
            .and(header("content-type", "application/zip"))
            .and(body_bytes(b"payload"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        let source = dir.path().join("run.slopes");
        std::fs::write(&source, b"payload").unwrap();

        TransferClient::new()
            .upload_file(&format!("{}/upload", server.uri()), &source)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn non_success_status_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/upload"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        let source = dir.path().join("run.slopes");
        std::fs::write(&source, b"payload").unwrap();

        let err = TransferClient::new()
            .upload_file(&format!("{}/upload", server.uri()), &source)
            .await
            .expect_err("403 must fail");
        assert!(matches!(
            err,
            TransferError::Rejected { status } if status == reqwest::StatusCode::FORBIDDEN
        ));
    }

    #[tokio::test]
    async fn missing_source_is_io_error() {
        let dir = tempdir().unwrap();
        let err = TransferClient::new()
            .upload_file("http://127.0.0.1:9/upload", &dir.path().join("gone.slopes"))
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::Io(_)));
    }

    #[tokio::test]
    async fn slow_destination_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        let source = dir.path().join("run.slopes");
        std::fs::write(&source, b"payload").unwrap();

        let client = TransferClient::with_config(TransferConfig {
            upload_timeout: Duration::from_millis(100),
            content_type: DEFAULT_CONTENT_TYPE.to_string(),
        });
        let err = client
            .upload_file(&format!("{}/upload", server.uri()), &source)
            .await
            .unwrap_err();
        assert!(err.is_timeout());
    }
}
