use std::collections::HashSet;
use std::future::Future;

use logsync_core::{LogsyncClient, LogsyncError};
use url::Url;

/// Upload target for one log file. Each url accepts a single PUT.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadDestination {
    pub for_filename: String,
    pub url: Url,
    pub index: usize,
}

/// Which log names the backend has already ingested.
pub trait UploadRegistryClient: Send + Sync {
    fn fetch_uploaded_names(
        &self,
    ) -> impl Future<Output = Result<HashSet<String>, LogsyncError>> + Send;
}

/// Issues upload destinations, one per requested name, in request order.
pub trait PresignedUploadClient: Send + Sync {
    fn request_destinations(
        &self,
        names: &[String],
    ) -> impl Future<Output = Result<Vec<UploadDestination>, LogsyncError>> + Send;
}

impl UploadRegistryClient for LogsyncClient {
    async fn fetch_uploaded_names(&self) -> Result<HashSet<String>, LogsyncError> {
        self.fetch_uploaded_log_names().await
    }
}

impl PresignedUploadClient for LogsyncClient {
    async fn request_destinations(
        &self,
        names: &[String],
    ) -> Result<Vec<UploadDestination>, LogsyncError> {
        let urls = self.create_upload_urls(names).await?;
        Ok(urls
            .into_iter()
            .enumerate()
            .map(|(index, url)| UploadDestination {
                for_filename: names.get(index).cloned().unwrap_or_default(),
                url,
                index,
            })
            .collect())
    }
}
