mod client;

pub use client::{ApiErrorClass, LogsyncClient, LogsyncError, upload_file_name};
