use logsync_core::{ApiErrorClass, LogsyncClient, LogsyncError};
use serde_json::json;
use wiremock::matchers::{body_partial_json, body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn fetch_uploaded_log_names_sends_bearer_token() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/graphql"))
        .and(header("authorization", "Bearer test-token"))
        .and(body_string_contains("GetUploadedLogs"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": {
                "selfLookup": {
                    "logbook": [
                        { "originalFileName": "user-1/a.slopes" },
                        { "originalFileName": "b.slopes" }
                    ]
                }
            }
        })))
        .mount(&server)
        .await;

    let client = LogsyncClient::with_base_url(&server.uri(), "test-token").unwrap();
    let names = client.fetch_uploaded_log_names().await.unwrap();

    assert_eq!(names.len(), 2);
    assert!(names.contains("a.slopes"));
    assert!(names.contains("b.slopes"));
}

#[tokio::test]
async fn fetch_uploaded_log_names_fails_without_logbook() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/graphql"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": { "selfLookup": null }
        })))
        .mount(&server)
        .await;

    let client = LogsyncClient::with_base_url(&server.uri(), "test-token").unwrap();
    let err = client
        .fetch_uploaded_log_names()
        .await
        .expect_err("missing selfLookup must not look like an empty registry");

    assert!(matches!(err, LogsyncError::MissingData("selfLookup")));
}

#[tokio::test]
async fn graphql_errors_are_surfaced() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/graphql"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": null,
            "errors": [{ "message": "not authenticated" }]
        })))
        .mount(&server)
        .await;

    let client = LogsyncClient::with_base_url(&server.uri(), "test-token").unwrap();
    let err = client.fetch_uploaded_log_names().await.unwrap_err();

    match err {
        LogsyncError::GraphQl(messages) => assert_eq!(messages, vec!["not authenticated"]),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn create_upload_urls_keeps_request_order() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/graphql"))
        .and(body_partial_json(json!({
            "variables": { "requestedPaths": ["b.slopes", "c.slopes"] }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": {
                "createUserRecordUploadUrl": ["https://u.example/b", "https://u.example/c"]
            }
        })))
        .mount(&server)
        .await;

    let client = LogsyncClient::with_base_url(&server.uri(), "test-token").unwrap();
    let urls = client
        .create_upload_urls(&["b.slopes".to_string(), "c.slopes".to_string()])
        .await
        .unwrap();

    assert_eq!(urls.len(), 2);
    assert_eq!(urls[0].as_str(), "https://u.example/b");
    assert_eq!(urls[1].as_str(), "https://u.example/c");
}

#[tokio::test]
async fn create_upload_urls_rejects_null_entries() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/graphql"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": { "createUserRecordUploadUrl": ["https://u.example/b", null] }
        })))
        .mount(&server)
        .await;

    let client = LogsyncClient::with_base_url(&server.uri(), "test-token").unwrap();
    let err = client
        .create_upload_urls(&["b.slopes".to_string(), "c.slopes".to_string()])
        .await
        .unwrap_err();

    assert!(matches!(err, LogsyncError::NullDestination { index: 1 }));
}

#[tokio::test]
async fn rate_limit_carries_retry_after() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/graphql"))
        .respond_with(
            ResponseTemplate::new(429)
                .insert_header("Retry-After", "7")
                .set_body_string("slow down"),
        )
        .mount(&server)
        .await;

    let client = LogsyncClient::with_base_url(&server.uri(), "test-token").unwrap();
    let err = client.fetch_uploaded_log_names().await.unwrap_err();

    assert_eq!(err.classification(), Some(ApiErrorClass::RateLimit));
    assert!(err.is_retryable());
    assert_eq!(err.retry_after_secs(), Some(7));
}

#[tokio::test]
async fn unauthorized_is_not_retryable() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/graphql"))
        .respond_with(ResponseTemplate::new(401).set_body_string("expired"))
        .mount(&server)
        .await;

    let client = LogsyncClient::with_base_url(&server.uri(), "test-token").unwrap();
    let err = client.fetch_uploaded_log_names().await.unwrap_err();

    assert_eq!(err.classification(), Some(ApiErrorClass::Auth));
    assert!(!err.is_retryable());
}
