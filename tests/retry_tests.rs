use device_command_pipeline::config::TimeoutSettings;
use device_command_pipeline::retry::{
    ErrorCode, OutboundRequest, RetryClient, RetryOptions, IDEMPOTENCY_KEY_HEADER,
};
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client() -> RetryClient {
    RetryClient::new(
        reqwest::Client::new(),
        TimeoutSettings {
            general_ms: 300,
            health_ms: 300,
            login_ms: 300,
        },
        fast_options(),
    )
}

fn fast_options() -> RetryOptions {
    RetryOptions::default().with_delays(Duration::from_millis(5), Duration::from_millis(20))
}

fn transient(code: &str) -> ResponseTemplate {
    ResponseTemplate::new(503).set_body_json(json!({"code": code, "error": "try again"}))
}

#[tokio::test]
async fn test_two_transient_failures_then_success_makes_three_calls() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/stove/ignite"))
        .respond_with(transient("STOVE_TIMEOUT"))
        .up_to_n_times(2)
        .expect(2)
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/api/stove/ignite"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ignited": true})))
        .expect(1)
        .mount(&mock_server)
        .await;

    let request = OutboundRequest::post(format!("{}/api/stove/ignite", mock_server.uri()))
        .json(json!({"power": 3}));
    let response = client().retry_fetch(&request, None).await.unwrap();

    assert_eq!(response.status().as_u16(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body, json!({"ignited": true}));
}

#[tokio::test]
async fn test_permanent_error_fails_fast() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/stove/ignite"))
        .respond_with(
            ResponseTemplate::new(409)
                .set_body_json(json!({"code": "MAINTENANCE_REQUIRED", "error": "Clean the stove"})),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    let request = OutboundRequest::post(format!("{}/api/stove/ignite", mock_server.uri()));
    let err = client().retry_fetch(&request, None).await.unwrap_err();

    assert_eq!(err.attempts, 1);
    assert_eq!(err.last_error.code, ErrorCode::MaintenanceRequired);
    assert_eq!(err.last_error.status, Some(409));
    assert_eq!(err.last_error.message, "Clean the stove");
}

#[tokio::test]
async fn test_exhausted_attempts_report_last_error() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/router/bandwidth"))
        .respond_with(transient("SERVICE_UNAVAILABLE"))
        .expect(3)
        .mount(&mock_server)
        .await;

    let request = OutboundRequest::get(format!("{}/api/router/bandwidth", mock_server.uri()));
    let err = client().retry_fetch(&request, None).await.unwrap_err();

    assert_eq!(err.attempts, 3);
    assert_eq!(err.last_error.code, ErrorCode::ServiceUnavailable);
    assert!(err.to_string().contains("3 attempt(s)"));
}

#[tokio::test]
async fn test_on_retry_fires_before_each_wait() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(transient("EXTERNAL_API_ERROR"))
        .expect(4)
        .mount(&mock_server)
        .await;

    let seen = Arc::new(Mutex::new(Vec::new()));
    let recorder = seen.clone();
    let options = fast_options()
        .with_max_attempts(4)
        .on_retry(move |attempt, err| {
            recorder.lock().unwrap().push((attempt, err.code.clone()));
        });

    let request = OutboundRequest::get(mock_server.uri());
    let err = client().retry_fetch(&request, Some(&options)).await.unwrap_err();

    assert_eq!(err.attempts, 4);
    let seen = seen.lock().unwrap();
    // No wait, and no callback, after the final attempt.
    assert_eq!(
        *seen,
        vec![
            (1, ErrorCode::ExternalApiError),
            (2, ErrorCode::ExternalApiError),
            (3, ErrorCode::ExternalApiError),
        ]
    );
}

#[tokio::test]
async fn test_timeout_is_transient_and_retried() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/health"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(800)))
        .up_to_n_times(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/api/health"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&mock_server)
        .await;

    let request = OutboundRequest::get(format!("{}/api/health", mock_server.uri()));
    let response = client().retry_fetch(&request, None).await.unwrap();
    assert!(response.status().is_success());
}

#[tokio::test]
async fn test_network_error_is_retried_then_reported() {
    // Nothing listens on port 1.
    let request = OutboundRequest::get("http://127.0.0.1:1/api/devices");
    let err = client().retry_fetch(&request, None).await.unwrap_err();

    assert_eq!(err.attempts, 3);
    assert!(err.last_error.is_transient());
    assert!(matches!(
        err.last_error.code,
        ErrorCode::NetworkError | ErrorCode::Timeout
    ));
}

#[tokio::test]
async fn test_status_without_code_is_classified_by_status() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&mock_server)
        .await;

    let request = OutboundRequest::get(mock_server.uri());
    let err = client().retry_fetch(&request, None).await.unwrap_err();

    assert_eq!(err.attempts, 1);
    assert_eq!(err.last_error.code, ErrorCode::Unauthorized);
}

#[tokio::test]
async fn test_idempotency_header_sent_on_every_attempt() {
    let mock_server = MockServer::start().await;
    let key = "3f2b8c1e-5d4a-4e6f-8a7b-9c0d1e2f3a4b";

    Mock::given(method("POST"))
        .and(header(IDEMPOTENCY_KEY_HEADER, key))
        .respond_with(transient("TIMEOUT"))
        .up_to_n_times(1)
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(header(IDEMPOTENCY_KEY_HEADER, key))
        .respond_with(ResponseTemplate::new(202))
        .expect(1)
        .mount(&mock_server)
        .await;

    let request = OutboundRequest::post(mock_server.uri())
        .json(json!({"on": true}))
        .idempotency_key(key)
        .unwrap();
    let response = client().retry_fetch(&request, None).await.unwrap();
    assert_eq!(response.status().as_u16(), 202);
}

#[tokio::test]
async fn test_fetch_json_decodes_body() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/thermostat"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"celsius": 20.5})))
        .mount(&mock_server)
        .await;

    #[derive(serde::Deserialize)]
    struct Reading {
        celsius: f64,
    }

    let request = OutboundRequest::get(format!("{}/api/thermostat", mock_server.uri()));
    let reading: Reading = client().fetch_json(&request, None).await.unwrap();
    assert_eq!(reading.celsius, 20.5);
}
