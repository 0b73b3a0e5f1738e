//! HTTP behavior of the API client against a mock server.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::Utc;
use vinvite_client::{
    endpoints, ApiClient, CancellationToken, ClientConfig, ClientError, ProgressReporter,
};
use vinvite_models::{FormValues, InviteRequest, ImageDataUrl, Photo};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const BASE_MS: u64 = 50;

fn client(server: &MockServer) -> ApiClient {
    let config = ClientConfig::with_base_url(server.uri())
        .with_retry_base(Duration::from_millis(BASE_MS));
    ApiClient::new(config).unwrap()
}

fn photo() -> Photo {
    Photo::new(vec![0xFFu8, 0xD8, 0xFF, 0xE0, 1, 2, 3], "image/jpeg", "couple.jpg", Utc::now())
        .unwrap()
}

fn generate_ok() -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(serde_json::json!({
        "success": true,
        "characterImage": "data:image/png;base64,iVBORw0KGgo=",
        "evaluation": {"score": 0.8, "passed": true}
    }))
}

async fn request_count(server: &MockServer, endpoint: &str) -> usize {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|r| r.url.path() == endpoint)
        .count()
}

#[tokio::test]
async fn test_pure_5xx_exhausts_attempts_with_doubling_delays() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(endpoints::GENERATE))
        .respond_with(ResponseTemplate::new(503).set_body_string("busy"))
        .mount(&server)
        .await;

    let started = Instant::now();
    let result = client(&server)
        .generate(&photo(), None, &CancellationToken::new())
        .await;

    assert!(matches!(result, Err(ClientError::Server { status: 503, .. })));
    assert_eq!(request_count(&server, endpoints::GENERATE).await, 3);
    // Delays of base and 2 * base, none after the last attempt
    assert!(started.elapsed() >= Duration::from_millis(BASE_MS * 3));
}

#[tokio::test]
async fn test_4xx_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(endpoints::GENERATE))
        .respond_with(
            ResponseTemplate::new(400)
                .set_body_json(serde_json::json!({"success": false, "error": "bad photo"})),
        )
        .mount(&server)
        .await;

    let err = client(&server)
        .generate(&photo(), None, &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, ClientError::Rejected { status: 400, .. }));
    assert_eq!(err.user_message(), "bad photo");
    assert_eq!(request_count(&server, endpoints::GENERATE).await, 1);
}

#[tokio::test]
async fn test_recovers_after_transient_failures() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(endpoints::GENERATE))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(endpoints::GENERATE))
        .respond_with(generate_ok())
        .mount(&server)
        .await;

    let generated = client(&server)
        .generate(&photo(), None, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(generated.image.mime(), "image/png");
    assert_eq!(generated.evaluation.score, 0.8);
    assert_eq!(request_count(&server, endpoints::GENERATE).await, 3);
}

#[tokio::test]
async fn test_real_backoff_base_waits_three_seconds() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(endpoints::GENERATE))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(endpoints::GENERATE))
        .respond_with(generate_ok())
        .mount(&server)
        .await;

    let client = ApiClient::new(ClientConfig::with_base_url(server.uri())).unwrap();
    let started = Instant::now();
    client
        .generate(&photo(), None, &CancellationToken::new())
        .await
        .unwrap();

    assert!(started.elapsed() >= Duration::from_millis(1000 + 2000));
}

#[tokio::test]
async fn test_network_failure_is_retried() {
    // Nothing listens on the discard port
    let config = ClientConfig::with_base_url("http://127.0.0.1:9")
        .with_retry_base(Duration::from_millis(10))
        .with_max_attempts(2);
    let client = ApiClient::new(config).unwrap();

    let err = client
        .extract(&photo(), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Network(_)));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_cancel_aborts_in_flight_request() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(endpoints::GENERATE))
        .respond_with(generate_ok().set_delay(Duration::from_secs(10)))
        .mount(&server)
        .await;

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let started = Instant::now();
    let result = client(&server).generate(&photo(), None, &cancel).await;
    assert!(matches!(result, Err(ClientError::Cancelled)));
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn test_cancel_during_backoff_stops_retrying() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(endpoints::GENERATE))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let config = ClientConfig::with_base_url(server.uri()).with_retry_base(Duration::from_secs(5));
    let client = ApiClient::new(config).unwrap();
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        trigger.cancel();
    });

    let result = client.generate(&photo(), None, &cancel).await;
    assert!(matches!(result, Err(ClientError::Cancelled)));
    assert_eq!(request_count(&server, endpoints::GENERATE).await, 1);
}

#[tokio::test]
async fn test_html_response_is_misconfigured_endpoint() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(endpoints::EXTRACT))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw("<html>index</html>", "text/html"),
        )
        .mount(&server)
        .await;

    let err = client(&server)
        .extract(&photo(), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Misconfigured { .. }));
    assert_eq!(err.user_message(), "Misconfigured endpoint");
    assert_eq!(request_count(&server, endpoints::EXTRACT).await, 1);
}

#[tokio::test]
async fn test_extract_and_remove_background() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(endpoints::EXTRACT))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "success": true,
            "descriptions": {"bride": "red saree", "groom": "cream sherwani"}
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(endpoints::REMOVE_BACKGROUND))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "success": true,
            "imageDataURL": "data:image/png;base64,AAAA"
        })))
        .mount(&server)
        .await;

    let client = client(&server);
    let cancel = CancellationToken::new();
    let descriptions = client.extract(&photo(), &cancel).await.unwrap();
    assert_eq!(descriptions.bride, "red saree");

    let input = ImageDataUrl::from_png(&[1, 2, 3]);
    let output = client.remove_background(&input, &cancel).await.unwrap();
    assert_eq!(output.as_str(), "data:image/png;base64,AAAA");
}

fn invite() -> InviteRequest {
    let form = FormValues {
        bride_name: "priya".into(),
        groom_name: "rohit".into(),
        date: "2025-12-01".into(),
        venue: "X".into(),
        ..Default::default()
    };
    InviteRequest::from_form(&form, photo()).unwrap()
}

#[tokio::test]
async fn test_compose_video_reports_monotonic_progress() {
    let server = MockServer::start().await;
    let video = vec![0u8; 64 * 1024];
    Mock::given(method("POST"))
        .and(path(endpoints::COMPOSE_VIDEO))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(video.clone(), "video/mp4")
                .set_delay(Duration::from_millis(300)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let progress = ProgressReporter::new(move |p| sink.lock().unwrap().push(p));
    let mut config = ClientConfig::with_base_url(server.uri());
    config.compose_tick = Duration::from_millis(20);
    let client = ApiClient::new(config).unwrap();

    let request = invite().with_artifact(ImageDataUrl::from_png(&vec![7u8; 100 * 1024]));
    let bytes = client
        .compose_video(&request, &progress, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(bytes.len(), video.len());
    let seen = seen.lock().unwrap().clone();
    assert!(seen.windows(2).all(|w| w[0] < w[1]), "{:?}", seen);
    assert_eq!(seen.last(), Some(&100));
    assert!(seen.contains(&30));
}

#[tokio::test]
async fn test_compose_video_rejects_non_mp4() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(endpoints::COMPOSE_VIDEO))
        .respond_with(ResponseTemplate::new(200).set_body_raw("<html></html>", "text/html"))
        .mount(&server)
        .await;

    let err = client(&server)
        .compose_video(
            &invite().with_artifact(ImageDataUrl::from_png(&[1])),
            &ProgressReporter::noop(),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Misconfigured { .. }));
}

#[tokio::test]
async fn test_compose_video_requires_artwork() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(endpoints::COMPOSE_VIDEO))
        .respond_with(ResponseTemplate::new(200).set_body_raw(vec![0u8; 16], "video/mp4"))
        .expect(0)
        .mount(&server)
        .await;

    let err = client(&server)
        .compose_video(&invite(), &ProgressReporter::noop(), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::InvalidImage(_)));
}
