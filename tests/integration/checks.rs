//! Probes against mock servers

use std::time::Duration;

use assert_matches::assert_matches;
use vigil::checks::{Check, CheckRegistry, HttpCheck, Scheme, TlsCheck};
use vigil::{MonitorError, ServiceKind, Status};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::helpers::fast_check_config;

#[tokio::test]
async fn test_http_200_is_healthy() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&mock_server)
        .await;

    let check = HttpCheck::new(Scheme::Http, Duration::from_secs(2)).unwrap();
    let result = check.probe(&mock_server.uri()).await;

    assert_eq!(result.status, Status::Healthy);
    assert_eq!(result.message, format!("{} - 200 OK", mock_server.uri()));
}

#[tokio::test]
async fn test_http_other_status_is_a_problem() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&mock_server)
        .await;

    let check = HttpCheck::new(Scheme::Http, Duration::from_secs(2)).unwrap();
    let result = check.probe(&mock_server.uri()).await;

    assert_eq!(result.status, Status::Problem);
    assert!(result.message.ends_with("503 Service Unavailable"));
}

#[tokio::test]
async fn test_http_redirect_is_followed() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(301).insert_header("Location", "/home"))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/home"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&mock_server)
        .await;

    let check = HttpCheck::new(Scheme::Http, Duration::from_secs(2)).unwrap();
    assert_eq!(check.probe(&mock_server.uri()).await.status, Status::Healthy);
}

#[tokio::test]
async fn test_http_slow_server_times_out() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
        .mount(&mock_server)
        .await;

    let check = HttpCheck::new(Scheme::Http, Duration::from_millis(200)).unwrap();
    let result = check.probe(&mock_server.uri()).await;

    assert_eq!(result.status, Status::Problem);
    assert!(result.message.contains("error connecting"));
}

#[tokio::test]
async fn test_tls_check_against_plain_http_fails() {
    let mock_server = MockServer::start().await;

    let check = TlsCheck::new(Duration::from_secs(2), 30, 7).unwrap();
    let result = check.probe(&mock_server.uri()).await;

    assert_eq!(result.status, Status::Problem);
    assert!(result.message.starts_with("127.0.0.1 - certificate check failed"));
}

#[tokio::test]
async fn test_registry_dispatches_by_service() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&mock_server)
        .await;

    let registry = CheckRegistry::with_defaults(&fast_check_config()).unwrap();

    let http = registry
        .probe(ServiceKind::Http.id(), &mock_server.uri())
        .await
        .unwrap();
    assert_eq!(http.status, Status::Healthy);

    // HTTPS against a plain HTTP listener cannot handshake
    let https = registry
        .probe(ServiceKind::Https.id(), &mock_server.uri())
        .await
        .unwrap();
    assert_eq!(https.status, Status::Problem);

    assert_matches!(
        registry.probe(99, &mock_server.uri()).await,
        Err(MonitorError::UnknownService(99))
    );
}
