//! Status transitions driven through the engine

use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use async_trait::async_trait;
use vigil::broadcast;
use vigil::checks::{Check, CheckRegistry, ProbeResult};
use vigil::storage::{Repository, RepositoryError};
use vigil::{MonitorError, ServiceKind, Status};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::helpers::{FixedCheck, Harness, of_type};

/// Check that takes a while before reporting healthy
struct SlowCheck(Duration);

#[async_trait]
impl Check for SlowCheck {
    fn name(&self) -> &'static str {
        "slow"
    }

    async fn probe(&self, _target: &str) -> ProbeResult {
        tokio::time::sleep(self.0).await;
        ProbeResult::healthy("finally answered")
    }
}

async fn healthy_server() -> MockServer {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&mock_server)
        .await;
    mock_server
}

#[tokio::test]
async fn test_pending_to_healthy_records_one_event() {
    let mock_server = healthy_server().await;
    let mut harness = Harness::new().await;
    let pair_id = harness
        .add_pair("web-1", &mock_server.uri(), ServiceKind::Http, Status::Pending)
        .await;

    let outcome = harness.monitor.engine().run_check(pair_id).await.unwrap();

    assert_eq!(outcome.old_status, Status::Pending);
    assert_eq!(outcome.new_status, Status::Healthy);
    assert!(outcome.changed);

    let stored = harness
        .repository
        .get_host_service_by_id(pair_id)
        .await
        .unwrap();
    assert_eq!(stored.status, Status::Healthy);
    assert!(stored.last_check.is_some());
    assert!(stored.last_message.ends_with("- 200 OK"));

    let events = harness.repository.get_all_events().await.unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_type, Status::Healthy);
    assert_eq!(events[0].host_name, "web-1");
    assert_eq!(events[0].service_name, "HTTP");

    let published = harness.drain_events();
    let status_changed = of_type(&published, broadcast::HOST_SERVICE_STATUS_CHANGED);
    assert_eq!(status_changed.len(), 1);
    assert_eq!(status_changed[0].payload["status"], "healthy");
    assert_eq!(status_changed[0].payload["healthy_count"], "1");
    assert_eq!(status_changed[0].payload["total_new_status"], "1");
    assert_eq!(
        status_changed[0].payload["message"],
        "HTTP on web-1 reports healthy"
    );

    let schedule_changed = of_type(&published, broadcast::SCHEDULE_CHANGED);
    assert_eq!(schedule_changed.len(), 1);
    // Not scheduled, so there is no next run yet
    assert_eq!(schedule_changed[0].payload["next_run"], "Pending...");

    // Notifications are off by default
    assert!(harness.wait_for_mail(1).await.is_empty());
    assert!(harness.sms.sent.lock().await.is_empty());
}

#[tokio::test]
async fn test_healthy_to_problem_queues_problem_mail() {
    let mut harness = Harness::new().await;
    harness.enable_email().await;

    let pair_id = harness
        .add_pair("db-1", "127.0.0.1:1", ServiceKind::Http, Status::Healthy)
        .await;

    let outcome = harness.monitor.engine().run_check(pair_id).await.unwrap();
    assert_eq!(outcome.new_status, Status::Problem);
    assert!(outcome.message.contains("error connecting"));

    let events = harness.repository.get_all_events().await.unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_type, Status::Problem);

    let mail = harness.wait_for_mail(1).await;
    assert_eq!(mail.len(), 1);
    assert_eq!(mail[0].subject, "PROBLEM: service HTTP on db-1");
    assert_eq!(mail[0].to_address, "ops@example.org");
    assert!(mail[0].content.contains("error connecting"));

    // SMS stays off unless enabled
    assert!(harness.sms.sent.lock().await.is_empty());

    let published = harness.drain_events();
    assert_eq!(
        of_type(&published, broadcast::HOST_SERVICE_STATUS_CHANGED).len(),
        1
    );
}

#[tokio::test]
async fn test_repeated_check_is_idempotent() {
    let mock_server = healthy_server().await;
    let mut harness = Harness::new().await;
    let pair_id = harness
        .add_pair("web-1", &mock_server.uri(), ServiceKind::Http, Status::Pending)
        .await;

    let first = harness.monitor.engine().run_check(pair_id).await.unwrap();
    harness.drain_events();
    let second = harness.monitor.engine().run_check(pair_id).await.unwrap();

    assert!(first.changed);
    assert!(!second.changed);
    assert_eq!(second.old_status, Status::Healthy);
    assert_eq!(second.new_status, Status::Healthy);

    assert_eq!(harness.repository.get_all_events().await.unwrap().len(), 1);

    let published = harness.drain_events();
    assert!(of_type(&published, broadcast::HOST_SERVICE_STATUS_CHANGED).is_empty());
    assert_eq!(of_type(&published, broadcast::SCHEDULE_CHANGED).len(), 1);
}

#[tokio::test]
async fn test_warning_sends_sms_but_no_mail() {
    let mut checks = CheckRegistry::new();
    checks.register(
        ServiceKind::TlsCertificate.id(),
        Arc::new(FixedCheck(ProbeResult::warning(
            "example.org expiring in 20 days",
        ))),
    );

    let harness = Harness::with_checks(checks).await;
    harness.enable_email().await;
    harness.enable_sms().await;

    let pair_id = harness
        .add_pair(
            "example.org",
            "https://example.org",
            ServiceKind::TlsCertificate,
            Status::Healthy,
        )
        .await;

    let outcome = harness.monitor.engine().run_check(pair_id).await.unwrap();
    assert_eq!(outcome.new_status, Status::Warning);

    let sms = harness.sms.sent.lock().await.clone();
    assert_eq!(
        sms,
        vec![(
            "+15550001".to_string(),
            "WARNING: service SSL Certificate on example.org".to_string()
        )]
    );
    assert!(harness.wait_for_mail(1).await.is_empty());
}

#[tokio::test]
async fn test_unknown_service_leaves_pair_untouched() {
    let harness = Harness::with_checks(CheckRegistry::new()).await;
    let pair_id = harness
        .add_pair("web-1", "example.org", ServiceKind::Http, Status::Healthy)
        .await;

    let result = harness.monitor.engine().run_check(pair_id).await;
    assert_matches!(result, Err(MonitorError::UnknownService(1)));

    let stored = harness
        .repository
        .get_host_service_by_id(pair_id)
        .await
        .unwrap();
    assert_eq!(stored.status, Status::Healthy);
    assert!(harness.repository.get_all_events().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_repository_outage_aborts_cycle() {
    let mock_server = healthy_server().await;
    let mut harness = Harness::new().await;
    let pair_id = harness
        .add_pair("web-1", &mock_server.uri(), ServiceKind::Http, Status::Pending)
        .await;

    harness.repository.set_available(false);
    let result = harness.monitor.engine().run_check(pair_id).await;
    assert_matches!(
        result,
        Err(MonitorError::Repository(RepositoryError::Unavailable(_)))
    );
    assert!(harness.drain_events().is_empty());

    // The next cycle after recovery works normally
    harness.repository.set_available(true);
    let outcome = harness.monitor.engine().run_check(pair_id).await.unwrap();
    assert_eq!(outcome.new_status, Status::Healthy);
}

#[tokio::test]
async fn test_schedule_check_reports_result() {
    let mock_server = healthy_server().await;
    let harness = Harness::new().await;
    let pair_id = harness
        .add_pair("web-1", &mock_server.uri(), ServiceKind::Http, Status::Pending)
        .await;

    let report = harness.monitor.schedule_check(pair_id).await;
    assert!(report.ok);
    assert_eq!(report.host_service_id, pair_id);
    assert_eq!(report.service_id, Some(ServiceKind::Http.id()));
    assert_eq!(report.old_status, Some(Status::Pending));
    assert_eq!(report.new_status, Some(Status::Healthy));

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["ok"], true);
    assert_eq!(json["new_status"], "healthy");
}

#[tokio::test]
async fn test_schedule_check_of_missing_pair() {
    let harness = Harness::new().await;

    let report = harness.monitor.schedule_check(4242).await;
    assert!(!report.ok);
    assert_eq!(report.message, "Something went wrong");
    assert_eq!(report.new_status, None);
}

#[tokio::test]
async fn test_deactivation_during_check_is_not_undone() {
    let mut checks = CheckRegistry::new();
    checks.register(
        ServiceKind::Http.id(),
        Arc::new(SlowCheck(Duration::from_millis(300))),
    );
    let mut harness = Harness::with_checks(checks).await;
    let pair_id = harness
        .add_pair("web-1", "example.org", ServiceKind::Http, Status::Problem)
        .await;

    let (report, toggled) = tokio::join!(harness.monitor.schedule_check(pair_id), async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        harness.monitor.toggle_pair(pair_id, false).await
    });

    let toggled = toggled.unwrap();
    assert!(!toggled.active);
    assert!(!report.ok);

    let stored = harness
        .repository
        .get_host_service_by_id(pair_id)
        .await
        .unwrap();
    assert!(!stored.active);
    assert_eq!(stored.status, Status::Pending);
    assert_eq!(stored.last_message, "");
    assert!(harness.repository.get_all_events().await.unwrap().is_empty());

    let published = harness.drain_events();
    let status_changed = of_type(&published, broadcast::HOST_SERVICE_STATUS_CHANGED);
    assert_eq!(status_changed.len(), 1);
    assert_eq!(status_changed[0].payload["status"], "pending");
    assert!(of_type(&published, broadcast::SCHEDULE_CHANGED).is_empty());
}

#[tokio::test]
async fn test_check_of_inactive_pair_is_dropped() {
    let mut checks = CheckRegistry::new();
    checks.register(
        ServiceKind::Http.id(),
        Arc::new(FixedCheck(ProbeResult::problem("down"))),
    );
    let harness = Harness::with_checks(checks).await;
    let pair_id = harness
        .add_pair("web-1", "example.org", ServiceKind::Http, Status::Healthy)
        .await;
    harness.monitor.toggle_pair(pair_id, false).await.unwrap();

    let result = harness.monitor.engine().run_check(pair_id).await;
    assert_matches!(result, Err(MonitorError::Deactivated(id)) if id == pair_id);

    let stored = harness
        .repository
        .get_host_service_by_id(pair_id)
        .await
        .unwrap();
    assert_eq!(stored.status, Status::Pending);
    assert!(harness.repository.get_all_events().await.unwrap().is_empty());
}
