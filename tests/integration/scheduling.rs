//! Scheduling through the monitor's admin triggers

use pretty_assertions::assert_eq;
use vigil::broadcast;
use vigil::preferences;
use vigil::runner::PeriodicRunner;
use vigil::storage::Repository;
use vigil::{Host, ServiceKind, Status};

use crate::helpers::{Harness, of_type};

async fn go_live(harness: &Harness) {
    harness
        .preferences
        .set_flag(preferences::MONITORING_LIVE, true)
        .await;
}

#[tokio::test]
async fn test_start_schedules_active_pairs_only() {
    let mut harness = Harness::new().await;
    go_live(&harness).await;

    let web = harness
        .add_pair("web-1", "web-1.example.org", ServiceKind::Http, Status::Pending)
        .await;
    let db = harness
        .add_pair("db-1", "db-1.example.org", ServiceKind::Https, Status::Healthy)
        .await;

    let scheduled = harness.monitor.start().await.unwrap();
    assert_eq!(scheduled, 2);

    let mut expected = vec![web, db];
    expected.sort_unstable();
    assert_eq!(harness.monitor.scheduler().scheduled_ids().await.unwrap(), expected);

    assert!(harness.runner.is_running().await);
    assert_eq!(harness.runner.entries().await.len(), 2);

    let published = harness.drain_events();
    assert_eq!(of_type(&published, broadcast::APP_STARTING).len(), 1);
    assert_eq!(of_type(&published, broadcast::NEXT_RUN).len(), 2);

    let schedule_changed = of_type(&published, broadcast::SCHEDULE_CHANGED);
    assert_eq!(schedule_changed.len(), 2);
    for event in schedule_changed {
        assert_eq!(event.payload["schedule"], "@every 3m");
        assert_eq!(event.payload["message"], "Monitoring is running... 3");
        assert_ne!(event.payload["next_run"], "Pending...");
    }
}

#[tokio::test]
async fn test_start_does_nothing_while_monitoring_is_off() {
    let harness = Harness::new().await;
    harness
        .add_pair("web-1", "web-1.example.org", ServiceKind::Http, Status::Pending)
        .await;

    assert_eq!(harness.monitor.start().await.unwrap(), 0);
    assert!(harness.runner.entries().await.is_empty());
    assert!(!harness.runner.is_running().await);
}

#[tokio::test]
async fn test_list_active_is_sorted_by_host() {
    let harness = Harness::new().await;
    go_live(&harness).await;

    harness
        .add_pair("zeta", "zeta.example.org", ServiceKind::Http, Status::Pending)
        .await;
    harness
        .add_pair("alpha", "alpha.example.org", ServiceKind::Https, Status::Pending)
        .await;
    harness.monitor.start().await.unwrap();

    let rows = harness.monitor.list_active().await.unwrap();
    let hosts: Vec<&str> = rows.iter().map(|row| row.host_name.as_str()).collect();
    assert_eq!(hosts, vec!["alpha", "zeta"]);

    assert_eq!(rows[0].service_name, "HTTPS");
    assert_eq!(rows[0].schedule, "@every 3m");
    assert!(rows[0].next_run.is_some());
    assert_eq!(rows[0].last_run_text(), "Pending...");
}

#[tokio::test]
async fn test_list_active_skips_pairs_deactivated_elsewhere() {
    let harness = Harness::new().await;
    go_live(&harness).await;

    harness
        .add_pair("web-1", "web-1.example.org", ServiceKind::Http, Status::Pending)
        .await;
    let db = harness
        .add_pair("db-1", "db-1.example.org", ServiceKind::Http, Status::Pending)
        .await;
    harness.monitor.start().await.unwrap();

    let pair = harness.repository.get_host_service_by_id(db).await.unwrap();
    harness
        .repository
        .update_host_service_status(pair.host_id, pair.service_id, false, Status::Pending)
        .await
        .unwrap();

    let rows = harness.monitor.list_active().await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].host_name, "web-1");
}

#[tokio::test]
async fn test_monitoring_off_clears_schedule() {
    let mut harness = Harness::new().await;

    harness
        .add_pair("web-1", "web-1.example.org", ServiceKind::Http, Status::Pending)
        .await;
    harness
        .add_pair("db-1", "db-1.example.org", ServiceKind::Http, Status::Pending)
        .await;

    harness.monitor.set_monitoring_live(true).await.unwrap();
    assert_eq!(harness.runner.entries().await.len(), 2);

    harness.monitor.set_monitoring_live(false).await.unwrap();

    assert!(harness.runner.entries().await.is_empty());
    assert!(!harness.runner.is_running().await);
    assert!(
        harness
            .monitor
            .scheduler()
            .scheduled_ids()
            .await
            .unwrap()
            .is_empty()
    );
    assert!(harness.monitor.list_active().await.unwrap().is_empty());

    assert!(
        !harness
            .preferences
            .is_enabled(preferences::MONITORING_LIVE)
            .await
    );
    let stored = harness.repository.all_preferences().await.unwrap();
    assert_eq!(stored[preferences::MONITORING_LIVE], preferences::DISABLED);

    let published = harness.drain_events();
    assert_eq!(of_type(&published, broadcast::APP_STOPPING).len(), 1);
}

#[tokio::test]
async fn test_toggle_pair_schedules_and_unschedules() {
    let mut harness = Harness::new().await;
    harness.monitor.set_monitoring_live(true).await.unwrap();
    harness.drain_events();

    // Freshly provisioned pairs start inactive
    let host_id = harness
        .repository
        .insert_host(&Host::new("web-1", "web-1.example.org"))
        .await
        .unwrap();
    let pair = harness
        .repository
        .get_host_service_by_host_id_service_id(host_id, ServiceKind::Https.id())
        .await
        .unwrap();
    assert!(!pair.active);

    let toggled = harness.monitor.toggle_pair(pair.id, true).await.unwrap();
    assert!(toggled.active);
    assert_eq!(toggled.status, Status::Pending);
    assert!(toggled.last_message.is_empty());
    assert_eq!(
        harness.monitor.scheduler().scheduled_ids().await.unwrap(),
        vec![pair.id]
    );

    let published = harness.drain_events();
    let status_changed = of_type(&published, broadcast::HOST_SERVICE_STATUS_CHANGED);
    assert_eq!(status_changed.len(), 1);
    assert_eq!(status_changed[0].payload["pending_count"], "1");

    let counts = of_type(&published, broadcast::HOST_SERVICE_COUNT_CHANGED);
    assert_eq!(counts.len(), 1);
    assert_eq!(counts[0].payload["pending_count"], "1");

    let scheduled = of_type(&published, broadcast::SCHEDULE_CHANGED);
    assert_eq!(scheduled.len(), 1);
    assert_eq!(scheduled[0].payload["message"], "scheduling");

    let toggled = harness.monitor.toggle_pair(pair.id, false).await.unwrap();
    assert!(!toggled.active);
    assert!(
        harness
            .monitor
            .scheduler()
            .scheduled_ids()
            .await
            .unwrap()
            .is_empty()
    );

    let published = harness.drain_events();
    let removed = of_type(&published, broadcast::SCHEDULE_ITEM_REMOVED);
    assert_eq!(removed.len(), 1);
    assert_eq!(removed[0].payload["host_service_id"], pair.id.to_string());
}

#[tokio::test]
async fn test_toggle_pair_while_monitoring_is_off() {
    let harness = Harness::new().await;

    let host_id = harness
        .repository
        .insert_host(&Host::new("web-1", "web-1.example.org"))
        .await
        .unwrap();
    let pair = harness
        .repository
        .get_host_service_by_host_id_service_id(host_id, ServiceKind::Http.id())
        .await
        .unwrap();

    let toggled = harness.monitor.toggle_pair(pair.id, true).await.unwrap();

    assert!(toggled.active);
    assert!(harness.runner.entries().await.is_empty());
}

#[tokio::test]
async fn test_shutdown_releases_repository() {
    let harness = Harness::new().await;
    go_live(&harness).await;
    harness
        .add_pair("web-1", "web-1.example.org", ServiceKind::Http, Status::Pending)
        .await;
    harness.monitor.start().await.unwrap();

    harness.monitor.shutdown().await;

    assert!(!harness.runner.is_running().await);
    assert!(harness.repository.all_hosts().await.is_err());
    assert!(harness.monitor.list_active().await.is_err());
}
