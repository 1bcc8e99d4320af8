//! Administrative facade
//!
//! `Monitor` wires the repository, checks, notifier, broadcaster and the
//! scheduler actor together and exposes the triggers an admin surface
//! (HTTP layer, CLI) calls:
//!
//! - `schedule_check`: run one check right now and report the result
//! - `toggle_pair`: activate or deactivate a pair
//! - `set_monitoring_live`: start or stop all monitoring
//! - `list_active`: what is scheduled and when it runs next

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{error, info, instrument, warn};

use crate::actors::messages::ScheduleRow;
use crate::actors::scheduler::SchedulerHandle;
use crate::broadcast::{self, Broadcaster, payload};
use crate::checks::CheckRegistry;
use crate::engine::{StatusTransitionEngine, status_changed_payload, with_deadline};
use crate::notify::{MailDispatcher, Notifier, SmsSender};
use crate::preferences::{self, Preferences};
use crate::runner::PeriodicRunner;
use crate::storage::Repository;
use crate::{Event, HostService, MonitorResult, Status};

/// JSON-able answer of an immediate check
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckReport {
    pub ok: bool,
    pub message: String,
    pub service_id: Option<i32>,
    pub host_id: Option<i64>,
    pub host_service_id: i64,
    pub old_status: Option<Status>,
    pub new_status: Option<Status>,
    pub last_check: Option<DateTime<Utc>>,
}

pub struct Monitor {
    repository: Arc<dyn Repository>,
    broadcaster: Arc<dyn Broadcaster>,
    preferences: Preferences,
    engine: Arc<StatusTransitionEngine>,
    scheduler: SchedulerHandle,

    /// Taken on shutdown
    mail: Mutex<Option<MailDispatcher>>,
}

impl Monitor {
    pub fn new(
        repository: Arc<dyn Repository>,
        broadcaster: Arc<dyn Broadcaster>,
        preferences: Preferences,
        checks: CheckRegistry,
        mail: MailDispatcher,
        sms: Arc<dyn SmsSender>,
        runner: Arc<dyn PeriodicRunner>,
    ) -> Self {
        let notifier = Notifier::new(preferences.clone(), mail.queue(), sms);

        let engine = Arc::new(StatusTransitionEngine::new(
            repository.clone(),
            checks,
            notifier,
            broadcaster.clone(),
            runner.clone(),
        ));

        let scheduler = SchedulerHandle::spawn(
            runner,
            repository.clone(),
            broadcaster.clone(),
            preferences.clone(),
            engine.clone(),
        );

        Self {
            repository,
            broadcaster,
            preferences,
            engine,
            scheduler,
            mail: Mutex::new(Some(mail)),
        }
    }

    pub fn engine(&self) -> &StatusTransitionEngine {
        &self.engine
    }

    pub fn scheduler(&self) -> &SchedulerHandle {
        &self.scheduler
    }

    pub fn preferences(&self) -> &Preferences {
        &self.preferences
    }

    /// Schedule every monitored pair if monitoring is live. Returns the
    /// number of scheduled pairs.
    pub async fn start(&self) -> MonitorResult<usize> {
        if !self.preferences.is_enabled(preferences::MONITORING_LIVE).await {
            info!("monitoring is off, nothing scheduled");
            return Ok(0);
        }

        self.scheduler.start_all().await
    }

    /// Run one check immediately
    #[instrument(skip(self))]
    pub async fn schedule_check(&self, host_service_id: i64) -> CheckReport {
        match self.engine.run_check(host_service_id).await {
            Ok(outcome) => CheckReport {
                ok: true,
                message: outcome.message,
                service_id: Some(outcome.service_id),
                host_id: Some(outcome.host_id),
                host_service_id,
                old_status: Some(outcome.old_status),
                new_status: Some(outcome.new_status),
                last_check: Some(outcome.last_check),
            },
            Err(e) => {
                error!("manual check of host service {} failed: {}", host_service_id, e);
                CheckReport {
                    ok: false,
                    message: "Something went wrong".to_string(),
                    service_id: None,
                    host_id: None,
                    host_service_id,
                    old_status: None,
                    new_status: None,
                    last_check: None,
                }
            }
        }
    }

    /// Activate or deactivate a pair
    ///
    /// The pair is reset to `pending`, the change is broadcast and the pair
    /// is added to or removed from the schedule.
    #[instrument(skip(self))]
    pub async fn toggle_pair(&self, host_service_id: i64, active: bool) -> MonitorResult<HostService> {
        let pair = with_deadline(
            "loading host service",
            self.repository.get_host_service_by_id(host_service_id),
        )
        .await?;

        with_deadline(
            "updating host service status",
            self.repository.update_host_service_status(
                pair.host_id,
                pair.service_id,
                active,
                Status::Pending,
            ),
        )
        .await?;

        let mut pair = with_deadline(
            "reloading host service",
            self.repository
                .get_host_service_by_host_id_service_id(pair.host_id, pair.service_id),
        )
        .await?;

        pair.last_message = String::new();
        pair.last_check = Some(Utc::now());
        with_deadline(
            "updating host service",
            self.repository.update_host_service(&pair),
        )
        .await?;

        let counts = with_deadline(
            "counting statuses",
            self.repository.get_all_service_status_counts(),
        )
        .await?;

        self.broadcaster
            .publish(
                broadcast::PUBLIC_CHANNEL,
                broadcast::HOST_SERVICE_STATUS_CHANGED,
                status_changed_payload(pair.host_id, &pair.host_name, &pair, &counts),
            )
            .await;

        self.broadcaster
            .publish(
                broadcast::PUBLIC_CHANNEL,
                broadcast::HOST_SERVICE_COUNT_CHANGED,
                payload([
                    ("healthy_count", counts.healthy.to_string()),
                    ("warning_count", counts.warning.to_string()),
                    ("problem_count", counts.problem.to_string()),
                    ("pending_count", counts.pending.to_string()),
                ]),
            )
            .await;

        if active {
            self.scheduler.add(pair.clone()).await?;
        } else {
            self.scheduler.remove(pair.id).await?;
        }

        Ok(pair)
    }

    /// Turn monitoring on or off and persist the choice
    #[instrument(skip(self))]
    pub async fn set_monitoring_live(&self, live: bool) -> MonitorResult<()> {
        self.preferences
            .set_flag(preferences::MONITORING_LIVE, live)
            .await;

        let value = if live {
            preferences::ENABLED
        } else {
            preferences::DISABLED
        };
        if let Err(e) = self
            .repository
            .set_system_pref(preferences::MONITORING_LIVE, value)
            .await
        {
            warn!("failed to persist monitoring_live: {}", e);
        }

        if live {
            self.scheduler.start_all().await?;
        } else {
            self.scheduler.stop_all().await?;
        }

        Ok(())
    }

    pub async fn list_active(&self) -> MonitorResult<Vec<ScheduleRow>> {
        self.scheduler.list_active().await
    }

    pub async fn events(&self) -> MonitorResult<Vec<Event>> {
        with_deadline("loading events", self.repository.get_all_events()).await
    }

    /// Stop scheduling, drain the mail queue, then release the repository
    pub async fn shutdown(&self) {
        info!("shutting down monitor");

        if let Err(e) = self.scheduler.shutdown().await {
            warn!("scheduler already stopped: {}", e);
        }

        if let Some(mail) = self.mail.lock().await.take() {
            mail.shutdown().await;
        }

        self.repository.close().await;
        info!("monitor stopped");
    }
}
