//! Status transition engine
//!
//! One check cycle for one pair:
//!
//! ```text
//! load pair + host ─> probe ─> persist pair ─┬─> (changed) event, notifier, status broadcast
//!                                            └─> schedule broadcast
//! ```
//!
//! The pair is persisted before any side effect runs, so a failing
//! notification can never undo or repeat the status write.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::timeout;
use tracing::{debug, error, info, instrument, warn};

use crate::actors::scheduler::job_name;
use crate::broadcast::{self, Broadcaster, Payload, payload};
use crate::checks::CheckRegistry;
use crate::notify::Notifier;
use crate::runner::PeriodicRunner;
use crate::storage::{Repository, RepositoryResult};
use crate::util::{self, format_or_pending, format_time};
use crate::{Event, HostService, MonitorError, MonitorResult, Status, StatusCounts};

/// Deadline for every repository call made during a cycle
pub const REPOSITORY_DEADLINE: Duration = Duration::from_secs(3);

/// Result of one completed check cycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckOutcome {
    pub host_service_id: i64,
    pub host_id: i64,
    pub service_id: i32,
    pub old_status: Status,
    pub new_status: Status,
    pub message: String,
    pub last_check: DateTime<Utc>,
    pub changed: bool,
}

pub(crate) async fn with_deadline<T>(
    what: &'static str,
    call: impl Future<Output = RepositoryResult<T>>,
) -> MonitorResult<T> {
    timeout(REPOSITORY_DEADLINE, call)
        .await
        .map_err(|_| MonitorError::Timeout(what))?
        .map_err(MonitorError::from)
}

/// Payload of `host-service-status-changed`
pub(crate) fn status_changed_payload(
    host_id: i64,
    host_name: &str,
    pair: &HostService,
    counts: &StatusCounts,
) -> Payload {
    payload([
        ("host_id", host_id.to_string()),
        ("host_service_id", pair.id.to_string()),
        ("host_name", host_name.to_string()),
        ("service_name", pair.service.service_name.clone()),
        ("icon", pair.service.icon.clone()),
        ("status", pair.status.to_string()),
        (
            "message",
            format!(
                "{} on {} reports {}",
                pair.service.service_name, host_name, pair.status
            ),
        ),
        ("last_check", format_or_pending(pair.last_check)),
        ("healthy_count", counts.healthy.to_string()),
        ("warning_count", counts.warning.to_string()),
        ("problem_count", counts.problem.to_string()),
        ("pending_count", counts.pending.to_string()),
        ("total_new_status", counts.get(pair.status).to_string()),
    ])
}

/// Payload of `schedule-changed-event`
pub(crate) fn schedule_changed_payload(
    pair: &HostService,
    host_name: &str,
    next_run: String,
    last_run: String,
) -> Payload {
    payload([
        ("host_service_id", pair.id.to_string()),
        ("service_id", pair.service_id.to_string()),
        ("host_id", pair.host_id.to_string()),
        ("next_run", next_run),
        ("last_run", last_run),
        ("host", host_name.to_string()),
        ("service", pair.service.service_name.clone()),
        ("schedule", pair.schedule_text()),
        ("status", pair.status.to_string()),
        ("icon", pair.service.icon.clone()),
    ])
}

pub struct StatusTransitionEngine {
    repository: Arc<dyn Repository>,
    checks: CheckRegistry,
    notifier: Notifier,
    broadcaster: Arc<dyn Broadcaster>,
    runner: Arc<dyn PeriodicRunner>,
}

impl StatusTransitionEngine {
    pub fn new(
        repository: Arc<dyn Repository>,
        checks: CheckRegistry,
        notifier: Notifier,
        broadcaster: Arc<dyn Broadcaster>,
        runner: Arc<dyn PeriodicRunner>,
    ) -> Self {
        Self {
            repository,
            checks,
            notifier,
            broadcaster,
            runner,
        }
    }

    /// Run one check cycle for the pair
    ///
    /// Any repository failure aborts the remainder of the cycle and is
    /// returned, as does a pair deactivated while its check was running.
    /// A failed probe is not an error: it is persisted as `problem`.
    #[instrument(skip(self))]
    pub async fn run_check(&self, host_service_id: i64) -> MonitorResult<CheckOutcome> {
        let mut pair = with_deadline(
            "loading host service",
            self.repository.get_host_service_by_id(host_service_id),
        )
        .await?;

        let host = with_deadline(
            "loading host",
            self.repository.get_host_by_id(pair.host_id),
        )
        .await?;

        let probe = self.checks.probe(pair.service_id, &host.url).await?;

        let now = Utc::now();
        let old_status = pair.status;
        pair.status = probe.status;
        pair.last_message = probe.message;
        pair.last_check = Some(now);

        let recorded = with_deadline(
            "updating host service",
            self.repository.update_host_service_check_result(
                pair.id,
                pair.status,
                &pair.last_message,
                now,
            ),
        )
        .await?;
        if !recorded {
            return Err(MonitorError::Deactivated(pair.id));
        }

        let changed = old_status != pair.status;
        if changed {
            info!(
                "{} on {} changed from {} to {}",
                pair.service.service_name, host.host_name, old_status, pair.status
            );

            let event = Event::transition(&host, &pair, &pair.last_message, now);
            with_deadline("inserting event", self.repository.insert_event(&event)).await?;

            self.notifier.notify(&host.host_name, &pair).await;

            let counts = with_deadline(
                "counting statuses",
                self.repository.get_all_service_status_counts(),
            )
            .await?;

            self.broadcaster
                .publish(
                    broadcast::PUBLIC_CHANNEL,
                    broadcast::HOST_SERVICE_STATUS_CHANGED,
                    status_changed_payload(host.id, &host.host_name, &pair, &counts),
                )
                .await;
        } else {
            debug!("{} on {} still {}", pair.service.service_name, host.host_name, pair.status);
        }

        let next_run = self
            .runner
            .entry_by_name(&job_name(pair.id))
            .await
            .and_then(|entry| entry.next_run);

        self.broadcaster
            .publish(
                broadcast::PUBLIC_CHANNEL,
                broadcast::SCHEDULE_CHANGED,
                schedule_changed_payload(
                    &pair,
                    &host.host_name,
                    next_run.map_or_else(|| util::PENDING.to_string(), format_time),
                    format_time(now),
                ),
            )
            .await;

        Ok(CheckOutcome {
            host_service_id: pair.id,
            host_id: host.id,
            service_id: pair.service_id,
            old_status,
            new_status: pair.status,
            message: pair.last_message,
            last_check: now,
            changed,
        })
    }

    /// Job body for scheduled ticks: run the cycle, log failures
    pub async fn run_scheduled(&self, host_service_id: i64) {
        match self.run_check(host_service_id).await {
            Ok(outcome) => debug!(
                "scheduled check of host service {} finished with {}",
                host_service_id, outcome.new_status
            ),
            Err(e @ MonitorError::Deactivated(_)) => {
                debug!("{}", e);
            }
            Err(e @ (MonitorError::UnknownService(_) | MonitorError::InvalidSchedule(_))) => {
                warn!("skipping host service {}: {}", host_service_id, e);
            }
            Err(e) => {
                error!("check of host service {} aborted: {}", host_service_id, e);
            }
        }
    }
}
