//! SchedulerActor - Owns the monitor map and drives the periodic runner
//!
//! Every monitored pair is registered as one recurring runner job whose body
//! is exactly `engine.run_check(pair_id)`. The actor is the only writer of
//! the pair id to entry id map, so admin actions and startup never race.

use std::collections::HashMap;
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, instrument, warn};

use super::messages::{ScheduleRow, SchedulerCommand};
use crate::broadcast::{self, Broadcaster, payload};
use crate::engine::{StatusTransitionEngine, schedule_changed_payload, with_deadline};
use crate::preferences::{self, Preferences};
use crate::runner::{EntryId, Job, PeriodicRunner};
use crate::storage::Repository;
use crate::util::{self, format_or_pending};
use crate::{HostService, MonitorError, MonitorResult};

/// Runner job name of a pair
pub fn job_name(host_service_id: i64) -> String {
    format!("host-service-{host_service_id}")
}

pub struct SchedulerActor {
    command_rx: mpsc::Receiver<SchedulerCommand>,
    runner: Arc<dyn PeriodicRunner>,
    repository: Arc<dyn Repository>,
    broadcaster: Arc<dyn Broadcaster>,
    preferences: Preferences,
    engine: Arc<StatusTransitionEngine>,

    /// Pair id to runner entry
    monitor_map: HashMap<i64, EntryId>,
}

impl SchedulerActor {
    pub fn new(
        command_rx: mpsc::Receiver<SchedulerCommand>,
        runner: Arc<dyn PeriodicRunner>,
        repository: Arc<dyn Repository>,
        broadcaster: Arc<dyn Broadcaster>,
        preferences: Preferences,
        engine: Arc<StatusTransitionEngine>,
    ) -> Self {
        Self {
            command_rx,
            runner,
            repository,
            broadcaster,
            preferences,
            engine,
            monitor_map: HashMap::new(),
        }
    }

    /// Run the actor until a Shutdown command arrives or every handle is
    /// dropped
    #[instrument(skip(self))]
    pub async fn run(mut self) {
        debug!("starting scheduler actor");

        while let Some(cmd) = self.command_rx.recv().await {
            match cmd {
                SchedulerCommand::StartAll { respond_to } => {
                    let _ = respond_to.send(self.start_all().await);
                }

                SchedulerCommand::Add { pair, respond_to } => {
                    let _ = respond_to.send(self.add(pair).await);
                }

                SchedulerCommand::Remove {
                    host_service_id,
                    respond_to,
                } => {
                    let _ = respond_to.send(self.remove(host_service_id).await);
                }

                SchedulerCommand::StopAll { respond_to } => {
                    self.stop_all().await;
                    let _ = respond_to.send(());
                }

                SchedulerCommand::ListActive { respond_to } => {
                    let _ = respond_to.send(self.list_active().await);
                }

                SchedulerCommand::ScheduledIds { respond_to } => {
                    let mut ids: Vec<i64> = self.monitor_map.keys().copied().collect();
                    ids.sort_unstable();
                    let _ = respond_to.send(ids);
                }

                SchedulerCommand::Shutdown { respond_to } => {
                    debug!("received shutdown command");
                    self.runner.stop().await;
                    let _ = respond_to.send(());
                    return;
                }
            }
        }

        warn!("command channel closed, stopping runner");
        self.runner.stop().await;
    }

    /// Register the pair's job, replacing an existing one. Returns the entry
    /// id, or `None` when the pair's schedule is unusable.
    async fn register(&mut self, pair: &HostService) -> Option<EntryId> {
        let every = match pair.interval() {
            Ok(every) => every,
            Err(e) => {
                warn!("not scheduling host service {}: {}", pair.id, e);
                return None;
            }
        };

        if let Some(previous) = self.monitor_map.remove(&pair.id) {
            self.runner.cancel(previous).await;
        }

        let engine = self.engine.clone();
        let host_service_id = pair.id;
        let job: Job = Arc::new(move || {
            let engine = engine.clone();
            async move { engine.run_scheduled(host_service_id).await }.boxed()
        });

        let entry_id = self.runner.schedule(&job_name(pair.id), every, job).await;
        self.monitor_map.insert(pair.id, entry_id);
        Some(entry_id)
    }

    async fn start_all(&mut self) -> MonitorResult<usize> {
        self.runner.start().await;

        self.broadcaster
            .publish(
                broadcast::PUBLIC_CHANNEL,
                broadcast::APP_STARTING,
                payload([("message", "Monitoring is live...")]),
            )
            .await;

        let pairs = with_deadline(
            "loading services to monitor",
            self.repository.get_services_to_monitor(),
        )
        .await?;

        let mut scheduled = 0;
        for pair in pairs {
            let Some(entry_id) = self.register(&pair).await else {
                continue;
            };
            scheduled += 1;

            let next_run = self
                .runner
                .entry(entry_id)
                .await
                .and_then(|entry| entry.next_run);

            let mut data = schedule_changed_payload(
                &pair,
                &pair.host_name,
                format_or_pending(next_run),
                format_or_pending(pair.last_check),
            );
            data.insert(
                "message".to_string(),
                format!("Monitoring is running... {}", pair.schedule_number),
            );

            self.broadcaster
                .publish(broadcast::PUBLIC_CHANNEL, broadcast::NEXT_RUN, data.clone())
                .await;
            self.broadcaster
                .publish(broadcast::PUBLIC_CHANNEL, broadcast::SCHEDULE_CHANGED, data)
                .await;
        }

        info!("monitoring started with {} scheduled pairs", scheduled);
        Ok(scheduled)
    }

    async fn add(&mut self, pair: HostService) -> bool {
        if !self.preferences.is_enabled(preferences::MONITORING_LIVE).await {
            debug!("monitoring is off, not scheduling host service {}", pair.id);
            return false;
        }

        if self.register(&pair).await.is_none() {
            return false;
        }

        let mut data = schedule_changed_payload(
            &pair,
            &pair.host_name,
            util::PENDING.to_string(),
            format_or_pending(pair.last_check),
        );
        data.insert("message".to_string(), "scheduling".to_string());

        self.broadcaster
            .publish(broadcast::PUBLIC_CHANNEL, broadcast::SCHEDULE_CHANGED, data)
            .await;

        debug!("scheduled host service {}", pair.id);
        true
    }

    async fn remove(&mut self, host_service_id: i64) -> bool {
        if !self.preferences.is_enabled(preferences::MONITORING_LIVE).await {
            debug!(
                "monitoring is off, not unscheduling host service {}",
                host_service_id
            );
            return false;
        }

        let removed = match self.monitor_map.remove(&host_service_id) {
            Some(entry_id) => self.runner.cancel(entry_id).await,
            None => false,
        };

        self.broadcaster
            .publish(
                broadcast::PUBLIC_CHANNEL,
                broadcast::SCHEDULE_ITEM_REMOVED,
                payload([("host_service_id", host_service_id.to_string())]),
            )
            .await;

        removed
    }

    async fn stop_all(&mut self) {
        for (_, entry_id) in self.monitor_map.drain() {
            self.runner.cancel(entry_id).await;
        }

        // Entries registered outside the monitor map
        for entry in self.runner.entries().await {
            self.runner.cancel(entry.id).await;
        }

        self.runner.stop().await;

        self.broadcaster
            .publish(
                broadcast::PUBLIC_CHANNEL,
                broadcast::APP_STOPPING,
                payload([("message", "Monitoring is off!")]),
            )
            .await;

        info!("monitoring stopped");
    }

    async fn list_active(&self) -> MonitorResult<Vec<ScheduleRow>> {
        let mut rows = Vec::with_capacity(self.monitor_map.len());

        for (&host_service_id, &entry_id) in &self.monitor_map {
            let pair = match with_deadline(
                "loading host service",
                self.repository.get_host_service_by_id(host_service_id),
            )
            .await
            {
                Ok(pair) => pair,
                Err(MonitorError::Repository(e)) => {
                    warn!("skipping host service {}: {}", host_service_id, e);
                    continue;
                }
                Err(e) => return Err(e),
            };

            if !pair.active {
                continue;
            }

            let next_run = self
                .runner
                .entry(entry_id)
                .await
                .and_then(|entry| entry.next_run);

            rows.push(ScheduleRow {
                host_service_id,
                entry_id,
                host_name: pair.host_name.clone(),
                service_name: pair.service.service_name.clone(),
                schedule: pair.schedule_text(),
                next_run,
                last_run: pair.last_check,
            });
        }

        rows.sort_by(|a, b| {
            a.host_name
                .cmp(&b.host_name)
                .then_with(|| a.service_name.cmp(&b.service_name))
        });
        Ok(rows)
    }
}

/// Handle for communicating with the SchedulerActor
#[derive(Clone)]
pub struct SchedulerHandle {
    sender: mpsc::Sender<SchedulerCommand>,
}

impl SchedulerHandle {
    /// Spawn a new scheduler actor
    pub fn spawn(
        runner: Arc<dyn PeriodicRunner>,
        repository: Arc<dyn Repository>,
        broadcaster: Arc<dyn Broadcaster>,
        preferences: Preferences,
        engine: Arc<StatusTransitionEngine>,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);

        let actor = SchedulerActor::new(cmd_rx, runner, repository, broadcaster, preferences, engine);

        tokio::spawn(actor.run());

        Self { sender: cmd_tx }
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> SchedulerCommand,
    ) -> MonitorResult<T> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(command(tx))
            .await
            .map_err(|_| MonitorError::Scheduler("command channel closed".to_string()))?;

        rx.await
            .map_err(|_| MonitorError::Scheduler("actor dropped the reply".to_string()))
    }

    pub async fn start_all(&self) -> MonitorResult<usize> {
        self.request(|respond_to| SchedulerCommand::StartAll { respond_to })
            .await?
    }

    pub async fn add(&self, pair: HostService) -> MonitorResult<bool> {
        self.request(|respond_to| SchedulerCommand::Add { pair, respond_to })
            .await
    }

    pub async fn remove(&self, host_service_id: i64) -> MonitorResult<bool> {
        self.request(|respond_to| SchedulerCommand::Remove {
            host_service_id,
            respond_to,
        })
        .await
    }

    pub async fn stop_all(&self) -> MonitorResult<()> {
        self.request(|respond_to| SchedulerCommand::StopAll { respond_to })
            .await
    }

    pub async fn list_active(&self) -> MonitorResult<Vec<ScheduleRow>> {
        self.request(|respond_to| SchedulerCommand::ListActive { respond_to })
            .await?
    }

    pub async fn scheduled_ids(&self) -> MonitorResult<Vec<i64>> {
        self.request(|respond_to| SchedulerCommand::ScheduledIds { respond_to })
            .await
    }

    /// Stop the runner and the actor
    pub async fn shutdown(&self) -> MonitorResult<()> {
        self.request(|respond_to| SchedulerCommand::Shutdown { respond_to })
            .await
    }
}

// ============================================================================
// Tests
// ============================================================================
