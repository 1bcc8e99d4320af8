//! Periodic task runner
//!
//! Runs named jobs at fixed intervals. Two standing policies apply to every
//! job:
//!
//! - **skip-if-still-running**: a tick arriving while the previous run of the
//!   same job is still executing is dropped, never queued
//! - **recover-and-log**: a panicking run is caught and logged, the job keeps
//!   its schedule and other jobs are unaffected
//!
//! ## Message Flow
//!
//! ```text
//! driver task (one per entry) ── tick ──> spawned run ──> job()
//!      ↑                                      │
//!      └── skip while previous run is alive ──┘
//! ```

use std::any::Any;
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::sync::{Mutex, RwLock, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, error, instrument, trace, warn};

pub type EntryId = u64;

/// Shortest period a job can be scheduled with
pub const MIN_PERIOD: Duration = Duration::from_millis(1);

/// Longest period a job can be scheduled with, about thirty years
pub const MAX_PERIOD: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Body of a recurring job. Called once per tick.
pub type Job = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// Snapshot of one registered job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub id: EntryId,
    pub name: String,
    pub every: Duration,

    /// `None` while the runner is stopped
    pub next_run: Option<DateTime<Utc>>,
    pub last_run: Option<DateTime<Utc>>,
}

/// Opaque periodic scheduling capability
#[async_trait]
pub trait PeriodicRunner: Send + Sync {
    /// Register a job. It starts firing once the runner is running.
    async fn schedule(&self, name: &str, every: Duration, job: Job) -> EntryId;

    /// Unregister a job. Returns false when the id is unknown.
    async fn cancel(&self, id: EntryId) -> bool;

    async fn entry(&self, id: EntryId) -> Option<Entry>;

    async fn entry_by_name(&self, name: &str) -> Option<Entry>;

    async fn entries(&self) -> Vec<Entry>;

    async fn start(&self);

    /// Stop every driver and wait for in-flight runs. No job fires after
    /// this returns until `start` is called again.
    async fn stop(&self);

    async fn is_running(&self) -> bool;
}

#[derive(Debug, Default, Clone, Copy)]
struct RunTimes {
    next_run: Option<DateTime<Utc>>,
    last_run: Option<DateTime<Utc>>,
}

struct Schedule {
    name: String,
    every: Duration,
    job: Job,
    times: RwLock<RunTimes>,
}

struct Driver {
    stop_tx: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

struct Slot {
    schedule: Arc<Schedule>,
    driver: Option<Driver>,
}

#[derive(Default)]
struct RunnerState {
    slots: BTreeMap<EntryId, Slot>,
    next_id: EntryId,
    running: bool,

    /// Drivers of cancelled entries that may still finish a run
    retired: Vec<JoinHandle<()>>,
}

/// `PeriodicRunner` with one tokio driver task per entry
#[derive(Default)]
pub struct TokioRunner {
    state: Mutex<RunnerState>,
}

impl TokioRunner {
    pub fn new() -> Self {
        Self::default()
    }

    async fn snapshot(id: EntryId, schedule: &Schedule) -> Entry {
        let times = *schedule.times.read().await;
        Entry {
            id,
            name: schedule.name.clone(),
            every: schedule.every,
            next_run: times.next_run,
            last_run: times.last_run,
        }
    }

    async fn spawn_driver(schedule: Arc<Schedule>) -> Driver {
        let (stop_tx, stop_rx) = oneshot::channel();

        schedule.times.write().await.next_run = next_run_after(Utc::now(), schedule.every);
        let handle = tokio::spawn(drive(schedule, stop_rx));

        Driver { stop_tx, handle }
    }
}

/// `every` clamped to `[MIN_PERIOD, MAX_PERIOD]`
fn bounded_period(name: &str, every: Duration) -> Duration {
    let bounded = every.clamp(MIN_PERIOD, MAX_PERIOD);
    if bounded != every {
        warn!("period {:?} of job {} is out of range, using {:?}", every, name, bounded);
    }
    bounded
}

fn next_run_after(now: DateTime<Utc>, every: Duration) -> Option<DateTime<Utc>> {
    TimeDelta::from_std(every)
        .ok()
        .and_then(|delta| now.checked_add_signed(delta))
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

async fn run_guarded(schedule: Arc<Schedule>) {
    let job = schedule.job.clone();
    let run = AssertUnwindSafe(async move { job().await }).catch_unwind();

    if let Err(panic) = run.await {
        error!(
            "job {} panicked, keeping its schedule: {}",
            schedule.name,
            panic_message(panic.as_ref())
        );
    }
}

#[instrument(skip_all, fields(job = %schedule.name))]
async fn drive(schedule: Arc<Schedule>, mut stop_rx: oneshot::Receiver<()>) {
    let start = Instant::now()
        .checked_add(schedule.every)
        .unwrap_or_else(Instant::now);
    let mut ticker = interval_at(start, schedule.every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut in_flight: Option<JoinHandle<()>> = None;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let now = Utc::now();
                schedule.times.write().await.next_run = next_run_after(now, schedule.every);

                if in_flight.as_ref().is_some_and(|run| !run.is_finished()) {
                    debug!("previous run still in progress, skipping tick");
                    continue;
                }

                schedule.times.write().await.last_run = Some(now);
                trace!("tick");
                in_flight = Some(tokio::spawn(run_guarded(schedule.clone())));
            }

            // Sent on stop and cancel, dropped with the runner
            _ = &mut stop_rx => {
                break;
            }
        }
    }

    if let Some(run) = in_flight {
        let _ = run.await;
    }

    schedule.times.write().await.next_run = None;
    trace!("driver stopped");
}

#[async_trait]
impl PeriodicRunner for TokioRunner {
    async fn schedule(&self, name: &str, every: Duration, job: Job) -> EntryId {
        let every = bounded_period(name, every);
        let schedule = Arc::new(Schedule {
            name: name.to_string(),
            every,
            job,
            times: RwLock::new(RunTimes::default()),
        });

        let mut state = self.state.lock().await;
        state.next_id += 1;
        let id = state.next_id;

        let driver = if state.running {
            Some(Self::spawn_driver(schedule.clone()).await)
        } else {
            None
        };

        state.slots.insert(id, Slot { schedule, driver });
        debug!("scheduled {} as entry {} every {:?}", name, id, every);
        id
    }

    async fn cancel(&self, id: EntryId) -> bool {
        let mut state = self.state.lock().await;

        let Some(slot) = state.slots.remove(&id) else {
            return false;
        };

        if let Some(driver) = slot.driver {
            let _ = driver.stop_tx.send(());
            state.retired.retain(|handle| !handle.is_finished());
            state.retired.push(driver.handle);
        }

        debug!("cancelled entry {} ({})", id, slot.schedule.name);
        true
    }

    async fn entry(&self, id: EntryId) -> Option<Entry> {
        let schedule = self.state.lock().await.slots.get(&id)?.schedule.clone();
        Some(Self::snapshot(id, &schedule).await)
    }

    async fn entry_by_name(&self, name: &str) -> Option<Entry> {
        let (id, schedule) = {
            let state = self.state.lock().await;
            state
                .slots
                .iter()
                .find(|(_, slot)| slot.schedule.name == name)
                .map(|(id, slot)| (*id, slot.schedule.clone()))?
        };
        Some(Self::snapshot(id, &schedule).await)
    }

    async fn entries(&self) -> Vec<Entry> {
        let schedules: Vec<(EntryId, Arc<Schedule>)> = {
            let state = self.state.lock().await;
            state
                .slots
                .iter()
                .map(|(id, slot)| (*id, slot.schedule.clone()))
                .collect()
        };

        let mut entries = Vec::with_capacity(schedules.len());
        for (id, schedule) in schedules {
            entries.push(Self::snapshot(id, &schedule).await);
        }
        entries
    }

    async fn start(&self) {
        let mut state = self.state.lock().await;
        if state.running {
            return;
        }
        state.running = true;

        for slot in state.slots.values_mut() {
            if slot.driver.is_none() {
                slot.driver = Some(Self::spawn_driver(slot.schedule.clone()).await);
            }
        }

        debug!("runner started with {} entries", state.slots.len());
    }

    async fn stop(&self) {
        let handles = {
            let mut state = self.state.lock().await;
            state.running = false;

            let mut handles = std::mem::take(&mut state.retired);
            for slot in state.slots.values_mut() {
                if let Some(driver) = slot.driver.take() {
                    let _ = driver.stop_tx.send(());
                    handles.push(driver.handle);
                }
            }
            handles
        };

        debug!("waiting for {} drivers to stop", handles.len());
        for handle in handles {
            if let Err(e) = handle.await {
                error!("runner driver ended abnormally: {}", e);
            }
        }
    }

    async fn is_running(&self) -> bool {
        self.state.lock().await.running
    }
}
