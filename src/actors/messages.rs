//! Message types for actor communication
//!
//! Commands are sent to a specific actor over mpsc. Anything that needs an
//! answer carries a oneshot `respond_to` channel.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::oneshot;

use crate::runner::EntryId;
use crate::util::format_or_pending;
use crate::{HostService, MonitorResult};

/// Commands that can be sent to the SchedulerActor
#[derive(Debug)]
pub enum SchedulerCommand {
    /// Start the runner and schedule every pair that should be monitored.
    /// Replies with the number of scheduled pairs.
    StartAll {
        respond_to: oneshot::Sender<MonitorResult<usize>>,
    },

    /// Schedule one pair (no-op unless monitoring is live).
    /// Replies whether the pair is now scheduled.
    Add {
        pair: HostService,
        respond_to: oneshot::Sender<bool>,
    },

    /// Unschedule one pair (no-op unless monitoring is live).
    /// Replies whether an entry was removed.
    Remove {
        host_service_id: i64,
        respond_to: oneshot::Sender<bool>,
    },

    /// Unschedule everything and stop the runner. The reply is sent only
    /// once no check can fire anymore.
    StopAll { respond_to: oneshot::Sender<()> },

    /// Rows for every scheduled pair that is still active, sorted by host
    ListActive {
        respond_to: oneshot::Sender<MonitorResult<Vec<ScheduleRow>>>,
    },

    /// Ids of all pairs in the monitor map
    ScheduledIds { respond_to: oneshot::Sender<Vec<i64>> },

    /// Stop the runner and exit the actor
    Shutdown { respond_to: oneshot::Sender<()> },
}

/// One scheduled pair, as shown on a schedule overview
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScheduleRow {
    pub host_service_id: i64,
    pub entry_id: EntryId,
    pub host_name: String,
    pub service_name: String,

    /// e.g. `@every 3m`
    pub schedule: String,
    pub next_run: Option<DateTime<Utc>>,
    pub last_run: Option<DateTime<Utc>>,
}

impl ScheduleRow {
    pub fn next_run_text(&self) -> String {
        format_or_pending(self.next_run)
    }

    pub fn last_run_text(&self) -> String {
        format_or_pending(self.last_run)
    }
}
