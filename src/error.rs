//! Error types shared by the monitoring engine

use thiserror::Error;

use crate::storage::RepositoryError;

pub type MonitorResult<T> = Result<T, MonitorError>;

/// Failures the engine can surface to its caller.
///
/// Probe failures are deliberately absent: a failed probe is a `problem`
/// status, not an error.
#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),

    #[error("no check registered for service {0}")]
    UnknownService(i32),

    #[error("invalid schedule: {0}")]
    InvalidSchedule(String),

    #[error("invalid status '{0}'")]
    InvalidStatus(String),

    #[error("host service {0} was deactivated during the check")]
    Deactivated(i64),

    #[error("scheduler unavailable: {0}")]
    Scheduler(String),

    #[error("deadline exceeded while {0}")]
    Timeout(&'static str),

    #[error("failed to build check client: {0}")]
    Client(String),
}
