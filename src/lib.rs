pub mod actors;
pub mod broadcast;
pub mod checks;
pub mod config;
pub mod engine;
pub mod error;
pub mod monitor;
pub mod notify;
pub mod preferences;
pub mod runner;
pub mod storage;
pub mod util;

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use error::{MonitorError, MonitorResult};

/// Longest check interval a pair may be scheduled with
pub const MAX_INTERVAL: Duration = Duration::from_secs(365 * 24 * 3600);

/// Health of a monitored host service.
///
/// Every pair starts out as `Pending` and only moves once a probe completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Pending,
    Healthy,
    Warning,
    Problem,
}

impl Status {
    pub const ALL: [Status; 4] = [
        Status::Pending,
        Status::Healthy,
        Status::Warning,
        Status::Problem,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Pending => "pending",
            Status::Healthy => "healthy",
            Status::Warning => "warning",
            Status::Problem => "problem",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = MonitorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Status::Pending),
            "healthy" => Ok(Status::Healthy),
            "warning" => Ok(Status::Warning),
            "problem" => Ok(Status::Problem),
            other => Err(MonitorError::InvalidStatus(other.to_string())),
        }
    }
}

/// The fixed catalog of check types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ServiceKind {
    Http = 1,
    Https = 2,
    TlsCertificate = 3,
}

impl ServiceKind {
    pub const ALL: [ServiceKind; 3] = [
        ServiceKind::Http,
        ServiceKind::Https,
        ServiceKind::TlsCertificate,
    ];

    pub fn id(self) -> i32 {
        self as i32
    }

    pub fn from_id(id: i32) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.id() == id)
    }

    pub fn name(self) -> &'static str {
        match self {
            ServiceKind::Http => "HTTP",
            ServiceKind::Https => "HTTPS",
            ServiceKind::TlsCertificate => "SSL Certificate",
        }
    }

    pub fn icon(self) -> &'static str {
        match self {
            ServiceKind::Http => "fas fa-server",
            ServiceKind::Https => "fas fa-server",
            ServiceKind::TlsCertificate => "fas fa-lock",
        }
    }

    pub fn service(self) -> Service {
        Service {
            id: self.id(),
            service_name: self.name().to_string(),
            icon: self.icon().to_string(),
            active: true,
        }
    }
}

/// Reference data describing one check type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub id: i32,
    pub service_name: String,
    pub icon: String,
    pub active: bool,
}

/// Unit of a pair's check interval
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScheduleUnit {
    #[serde(rename = "m")]
    Minutes,
    #[serde(rename = "h")]
    Hours,
    #[serde(rename = "d")]
    Days,
}

impl ScheduleUnit {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScheduleUnit::Minutes => "m",
            ScheduleUnit::Hours => "h",
            ScheduleUnit::Days => "d",
        }
    }
}

impl FromStr for ScheduleUnit {
    type Err = MonitorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "m" => Ok(ScheduleUnit::Minutes),
            "h" => Ok(ScheduleUnit::Hours),
            "d" => Ok(ScheduleUnit::Days),
            other => Err(MonitorError::InvalidSchedule(format!(
                "unknown schedule unit '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Host {
    pub id: i64,
    pub host_name: String,
    pub canonical_name: String,
    pub url: String,
    pub ip: String,
    pub ipv6: String,
    pub location: String,
    pub os: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    /// Pairs owned by this host (filled by `get_host_by_id`)
    #[serde(default)]
    pub host_services: Vec<HostService>,
}

impl Host {
    /// A not-yet-persisted host; the repository assigns id and timestamps.
    pub fn new(host_name: impl Into<String>, url: impl Into<String>) -> Self {
        let now = Utc::now();
        let host_name = host_name.into();
        Self {
            id: 0,
            canonical_name: host_name.clone(),
            host_name,
            url: url.into(),
            ip: String::new(),
            ipv6: String::new(),
            location: String::new(),
            os: String::new(),
            active: true,
            created_at: now,
            updated_at: now,
            host_services: Vec::new(),
        }
    }
}

/// A monitored pair: one service type applied to one host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostService {
    pub id: i64,
    pub host_id: i64,
    pub service_id: i32,
    pub active: bool,
    pub schedule_number: i64,
    pub schedule_unit: ScheduleUnit,
    pub status: Status,
    pub last_message: String,
    pub last_check: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    /// Snapshot of the parent host's display name
    pub host_name: String,

    /// Joined catalog entry
    pub service: Service,
}

impl HostService {
    /// Human readable schedule, e.g. `@every 3m`
    pub fn schedule_text(&self) -> String {
        format!(
            "@every {}{}",
            self.schedule_number,
            self.schedule_unit.as_str()
        )
    }

    /// Check interval of this pair. Day units are normalized to hours.
    ///
    /// Intervals longer than [`MAX_INTERVAL`] are rejected.
    pub fn interval(&self) -> MonitorResult<Duration> {
        if self.schedule_number <= 0 {
            return Err(MonitorError::InvalidSchedule(format!(
                "host service {} has non-positive interval {}",
                self.id, self.schedule_number
            )));
        }

        let number = self.schedule_number as u64;
        let secs = match self.schedule_unit {
            ScheduleUnit::Minutes => number.checked_mul(60),
            ScheduleUnit::Hours => number.checked_mul(3600),
            ScheduleUnit::Days => number.checked_mul(24).and_then(|hours| hours.checked_mul(3600)),
        };

        match secs.map(Duration::from_secs) {
            Some(interval) if interval <= MAX_INTERVAL => Ok(interval),
            _ => Err(MonitorError::InvalidSchedule(format!(
                "host service {} interval {} exceeds one year",
                self.id,
                self.schedule_text()
            ))),
        }
    }
}

/// Append-only record of a status transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id: i64,
    pub event_type: Status,
    pub host_service_id: i64,
    pub host_id: i64,
    pub service_name: String,
    pub host_name: String,
    pub message: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Event {
    pub fn transition(host: &Host, pair: &HostService, message: &str, at: DateTime<Utc>) -> Self {
        Self {
            id: 0,
            event_type: pair.status,
            host_service_id: pair.id,
            host_id: host.id,
            service_name: pair.service.service_name.clone(),
            host_name: host.host_name.clone(),
            message: message.to_string(),
            created_at: at,
            updated_at: at,
        }
    }
}

/// Number of active pairs per status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub healthy: i64,
    pub warning: i64,
    pub problem: i64,
    pub pending: i64,
}

impl StatusCounts {
    pub fn get(&self, status: Status) -> i64 {
        match status {
            Status::Pending => self.pending,
            Status::Healthy => self.healthy,
            Status::Warning => self.warning,
            Status::Problem => self.problem,
        }
    }

    pub fn increment(&mut self, status: Status) {
        match status {
            Status::Pending => self.pending += 1,
            Status::Healthy => self.healthy += 1,
            Status::Warning => self.warning += 1,
            Status::Problem => self.problem += 1,
        }
    }
}
