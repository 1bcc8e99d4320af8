//! Repository trait definition
//!
//! The monitoring engine only ever talks to the durable store through the
//! `Repository` trait defined here.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::error::RepositoryResult;
use crate::{Event, Host, HostService, Status, StatusCounts};

/// Durable store for hosts, monitored pairs, events and preferences
///
/// ## Thread Safety
///
/// Implementations must be `Send + Sync`: the same repository is shared by
/// every running check and by the administrative control path.
///
/// ## Error Handling
///
/// Methods return `RepositoryResult<T>`. A missing row is reported as
/// `RepositoryError::NotFound`, anything else as the matching I/O variant.
#[async_trait]
pub trait Repository: Send + Sync {
    /// Load a host together with all of its pairs
    async fn get_host_by_id(&self, id: i64) -> RepositoryResult<Host>;

    /// All hosts ordered by host name (pairs are not filled in)
    async fn all_hosts(&self) -> RepositoryResult<Vec<Host>>;

    /// Insert a host and provision one inactive, pending pair per catalog
    /// service. Returns the new host id.
    async fn insert_host(&self, host: &Host) -> RepositoryResult<i64>;

    async fn get_host_service_by_id(&self, id: i64) -> RepositoryResult<HostService>;

    async fn get_host_service_by_host_id_service_id(
        &self,
        host_id: i64,
        service_id: i32,
    ) -> RepositoryResult<HostService>;

    /// Persist status, message, last check, schedule and active flag of a pair
    async fn update_host_service(&self, pair: &HostService) -> RepositoryResult<()>;

    /// Record a check result on a pair that is still active. Only status,
    /// message, last check and updated_at are written. Returns false and
    /// writes nothing when the pair was deactivated in the meantime.
    async fn update_host_service_check_result(
        &self,
        id: i64,
        status: Status,
        last_message: &str,
        last_check: DateTime<Utc>,
    ) -> RepositoryResult<bool>;

    /// Set active flag and status of the pair identified by host and service
    async fn update_host_service_status(
        &self,
        host_id: i64,
        service_id: i32,
        active: bool,
        status: Status,
    ) -> RepositoryResult<()>;

    /// Every active pair that belongs to an active host
    async fn get_services_to_monitor(&self) -> RepositoryResult<Vec<HostService>>;

    /// Active pairs in the given status, ordered by host then service name
    async fn get_services_by_status(&self, status: Status) -> RepositoryResult<Vec<HostService>>;

    /// Counts of active pairs per status
    async fn get_all_service_status_counts(&self) -> RepositoryResult<StatusCounts>;

    async fn get_service_status_counts(&self, status: Status) -> RepositoryResult<i64>;

    /// Append an event and return its id
    async fn insert_event(&self, event: &Event) -> RepositoryResult<i64>;

    /// All events, oldest first
    async fn get_all_events(&self) -> RepositoryResult<Vec<Event>>;

    async fn all_preferences(&self) -> RepositoryResult<HashMap<String, String>>;

    async fn set_system_pref(&self, name: &str, value: &str) -> RepositoryResult<()>;

    async fn insert_or_update_preferences(
        &self,
        preferences: &HashMap<String, String>,
    ) -> RepositoryResult<()>;

    /// Release the underlying connection. Further calls fail with
    /// `RepositoryError::Unavailable`.
    async fn close(&self);
}
