//! In-memory repository (no persistence)
//!
//! Useful for:
//! - Testing without database dependencies
//! - Small deployments that seed their hosts from the config file
//!
//! All data is lost on restart.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{debug, trace};

use super::backend::Repository;
use super::error::{RepositoryError, RepositoryResult};
use crate::{Event, Host, HostService, ScheduleUnit, ServiceKind, Status, StatusCounts};

/// Schedule given to freshly provisioned pairs
const DEFAULT_SCHEDULE_NUMBER: i64 = 3;

#[derive(Default)]
struct State {
    hosts: BTreeMap<i64, Host>,
    pairs: BTreeMap<i64, HostService>,
    events: Vec<Event>,
    preferences: HashMap<String, String>,
    next_host_id: i64,
    next_pair_id: i64,
}

/// Repository backed by maps behind a tokio `RwLock`
pub struct MemoryRepository {
    state: RwLock<State>,
    available: AtomicBool,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(State::default()),
            available: AtomicBool::new(true),
        }
    }

    /// Simulate an outage: while unavailable every call fails with
    /// `RepositoryError::Unavailable`.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn ensure_available(&self) -> RepositoryResult<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(RepositoryError::Unavailable(
                "in-memory repository is offline".to_string(),
            ))
        }
    }
}

impl Default for MemoryRepository {
    fn default() -> Self {
        Self::new()
    }
}

fn sort_by_names(pairs: &mut [HostService]) {
    pairs.sort_by(|a, b| {
        a.host_name
            .cmp(&b.host_name)
            .then_with(|| a.service.service_name.cmp(&b.service.service_name))
    });
}

#[async_trait]
impl Repository for MemoryRepository {
    async fn get_host_by_id(&self, id: i64) -> RepositoryResult<Host> {
        self.ensure_available()?;
        let state = self.state.read().await;

        let mut host = state
            .hosts
            .get(&id)
            .cloned()
            .ok_or(RepositoryError::NotFound { entity: "host", id })?;

        host.host_services = state
            .pairs
            .values()
            .filter(|pair| pair.host_id == id)
            .cloned()
            .collect();

        Ok(host)
    }

    async fn all_hosts(&self) -> RepositoryResult<Vec<Host>> {
        self.ensure_available()?;
        let state = self.state.read().await;

        let mut hosts: Vec<Host> = state.hosts.values().cloned().collect();
        hosts.sort_by(|a, b| a.host_name.cmp(&b.host_name));
        Ok(hosts)
    }

    async fn insert_host(&self, host: &Host) -> RepositoryResult<i64> {
        self.ensure_available()?;
        let mut state = self.state.write().await;
        let now = Utc::now();

        state.next_host_id += 1;
        let host_id = state.next_host_id;

        let mut stored = host.clone();
        stored.id = host_id;
        stored.created_at = now;
        stored.updated_at = now;
        stored.host_services.clear();
        state.hosts.insert(host_id, stored);

        for kind in ServiceKind::ALL {
            state.next_pair_id += 1;
            let pair_id = state.next_pair_id;
            state.pairs.insert(
                pair_id,
                HostService {
                    id: pair_id,
                    host_id,
                    service_id: kind.id(),
                    active: false,
                    schedule_number: DEFAULT_SCHEDULE_NUMBER,
                    schedule_unit: ScheduleUnit::Minutes,
                    status: Status::Pending,
                    last_message: String::new(),
                    last_check: None,
                    created_at: now,
                    updated_at: now,
                    host_name: host.host_name.clone(),
                    service: kind.service(),
                },
            );
        }

        debug!("inserted host {} ({})", host_id, host.host_name);
        Ok(host_id)
    }

    async fn get_host_service_by_id(&self, id: i64) -> RepositoryResult<HostService> {
        self.ensure_available()?;
        let state = self.state.read().await;

        state.pairs.get(&id).cloned().ok_or(RepositoryError::NotFound {
            entity: "host service",
            id,
        })
    }

    async fn get_host_service_by_host_id_service_id(
        &self,
        host_id: i64,
        service_id: i32,
    ) -> RepositoryResult<HostService> {
        self.ensure_available()?;
        let state = self.state.read().await;

        state
            .pairs
            .values()
            .find(|pair| pair.host_id == host_id && pair.service_id == service_id)
            .cloned()
            .ok_or(RepositoryError::NotFound {
                entity: "host service for host",
                id: host_id,
            })
    }

    async fn update_host_service(&self, pair: &HostService) -> RepositoryResult<()> {
        self.ensure_available()?;
        let mut state = self.state.write().await;

        let stored = state
            .pairs
            .get_mut(&pair.id)
            .ok_or(RepositoryError::NotFound {
                entity: "host service",
                id: pair.id,
            })?;

        stored.active = pair.active;
        stored.schedule_number = pair.schedule_number;
        stored.schedule_unit = pair.schedule_unit;
        stored.status = pair.status;
        stored.last_message = pair.last_message.clone();
        stored.last_check = pair.last_check;
        stored.updated_at = Utc::now();

        trace!("updated host service {} to {}", pair.id, pair.status);
        Ok(())
    }

    async fn update_host_service_check_result(
        &self,
        id: i64,
        status: Status,
        last_message: &str,
        last_check: DateTime<Utc>,
    ) -> RepositoryResult<bool> {
        self.ensure_available()?;
        let mut state = self.state.write().await;

        let stored = state.pairs.get_mut(&id).ok_or(RepositoryError::NotFound {
            entity: "host service",
            id,
        })?;

        if !stored.active {
            debug!("host service {} is inactive, check result dropped", id);
            return Ok(false);
        }

        stored.status = status;
        stored.last_message = last_message.to_string();
        stored.last_check = Some(last_check);
        stored.updated_at = Utc::now();
        Ok(true)
    }

    async fn update_host_service_status(
        &self,
        host_id: i64,
        service_id: i32,
        active: bool,
        status: Status,
    ) -> RepositoryResult<()> {
        self.ensure_available()?;
        let mut state = self.state.write().await;

        let stored = state
            .pairs
            .values_mut()
            .find(|pair| pair.host_id == host_id && pair.service_id == service_id)
            .ok_or(RepositoryError::NotFound {
                entity: "host service for host",
                id: host_id,
            })?;

        stored.active = active;
        stored.status = status;
        stored.updated_at = Utc::now();
        Ok(())
    }

    async fn get_services_to_monitor(&self) -> RepositoryResult<Vec<HostService>> {
        self.ensure_available()?;
        let state = self.state.read().await;

        Ok(state
            .pairs
            .values()
            .filter(|pair| {
                pair.active
                    && state
                        .hosts
                        .get(&pair.host_id)
                        .is_some_and(|host| host.active)
            })
            .cloned()
            .collect())
    }

    async fn get_services_by_status(&self, status: Status) -> RepositoryResult<Vec<HostService>> {
        self.ensure_available()?;
        let state = self.state.read().await;

        let mut pairs: Vec<HostService> = state
            .pairs
            .values()
            .filter(|pair| pair.active && pair.status == status)
            .cloned()
            .collect();
        sort_by_names(&mut pairs);
        Ok(pairs)
    }

    async fn get_all_service_status_counts(&self) -> RepositoryResult<StatusCounts> {
        self.ensure_available()?;
        let state = self.state.read().await;

        let mut counts = StatusCounts::default();
        for pair in state.pairs.values().filter(|pair| pair.active) {
            counts.increment(pair.status);
        }
        Ok(counts)
    }

    async fn get_service_status_counts(&self, status: Status) -> RepositoryResult<i64> {
        Ok(self.get_all_service_status_counts().await?.get(status))
    }

    async fn insert_event(&self, event: &Event) -> RepositoryResult<i64> {
        self.ensure_available()?;
        let mut state = self.state.write().await;

        let id = state.events.len() as i64 + 1;
        let mut stored = event.clone();
        stored.id = id;
        state.events.push(stored);
        Ok(id)
    }

    async fn get_all_events(&self) -> RepositoryResult<Vec<Event>> {
        self.ensure_available()?;
        let state = self.state.read().await;

        let mut events = state.events.clone();
        events.sort_by_key(|event| (event.created_at, event.id));
        Ok(events)
    }

    async fn all_preferences(&self) -> RepositoryResult<HashMap<String, String>> {
        self.ensure_available()?;
        Ok(self.state.read().await.preferences.clone())
    }

    async fn set_system_pref(&self, name: &str, value: &str) -> RepositoryResult<()> {
        self.ensure_available()?;
        self.state
            .write()
            .await
            .preferences
            .insert(name.to_string(), value.to_string());
        Ok(())
    }

    async fn insert_or_update_preferences(
        &self,
        preferences: &HashMap<String, String>,
    ) -> RepositoryResult<()> {
        self.ensure_available()?;
        let mut state = self.state.write().await;
        for (name, value) in preferences {
            state.preferences.insert(name.clone(), value.clone());
        }
        Ok(())
    }

    async fn close(&self) {
        debug!("closing in-memory repository");
        self.set_available(false);
    }
}
