//! Check executor
//!
//! A registry maps each service type to the strategy probing it. The engine
//! never branches on service types itself: adding a check type means
//! registering another [`Check`].
//!
//! Probes never fail. Connection, protocol and certificate errors come back
//! as a `problem` result carrying a diagnostic message.

pub mod http;
pub mod tls;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tracing::trace;

use crate::config::CheckConfig;
use crate::{MonitorError, MonitorResult, ServiceKind, Status};

pub use http::{HttpCheck, Scheme};
pub use tls::TlsCheck;

/// Outcome of one probe
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProbeResult {
    pub status: Status,
    pub message: String,
}

impl ProbeResult {
    pub fn healthy(message: impl Into<String>) -> Self {
        Self {
            status: Status::Healthy,
            message: message.into(),
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            status: Status::Warning,
            message: message.into(),
        }
    }

    pub fn problem(message: impl Into<String>) -> Self {
        Self {
            status: Status::Problem,
            message: message.into(),
        }
    }
}

/// One probing strategy. Implementations are stateless per call and safe to
/// run concurrently for different targets.
#[async_trait]
pub trait Check: Send + Sync {
    fn name(&self) -> &'static str;

    async fn probe(&self, target: &str) -> ProbeResult;
}

/// Service type id to check strategy
#[derive(Clone, Default)]
pub struct CheckRegistry {
    checks: HashMap<i32, Arc<dyn Check>>,
}

impl CheckRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the HTTP, HTTPS and certificate checks
    pub fn with_defaults(config: &CheckConfig) -> MonitorResult<Self> {
        let mut registry = Self::new();
        registry.register(
            ServiceKind::Http.id(),
            Arc::new(HttpCheck::new(Scheme::Http, config.http_timeout())?),
        );
        registry.register(
            ServiceKind::Https.id(),
            Arc::new(HttpCheck::new(Scheme::Https, config.http_timeout())?),
        );
        registry.register(
            ServiceKind::TlsCertificate.id(),
            Arc::new(TlsCheck::new(
                config.tls_timeout(),
                config.tls_warning_days,
                config.tls_urgent_days,
            )?),
        );
        Ok(registry)
    }

    /// Register a strategy, replacing any previous one for the service
    pub fn register(&mut self, service_id: i32, check: Arc<dyn Check>) {
        self.checks.insert(service_id, check);
    }

    pub fn get(&self, service_id: i32) -> Option<Arc<dyn Check>> {
        self.checks.get(&service_id).cloned()
    }

    /// Probe `target` with the strategy of `service_id`
    pub async fn probe(&self, service_id: i32, target: &str) -> MonitorResult<ProbeResult> {
        let check = self
            .get(service_id)
            .ok_or(MonitorError::UnknownService(service_id))?;

        trace!("probing {} with {} check", target, check.name());
        Ok(check.probe(target).await)
    }
}
