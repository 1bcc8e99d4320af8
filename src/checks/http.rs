//! Plain HTTP and HTTPS reachability checks

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use tracing::{debug, instrument};

use super::{Check, ProbeResult};
use crate::{MonitorError, MonitorResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Http,
    Https,
}

impl Scheme {
    fn prefix(self) -> &'static str {
        match self {
            Scheme::Http => "http://",
            Scheme::Https => "https://",
        }
    }
}

/// Force `target` onto `scheme`, dropping trailing slashes
///
/// ```
/// use vigil::checks::http::{normalize_url, Scheme};
///
/// assert_eq!(normalize_url("https://example.org/", Scheme::Http), "http://example.org");
/// assert_eq!(normalize_url("example.org", Scheme::Https), "https://example.org");
/// ```
pub fn normalize_url(target: &str, scheme: Scheme) -> String {
    let trimmed = target.trim().trim_end_matches('/');
    let bare = trimmed
        .strip_prefix("https://")
        .or_else(|| trimmed.strip_prefix("http://"))
        .unwrap_or(trimmed);

    format!("{}{}", scheme.prefix(), bare)
}

/// Single GET against the target; only `200` counts as healthy
pub struct HttpCheck {
    scheme: Scheme,
    client: reqwest::Client,
}

impl HttpCheck {
    pub fn new(scheme: Scheme, timeout: Duration) -> MonitorResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| MonitorError::Client(e.to_string()))?;

        Ok(Self { scheme, client })
    }
}

#[async_trait]
impl Check for HttpCheck {
    fn name(&self) -> &'static str {
        match self.scheme {
            Scheme::Http => "http",
            Scheme::Https => "https",
        }
    }

    #[instrument(skip(self), fields(check = self.name()))]
    async fn probe(&self, target: &str) -> ProbeResult {
        let url = normalize_url(target, self.scheme);

        match self.client.get(&url).send().await {
            Ok(response) if response.status() == StatusCode::OK => {
                ProbeResult::healthy(format!("{} - {}", url, response.status()))
            }
            Ok(response) => {
                debug!("{} answered with {}", url, response.status());
                ProbeResult::problem(format!("{} - {}", url, response.status()))
            }
            Err(e) => {
                debug!("failed to reach {}: {}", url, e);
                ProbeResult::problem(format!("{} - error connecting: {}", url, e))
            }
        }
    }
}
