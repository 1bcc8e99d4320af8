//! Process-wide preference store
//!
//! Preferences are loaded from the repository at startup and mutated by the
//! administrative path. Checks only ever read them.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

pub const MONITORING_LIVE: &str = "monitoring_live";
pub const NOTIFY_VIA_EMAIL: &str = "notify_via_email";
pub const NOTIFY_VIA_SMS: &str = "notify_via_sms";
pub const NOTIFY_NAME: &str = "notify_name";
pub const NOTIFY_EMAIL: &str = "notify_email";
pub const SMS_NOTIFY_NUMBER: &str = "sms_notify_number";
pub const SMTP_FROM_EMAIL: &str = "smtp_from_email";
pub const SMTP_FROM_NAME: &str = "smtp_from_name";
pub const TWILIO_SID: &str = "twilio_sid";
pub const TWILIO_AUTH_TOKEN: &str = "twilio_auth_token";
pub const TWILIO_PHONE_NUMBER: &str = "twilio_phone_number";

/// Value of an enabled flag preference
pub const ENABLED: &str = "1";
pub const DISABLED: &str = "0";

/// Shared preference map
#[derive(Debug, Clone, Default)]
pub struct Preferences {
    values: Arc<RwLock<HashMap<String, String>>>,
}

impl Preferences {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(values: HashMap<String, String>) -> Self {
        Self {
            values: Arc::new(RwLock::new(values)),
        }
    }

    pub async fn get(&self, key: &str) -> Option<String> {
        self.values.read().await.get(key).cloned()
    }

    pub async fn get_or_default(&self, key: &str) -> String {
        self.get(key).await.unwrap_or_default()
    }

    /// Whether a flag preference is set to `"1"`
    pub async fn is_enabled(&self, key: &str) -> bool {
        self.values
            .read()
            .await
            .get(key)
            .is_some_and(|value| value == ENABLED)
    }

    pub async fn set(&self, key: &str, value: impl Into<String>) {
        self.values
            .write()
            .await
            .insert(key.to_string(), value.into());
    }

    pub async fn set_flag(&self, key: &str, enabled: bool) {
        self.set(key, if enabled { ENABLED } else { DISABLED }).await;
    }

    /// Merge values without overwriting keys that are already present
    pub async fn extend_missing(&self, values: &HashMap<String, String>) {
        let mut current = self.values.write().await;
        for (key, value) in values {
            current
                .entry(key.clone())
                .or_insert_with(|| value.clone());
        }
    }

    pub async fn snapshot(&self) -> HashMap<String, String> {
        self.values.read().await.clone()
    }
}
