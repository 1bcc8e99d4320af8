//! Outbound SMS

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, instrument};

use super::NotificationError;
use crate::preferences::{self, Preferences};

#[async_trait]
pub trait SmsSender: Send + Sync {
    async fn send_sms(&self, to: &str, body: &str) -> Result<(), NotificationError>;
}

/// Twilio REST API sender
///
/// Credentials and the sending number are read from the preferences on
/// every send, so admins can change them at runtime.
#[derive(Debug, Clone)]
pub struct TwilioSms {
    client: Client,
    base_url: String,
    preferences: Preferences,
}

impl TwilioSms {
    /// Every request, connect included, is bounded by `timeout`.
    pub fn new(
        base_url: impl Into<String>,
        preferences: Preferences,
        timeout: Duration,
    ) -> Result<Self, NotificationError> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            preferences,
        })
    }

    async fn required(&self, key: &'static str) -> Result<String, NotificationError> {
        self.preferences
            .get(key)
            .await
            .filter(|value| !value.is_empty())
            .ok_or(NotificationError::MissingSetting(key))
    }
}

#[async_trait]
impl SmsSender for TwilioSms {
    #[instrument(skip(self, body))]
    async fn send_sms(&self, to: &str, body: &str) -> Result<(), NotificationError> {
        let sid = self.required(preferences::TWILIO_SID).await?;
        let token = self.required(preferences::TWILIO_AUTH_TOKEN).await?;
        let from = self.required(preferences::TWILIO_PHONE_NUMBER).await?;

        let url = format!("{}/2010-04-01/Accounts/{}/Messages.json", self.base_url, sid);

        let response = self
            .client
            .post(&url)
            .basic_auth(&sid, Some(&token))
            .form(&[("To", to), ("From", from.as_str()), ("Body", body)])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(NotificationError::Rejected { status, body });
        }

        debug!("sms to {} accepted", to);
        Ok(())
    }
}
