//! Transition notifications
//!
//! On a detected status change the [`Notifier`] decides, from preference
//! flags, whether to queue an email and whether to send an SMS. Send
//! failures are logged and never retried.

pub mod mail;
pub mod sms;

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, error, instrument, warn};

use crate::preferences::{self, Preferences};
use crate::{HostService, Status};

pub use mail::{LogMailer, MailDispatcher, MailJob, MailQueue, MailSender, WebhookMailer};
pub use sms::{SmsSender, TwilioSms};

#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("provider rejected the message with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("mail queue is closed")]
    QueueClosed,

    #[error("preference '{0}' is not set")]
    MissingSetting(&'static str),
}

/// Subject and HTML body of the email for a new status.
///
/// Only `healthy` and `problem` have a template; other states send no mail.
pub fn email_template(
    status: Status,
    service_name: &str,
    host_name: &str,
    message: &str,
) -> Option<(String, String)> {
    let (label, verb) = match status {
        Status::Healthy => ("HEALTHY", "reported healthy status"),
        Status::Problem => ("PROBLEM", "reported problem"),
        Status::Warning | Status::Pending => return None,
    };

    Some((
        format!("{label}: service {service_name} on {host_name}"),
        format!(
            "<p>Service {service_name} on {host_name} {verb}</p>\
             <p><strong>Message received: {message}</strong></p>"
        ),
    ))
}

/// SMS text for a new status
pub fn sms_text(status: Status, service_name: &str, host_name: &str) -> Option<String> {
    let label = match status {
        Status::Healthy => "HEALTHY",
        Status::Problem => "PROBLEM",
        Status::Warning => "WARNING",
        Status::Pending => return None,
    };

    Some(format!("{label}: service {service_name} on {host_name}"))
}

/// Preference gated email and SMS on status transitions
#[derive(Clone)]
pub struct Notifier {
    preferences: Preferences,
    mail: MailQueue,
    sms: Arc<dyn SmsSender>,
}

impl Notifier {
    pub fn new(preferences: Preferences, mail: MailQueue, sms: Arc<dyn SmsSender>) -> Self {
        Self {
            preferences,
            mail,
            sms,
        }
    }

    /// Notify about the pair's new status. A pair that moved to `pending`
    /// is never announced.
    #[instrument(skip_all, fields(host_service_id = pair.id, status = %pair.status))]
    pub async fn notify(&self, host_name: &str, pair: &HostService) {
        if pair.status == Status::Pending {
            return;
        }

        if self.preferences.is_enabled(preferences::NOTIFY_VIA_EMAIL).await {
            self.send_email(host_name, pair).await;
        }

        if self.preferences.is_enabled(preferences::NOTIFY_VIA_SMS).await {
            self.send_sms(host_name, pair).await;
        }
    }

    async fn send_email(&self, host_name: &str, pair: &HostService) {
        let Some((subject, content)) = email_template(
            pair.status,
            &pair.service.service_name,
            host_name,
            &pair.last_message,
        ) else {
            debug!("no email template for {}", pair.status);
            return;
        };

        let to_address = self.preferences.get_or_default(preferences::NOTIFY_EMAIL).await;
        if to_address.is_empty() {
            warn!("email notifications enabled but notify_email is not set");
            return;
        }

        let job = MailJob {
            to_name: self.preferences.get_or_default(preferences::NOTIFY_NAME).await,
            to_address,
            from_name: self.preferences.get_or_default(preferences::SMTP_FROM_NAME).await,
            from_address: self.preferences.get_or_default(preferences::SMTP_FROM_EMAIL).await,
            subject,
            content,
        };

        if let Err(e) = self.mail.enqueue(job).await {
            error!("failed to queue notification email: {}", e);
        }
    }

    async fn send_sms(&self, host_name: &str, pair: &HostService) {
        let Some(text) = sms_text(pair.status, &pair.service.service_name, host_name) else {
            return;
        };

        let to = self
            .preferences
            .get_or_default(preferences::SMS_NOTIFY_NUMBER)
            .await;
        if to.is_empty() {
            warn!("sms notifications enabled but sms_notify_number is not set");
            return;
        }

        if let Err(e) = self.sms.send_sms(&to, &text).await {
            error!("failed to send notification sms: {}", e);
        }
    }
}
