//! Outbound SMS and mail against mock endpoints

use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use vigil::notify::{
    MailDispatcher, MailJob, MailSender, NotificationError, SmsSender, TwilioSms, WebhookMailer,
};
use vigil::preferences::{self, Preferences};
use wiremock::matchers::{basic_auth, body_partial_json, body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const CLIENT_TIMEOUT: Duration = Duration::from_secs(2);

async fn twilio_preferences() -> Preferences {
    let preferences = Preferences::new();
    preferences.set(preferences::TWILIO_SID, "AC123").await;
    preferences.set(preferences::TWILIO_AUTH_TOKEN, "secret").await;
    preferences
        .set(preferences::TWILIO_PHONE_NUMBER, "+15550009")
        .await;
    preferences
}

fn mail_job(subject: &str) -> MailJob {
    MailJob {
        to_name: "Ops".to_string(),
        to_address: "ops@example.org".to_string(),
        from_name: "Vigil".to_string(),
        from_address: "vigil@example.org".to_string(),
        subject: subject.to_string(),
        content: "<p>body</p>".to_string(),
    }
}

#[tokio::test]
async fn test_twilio_sms_is_posted() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/2010-04-01/Accounts/AC123/Messages.json"))
        .and(basic_auth("AC123", "secret"))
        .and(body_string_contains("Body=PROBLEM"))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&mock_server)
        .await;

    let sms = TwilioSms::new(mock_server.uri(), twilio_preferences().await, CLIENT_TIMEOUT)
        .unwrap();
    sms.send_sms("+15550001", "PROBLEM: service HTTP on web-1")
        .await
        .unwrap();
}

#[tokio::test]
async fn test_twilio_rejection_is_reported() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(400).set_body_string("bad number"))
        .mount(&mock_server)
        .await;

    let sms = TwilioSms::new(mock_server.uri(), twilio_preferences().await, CLIENT_TIMEOUT)
        .unwrap();
    let result = sms.send_sms("nope", "HEALTHY: service HTTP on web-1").await;

    assert_matches!(
        result,
        Err(NotificationError::Rejected { status: 400, ref body }) if body == "bad number"
    );
}

#[tokio::test]
async fn test_twilio_without_credentials() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(201))
        .expect(0)
        .mount(&mock_server)
        .await;

    let sms = TwilioSms::new(mock_server.uri(), Preferences::new(), CLIENT_TIMEOUT).unwrap();
    let result = sms.send_sms("+15550001", "hello").await;

    assert_matches!(
        result,
        Err(NotificationError::MissingSetting(preferences::TWILIO_SID))
    );
}

#[tokio::test]
async fn test_webhook_mailer_posts_job() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/mail"))
        .and(body_partial_json(serde_json::json!({
            "to_address": "ops@example.org",
            "subject": "HEALTHY: service HTTP on web-1",
        })))
        .respond_with(ResponseTemplate::new(202))
        .expect(1)
        .mount(&mock_server)
        .await;

    let mailer =
        WebhookMailer::new(format!("{}/mail", mock_server.uri()), CLIENT_TIMEOUT).unwrap();
    mailer
        .send(&mail_job("HEALTHY: service HTTP on web-1"))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_dispatcher_delivers_through_webhook() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/mail"))
        .respond_with(ResponseTemplate::new(200))
        .expect(3)
        .mount(&mock_server)
        .await;

    let mailer = Arc::new(
        WebhookMailer::new(format!("{}/mail", mock_server.uri()), CLIENT_TIMEOUT).unwrap(),
    );
    let dispatcher = MailDispatcher::spawn(mailer, 2, 2);
    let queue = dispatcher.queue();

    for i in 0..3 {
        queue.enqueue(mail_job(&format!("job {i}"))).await.unwrap();
    }

    // Shutdown drains queued and in-flight sends
    dispatcher.shutdown().await;

    assert_eq!(mock_server.received_requests().await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_stalled_sms_provider_times_out() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(201).set_delay(Duration::from_secs(60)))
        .mount(&mock_server)
        .await;

    let sms = TwilioSms::new(
        mock_server.uri(),
        twilio_preferences().await,
        Duration::from_millis(200),
    )
    .unwrap();

    let result = tokio::time::timeout(
        Duration::from_secs(5),
        sms.send_sms("+15550001", "PROBLEM: service HTTP on web-1"),
    )
    .await
    .expect("sms send must give up on a stalled provider");

    assert_matches!(result, Err(NotificationError::Http(ref e)) if e.is_timeout());
}

#[tokio::test]
async fn test_stalled_mail_relay_does_not_block_shutdown() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(60)))
        .mount(&mock_server)
        .await;

    let mailer = Arc::new(
        WebhookMailer::new(
            format!("{}/mail", mock_server.uri()),
            Duration::from_millis(200),
        )
        .unwrap(),
    );
    let dispatcher = MailDispatcher::spawn(mailer, 1, 1);
    dispatcher
        .queue()
        .enqueue(mail_job("stalled"))
        .await
        .unwrap();

    tokio::time::timeout(Duration::from_secs(5), dispatcher.shutdown())
        .await
        .expect("shutdown must finish once the relay times out");
}
