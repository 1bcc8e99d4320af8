//! Outbound mail
//!
//! Jobs go through a bounded queue sized to the worker pool. A job is taken
//! off the queue only when a worker is free, so at most `workers` sends run
//! and at most `queue_size` jobs wait. Beyond that `enqueue` waits: mail
//! backpressure only ever slows down the notification path.
//!
//! ```text
//! Notifier ── enqueue ──> [bounded mpsc] ──> dispatcher ── permit ──> worker ── send ──> MailSender
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::{OwnedSemaphorePermit, Semaphore, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use super::NotificationError;

/// One outgoing email, consumed exactly once by a worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailJob {
    pub to_name: String,
    pub to_address: String,
    pub from_name: String,
    pub from_address: String,
    pub subject: String,

    /// HTML body
    pub content: String,
}

#[async_trait]
pub trait MailSender: Send + Sync {
    async fn send(&self, job: &MailJob) -> Result<(), NotificationError>;
}

/// Posts every job as JSON to an HTTP mail relay
#[derive(Debug, Clone)]
pub struct WebhookMailer {
    client: Client,
    url: String,
}

impl WebhookMailer {
    /// A relay that does not answer within `timeout` fails the send and
    /// frees the worker.
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, NotificationError> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl MailSender for WebhookMailer {
    #[instrument(skip_all, fields(to = %job.to_address))]
    async fn send(&self, job: &MailJob) -> Result<(), NotificationError> {
        let response = self.client.post(&self.url).json(job).send().await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(NotificationError::Rejected { status, body });
        }

        debug!("mail relay accepted '{}'", job.subject);
        Ok(())
    }
}

/// Writes mail to the log instead of sending it
#[derive(Debug, Clone, Default)]
pub struct LogMailer;

#[async_trait]
impl MailSender for LogMailer {
    async fn send(&self, job: &MailJob) -> Result<(), NotificationError> {
        info!(
            "mail to {} <{}>: {}",
            job.to_name, job.to_address, job.subject
        );
        Ok(())
    }
}

/// Producer side of the mail queue
#[derive(Debug, Clone)]
pub struct MailQueue {
    tx: mpsc::Sender<MailJob>,
}

impl MailQueue {
    /// Queue a job, waiting while the queue is full
    pub async fn enqueue(&self, job: MailJob) -> Result<(), NotificationError> {
        self.tx
            .send(job)
            .await
            .map_err(|_| NotificationError::QueueClosed)
    }
}

/// Bounded mail queue drained by a fixed number of concurrent workers
pub struct MailDispatcher {
    queue: MailQueue,
    shutdown_tx: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

impl MailDispatcher {
    pub fn spawn(sender: Arc<dyn MailSender>, workers: usize, queue_size: usize) -> Self {
        let workers = workers.max(1);
        let (tx, rx) = mpsc::channel(queue_size.max(1));
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let handle = tokio::spawn(dispatch(rx, shutdown_rx, sender, workers));
        debug!("mail dispatcher started with {} workers", workers);

        Self {
            queue: MailQueue { tx },
            shutdown_tx,
            handle,
        }
    }

    pub fn queue(&self) -> MailQueue {
        self.queue.clone()
    }

    /// Close the queue, send everything still queued and wait for in-flight
    /// sends. Jobs enqueued afterwards are rejected.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(());
        if let Err(e) = self.handle.await {
            error!("mail dispatcher ended abnormally: {}", e);
        }
    }
}

fn start_send(permit: OwnedSemaphorePermit, sender: &Arc<dyn MailSender>, job: MailJob) {
    let sender = sender.clone();
    tokio::spawn(async move {
        if let Err(e) = sender.send(&job).await {
            error!("failed to send mail '{}' to {}: {}", job.subject, job.to_address, e);
        }
        drop(permit);
    });
}

/// Hand every job still queued to a worker once the queue is closed
async fn drain(
    rx: &mut mpsc::Receiver<MailJob>,
    permits: &Arc<Semaphore>,
    sender: &Arc<dyn MailSender>,
) -> usize {
    rx.close();

    let mut drained = 0;
    loop {
        let Ok(permit) = permits.clone().acquire_owned().await else {
            warn!("mail worker pool closed, dropping queued jobs");
            break;
        };
        let Some(job) = rx.recv().await else {
            break;
        };
        start_send(permit, sender, job);
        drained += 1;
    }
    drained
}

#[instrument(skip_all)]
async fn dispatch(
    mut rx: mpsc::Receiver<MailJob>,
    mut shutdown_rx: oneshot::Receiver<()>,
    sender: Arc<dyn MailSender>,
    workers: usize,
) {
    let permits = Arc::new(Semaphore::new(workers));

    // A job leaves the queue only once a worker is free for it
    loop {
        let permit = tokio::select! {
            permit = permits.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },

            _ = &mut shutdown_rx => {
                let drained = drain(&mut rx, &permits, &sender).await;
                debug!("mail queue closed, {} queued jobs handed to workers", drained);
                break;
            }
        };

        tokio::select! {
            job = rx.recv() => match job {
                Some(job) => start_send(permit, &sender, job),
                None => break,
            },

            _ = &mut shutdown_rx => {
                drop(permit);
                let drained = drain(&mut rx, &permits, &sender).await;
                debug!("mail queue closed, {} queued jobs handed to workers", drained);
                break;
            }
        }
    }

    // Every permit back means no send is in flight
    if permits.acquire_many(workers as u32).await.is_err() {
        warn!("mail worker pool closed before in-flight sends finished");
    }
    debug!("mail dispatcher stopped");
}
