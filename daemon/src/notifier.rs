//! History-event fan-out: in-process subscribers plus webhook delivery.

use crate::config::{NotificationsConfig, WebhookConfig};
use anyhow::Result;
use common::{ExecutionStatus, HistoryEvent};
use tokio::sync::broadcast;

const CHANNEL_CAPACITY: usize = 256;

#[derive(Clone)]
pub struct HistoryNotifier {
    sender: broadcast::Sender<HistoryEvent>,
}

impl HistoryNotifier {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    /// Publishing with nobody listening is not an error.
    pub fn publish(&self, event: HistoryEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<HistoryEvent> {
        self.sender.subscribe()
    }

    /// Starts a task that posts every event to the configured webhooks.
    /// Does nothing when none are configured.
    pub fn spawn_webhook_forwarder(&self, config: &NotificationsConfig) {
        if config.webhooks.is_empty() {
            return;
        }
        let webhooks = config.webhooks.clone();
        let mut events = self.subscribe();
        let client = reqwest::Client::new();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        for hook in webhooks.iter().filter(|h| wants(h, &event)) {
                            if let Err(e) = send_webhook(&client, hook, &event).await {
                                log::error!("Webhook {} failed: {:#}", hook.url, e);
                            }
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        log::warn!("Webhook forwarder skipped {} events", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }
}

impl Default for HistoryNotifier {
    fn default() -> Self {
        Self::new()
    }
}

fn wants(hook: &WebhookConfig, event: &HistoryEvent) -> bool {
    !hook.only_failures || event.record.status == ExecutionStatus::Failure
}

pub fn webhook_payload(event: &HistoryEvent) -> serde_json::Value {
    let record = &event.record;
    serde_json::json!({
        "event": event.kind,
        "job_id": record.job_id.0,
        "job_name": record.job_name,
        "job_type": record.job_type.description(),
        "status": record.status.to_string(),
        "message": record.message,
        "item_count": record.item_count,
        "bytes": record.bytes,
        "duration": record.duration,
        "started_at": record.started_at,
        "timestamp": chrono::Utc::now().to_rfc3339(),
    })
}

async fn send_webhook(client: &reqwest::Client, hook: &WebhookConfig, event: &HistoryEvent) -> Result<()> {
    let mut request = client.post(&hook.url);
    if let Some(headers) = &hook.headers {
        for (key, value) in headers {
            request = request.header(key, value);
        }
    }

    let response = request.json(&webhook_payload(event)).send().await?;
    if response.status().is_success() {
        log::info!("Webhook notification sent to {} for job {}", hook.url, event.record.job_name);
    } else {
        log::error!("Webhook {} answered with status {}", hook.url, response.status());
    }
    Ok(())
}
