//! Chat relay through per-server webhooks.
//!
//! Each relayed line becomes `{"username": "Speaker (server)", "content":
//! text}` posted to the server's configured URL. Servers without a webhook
//! and non-chat events are skipped.

use std::collections::HashMap;
use std::time::Duration;

use serde::Serialize;
use tracing::debug;

use palwatch_core::{BoxFuture, PalwatchConfig};
use palwatch_monitor::{EventSink, MonitorError, MonitorEvent, MonitorResult, RelayMessage};

/// Body posted for one chat line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WebhookPayload {
    pub username: String,
    pub content: String,
}

impl From<&RelayMessage> for WebhookPayload {
    fn from(msg: &RelayMessage) -> Self {
        Self {
            username: msg.display_name(),
            content: msg.text.clone(),
        }
    }
}

pub struct WebhookSink {
    client: reqwest::Client,
    /// Server name → webhook URL.
    routes: HashMap<String, String>,
}

impl WebhookSink {
    pub fn new(routes: HashMap<String, String>) -> reqwest::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent("palwatch")
            .timeout(Duration::from_secs(15))
            .build()?;
        Ok(Self { client, routes })
    }

    /// Route every server that has `chat.webhook` set.
    pub fn from_config(config: &PalwatchConfig) -> reqwest::Result<Self> {
        Self::new(routes(config))
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    async fn post(&self, url: &str, payload: &WebhookPayload) -> MonitorResult<()> {
        self.client
            .post(url)
            .json(payload)
            .send()
            .await
            .and_then(|resp| resp.error_for_status())
            .map_err(|e| MonitorError::Sink(format!("webhook: {}", e.without_url())))?;
        Ok(())
    }
}

fn routes(config: &PalwatchConfig) -> HashMap<String, String> {
    config
        .servers
        .iter()
        .filter_map(|s| {
            let url = s.chat.webhook.as_ref()?.trim();
            (!url.is_empty()).then(|| (s.name.clone(), url.to_string()))
        })
        .collect()
}

impl EventSink for WebhookSink {
    fn deliver(&self, event: MonitorEvent) -> BoxFuture<'_, MonitorResult<()>> {
        Box::pin(async move {
            let MonitorEvent::Chat(msg) = &event else {
                return Ok(());
            };
            let Some(url) = self.routes.get(&msg.server) else {
                return Ok(());
            };
            self.post(url, &WebhookPayload::from(msg)).await?;
            debug!(server = %msg.server, speaker = %msg.speaker, "chat relayed");
            Ok(())
        })
    }
}
