//! Events produced by the workers and the sinks that consume them.

use std::sync::Arc;

use palwatch_core::{BoxFuture, ServerSnapshot};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::chat::{ChatMessage, LinkRequest};
use crate::error::{MonitorError, MonitorResult};
use crate::stall::EscalationReason;

/// A chat line to relay, tagged with the server it came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RelayMessage {
    pub server: String,
    pub guild_id: u64,
    pub speaker: String,
    pub text: String,
}

impl RelayMessage {
    pub fn new(server: &str, guild_id: u64, msg: ChatMessage) -> Self {
        Self {
            server: server.to_string(),
            guild_id,
            speaker: msg.speaker,
            text: msg.text,
        }
    }

    /// Display name used by relays: `Speaker (server)`.
    pub fn display_name(&self) -> String {
        format!("{} ({})", self.speaker, self.server)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LinkEvent {
    pub server: String,
    pub guild_id: u64,
    #[serde(flatten)]
    pub request: LinkRequest,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub server: String,
    pub guild_id: u64,
    pub snapshot: Arc<ServerSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RestartNotice {
    pub server: String,
    pub guild_id: u64,
    pub reason: &'static str,
    pub delay_secs: u32,
}

impl RestartNotice {
    pub fn new(server: &str, guild_id: u64, reason: EscalationReason, delay_secs: u32) -> Self {
        Self {
            server: server.to_string(),
            guild_id,
            reason: reason.as_str(),
            delay_secs,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MonitorEvent {
    Chat(RelayMessage),
    Link(LinkEvent),
    Status(StatusReport),
    Restart(RestartNotice),
}

impl MonitorEvent {
    pub fn server(&self) -> &str {
        match self {
            MonitorEvent::Chat(e) => &e.server,
            MonitorEvent::Link(e) => &e.server,
            MonitorEvent::Status(e) => &e.server,
            MonitorEvent::Restart(e) => &e.server,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            MonitorEvent::Chat(_) => "chat",
            MonitorEvent::Link(_) => "link",
            MonitorEvent::Status(_) => "status",
            MonitorEvent::Restart(_) => "restart",
        }
    }
}

/// Receives worker events.
///
/// Delivery failures are logged by the worker and never stop it.
pub trait EventSink: Send + Sync {
    fn deliver(&self, event: MonitorEvent) -> BoxFuture<'_, MonitorResult<()>>;
}

/// Forwards events into an mpsc channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<MonitorEvent>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<MonitorEvent>) -> Self {
        Self { tx }
    }

    /// A sink plus the receiving end, with room for `capacity` events.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<MonitorEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(tx), rx)
    }
}

impl EventSink for ChannelSink {
    fn deliver(&self, event: MonitorEvent) -> BoxFuture<'_, MonitorResult<()>> {
        Box::pin(async move {
            self.tx
                .send(event)
                .await
                .map_err(|_| MonitorError::Sink("event channel closed".into()))
        })
    }
}

/// Writes every event to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

impl EventSink for LogSink {
    fn deliver(&self, event: MonitorEvent) -> BoxFuture<'_, MonitorResult<()>> {
        Box::pin(async move {
            match &event {
                MonitorEvent::Chat(m) => {
                    info!(server = %m.server, speaker = %m.speaker, text = %m.text, "chat");
                }
                MonitorEvent::Link(l) => {
                    info!(
                        server = %l.server,
                        player = %l.request.player_name,
                        user_id = %l.request.user_id,
                        "link request"
                    );
                }
                MonitorEvent::Status(s) => {
                    let m = &s.snapshot.metrics;
                    info!(
                        server = %s.server,
                        players = m.current_players,
                        max_players = m.max_players,
                        fps = m.fps,
                        uptime_secs = m.uptime_secs,
                        "status"
                    );
                }
                MonitorEvent::Restart(r) => {
                    warn!(
                        server = %r.server,
                        reason = r.reason,
                        delay_secs = r.delay_secs,
                        "restart requested"
                    );
                }
            }
            Ok(())
        })
    }
}

/// Delivers each event to every inner sink.
///
/// All sinks are attempted; the first error is returned.
#[derive(Default)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl EventSink for FanoutSink {
    fn deliver(&self, event: MonitorEvent) -> BoxFuture<'_, MonitorResult<()>> {
        Box::pin(async move {
            let mut first_err = None;
            for sink in &self.sinks {
                if let Err(e) = sink.deliver(event.clone()).await {
                    first_err.get_or_insert(e);
                }
            }
            first_err.map_or(Ok(()), Err)
        })
    }
}
