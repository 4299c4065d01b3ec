//! palwatch-monitor: background workers that watch remote game servers.
//!
//! Relays in-game chat from the server's rotating log directory, restarts
//! servers whose world save has stopped advancing, and reports server
//! status through a cache shared by every worker.
//!
//! # Architecture
//!
//! ```text
//! WorkerSupervisor
//!   ├── Per-server shutdown signal
//!   ├── chat task   ── LogTailer (TailState) → ChatFilter → Chat/Link events
//!   ├── save task   ── StallDetector (StallState) → HealthApi::shutdown → Restart event
//!   ├── status task ── ResultCache (shared, single-flight) → Status event
//!   └── EventSink (channel, log, webhook, fan-out)
//! ```
//!
//! Every poll opens its own remote session through a [`RemoteConnector`]
//! and closes it before the next poll. Errors are logged with their kind
//! and never end a task.
//!
//! [`RemoteConnector`]: palwatch_core::RemoteConnector

pub mod cache;
pub mod chat;
pub mod error;
pub mod events;
#[cfg(any(test, feature = "test-util"))]
pub mod memory;
pub mod stall;
pub mod supervisor;
pub mod tailer;

pub use cache::{CacheEntry, ResultCache, SnapshotCache, fetch_snapshot};
pub use chat::{ChatBatch, ChatFilter, ChatMessage, LinkRequest};
pub use error::{MonitorError, MonitorResult};
pub use events::{
    ChannelSink, EventSink, FanoutSink, LinkEvent, LogSink, MonitorEvent, RelayMessage,
    RestartNotice, StatusReport,
};
pub use stall::{EscalationReason, StallDetector, StallPhase, StallSettings, StallState, StallVerdict};
pub use supervisor::{Clock, Concern, WorkerHandle, WorkerSupervisor, sample_mtime};
pub use tailer::{FileId, LogTailer, TailState};
