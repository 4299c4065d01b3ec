//! palwatch-remote: network implementations of the palwatch remote traits.
//!
//! - **rest**: `HealthApi` over the game server's HTTP control API (hyper)
//! - **sftp**: `RemoteFs` over SSH/SFTP with password auth (russh)
//! - **connector**: `RemoteConnector` that opens both per poll
//! - **webhook**: `EventSink` relaying chat to per-server webhooks (reqwest)

pub mod connector;
pub mod rest;
pub mod sftp;
pub mod webhook;

pub use connector::NetworkConnector;
pub use rest::RestClient;
pub use sftp::SftpClient;
pub use webhook::{WebhookPayload, WebhookSink};
