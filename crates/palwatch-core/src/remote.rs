//! Capability traits for the two remote channels every worker talks to.
//!
//! Both are object-safe (boxed futures) so workers can hold them as
//! `Arc<dyn HealthApi>` / `Box<dyn RemoteFs>` and tests can inject
//! in-memory fakes.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::config::ServerTarget;
use crate::error::RemoteResult;
use crate::types::{PlayerList, RemoteEntry, ServerInfo, ServerMetrics};

/// Boxed, sendable future used by the remote traits.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// The game server's password-protected REST control API.
pub trait HealthApi: Send + Sync {
    fn info(&self) -> BoxFuture<'_, RemoteResult<ServerInfo>>;

    fn metrics(&self) -> BoxFuture<'_, RemoteResult<ServerMetrics>>;

    fn players(&self) -> BoxFuture<'_, RemoteResult<PlayerList>>;

    /// Broadcast a message to everyone in game.
    fn announce<'a>(&'a self, message: &'a str) -> BoxFuture<'a, RemoteResult<()>>;

    /// Schedule a server shutdown after `delay_secs`, showing `message`.
    fn shutdown<'a>(&'a self, delay_secs: u32, message: &'a str)
    -> BoxFuture<'a, RemoteResult<()>>;

    fn kick<'a>(&'a self, user_id: &'a str, reason: &'a str) -> BoxFuture<'a, RemoteResult<()>>;
}

/// An open session on the remote filesystem.
///
/// A session belongs to exactly one worker poll; it is never shared
/// between tasks.
pub trait RemoteFs: Send + Sync {
    fn list_dir<'a>(&'a self, path: &'a str) -> BoxFuture<'a, RemoteResult<Vec<RemoteEntry>>>;

    /// Modification time of `path`, seconds since the Unix epoch.
    fn stat_mtime<'a>(&'a self, path: &'a str) -> BoxFuture<'a, RemoteResult<u64>>;

    fn read_file<'a>(&'a self, path: &'a str) -> BoxFuture<'a, RemoteResult<Vec<u8>>>;

    /// Close the session. Dropping without closing is allowed.
    fn close(self: Box<Self>) -> BoxFuture<'static, ()>;
}

/// Opens fresh remote clients for a server.
pub trait RemoteConnector: Send + Sync {
    fn health_api(&self, target: &ServerTarget) -> Arc<dyn HealthApi>;

    fn open_fs<'a>(&'a self, target: &'a ServerTarget)
    -> BoxFuture<'a, RemoteResult<Box<dyn RemoteFs>>>;
}
