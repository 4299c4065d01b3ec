//! SFTP file access over SSH with password authentication.

use std::sync::Arc;
use std::time::Duration;

use russh::client;
use russh_sftp::client::SftpSession;
use russh_sftp::client::error::Error as SftpError;
use russh_sftp::protocol::StatusCode;
use tracing::debug;

use palwatch_core::{BoxFuture, RemoteEntry, RemoteError, RemoteFs, RemoteResult, SftpConfig};

/// Bound on opening a session: TCP connect, SSH handshake, authentication
/// and the `sftp` subsystem together.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Accepts whatever host key the server presents.
///
/// Game hosts rotate their keys with every reinstall and no known-hosts
/// store is kept.
struct AcceptAnyHostKey;

impl client::Handler for AcceptAnyHostKey {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &russh::keys::PublicKey,
    ) -> Result<bool, Self::Error> {
        Ok(true)
    }
}

/// An open SFTP session. One per poll.
pub struct SftpClient {
    host: String,
    session: client::Handle<AcceptAnyHostKey>,
    sftp: SftpSession,
}

impl SftpClient {
    /// Connect, authenticate and open the `sftp` subsystem.
    pub async fn connect(host: &str, config: &SftpConfig) -> RemoteResult<Self> {
        Self::connect_with_timeout(host, config, CONNECT_TIMEOUT).await
    }

    pub async fn connect_with_timeout(
        host: &str,
        config: &SftpConfig,
        timeout: Duration,
    ) -> RemoteResult<Self> {
        let addr = format!("{host}:{}", config.port);
        tokio::time::timeout(timeout, Self::open(host, addr.clone(), config))
            .await
            .map_err(|_| {
                RemoteError::Transport(format!("{addr}: session not ready after {timeout:?}"))
            })?
    }

    async fn open(host: &str, addr: String, config: &SftpConfig) -> RemoteResult<Self> {
        let ssh_config = Arc::new(client::Config::default());
        let mut session =
            client::connect(ssh_config, (host.to_string(), config.port), AcceptAnyHostKey)
                .await
                .map_err(|e| RemoteError::Transport(format!("{addr}: {e}")))?;

        let auth = session
            .authenticate_password(config.username.clone(), config.password.expose())
            .await
            .map_err(|e| RemoteError::Transport(format!("{addr}: authentication: {e}")))?;
        if !auth.success() {
            return Err(RemoteError::Auth(format!(
                "{addr}: password rejected for {}",
                config.username
            )));
        }

        let channel = session
            .channel_open_session()
            .await
            .map_err(|e| RemoteError::Transport(format!("{addr}: open channel: {e}")))?;
        channel
            .request_subsystem(true, "sftp")
            .await
            .map_err(|e| RemoteError::Protocol(format!("{addr}: sftp subsystem: {e}")))?;
        let sftp = SftpSession::new(channel.into_stream())
            .await
            .map_err(|e| RemoteError::Protocol(format!("{addr}: sftp init: {e}")))?;

        debug!(%addr, user = %config.username, "sftp session opened");
        Ok(Self {
            host: addr,
            session,
            sftp,
        })
    }

    fn error(&self, path: &str, e: SftpError) -> RemoteError {
        match e {
            SftpError::Status(status) => status_error(&self.host, path, status.status_code),
            other => RemoteError::Transport(format!("{}:{path}: {other}", self.host)),
        }
    }
}

/// Map an SFTP status reply onto the error taxonomy.
pub fn status_error(host: &str, path: &str, code: StatusCode) -> RemoteError {
    match code {
        StatusCode::NoSuchFile => RemoteError::NotFound(format!("{host}:{path}")),
        StatusCode::PermissionDenied => {
            RemoteError::Auth(format!("{host}:{path}: permission denied"))
        }
        other => RemoteError::Protocol(format!("{host}:{path}: {other:?}")),
    }
}

impl RemoteFs for SftpClient {
    fn list_dir<'a>(&'a self, path: &'a str) -> BoxFuture<'a, RemoteResult<Vec<RemoteEntry>>> {
        Box::pin(async move {
            let dir = self
                .sftp
                .read_dir(path)
                .await
                .map_err(|e| self.error(path, e))?;
            let entries = dir
                .filter(|e| e.file_name() != "." && e.file_name() != "..")
                .map(|e| {
                    let meta = e.metadata();
                    RemoteEntry {
                        name: e.file_name(),
                        mtime: meta.mtime.map(u64::from).unwrap_or(0),
                        is_dir: meta.is_dir(),
                    }
                })
                .collect();
            Ok(entries)
        })
    }

    fn stat_mtime<'a>(&'a self, path: &'a str) -> BoxFuture<'a, RemoteResult<u64>> {
        Box::pin(async move {
            let meta = self
                .sftp
                .metadata(path)
                .await
                .map_err(|e| self.error(path, e))?;
            meta.mtime.map(u64::from).ok_or_else(|| {
                RemoteError::Protocol(format!("{}:{path}: server sent no mtime", self.host))
            })
        })
    }

    fn read_file<'a>(&'a self, path: &'a str) -> BoxFuture<'a, RemoteResult<Vec<u8>>> {
        Box::pin(async move { self.sftp.read(path).await.map_err(|e| self.error(path, e)) })
    }

    fn close(self: Box<Self>) -> BoxFuture<'static, ()> {
        Box::pin(async move {
            if let Err(e) = self.sftp.close().await {
                debug!(host = %self.host, error = %e, "sftp close failed");
            }
            let _ = self
                .session
                .disconnect(russh::Disconnect::ByApplication, "", "en")
                .await;
        })
    }
}
