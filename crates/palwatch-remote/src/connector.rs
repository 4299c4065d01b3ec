//! Connector that opens real network clients for a server.

use std::sync::Arc;
use std::time::Duration;

use palwatch_core::{BoxFuture, HealthApi, RemoteConnector, RemoteError, RemoteFs, RemoteResult, ServerTarget};

use crate::rest::{self, RestClient};
use crate::sftp::{self, SftpClient};

/// Opens a REST client and a fresh SFTP session per request.
#[derive(Debug, Clone)]
pub struct NetworkConnector {
    api_timeout: Duration,
    connect_timeout: Duration,
}

impl NetworkConnector {
    pub fn new() -> Self {
        Self {
            api_timeout: rest::DEFAULT_TIMEOUT,
            connect_timeout: sftp::CONNECT_TIMEOUT,
        }
    }

    pub fn with_api_timeout(mut self, timeout: Duration) -> Self {
        self.api_timeout = timeout;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

impl Default for NetworkConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl RemoteConnector for NetworkConnector {
    fn health_api(&self, target: &ServerTarget) -> Arc<dyn HealthApi> {
        Arc::new(RestClient::for_target(target).with_timeout(self.api_timeout))
    }

    fn open_fs<'a>(
        &'a self,
        target: &'a ServerTarget,
    ) -> BoxFuture<'a, RemoteResult<Box<dyn RemoteFs>>> {
        Box::pin(async move {
            let Some(config) = target.sftp.as_ref() else {
                return Err(RemoteError::Protocol(format!(
                    "{}: no [sftp] section configured",
                    target.name
                )));
            };
            let client =
                SftpClient::connect_with_timeout(&target.host, config, self.connect_timeout).await?;
            let fs: Box<dyn RemoteFs> = Box::new(client);
            Ok(fs)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use palwatch_core::PalwatchConfig;

    #[tokio::test]
    async fn missing_sftp_section_is_rejected() {
        let config = PalwatchConfig::from_toml(
            r#"
[[servers]]
name = "main"
host = "127.0.0.1"
api_password = "pw"
"#,
        )
        .unwrap();
        let connector = NetworkConnector::new();
        let err = connector.open_fs(&config.servers[0]).await.err().unwrap();
        assert_eq!(err.kind(), "protocol");
    }
}
