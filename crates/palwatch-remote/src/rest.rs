//! REST control API client.
//!
//! One short-lived HTTP/1.1 connection per request, authenticated with
//! basic auth. Connect failures and timeouts become `Transport`, rejected
//! credentials `Auth`, and any other non-2xx status or undecodable body
//! `Protocol`.

use std::time::Duration;

use base64::Engine;
use bytes::Bytes;
use http::{Method, StatusCode};
use http_body_util::{BodyExt, Full};
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::debug;

use palwatch_core::{
    BoxFuture, HealthApi, PlayerList, RemoteError, RemoteResult, ServerInfo, ServerMetrics,
    ServerTarget,
};

/// Default bound on one request, connect included.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Client for one server's `/v1/api` endpoints.
#[derive(Clone)]
pub struct RestClient {
    /// `host:port`.
    authority: String,
    authorization: String,
    timeout: Duration,
}

impl std::fmt::Debug for RestClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestClient")
            .field("authority", &self.authority)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl RestClient {
    pub fn new(host: &str, port: u16, user: &str, password: &str) -> Self {
        Self {
            authority: format!("{host}:{port}"),
            authorization: basic_auth(user, password),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn for_target(target: &ServerTarget) -> Self {
        Self::new(
            &target.host,
            target.api_port,
            &target.api_user,
            target.api_password.expose(),
        )
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> RemoteResult<T> {
        let body = self.request(Method::GET, path, None).await?;
        decode(path, &body)
    }

    async fn post(&self, path: &str, payload: serde_json::Value) -> RemoteResult<()> {
        let body = serde_json::to_vec(&payload)
            .map_err(|e| RemoteError::Protocol(format!("{path}: encode body: {e}")))?;
        self.request(Method::POST, path, Some(body)).await?;
        Ok(())
    }

    async fn request(&self, method: Method, path: &str, body: Option<Vec<u8>>) -> RemoteResult<Bytes> {
        match tokio::time::timeout(self.timeout, self.send(method, path, body)).await {
            Ok(result) => result,
            Err(_) => Err(RemoteError::Transport(format!(
                "{}{path}: timed out after {:?}",
                self.authority, self.timeout
            ))),
        }
    }

    async fn send(&self, method: Method, path: &str, body: Option<Vec<u8>>) -> RemoteResult<Bytes> {
        let target = format!("{}{path}", self.authority);
        let stream = tokio::net::TcpStream::connect(&self.authority)
            .await
            .map_err(|e| RemoteError::Transport(format!("{target}: connect: {e}")))?;

        let io = hyper_util::rt::TokioIo::new(stream);
        let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
            .await
            .map_err(|e| RemoteError::Transport(format!("{target}: handshake: {e}")))?;

        tokio::spawn(async move {
            let _ = conn.await;
        });

        let mut builder = http::Request::builder()
            .method(method.clone())
            .uri(path)
            .header("host", &self.authority)
            .header("authorization", &self.authorization)
            .header("accept", "application/json")
            .header("user-agent", "palwatch/0.1");
        if body.is_some() {
            builder = builder.header("content-type", "application/json");
        }
        let req = builder
            .body(Full::new(Bytes::from(body.unwrap_or_default())))
            .map_err(|e| RemoteError::Protocol(format!("{target}: build request: {e}")))?;

        let resp = sender
            .send_request(req)
            .await
            .map_err(|e| RemoteError::Transport(format!("{target}: {e}")))?;

        let status = resp.status();
        debug!(%method, %target, %status, "api response");
        check_status(&target, status)?;

        let body = resp
            .into_body()
            .collect()
            .await
            .map_err(|e| RemoteError::Transport(format!("{target}: read body: {e}")))?;
        Ok(body.to_bytes())
    }
}

/// `Basic` authorization header value.
pub fn basic_auth(user: &str, password: &str) -> String {
    let token = base64::engine::general_purpose::STANDARD.encode(format!("{user}:{password}"));
    format!("Basic {token}")
}

/// Map a response status onto the error taxonomy.
pub fn check_status(target: &str, status: StatusCode) -> RemoteResult<()> {
    match status {
        s if s.is_success() => Ok(()),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            Err(RemoteError::Auth(format!("{target}: {status}")))
        }
        _ => Err(RemoteError::Protocol(format!("{target}: unexpected status {status}"))),
    }
}

fn decode<T: DeserializeOwned>(path: &str, body: &[u8]) -> RemoteResult<T> {
    serde_json::from_slice(body).map_err(|e| RemoteError::Protocol(format!("{path}: {e}")))
}

impl HealthApi for RestClient {
    fn info(&self) -> BoxFuture<'_, RemoteResult<ServerInfo>> {
        Box::pin(self.get("/v1/api/info"))
    }

    fn metrics(&self) -> BoxFuture<'_, RemoteResult<ServerMetrics>> {
        Box::pin(self.get("/v1/api/metrics"))
    }

    fn players(&self) -> BoxFuture<'_, RemoteResult<PlayerList>> {
        Box::pin(self.get("/v1/api/players"))
    }

    fn announce<'a>(&'a self, message: &'a str) -> BoxFuture<'a, RemoteResult<()>> {
        Box::pin(self.post("/v1/api/announce", json!({ "message": message })))
    }

    fn shutdown<'a>(&'a self, delay_secs: u32, message: &'a str) -> BoxFuture<'a, RemoteResult<()>> {
        Box::pin(self.post(
            "/v1/api/shutdown",
            json!({ "waittime": delay_secs, "message": message }),
        ))
    }

    fn kick<'a>(&'a self, user_id: &'a str, reason: &'a str) -> BoxFuture<'a, RemoteResult<()>> {
        Box::pin(self.post(
            "/v1/api/kick",
            json!({ "userid": user_id, "message": reason }),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;

    /// Serve one canned response and hand back the raw request.
    async fn serve_once(status: &'static str, body: &'static str) -> (u16, oneshot::Receiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (tx, rx) = oneshot::channel();

        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = Vec::new();
            let mut chunk = [0u8; 1024];
            loop {
                let n = stream.read(&mut chunk).await.unwrap();
                buf.extend_from_slice(&chunk[..n]);
                let text = String::from_utf8_lossy(&buf);
                if let Some(end) = text.find("\r\n\r\n") {
                    let len = text
                        .lines()
                        .find_map(|l| l.strip_prefix("content-length: "))
                        .and_then(|v| v.trim().parse::<usize>().ok())
                        .unwrap_or(0);
                    if buf.len() >= end + 4 + len || n == 0 {
                        break;
                    }
                }
                if n == 0 {
                    break;
                }
            }
            let response = format!(
                "HTTP/1.1 {status}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            stream.write_all(response.as_bytes()).await.unwrap();
            let _ = tx.send(String::from_utf8_lossy(&buf).into_owned());
        });

        (port, rx)
    }

    #[test]
    fn basic_auth_header() {
        assert_eq!(basic_auth("admin", "pw"), "Basic YWRtaW46cHc=");
    }

    #[test]
    fn status_mapping() {
        assert!(check_status("h", StatusCode::OK).is_ok());
        assert_eq!(check_status("h", StatusCode::UNAUTHORIZED).unwrap_err().kind(), "auth");
        assert_eq!(check_status("h", StatusCode::FORBIDDEN).unwrap_err().kind(), "auth");
        assert_eq!(
            check_status("h", StatusCode::INTERNAL_SERVER_ERROR).unwrap_err().kind(),
            "protocol"
        );
    }

    #[test]
    fn debug_hides_credentials() {
        let client = RestClient::new("10.0.0.5", 8212, "admin", "hunter2");
        let debug = format!("{client:?}");
        assert!(!debug.contains("hunter2"));
        assert!(!debug.contains(&basic_auth("admin", "hunter2")));
    }

    #[tokio::test]
    async fn fetches_and_decodes_metrics() {
        let (port, request) = serve_once(
            "200 OK",
            r#"{"serverfps":59.5,"currentplayernum":3,"serverframetime":16.8,"maxplayernum":32,"uptime":7200,"days":12}"#,
        )
        .await;

        let client = RestClient::new("127.0.0.1", port, "admin", "pw");
        let metrics = client.metrics().await.unwrap();
        assert_eq!(metrics.current_players, 3);
        assert_eq!(metrics.max_players, 32);
        assert_eq!(metrics.uptime_secs, 7200);

        let request = request.await.unwrap();
        assert!(request.starts_with("GET /v1/api/metrics HTTP/1.1"));
        assert!(request.contains("authorization: Basic YWRtaW46cHc="));
    }

    #[tokio::test]
    async fn shutdown_posts_wait_time_and_message() {
        let (port, request) = serve_once("200 OK", "").await;
        let client = RestClient::new("127.0.0.1", port, "admin", "pw");
        client.shutdown(30, "Save stalled!").await.unwrap();

        let request = request.await.unwrap();
        assert!(request.starts_with("POST /v1/api/shutdown HTTP/1.1"));
        let body = &request[request.find("\r\n\r\n").unwrap() + 4..];
        let json: serde_json::Value = serde_json::from_str(body).unwrap();
        assert_eq!(json["waittime"], 30);
        assert_eq!(json["message"], "Save stalled!");
    }

    #[tokio::test]
    async fn unauthorized_is_auth_error() {
        let (port, _request) = serve_once("401 Unauthorized", "").await;
        let client = RestClient::new("127.0.0.1", port, "admin", "wrong");
        let err = client.info().await.unwrap_err();
        assert_eq!(err.kind(), "auth");
    }

    #[tokio::test]
    async fn bad_json_is_protocol_error() {
        let (port, _request) = serve_once("200 OK", "not json").await;
        let client = RestClient::new("127.0.0.1", port, "admin", "pw");
        let err = client.players().await.unwrap_err();
        assert_eq!(err.kind(), "protocol");
    }

    #[tokio::test]
    async fn closed_port_is_transport_error() {
        let client = RestClient::new("127.0.0.1", 1, "admin", "pw")
            .with_timeout(Duration::from_millis(500));
        let err = client.info().await.unwrap_err();
        assert_eq!(err.kind(), "transport");
    }
}
