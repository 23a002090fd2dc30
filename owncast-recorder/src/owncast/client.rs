//! Minimal Owncast API client: ping, status and the HLS stream URL.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};
use tracing::{debug, warn};

use super::retry::RetryPolicy;
use crate::monitor::StatusSource;
use crate::{Error, Result};

const API_PATH: &str = "/api";
const PING_PATH: &str = "/ping";
const STATUS_PATH: &str = "/status";
const STREAM_PATH: &str = "/hls/stream.m3u8";

/// Per-request timeout, so a hung server counts as a failed attempt.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Broadcast status as reported by `/api/status`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamStatus {
    #[serde(default, deserialize_with = "null_as_default")]
    pub online: bool,
    #[serde(
        default,
        rename = "streamTitle",
        deserialize_with = "null_as_default"
    )]
    pub title: String,
    #[serde(
        default,
        rename = "versionNumber",
        deserialize_with = "null_as_default"
    )]
    pub server_version: String,
}

impl StreamStatus {
    pub fn live(title: impl Into<String>) -> Self {
        Self {
            online: true,
            title: title.into(),
            server_version: String::new(),
        }
    }

    pub fn offline() -> Self {
        Self::default()
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Client for one Owncast server.
#[derive(Debug, Clone)]
pub struct OwncastClient {
    base_url: String,
    client: reqwest::Client,
    retry: RetryPolicy,
}

impl OwncastClient {
    pub fn new(base_url: impl Into<String>, retry: RetryPolicy) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("owncast-recorder/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self::with_client(base_url, client, retry))
    }

    pub fn with_client(base_url: impl Into<String>, client: reqwest::Client, retry: RetryPolicy) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
            retry,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// The HLS playlist ffmpeg records from.
    pub fn stream_url(&self) -> String {
        format!("{}{}", self.base_url, STREAM_PATH)
    }

    /// True when the server answers `/api/ping` with 200.
    pub async fn ping(&self) -> Result<bool> {
        let resp = self.get(PING_PATH).await?;
        Ok(resp.status() == reqwest::StatusCode::OK)
    }

    /// Fetch `/api/status`. A body that is not valid status JSON reads as offline.
    pub async fn status(&self) -> Result<(u16, StreamStatus)> {
        let resp = self.get(STATUS_PATH).await?;
        let code = resp.status().as_u16();
        let body = resp.bytes().await?;
        let status = serde_json::from_slice(&body).unwrap_or_else(|e| {
            warn!(code, "Unexpected status response, treating as offline: {}", e);
            StreamStatus::offline()
        });
        Ok((code, status))
    }

    async fn get(&self, path: &str) -> Result<reqwest::Response> {
        let url = format!("{}{}{}", self.base_url, API_PATH, path);
        let mut retries = 0u32;
        loop {
            match self.client.get(&url).send().await {
                Ok(resp) => return Ok(resp),
                Err(e) if e.is_builder() => return Err(e.into()),
                Err(e) if self.retry.should_retry(retries) => {
                    retries += 1;
                    let delay = self.retry.delay_for_retry(retries);
                    debug!(
                        url = %url,
                        retry = retries,
                        delay_ms = delay.as_millis() as u64,
                        "Request failed, retrying: {}",
                        e
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    return Err(Error::Connection {
                        url,
                        attempts: retries + 1,
                        message: e.to_string(),
                    });
                }
            }
        }
    }
}

#[async_trait]
impl StatusSource for OwncastClient {
    async fn status(&self) -> Result<StreamStatus> {
        OwncastClient::status(self).await.map(|(_, status)| status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve `body` with `code` to every request, returning the base URL.
    async fn serve(code: u16, body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let mut buf = [0u8; 2048];
                let _ = socket.read(&mut buf).await;
                let response = format!(
                    "HTTP/1.1 {code} X\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });
        format!("http://{addr}")
    }

    async fn refused_url() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        format!("http://{addr}")
    }

    fn fast_retry(retries: i32) -> RetryPolicy {
        RetryPolicy::from_retries(retries).with_backoff_factor(Duration::from_millis(1))
    }

    #[test]
    fn parses_status_json() {
        let status: StreamStatus = serde_json::from_str(
            r#"{"online":true,"streamTitle":"Show A","versionNumber":"0.1.3","viewerCount":4}"#,
        )
        .unwrap();
        assert!(status.online);
        assert_eq!(status.title, "Show A");
        assert_eq!(status.server_version, "0.1.3");
    }

    #[test]
    fn missing_or_null_fields_default() {
        let status: StreamStatus =
            serde_json::from_str(r#"{"online":false,"streamTitle":null}"#).unwrap();
        assert_eq!(status, StreamStatus::offline());
    }

    #[test]
    fn stream_url_ignores_trailing_slash() {
        let client = OwncastClient::new("https://oc.example.com/", RetryPolicy::default()).unwrap();
        assert_eq!(client.stream_url(), "https://oc.example.com/hls/stream.m3u8");
    }

    #[tokio::test]
    async fn fetches_status_and_ping() {
        let base = serve(200, r#"{"online":true,"streamTitle":"Show A","versionNumber":"0.2.0"}"#).await;
        let client = OwncastClient::new(base, fast_retry(0)).unwrap();

        assert!(client.ping().await.unwrap());
        let (code, status) = client.status().await.unwrap();
        assert_eq!(code, 200);
        assert_eq!(status, StreamStatus {
            online: true,
            title: "Show A".into(),
            server_version: "0.2.0".into(),
        });
    }

    #[tokio::test]
    async fn garbage_body_reads_as_offline() {
        let base = serve(502, "<html>bad gateway</html>").await;
        let client = OwncastClient::new(base, fast_retry(0)).unwrap();

        assert!(!client.ping().await.unwrap());
        let (code, status) = client.status().await.unwrap();
        assert_eq!(code, 502);
        assert!(!status.online);
    }

    #[tokio::test]
    async fn exhausted_retries_raise_connection_error() {
        let client = OwncastClient::new(refused_url().await, fast_retry(2)).unwrap();

        match client.status().await {
            Err(Error::Connection { attempts, .. }) => assert_eq!(attempts, 3),
            other => panic!("expected connection error, got {:?}", other.map(|(c, _)| c)),
        }
    }
}
