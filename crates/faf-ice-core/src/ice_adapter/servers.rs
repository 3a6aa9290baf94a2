//! ICE server (STUN/TURN) credentials from the FAF API.
//!
//! One poller fetches `GET {api}/ice/session/game/{gameId}` once and hands the
//! `servers` list to the adapter. There is no retry: if the adapter is not
//! connected by then the update is dropped.

use super::client::IceAdapter;
use crate::config::{NetworkConfig, Settings};
use crate::error::{IceError, Result};
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use url::Url;

/// Where and how to reach the REST API.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiConfig {
    pub base_url: Url,
    pub access_token: Option<String>,
}

impl ApiConfig {
    pub fn new(base_url: &str, access_token: Option<String>) -> Result<Self> {
        // Without a trailing slash Url::join would replace the last segment.
        let normalized = if base_url.ends_with('/') {
            base_url.to_string()
        } else {
            format!("{}/", base_url)
        };
        let base_url = Url::parse(&normalized).map_err(|e| IceError::Config {
            message: format!("invalid API base URL {:?}: {}", base_url, e),
        })?;
        Ok(Self {
            base_url,
            access_token,
        })
    }

    pub fn from_settings(settings: &Settings) -> Result<Self> {
        Self::new(&settings.api_base_url, settings.api_access_token.clone())
    }

    pub fn ice_session_url(&self, game_id: u32) -> Result<Url> {
        self.base_url
            .join(&format!("{}/{}", NetworkConfig::ICE_SESSION_PATH, game_id))
            .map_err(|e| IceError::Config {
                message: format!("cannot build ICE session URL: {}", e),
            })
    }
}

#[derive(Debug, Deserialize)]
struct IceSessionResponse {
    servers: Vec<Value>,
}

/// What a poll did with the fetched servers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    Forwarded(usize),
    AdapterDisconnected,
}

/// Fetches ICE servers for one game.
#[derive(Debug, Clone)]
pub struct IceServersPoller {
    client: Client,
    api: ApiConfig,
    game_id: u32,
}

impl IceServersPoller {
    pub fn new(api: ApiConfig, game_id: u32) -> Result<Self> {
        let client = Client::builder()
            .timeout(NetworkConfig::REQUEST_TIMEOUT)
            .user_agent(NetworkConfig::USER_AGENT)
            .build()
            .map_err(|e| IceError::Network {
                message: format!("Failed to create HTTP client: {}", e),
                source: Some(e),
            })?;
        Ok(Self {
            client,
            api,
            game_id,
        })
    }

    pub fn game_id(&self) -> u32 {
        self.game_id
    }

    /// Fetch the server list.
    pub async fn fetch(&self) -> Result<Vec<Value>> {
        let url = self.api.ice_session_url(self.game_id)?;
        debug!("Fetching ICE servers from {}", url);

        let mut request = self.client.get(url.clone());
        if let Some(token) = &self.api.access_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| IceError::Network {
            message: format!("GET {} failed: {}", url, e),
            source: Some(e),
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(IceError::Network {
                message: format!("GET {} returned {}", url, status),
                source: None,
            });
        }

        let body: IceSessionResponse = response.json().await.map_err(|e| IceError::Network {
            message: format!("invalid ICE session response from {}: {}", url, e),
            source: Some(e),
        })?;
        Ok(body.servers)
    }

    /// Fetch once and forward to `adapter` if it is connected.
    pub async fn poll_once(&self, adapter: &dyn IceAdapter) -> Result<PollOutcome> {
        let servers = self.fetch().await?;

        if !adapter.is_connected() {
            warn!(
                "ICE adapter not connected, dropping {} ICE servers for game {}",
                servers.len(),
                self.game_id
            );
            return Ok(PollOutcome::AdapterDisconnected);
        }

        let count = servers.len();
        adapter.set_ice_servers(servers)?;
        info!("Forwarded {} ICE servers for game {}", count, self.game_id);
        Ok(PollOutcome::Forwarded(count))
    }

    /// Run [`poll_once`](Self::poll_once) in the background.
    pub fn spawn(self, adapter: Arc<dyn IceAdapter>) -> JoinHandle<()> {
        tokio::spawn(async move {
            if let Err(e) = self.poll_once(adapter.as_ref()).await {
                error!("Failed to update ICE servers for game {}: {}", self.game_id, e);
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use crate::ice_adapter::client::IceStatus;
    use serde_json::json;
    use std::sync::Mutex;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[derive(Default)]
    struct RecordingAdapter {
        connected: bool,
        servers: Mutex<Vec<Vec<Value>>>,
    }

    #[async_trait]
    impl IceAdapter for RecordingAdapter {
        fn is_connected(&self) -> bool {
            self.connected
        }
        async fn status(&self) -> Result<IceStatus> {
            Ok(IceStatus::default())
        }
        fn set_ice_servers(&self, servers: Vec<Value>) -> Result<()> {
            self.servers.lock().unwrap().push(servers);
            Ok(())
        }
        fn join_game(&self, _: &str, _: u32) -> Result<()> {
            Ok(())
        }
        fn host_game(&self, _: &str) -> Result<()> {
            Ok(())
        }
        fn connect_to_peer(&self, _: &str, _: u32, _: bool) -> Result<()> {
            Ok(())
        }
        fn disconnect_from_peer(&self, _: u32) -> Result<()> {
            Ok(())
        }
        fn ice_msg(&self, _: u32, _: Value) -> Result<()> {
            Ok(())
        }
        fn send_to_gpgnet(&self, _: &str, _: Vec<Value>) -> Result<()> {
            Ok(())
        }
        fn quit(&self) -> Result<()> {
            Ok(())
        }
    }

    /// Serves one HTTP response and returns the request head it received.
    async fn serve_once(status_line: &'static str, body: String) -> (u16, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut head = Vec::new();
            let mut buf = [0u8; 1024];
            while !head.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = stream.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                head.extend_from_slice(&buf[..n]);
            }
            let response = format!(
                "{}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status_line,
                body.len(),
                body
            );
            stream.write_all(response.as_bytes()).await.unwrap();
            String::from_utf8_lossy(&head).into_owned()
        });
        (port, handle)
    }

    #[test]
    fn test_session_url_keeps_base_path() {
        let api = ApiConfig::new("https://api.example.com/v2", None).unwrap();
        assert_eq!(
            api.ice_session_url(42).unwrap().as_str(),
            "https://api.example.com/v2/ice/session/game/42"
        );
    }

    #[test]
    fn test_invalid_base_url() {
        assert!(matches!(
            ApiConfig::new("not a url", None),
            Err(IceError::Config { .. })
        ));
    }

    #[tokio::test]
    async fn test_poll_forwards_servers() {
        let body = json!({"servers": [
            {"urls": ["stun:stun.example.com"]},
            {"urls": ["turn:turn.example.com"], "username": "u", "credential": "c"}
        ]});
        let (port, server) = serve_once("HTTP/1.1 200 OK", body.to_string()).await;

        let api =
            ApiConfig::new(&format!("http://127.0.0.1:{}", port), Some("secret".into())).unwrap();
        let poller = IceServersPoller::new(api, 1337).unwrap();
        let adapter = RecordingAdapter {
            connected: true,
            ..Default::default()
        };

        let outcome = poller.poll_once(&adapter).await.unwrap();
        assert_eq!(outcome, PollOutcome::Forwarded(2));
        assert_eq!(adapter.servers.lock().unwrap()[0].len(), 2);

        let head = server.await.unwrap();
        assert!(head.starts_with("GET /ice/session/game/1337 "));
        assert!(head.to_lowercase().contains("authorization: bearer secret"));
    }

    #[tokio::test]
    async fn test_poll_drops_when_adapter_disconnected() {
        let body = json!({"servers": []}).to_string();
        let (port, _server) = serve_once("HTTP/1.1 200 OK", body).await;
        let api = ApiConfig::new(&format!("http://127.0.0.1:{}", port), None).unwrap();
        let poller = IceServersPoller::new(api, 1).unwrap();
        let adapter = RecordingAdapter::default();

        let outcome = poller.poll_once(&adapter).await.unwrap();
        assert_eq!(outcome, PollOutcome::AdapterDisconnected);
        assert!(adapter.servers.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_http_error_status() {
        let (port, _server) =
            serve_once("HTTP/1.1 503 Service Unavailable", "{}".to_string()).await;
        let api = ApiConfig::new(&format!("http://127.0.0.1:{}", port), None).unwrap();
        let poller = IceServersPoller::new(api, 1).unwrap();

        match poller.fetch().await {
            Err(IceError::Network { message, .. }) => assert!(message.contains("503")),
            other => panic!("Expected Network error, got: {:?}", other),
        }
    }
}
