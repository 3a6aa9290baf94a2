//! Centralized configuration for the connectivity core.
//!
//! Timing constants live on unit structs grouped by component. User-tunable
//! values live in [`Settings`], which is loaded from a JSON file.

use crate::error::{IceError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// ICE adapter process and RPC channel timing.
pub struct IceConfig;

impl IceConfig {
    pub const RPC_HOST: &'static str = "127.0.0.1";
    pub const RPC_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
    pub const RPC_CONNECT_RETRY_DELAY: Duration = Duration::from_millis(200);
    pub const RPC_CONNECT_ATTEMPTS: u32 = 25;

    /// Grace period of each shutdown tier (wait, then terminate and wait, then kill).
    pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

    /// Upper bound for the adapter to report its GPGNet relay port.
    pub const RELAY_PORT_TIMEOUT: Duration = Duration::from_secs(30);
    pub const STATUS_POLL_INTERVAL: Duration = Duration::from_millis(250);

    pub const LOG_DIR_ENV: &'static str = "LOG_DIR";
    pub const GPGNET_HOST: &'static str = "127.0.0.1";
}

/// Lobby connection reconnect and keepalive timing.
pub struct LobbyConfig;

impl LobbyConfig {
    /// Attempts that reconnect without any delay.
    pub const IMMEDIATE_RECONNECT_ATTEMPTS: u32 = 3;
    /// Per-attempt delay once immediate reconnects are exhausted.
    pub const RECONNECT_STEP: Duration = Duration::from_secs(10);
    pub const DEFAULT_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
    pub const MAX_LINE_LENGTH: usize = 1024 * 1024;
}

/// Replay stream capture.
pub struct ReplayConfig;

impl ReplayConfig {
    pub const CHUNK_SIZE: usize = 64 * 1024;
    /// How long to wait for the replay stream to end once the game exited.
    pub const FINISH_TIMEOUT: Duration = Duration::from_secs(10);
}

/// REST API access.
pub struct NetworkConfig;

impl NetworkConfig {
    pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);
    pub const USER_AGENT: &'static str = concat!("faf-ice-core/", env!("CARGO_PKG_VERSION"));
    pub const ICE_SESSION_PATH: &'static str = "ice/session/game";
}

/// User-tunable settings.
///
/// Every field has a default so partial settings files are accepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub lobby_host: String,
    pub lobby_port: u16,
    pub api_base_url: String,
    /// Bearer token sent to the REST API.
    pub api_access_token: Option<String>,
    pub ice_adapter_path: PathBuf,
    /// Free-form arguments appended to the adapter command line.
    pub ice_adapter_args: Vec<String>,
    pub ice_info_window: bool,
    pub ice_ui_delay_secs: u64,
    pub log_dir: PathBuf,
    pub keepalive_interval_secs: u64,
    pub rpc_connect_attempts: u32,
    /// Capture the game's replay stream.
    pub replay_capture: bool,
    pub replay_dir: PathBuf,
    /// `host:port` of the live replay server.
    pub replay_relay_endpoint: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            lobby_host: "lobby.faforever.com".to_string(),
            lobby_port: 8002,
            api_base_url: "https://api.faforever.com".to_string(),
            api_access_token: None,
            ice_adapter_path: PathBuf::from("faf-ice-adapter"),
            ice_adapter_args: Vec::new(),
            ice_info_window: false,
            ice_ui_delay_secs: 10,
            log_dir: default_log_dir(),
            keepalive_interval_secs: LobbyConfig::DEFAULT_KEEPALIVE_INTERVAL.as_secs(),
            rpc_connect_attempts: IceConfig::RPC_CONNECT_ATTEMPTS,
            replay_capture: true,
            replay_dir: default_data_dir().join("replays"),
            replay_relay_endpoint: None,
        }
    }
}

impl Settings {
    /// Load settings from a JSON file, falling back to defaults if it does not exist.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            debug!("Settings file {} not found, using defaults", path.display());
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path).map_err(|e| IceError::io_with_path(e, path))?;
        serde_json::from_str(&raw).map_err(|e| IceError::Config {
            message: format!("invalid settings file {}: {}", path.display(), e),
        })
    }

    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_secs(self.keepalive_interval_secs)
    }

    pub fn lobby_endpoint(&self) -> String {
        format!("{}:{}", self.lobby_host, self.lobby_port)
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("FAForever")
}

fn default_log_dir() -> PathBuf {
    default_data_dir().join("logs")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_settings_file_uses_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let settings = Settings::load(temp_dir.path().join("settings.json")).unwrap();
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn test_partial_settings_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("settings.json");
        std::fs::write(&path, r#"{"lobby_port": 9002, "ice_info_window": true}"#).unwrap();

        let settings = Settings::load(&path).unwrap();
        assert_eq!(settings.lobby_port, 9002);
        assert!(settings.ice_info_window);
        assert_eq!(settings.lobby_host, "lobby.faforever.com");
    }

    #[test]
    fn test_invalid_settings_file_is_config_error() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("settings.json");
        std::fs::write(&path, "not json").unwrap();

        match Settings::load(&path) {
            Err(IceError::Config { message }) => assert!(message.contains("settings.json")),
            other => panic!("Expected Config error, got: {:?}", other),
        }
    }

    #[test]
    fn test_replay_settings() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"replay_capture": false, "replay_relay_endpoint": "lobby.faforever.com:15000"}"#,
        )
        .unwrap();

        let settings = Settings::load(&path).unwrap();
        assert!(!settings.replay_capture);
        assert_eq!(
            settings.replay_relay_endpoint.as_deref(),
            Some("lobby.faforever.com:15000")
        );
        assert!(settings.replay_dir.ends_with("replays"));
        assert!(Settings::default().replay_capture);
    }

    #[test]
    fn test_timeouts_are_reasonable() {
        assert!(IceConfig::RELAY_PORT_TIMEOUT > IceConfig::STATUS_POLL_INTERVAL);
        assert!(LobbyConfig::RECONNECT_STEP > Duration::ZERO);
    }
}
