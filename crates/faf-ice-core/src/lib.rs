//! FAF ICE Core - headless game connectivity for the FAF client.
//!
//! This crate owns everything between the lobby server and a locally running
//! game: the external ICE adapter process and its JSON-RPC channel, the GPGNet
//! relay, the game session state machine, replay capture and the lobby
//! connection with its reconnect and keepalive rules.
//!
//! # Example
//!
//! ```rust,ignore
//! use faf_ice_core::{GameSession, LobbyConnection, ProcessAdapterLauncher, Settings};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> faf_ice_core::Result<()> {
//!     let settings = Settings::load("settings.json")?;
//!     let (lobby, _inbound, _task) =
//!         LobbyConnection::start(settings.lobby_endpoint(), settings.keepalive_interval());
//!
//!     let (events_tx, _events) = tokio::sync::mpsc::unbounded_channel();
//!     let launcher = Arc::new(ProcessAdapterLauncher::new(settings.clone()));
//!     let (mut session, _adapter_events) =
//!         GameSession::new(42, "player", Arc::new(lobby), launcher, None, events_tx);
//!
//!     let relay_port = session.start_ice_adapter(1337).await?;
//!     println!("Point the game at 127.0.0.1:{}", relay_port);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod ice_adapter;
pub mod jsonrpc;
pub mod lobby;
pub mod platform;
pub mod session;

pub use config::{IceConfig, LobbyConfig, NetworkConfig, ReplayConfig, Settings};
pub use error::{IceError, Result};
pub use ice_adapter::{
    AdapterEvent, AdapterExit, AdapterHandle, AdapterLauncher, AdapterProcess, AdapterRequest,
    ApiConfig, IceAdapter, IceAdapterClient, IceAdapterLaunch, IceAdapterProcess,
    IceServersPoller, IceStatus, ProcessAdapterLauncher, ShutdownOutcome,
};
pub use jsonrpc::{ConnectOptions, JsonRpcClient, MethodRegistry};
pub use lobby::{
    Dispatcher, KeepaliveWatchdog, LobbyConnection, LobbyHandle, LobbyLink, LobbyState,
    ReconnectDecision, ReconnectPolicy,
};
pub use session::{
    CapturedReplay, GameLaunch, GameProcess, GameSession, GameSessionState, HostedGame,
    IceMessageCache, RelayCommand, RelayMessage, ReplayCapture, ReplayTarget, SessionEvent,
};
