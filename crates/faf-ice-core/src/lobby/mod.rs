//! Lobby server connection: reconnect policy, keepalive and message routing.

pub mod connection;
pub mod dispatcher;
pub mod keepalive;
pub mod line_reader;
pub mod reconnect;

pub use connection::{LobbyConnection, LobbyHandle, LobbyState};
pub use dispatcher::Dispatcher;
pub use keepalive::{KeepaliveAction, KeepaliveWatchdog};
pub use reconnect::{ReconnectDecision, ReconnectPolicy};

use crate::error::Result;
use serde_json::Value;

/// What a game session needs from the lobby connection.
pub trait LobbyLink: Send + Sync {
    /// Send one message upstream.
    fn send(&self, message: Value) -> Result<()>;

    fn is_connected(&self) -> bool;

    /// Turn the keepalive watchdog on or off.
    fn set_keepalive(&self, enabled: bool);
}
