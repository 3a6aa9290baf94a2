//! GPGNet relay messages carried over the lobby connection.
//!
//! Every relay message has the shape `{"command": ..., "target": "game",
//! "args": [...]}` in both directions.

use crate::error::{IceError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

pub const GAME_TARGET: &str = "game";

/// Commands the session understands. Anything else is passed through to the
/// game untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayCommand {
    SendNatPacket,
    CreatePermission,
    JoinGame,
    HostGame,
    ConnectToPeer,
    DisconnectFromPeer,
    IceMsg,
    Rehost,
    GameFull,
    GameState,
    Other(String),
}

impl RelayCommand {
    pub fn parse(command: &str) -> Self {
        match command {
            "SendNatPacket" => RelayCommand::SendNatPacket,
            "CreatePermission" => RelayCommand::CreatePermission,
            "JoinGame" => RelayCommand::JoinGame,
            "HostGame" => RelayCommand::HostGame,
            "ConnectToPeer" => RelayCommand::ConnectToPeer,
            "DisconnectFromPeer" => RelayCommand::DisconnectFromPeer,
            "IceMsg" => RelayCommand::IceMsg,
            "Rehost" => RelayCommand::Rehost,
            "GameFull" => RelayCommand::GameFull,
            "GameState" => RelayCommand::GameState,
            other => RelayCommand::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            RelayCommand::SendNatPacket => "SendNatPacket",
            RelayCommand::CreatePermission => "CreatePermission",
            RelayCommand::JoinGame => "JoinGame",
            RelayCommand::HostGame => "HostGame",
            RelayCommand::ConnectToPeer => "ConnectToPeer",
            RelayCommand::DisconnectFromPeer => "DisconnectFromPeer",
            RelayCommand::IceMsg => "IceMsg",
            RelayCommand::Rehost => "Rehost",
            RelayCommand::GameFull => "GameFull",
            RelayCommand::GameState => "GameState",
            RelayCommand::Other(name) => name,
        }
    }
}

impl fmt::Display for RelayCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One relay message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayMessage {
    pub command: String,
    #[serde(default = "default_target")]
    pub target: String,
    #[serde(default)]
    pub args: Vec<Value>,
}

fn default_target() -> String {
    GAME_TARGET.to_string()
}

impl RelayMessage {
    /// A message addressed to the game.
    pub fn to_game(command: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            command: command.into(),
            target: GAME_TARGET.to_string(),
            args,
        }
    }

    pub fn from_value(value: &Value) -> Result<Self> {
        let message: Self = serde_json::from_value(value.clone()).map_err(|e| {
            IceError::InvalidRelayMessage {
                message: format!("{}: {}", e, value),
            }
        })?;
        if message.target != GAME_TARGET {
            return Err(IceError::InvalidRelayMessage {
                message: format!("unexpected target {:?}", message.target),
            });
        }
        Ok(message)
    }

    pub fn to_value(&self) -> Value {
        serde_json::json!({
            "command": self.command,
            "target": self.target,
            "args": self.args,
        })
    }

    pub fn kind(&self) -> RelayCommand {
        RelayCommand::parse(&self.command)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_known_and_unknown_commands() {
        assert_eq!(RelayCommand::parse("IceMsg"), RelayCommand::IceMsg);
        assert_eq!(
            RelayCommand::parse("Chat"),
            RelayCommand::Other("Chat".to_string())
        );
        assert_eq!(RelayCommand::parse("Chat").as_str(), "Chat");
    }

    #[test]
    fn test_outbound_shape() {
        let msg = RelayMessage::to_game("GameState", vec![json!("Ended")]);
        assert_eq!(
            msg.to_value(),
            json!({"command": "GameState", "target": "game", "args": ["Ended"]})
        );
    }

    #[test]
    fn test_from_value() {
        let msg = RelayMessage::from_value(&json!({
            "command": "JoinGame",
            "target": "game",
            "args": ["Zoe", 7]
        }))
        .unwrap();
        assert_eq!(msg.kind(), RelayCommand::JoinGame);
        assert_eq!(msg.args, vec![json!("Zoe"), json!(7)]);
    }

    #[test]
    fn test_rejects_other_targets_and_garbage() {
        assert!(RelayMessage::from_value(&json!({"command": "x", "target": "lobby"})).is_err());
        assert!(RelayMessage::from_value(&json!({"args": []})).is_err());
    }
}
