use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of a game session.
///
/// `Off` → `Listening` (adapter started) → `Idle` (relay port known) →
/// `Launched` (game process started) → `Running` (game connected through the
/// adapter). Game exit returns to `Off` from any state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GameSessionState {
    #[default]
    Off,
    Listening,
    Idle,
    Launched,
    Running,
}

impl GameSessionState {
    /// Whether an adapter is expected to be up.
    pub fn is_active(self) -> bool {
        self != GameSessionState::Off
    }
}

impl fmt::Display for GameSessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            GameSessionState::Off => "OFF",
            GameSessionState::Listening => "LISTENING",
            GameSessionState::Idle => "IDLE",
            GameSessionState::Launched => "LAUNCHED",
            GameSessionState::Running => "RUNNING",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_off() {
        assert_eq!(GameSessionState::default(), GameSessionState::Off);
        assert!(!GameSessionState::Off.is_active());
        assert!(GameSessionState::Running.is_active());
    }

    #[test]
    fn test_display_matches_serde() {
        let json = serde_json::to_string(&GameSessionState::Launched).unwrap();
        assert_eq!(json, format!("\"{}\"", GameSessionState::Launched));
    }
}
