//! Routes inbound lobby messages to whoever registered for them.

use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Routes by `target` first, then by `command`.
#[derive(Debug, Default)]
pub struct Dispatcher {
    targets: HashMap<String, mpsc::UnboundedSender<Value>>,
    commands: HashMap<String, mpsc::UnboundedSender<Value>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Receive every message with this `target`.
    pub fn register_target(&mut self, target: impl Into<String>) -> mpsc::UnboundedReceiver<Value> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.targets.insert(target.into(), tx);
        rx
    }

    /// Receive untargeted messages with this `command`.
    pub fn register_command(
        &mut self,
        command: impl Into<String>,
    ) -> mpsc::UnboundedReceiver<Value> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.commands.insert(command.into(), tx);
        rx
    }

    /// Deliver a message. Returns whether a route took it.
    pub fn dispatch(&self, message: Value) -> bool {
        let route = message
            .get("target")
            .and_then(Value::as_str)
            .and_then(|target| self.targets.get(target))
            .map(|tx| ("target", tx))
            .or_else(|| {
                message
                    .get("command")
                    .and_then(Value::as_str)
                    .and_then(|command| self.commands.get(command))
                    .map(|tx| ("command", tx))
            });

        match route {
            Some((kind, tx)) => {
                if tx.send(message).is_err() {
                    warn!("Dropping lobby message, {} receiver is gone", kind);
                    return false;
                }
                true
            }
            None => {
                debug!("Unrouted lobby message: {}", message);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_target_takes_precedence() {
        let mut dispatcher = Dispatcher::new();
        let mut game = dispatcher.register_target("game");
        let mut launches = dispatcher.register_command("JoinGame");

        assert!(dispatcher.dispatch(json!({"command": "JoinGame", "target": "game", "args": []})));
        assert_eq!(game.try_recv().unwrap()["command"], "JoinGame");
        assert!(launches.try_recv().is_err());
    }

    #[test]
    fn test_command_routing_and_unrouted() {
        let mut dispatcher = Dispatcher::new();
        let mut launches = dispatcher.register_command("game_launch");

        assert!(dispatcher.dispatch(json!({"command": "game_launch", "uid": 9})));
        assert_eq!(launches.try_recv().unwrap()["uid"], 9);
        assert!(!dispatcher.dispatch(json!({"command": "social"})));
        assert!(!dispatcher.dispatch(json!({"target": "chat", "command": "x"})));
    }

    #[test]
    fn test_dropped_receiver() {
        let mut dispatcher = Dispatcher::new();
        drop(dispatcher.register_command("welcome"));
        assert!(!dispatcher.dispatch(json!({"command": "welcome"})));
    }
}
