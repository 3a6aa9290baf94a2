//! Outgoing ICE messages held back while the lobby connection is down.

use serde_json::Value;
use std::collections::VecDeque;

/// FIFO of `(remote peer id, message)` pairs.
///
/// A `"candidate"` message is appended. Any other message type starts a new
/// negotiation with that peer, so the peer's queued messages are dropped
/// before it is appended.
#[derive(Debug, Default, Clone)]
pub struct IceMessageCache {
    queue: VecDeque<(u32, Value)>,
}

impl IceMessageCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, remote_id: u32, message: Value) {
        if !is_candidate(&message) {
            self.queue.retain(|(peer, _)| *peer != remote_id);
        }
        self.queue.push_back((remote_id, message));
    }

    /// Take every queued message in arrival order.
    pub fn drain(&mut self) -> Vec<(u32, Value)> {
        self.queue.drain(..).collect()
    }

    /// Put messages back at the front, keeping their order.
    pub fn restore(&mut self, messages: Vec<(u32, Value)>) {
        for entry in messages.into_iter().rev() {
            self.queue.push_front(entry);
        }
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn clear(&mut self) {
        self.queue.clear();
    }
}

fn is_candidate(message: &Value) -> bool {
    message.get("type").and_then(Value::as_str) == Some("candidate")
}
