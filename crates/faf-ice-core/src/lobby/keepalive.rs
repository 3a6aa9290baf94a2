//! Keepalive ping bookkeeping for the lobby connection.

/// What the keepalive timer asks for on a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeepaliveAction {
    Idle,
    SendPing,
    /// Nothing arrived since the last ping.
    Disconnect,
}

/// Ping watchdog for the lobby connection.
///
/// Every tick sends a ping. If no message of any kind arrived since the
/// previous ping, the connection is considered dead.
#[derive(Debug, Clone, Default)]
pub struct KeepaliveWatchdog {
    enabled: bool,
    waiting: bool,
}

impl KeepaliveWatchdog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
        self.waiting = false;
    }

    pub fn on_message_received(&mut self) {
        self.waiting = false;
    }

    /// A fresh connection owes no reply.
    pub fn reset(&mut self) {
        self.waiting = false;
    }

    pub fn on_tick(&mut self) -> KeepaliveAction {
        if !self.enabled {
            return KeepaliveAction::Idle;
        }
        if self.waiting {
            self.waiting = false;
            return KeepaliveAction::Disconnect;
        }
        self.waiting = true;
        KeepaliveAction::SendPing
    }
}
