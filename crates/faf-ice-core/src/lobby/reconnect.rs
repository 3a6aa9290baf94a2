//! When to reconnect to the lobby server.
//!
//! The first few consecutive failures reconnect immediately. After that the
//! delay is the keepalive interval while keepalive is on, otherwise it grows
//! by [`LobbyConfig::RECONNECT_STEP`] per attempt with no cap.

use crate::config::LobbyConfig;
use std::time::Duration;
use tokio::time::Instant;

/// What to do after a disconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectDecision {
    Immediate,
    After(Duration),
}

#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    attempts: u32,
    keepalive: bool,
    keepalive_interval: Duration,
    scheduled: Option<Instant>,
}

impl ReconnectPolicy {
    pub fn new(keepalive_interval: Duration) -> Self {
        Self {
            attempts: 0,
            keepalive: false,
            keepalive_interval,
            scheduled: None,
        }
    }

    /// Consecutive attempts since the last successful connect.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn keepalive(&self) -> bool {
        self.keepalive
    }

    pub fn keepalive_interval(&self) -> Duration {
        self.keepalive_interval
    }

    /// A connection attempt is starting.
    pub fn begin_attempt(&mut self) {
        self.attempts += 1;
        self.scheduled = None;
    }

    pub fn on_connected(&mut self) {
        self.attempts = 0;
        self.scheduled = None;
    }

    /// Delay for the next attempt, given the attempts made so far.
    pub fn retry_delay(&self) -> Duration {
        if self.keepalive {
            self.keepalive_interval
        } else {
            LobbyConfig::RECONNECT_STEP * self.attempts
        }
    }

    /// Decide how to reconnect after a disconnect at `now`. A delayed
    /// reconnect is remembered as scheduled.
    pub fn next_reconnect(&mut self, now: Instant) -> ReconnectDecision {
        if self.attempts < LobbyConfig::IMMEDIATE_RECONNECT_ATTEMPTS {
            self.scheduled = None;
            return ReconnectDecision::Immediate;
        }
        let delay = self.retry_delay();
        self.scheduled = Some(now + delay);
        ReconnectDecision::After(delay)
    }

    /// When the scheduled reconnect fires, if one is pending.
    pub fn scheduled(&self) -> Option<Instant> {
        self.scheduled
    }

    /// Switch keepalive mode at `now`.
    ///
    /// Enabling it while a reconnect is scheduled later than one keepalive
    /// interval from now pulls that reconnect in. Returns the new deadline
    /// when it changed.
    pub fn set_keepalive(&mut self, enabled: bool, now: Instant) -> Option<Instant> {
        self.keepalive = enabled;
        if !enabled {
            return None;
        }
        let shortened = now + self.keepalive_interval;
        match self.scheduled {
            Some(deadline) if deadline > shortened => {
                self.scheduled = Some(shortened);
                Some(shortened)
            }
            _ => None,
        }
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new(LobbyConfig::DEFAULT_KEEPALIVE_INTERVAL)
    }
}
