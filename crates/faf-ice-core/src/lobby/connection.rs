//! The lobby server connection.
//!
//! A background task owns the socket: it connects, reads newline-delimited
//! JSON, answers `ping`, runs the keepalive watchdog and reconnects according
//! to [`ReconnectPolicy`]. Callers talk to it through a cloneable
//! [`LobbyHandle`].

use super::keepalive::{KeepaliveAction, KeepaliveWatchdog};
use super::line_reader::{Line, LineReader};
use super::reconnect::{ReconnectDecision, ReconnectPolicy};
use super::LobbyLink;
use crate::config::LobbyConfig;
use crate::error::{IceError, Result};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Connection state as seen by callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LobbyState {
    Connecting,
    Connected,
    /// Waiting before the next attempt.
    Reconnecting,
    Disconnected,
    Closed,
}

#[derive(Debug)]
enum LobbyCommand {
    Send(Value),
    SetKeepalive(bool),
    Shutdown,
}

/// Why a connected session ended.
#[derive(Debug, PartialEq, Eq)]
enum SessionEnd {
    Lost,
    Shutdown,
}

/// Cloneable handle to the lobby connection task.
#[derive(Debug, Clone)]
pub struct LobbyHandle {
    endpoint: String,
    commands: mpsc::UnboundedSender<LobbyCommand>,
    state: watch::Receiver<LobbyState>,
}

impl LobbyHandle {
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn state(&self) -> LobbyState {
        *self.state.borrow()
    }

    pub fn state_watch(&self) -> watch::Receiver<LobbyState> {
        self.state.clone()
    }

    /// Queue a message. Fails if the connection is not up.
    pub fn send_message(&self, message: Value) -> Result<()> {
        if self.state() != LobbyState::Connected {
            return Err(self.not_connected());
        }
        self.commands
            .send(LobbyCommand::Send(message))
            .map_err(|_| self.not_connected())
    }

    pub fn enable_keepalive(&self, enabled: bool) {
        let _ = self.commands.send(LobbyCommand::SetKeepalive(enabled));
    }

    /// Close the connection and stop reconnecting.
    pub fn shutdown(&self) {
        let _ = self.commands.send(LobbyCommand::Shutdown);
    }

    fn not_connected(&self) -> IceError {
        IceError::NotConnected {
            endpoint: self.endpoint.clone(),
        }
    }
}

impl LobbyLink for LobbyHandle {
    fn send(&self, message: Value) -> Result<()> {
        self.send_message(message)
    }

    fn is_connected(&self) -> bool {
        self.state() == LobbyState::Connected
    }

    fn set_keepalive(&self, enabled: bool) {
        self.enable_keepalive(enabled);
    }
}

/// Starts the lobby connection task.
pub struct LobbyConnection;

impl LobbyConnection {
    /// Connect to `endpoint` (`host:port`) in the background.
    ///
    /// Inbound messages other than `ping` arrive on the returned receiver.
    pub fn start(
        endpoint: impl Into<String>,
        keepalive_interval: Duration,
    ) -> (LobbyHandle, mpsc::UnboundedReceiver<Value>, JoinHandle<()>) {
        let endpoint = endpoint.into();
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(LobbyState::Connecting);

        let task = tokio::spawn(
            LobbyTask {
                endpoint: endpoint.clone(),
                commands: command_rx,
                inbound: inbound_tx,
                state: state_tx,
                policy: ReconnectPolicy::new(keepalive_interval),
                watchdog: KeepaliveWatchdog::new(),
            }
            .run(),
        );

        let handle = LobbyHandle {
            endpoint,
            commands: command_tx,
            state: state_rx,
        };
        (handle, inbound_rx, task)
    }
}

struct LobbyTask {
    endpoint: String,
    commands: mpsc::UnboundedReceiver<LobbyCommand>,
    inbound: mpsc::UnboundedSender<Value>,
    state: watch::Sender<LobbyState>,
    policy: ReconnectPolicy,
    watchdog: KeepaliveWatchdog,
}

impl LobbyTask {
    async fn run(mut self) {
        loop {
            self.policy.begin_attempt();
            self.set_state(LobbyState::Connecting);
            debug!(
                "Connecting to lobby {} (attempt {})",
                self.endpoint,
                self.policy.attempts()
            );

            let connect = TcpStream::connect(&self.endpoint);
            match tokio::time::timeout(LobbyConfig::CONNECT_TIMEOUT, connect).await {
                Ok(Ok(stream)) => {
                    info!("Connected to lobby {}", self.endpoint);
                    self.policy.on_connected();
                    self.watchdog.reset();
                    self.set_state(LobbyState::Connected);
                    if self.serve(stream).await == SessionEnd::Shutdown {
                        break;
                    }
                    warn!("Lost connection to lobby {}", self.endpoint);
                }
                Ok(Err(e)) => warn!("Could not connect to lobby {}: {}", self.endpoint, e),
                Err(_) => warn!(
                    "Connecting to lobby {} timed out after {:?}",
                    self.endpoint,
                    LobbyConfig::CONNECT_TIMEOUT
                ),
            }

            self.set_state(LobbyState::Disconnected);
            match self.policy.next_reconnect(Instant::now()) {
                ReconnectDecision::Immediate => continue,
                ReconnectDecision::After(delay) => {
                    info!("Reconnecting to lobby in {:?}", delay);
                    self.set_state(LobbyState::Reconnecting);
                    if !self.wait_for_reconnect().await {
                        break;
                    }
                }
            }
        }

        self.set_state(LobbyState::Closed);
        info!("Lobby connection to {} closed", self.endpoint);
    }

    /// Sleep until the scheduled reconnect. Returns `false` on shutdown.
    async fn wait_for_reconnect(&mut self) -> bool {
        loop {
            let Some(deadline) = self.policy.scheduled() else {
                return true;
            };
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => return true,
                command = self.commands.recv() => match command {
                    Some(LobbyCommand::SetKeepalive(enabled)) => {
                        self.watchdog.set_enabled(enabled);
                        let moved = self.policy.set_keepalive(enabled, Instant::now());
                        if let Some(new_deadline) = moved {
                            debug!("Reconnect moved up to {:?}", new_deadline);
                        }
                    }
                    Some(LobbyCommand::Send(message)) => {
                        warn!("Dropping lobby message while disconnected: {}", message);
                    }
                    Some(LobbyCommand::Shutdown) | None => return false,
                },
            }
        }
    }

    async fn serve(&mut self, stream: TcpStream) -> SessionEnd {
        let _ = stream.set_nodelay(true);
        let (reader, mut writer) = stream.into_split();
        let mut lines = LineReader::new(reader, LobbyConfig::MAX_LINE_LENGTH);

        let interval = self.policy.keepalive_interval();
        let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);

        loop {
            tokio::select! {
                line = lines.next_line() => match line {
                    Ok(Some(Line::Complete(line))) => {
                        self.watchdog.on_message_received();
                        if let Err(e) = self.handle_line(&line, &mut writer).await {
                            warn!("Lobby write failed: {}", e);
                            return SessionEnd::Lost;
                        }
                    }
                    Ok(Some(Line::Oversized(len))) => {
                        self.watchdog.on_message_received();
                        error!("Discarding oversized lobby message ({} bytes)", len);
                    }
                    Ok(None) => return SessionEnd::Lost,
                    Err(e) => {
                        warn!("Lobby read failed: {}", e);
                        return SessionEnd::Lost;
                    }
                },
                command = self.commands.recv() => match command {
                    Some(LobbyCommand::Send(message)) => {
                        if let Err(e) = write_message(&mut writer, &message).await {
                            warn!("Lobby write failed: {}", e);
                            return SessionEnd::Lost;
                        }
                    }
                    Some(LobbyCommand::SetKeepalive(enabled)) => {
                        debug!("Lobby keepalive {}", if enabled { "on" } else { "off" });
                        self.watchdog.set_enabled(enabled);
                        self.policy.set_keepalive(enabled, Instant::now());
                    }
                    Some(LobbyCommand::Shutdown) | None => {
                        let _ = writer.shutdown().await;
                        return SessionEnd::Shutdown;
                    }
                },
                _ = ticker.tick() => match self.watchdog.on_tick() {
                    KeepaliveAction::Idle => {}
                    KeepaliveAction::SendPing => {
                        let ping = json!({"command": "ping"});
                        if let Err(e) = write_message(&mut writer, &ping).await {
                            warn!("Lobby ping failed: {}", e);
                            return SessionEnd::Lost;
                        }
                    }
                    KeepaliveAction::Disconnect => {
                        warn!("No reply to keepalive ping from {}, reconnecting", self.endpoint);
                        return SessionEnd::Lost;
                    }
                },
            }
        }
    }

    async fn handle_line(
        &mut self,
        line: &[u8],
        writer: &mut OwnedWriteHalf,
    ) -> std::io::Result<()> {
        let Ok(line) = std::str::from_utf8(line) else {
            error!("Discarding lobby message that is not UTF-8");
            return Ok(());
        };
        let line = line.trim();
        if line.is_empty() {
            return Ok(());
        }

        let message: Value = match serde_json::from_str(line) {
            Ok(message) => message,
            Err(e) => {
                error!("Discarding malformed lobby message: {}", e);
                return Ok(());
            }
        };

        match message.get("command").and_then(Value::as_str) {
            Some("ping") => write_message(writer, &json!({"command": "pong"})).await,
            Some("pong") => Ok(()),
            _ => {
                if self.inbound.send(message).is_err() {
                    debug!("Lobby message dropped, nobody is listening");
                }
                Ok(())
            }
        }
    }

    fn set_state(&self, state: LobbyState) {
        self.state.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
    }
}

async fn write_message(writer: &mut OwnedWriteHalf, message: &Value) -> std::io::Result<()> {
    let mut line = serde_json::to_vec(message)?;
    line.push(b'\n');
    writer.write_all(&line).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, BufReader};
    use tokio::net::TcpListener;

    async fn wait_for_state(handle: &LobbyHandle, state: LobbyState) {
        let mut watch = handle.state_watch();
        tokio::time::timeout(Duration::from_secs(5), watch.wait_for(|s| *s == state))
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_messages_flow_both_ways() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (handle, mut inbound, task) =
            LobbyConnection::start(addr.to_string(), Duration::from_secs(30));

        let (stream, _) = listener.accept().await.unwrap();
        let (reader, mut writer) = stream.into_split();
        let mut server_lines = BufReader::new(reader).lines();

        writer
            .write_all(b"{\"command\":\"welcome\",\"id\":1}\n{\"command\":\"ping\"}\n")
            .await
            .unwrap();

        let welcome = tokio::time::timeout(Duration::from_secs(5), inbound.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(welcome["command"], "welcome");

        let pong = server_lines.next_line().await.unwrap().unwrap();
        assert_eq!(serde_json::from_str::<Value>(&pong).unwrap(), json!({"command": "pong"}));

        wait_for_state(&handle, LobbyState::Connected).await;
        handle.send(json!({"command": "hello"})).unwrap();
        let hello = server_lines.next_line().await.unwrap().unwrap();
        assert_eq!(serde_json::from_str::<Value>(&hello).unwrap()["command"], "hello");

        handle.shutdown();
        tokio::time::timeout(Duration::from_secs(5), task).await.unwrap().unwrap();
        assert_eq!(handle.state(), LobbyState::Closed);
        assert!(handle.send(json!({})).is_err());
    }

    #[tokio::test]
    async fn test_reconnects_after_server_closes() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (handle, _inbound, _task) =
            LobbyConnection::start(addr.to_string(), Duration::from_secs(30));

        let (first, _) = listener.accept().await.unwrap();
        drop(first);

        // The first failure after a successful connect reconnects immediately.
        let (_second, _) = tokio::time::timeout(Duration::from_secs(5), listener.accept())
            .await
            .unwrap()
            .unwrap();
        wait_for_state(&handle, LobbyState::Connected).await;
        handle.shutdown();
    }

    #[tokio::test]
    async fn test_keepalive_drops_silent_server() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (handle, _inbound, _task) =
            LobbyConnection::start(addr.to_string(), Duration::from_millis(100));

        let (stream, _) = listener.accept().await.unwrap();
        wait_for_state(&handle, LobbyState::Connected).await;
        handle.set_keepalive(true);

        let (reader, _writer) = stream.into_split();
        let mut server_lines = BufReader::new(reader).lines();
        let ping = tokio::time::timeout(Duration::from_secs(5), server_lines.next_line())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(serde_json::from_str::<Value>(&ping).unwrap()["command"], "ping");

        // No pong: the client gives up and connects again.
        let reconnect = tokio::time::timeout(Duration::from_secs(5), listener.accept()).await;
        assert!(reconnect.is_ok());
        handle.shutdown();
    }

    #[tokio::test]
    async fn test_oversized_message_is_skipped() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (handle, mut inbound, _task) =
            LobbyConnection::start(addr.to_string(), Duration::from_secs(30));

        let (mut stream, _) = listener.accept().await.unwrap();
        let mut oversized = vec![b'x'; LobbyConfig::MAX_LINE_LENGTH + 1];
        oversized.push(b'\n');
        stream.write_all(&oversized).await.unwrap();
        stream
            .write_all(b"{\"command\":\"welcome\"}\n")
            .await
            .unwrap();

        let next = tokio::time::timeout(Duration::from_secs(5), inbound.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(next["command"], "welcome");
        assert_eq!(handle.state(), LobbyState::Connected);
        handle.shutdown();
    }

    #[tokio::test]
    async fn test_send_while_disconnected_fails() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let (handle, _inbound, _task) =
            LobbyConnection::start(addr.to_string(), Duration::from_secs(30));
        assert!(matches!(
            handle.send(json!({"command": "hello"})),
            Err(IceError::NotConnected { .. })
        ));
        handle.shutdown();
    }
}
