//! The game session: one local game, its ICE adapter and the relay between
//! the adapter and the lobby server.
//!
//! # Event flow
//!
//! ```text
//! lobby ──relay──▶ handle_message ──▶ IceAdapter (joinGame, iceMsg, ...)
//! IceAdapter ──AdapterEvent──▶ handle_adapter_event ──relay──▶ lobby
//! ```
//!
//! All state is owned here and mutated through `&mut self`; the driver feeds
//! lobby messages, adapter events and game process lifecycle into it from a
//! single task.

use super::ice_cache::IceMessageCache;
use super::relay::{RelayCommand, RelayMessage};
use super::state::GameSessionState;
use crate::config::IceConfig;
use crate::error::{IceError, Result};
use crate::ice_adapter::{
    AdapterEvent, AdapterExit, AdapterHandle, AdapterLauncher, AdapterRequest, ApiConfig,
    IceAdapter, IceServersPoller,
};
use crate::jsonrpc::registry::{arg_bool, arg_str, arg_u32};
use crate::lobby::LobbyLink;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Parameters of a game this player hosts, kept for rehosting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostedGame {
    pub title: String,
    #[serde(rename = "mod")]
    pub game_mod: String,
    pub visibility: String,
    pub mapname: String,
    pub password: Option<String>,
}

impl HostedGame {
    /// The `game_host` lobby request for this game.
    pub fn host_request(&self, is_rehost: bool) -> Value {
        json!({
            "command": "game_host",
            "title": self.title,
            "mod": self.game_mod,
            "visibility": self.visibility,
            "mapname": self.mapname,
            "password": self.password,
            "is_rehost": is_rehost,
        })
    }
}

/// Things the user surface should know about.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    StateChanged(GameSessionState),
    /// The game connected through the adapter.
    Ready,
    /// A user-visible problem.
    Notice(String),
    AdapterExited(AdapterExit),
    PeerConnectionChanged { remote_id: u32, state: String },
}

/// State of one local game session.
pub struct GameSession {
    player_id: u32,
    login: String,
    game_id: Option<u32>,
    state: GameSessionState,
    lobby: Arc<dyn LobbyLink>,
    launcher: Arc<dyn AdapterLauncher>,
    api: Option<ApiConfig>,
    adapter: Option<AdapterHandle>,
    adapter_tx: mpsc::UnboundedSender<AdapterEvent>,
    events: mpsc::UnboundedSender<SessionEvent>,
    ice_cache: IceMessageCache,
    relay_port: Option<u16>,
    rehost: bool,
    hosted_game: Option<HostedGame>,
    poller: Option<JoinHandle<()>>,
    relay_port_timeout: Duration,
    status_poll_interval: Duration,
}

impl GameSession {
    /// Create a session. The returned receiver yields the events of every
    /// adapter this session starts; feed them to
    /// [`handle_adapter_event`](Self::handle_adapter_event).
    pub fn new(
        player_id: u32,
        login: impl Into<String>,
        lobby: Arc<dyn LobbyLink>,
        launcher: Arc<dyn AdapterLauncher>,
        api: Option<ApiConfig>,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> (Self, mpsc::UnboundedReceiver<AdapterEvent>) {
        let (adapter_tx, adapter_rx) = mpsc::unbounded_channel();
        let session = Self {
            player_id,
            login: login.into(),
            game_id: None,
            state: GameSessionState::Off,
            lobby,
            launcher,
            api,
            adapter: None,
            adapter_tx,
            events,
            ice_cache: IceMessageCache::new(),
            relay_port: None,
            rehost: false,
            hosted_game: None,
            poller: None,
            relay_port_timeout: IceConfig::RELAY_PORT_TIMEOUT,
            status_poll_interval: IceConfig::STATUS_POLL_INTERVAL,
        };
        (session, adapter_rx)
    }

    pub fn with_relay_port_timeout(mut self, timeout: Duration, poll_interval: Duration) -> Self {
        self.relay_port_timeout = timeout;
        self.status_poll_interval = poll_interval;
        self
    }

    pub fn player_id(&self) -> u32 {
        self.player_id
    }

    pub fn login(&self) -> &str {
        &self.login
    }

    pub fn state(&self) -> GameSessionState {
        self.state
    }

    pub fn game_id(&self) -> Option<u32> {
        self.game_id
    }

    /// GPGNet port the game should connect to.
    pub fn relay_port(&self) -> Option<u16> {
        self.relay_port
    }

    pub fn hosted_game(&self) -> Option<&HostedGame> {
        self.hosted_game.as_ref()
    }

    pub fn rehost_requested(&self) -> bool {
        self.rehost
    }

    pub fn cached_ice_messages(&self) -> usize {
        self.ice_cache.len()
    }

    pub fn has_adapter(&self) -> bool {
        self.adapter.is_some()
    }

    /// Remember the parameters of a game being hosted.
    pub fn set_hosted_game(&mut self, game: HostedGame) {
        self.hosted_game = Some(game);
    }

    /// Start an ICE adapter for `game_id` and wait for its relay port.
    ///
    /// Any previous adapter is closed first. Returns the relay port.
    pub async fn start_ice_adapter(&mut self, game_id: u32) -> Result<u16> {
        self.close_ice_adapter().await;
        self.game_id = Some(game_id);

        let request = AdapterRequest {
            player_id: self.player_id,
            login: self.login.clone(),
            game_id,
        };
        let handle = match self.launcher.launch(&request, self.adapter_tx.clone()).await {
            Ok(handle) => handle,
            Err(e) => {
                error!("Could not start ICE adapter for game {}: {}", game_id, e);
                let notice = format!("ICE adapter failed to start: {}", e);
                self.notify(SessionEvent::Notice(notice));
                self.shutdown().await;
                return Err(e);
            }
        };

        let client = handle.client.clone();
        self.adapter = Some(handle);
        self.set_state(GameSessionState::Listening);

        let relay_port = match wait_for_relay_port(
            client.as_ref(),
            self.relay_port_timeout,
            self.status_poll_interval,
        )
        .await
        {
            Ok(port) => port,
            Err(e) => {
                error!("ICE adapter did not report a relay port: {}", e);
                let notice = format!("ICE adapter did not start: {}", e);
                self.notify(SessionEvent::Notice(notice));
                self.shutdown().await;
                return Err(e);
            }
        };

        info!("ICE adapter relay port for game {} is {}", game_id, relay_port);
        self.relay_port = Some(relay_port);
        self.set_state(GameSessionState::Idle);

        if let Some(api) = &self.api {
            match IceServersPoller::new(api.clone(), game_id) {
                Ok(poller) => self.poller = Some(poller.spawn(client)),
                Err(e) => warn!("ICE servers will not be fetched: {}", e),
            }
        }

        Ok(relay_port)
    }

    /// Close the current adapter pair, if any.
    pub async fn close_ice_adapter(&mut self) {
        if let Some(poller) = self.poller.take() {
            poller.abort();
        }
        if let Some(handle) = self.adapter.take() {
            let outcome = handle.close().await;
            debug!("ICE adapter closed: {:?}", outcome);
        }
        self.relay_port = None;
    }

    /// Handle a relay message from the lobby server.
    pub fn handle_message(&mut self, message: &Value) -> Result<()> {
        let message = RelayMessage::from_value(message)?;
        let args = message.args.as_slice();
        let command = message.kind();

        match command {
            RelayCommand::SendNatPacket | RelayCommand::CreatePermission => {
                debug!("Ignoring {}", command);
                Ok(())
            }
            RelayCommand::Rehost => {
                if matches!(
                    self.state,
                    GameSessionState::Launched | GameSessionState::Running
                ) {
                    info!("Rehost requested for game {:?}", self.game_id);
                    self.rehost = true;
                } else {
                    warn!("Ignoring Rehost while the game session is {}", self.state);
                }
                Ok(())
            }
            RelayCommand::JoinGame => {
                let login = arg_str(args, 0, "JoinGame")?;
                let remote_id = arg_u32(args, 1, "JoinGame")?;
                self.adapter()?.join_game(login, remote_id)
            }
            RelayCommand::HostGame => {
                let map = arg_str(args, 0, "HostGame")?;
                self.adapter()?.host_game(map)
            }
            RelayCommand::ConnectToPeer => {
                let login = arg_str(args, 0, "ConnectToPeer")?;
                let remote_id = arg_u32(args, 1, "ConnectToPeer")?;
                let offer = arg_bool(args, 2, "ConnectToPeer")?;
                self.adapter()?.connect_to_peer(login, remote_id, offer)
            }
            RelayCommand::DisconnectFromPeer => {
                let remote_id = arg_u32(args, 0, "DisconnectFromPeer")?;
                self.adapter()?.disconnect_from_peer(remote_id)
            }
            RelayCommand::IceMsg => {
                let remote_id = arg_u32(args, 0, "IceMsg")?;
                let msg = args.get(1).cloned().unwrap_or(Value::Null);
                self.adapter()?.ice_msg(remote_id, msg)
            }
            RelayCommand::GameFull | RelayCommand::GameState | RelayCommand::Other(_) => {
                warn!("Passing unhandled command {} to the game", command);
                self.adapter()?
                    .send_to_gpgnet(command.as_str(), message.args.clone())
            }
        }
    }

    /// Handle a notification from the adapter or its process.
    pub fn handle_adapter_event(&mut self, event: AdapterEvent) {
        match event {
            AdapterEvent::ConnectionStateChanged(state) => {
                info!("Game connection state: {}", state);
                if state == "Connected" {
                    self.set_state(GameSessionState::Running);
                    self.notify(SessionEvent::Ready);
                }
            }
            AdapterEvent::GpgNetMessage { header, chunks } => {
                let _ = self.send_relay(&RelayMessage::to_game(header, chunks));
            }
            AdapterEvent::IceMsg {
                remote_id, message, ..
            } => self.send_ice_message(remote_id, message),
            AdapterEvent::IceConnectionStateChanged {
                remote_id, state, ..
            } => {
                debug!("ICE state for peer {}: {}", remote_id, state);
                self.notify(SessionEvent::PeerConnectionChanged { remote_id, state });
            }
            AdapterEvent::PeerConnected {
                remote_id,
                connected,
                ..
            } => {
                let state = if connected { "connected" } else { "disconnected" };
                info!("Peer {} {}", remote_id, state);
                self.notify(SessionEvent::PeerConnectionChanged {
                    remote_id,
                    state: state.to_string(),
                });
            }
            AdapterEvent::ProcessExited(exit) => {
                if exit.is_error() {
                    self.notify(SessionEvent::Notice(format!("ICE adapter {}", exit)));
                }
                self.notify(SessionEvent::AdapterExited(exit));
            }
        }
    }

    /// The game process started.
    pub fn on_game_launched(&mut self) {
        info!("Game launched for game {:?}", self.game_id);
        self.set_state(GameSessionState::Launched);
        self.lobby.set_keepalive(true);
    }

    /// The game process exited.
    pub async fn on_game_exited(&mut self) {
        info!("Game exited for game {:?}", self.game_id);
        self.set_state(GameSessionState::Off);
        let _ = self.send_relay(&RelayMessage::to_game("GameState", vec![json!("Ended")]));
        self.lobby.set_keepalive(false);
        self.close_ice_adapter().await;

        if self.rehost {
            match &self.hosted_game {
                Some(game) => {
                    info!("Rehosting {:?}", game.title);
                    if let Err(e) = self.lobby.send(game.host_request(true)) {
                        warn!("Rehost request not sent: {}", e);
                    }
                }
                None => warn!("Rehost requested without a hosted game"),
            }
        }

        self.rehost = false;
        self.hosted_game = None;
        self.game_id = None;
    }

    /// The lobby connection came back; send what was cached.
    pub fn on_lobby_connected(&mut self) {
        self.flush_ice_cache();
    }

    /// Send queued ICE messages in FIFO order. Whatever cannot be sent stays
    /// queued, ahead of newer messages.
    fn flush_ice_cache(&mut self) {
        if self.ice_cache.is_empty() {
            return;
        }
        let queued = self.ice_cache.drain();
        info!("Sending {} cached ICE messages", queued.len());

        let mut remaining = queued.into_iter();
        while let Some((remote_id, message)) = remaining.next() {
            let relay = RelayMessage::to_game("IceMsg", vec![json!(remote_id), message.clone()]);
            if let Err(e) = self.lobby.send(relay.to_value()) {
                warn!("Lobby went away while flushing ICE messages: {}", e);
                let mut rest = vec![(remote_id, message)];
                rest.extend(remaining);
                self.ice_cache.restore(rest);
                return;
            }
        }
    }

    /// Close the adapter pair and forget the current game; the session
    /// returns to `Off`.
    pub async fn shutdown(&mut self) {
        self.close_ice_adapter().await;
        self.set_state(GameSessionState::Off);
        self.rehost = false;
        self.hosted_game = None;
        self.game_id = None;
    }

    fn adapter(&self) -> Result<&dyn IceAdapter> {
        self.adapter
            .as_ref()
            .map(|handle| handle.client.as_ref())
            .ok_or(IceError::AdapterNotRunning)
    }

    fn send_ice_message(&mut self, remote_id: u32, message: Value) {
        // Older queued messages go first, even if the lobby is already back.
        if !self.ice_cache.is_empty() {
            self.ice_cache.push(remote_id, message);
            if self.lobby.is_connected() {
                self.flush_ice_cache();
            }
            return;
        }
        if self.lobby.is_connected() {
            let relay = RelayMessage::to_game("IceMsg", vec![json!(remote_id), message.clone()]);
            if self.lobby.send(relay.to_value()).is_ok() {
                return;
            }
        }
        debug!("Lobby disconnected, caching ICE message for peer {}", remote_id);
        self.ice_cache.push(remote_id, message);
    }

    fn send_relay(&self, message: &RelayMessage) -> Result<()> {
        self.lobby.send(message.to_value()).map_err(|e| {
            warn!("Relay message {} not sent: {}", message.command, e);
            e
        })
    }

    fn set_state(&mut self, state: GameSessionState) {
        if self.state != state {
            debug!("Game session {} -> {}", self.state, state);
            self.state = state;
            self.notify(SessionEvent::StateChanged(state));
        }
    }

    fn notify(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }
}

impl std::fmt::Debug for GameSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GameSession")
            .field("player_id", &self.player_id)
            .field("login", &self.login)
            .field("game_id", &self.game_id)
            .field("state", &self.state)
            .field("relay_port", &self.relay_port)
            .field("rehost", &self.rehost)
            .field("cached_ice_messages", &self.ice_cache.len())
            .finish()
    }
}

/// Poll `status` until the adapter reports its relay port.
async fn wait_for_relay_port(
    adapter: &dyn IceAdapter,
    timeout: Duration,
    poll_interval: Duration,
) -> Result<u16> {
    let poll = async {
        loop {
            match adapter.status().await {
                Ok(status) => {
                    if let Some(port) = status.relay_port() {
                        return Ok(port);
                    }
                }
                Err(e) if !e.is_retryable() || !adapter.is_connected() => return Err(e),
                Err(e) => debug!("ICE adapter status not available yet: {}", e),
            }
            tokio::time::sleep(poll_interval).await;
        }
    };

    tokio::time::timeout(timeout, poll)
        .await
        .map_err(|_| IceError::Timeout(timeout))?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_request_shape() {
        let game = HostedGame {
            title: "4v4 setons".into(),
            game_mod: "faf".into(),
            visibility: "public".into(),
            mapname: "setons_clutch".into(),
            password: None,
        };
        assert_eq!(
            game.host_request(true),
            json!({
                "command": "game_host",
                "title": "4v4 setons",
                "mod": "faf",
                "visibility": "public",
                "mapname": "setons_clutch",
                "password": null,
                "is_rehost": true
            })
        );
    }
}
