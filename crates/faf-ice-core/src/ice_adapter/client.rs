//! Typed JSON-RPC client for the ICE adapter.
//!
//! Outgoing calls are thin wrappers over [`JsonRpcClient`]; everything except
//! `status` is a notification. Notifications from the adapter are decoded
//! into [`AdapterEvent`]s and forwarded to the owning session.

use super::process::AdapterExit;
use crate::config::IceConfig;
use crate::error::{IceError, Result};
use crate::jsonrpc::registry::{arg_bool, arg_str, arg_u32};
use crate::jsonrpc::{ConnectOptions, JsonRpcClient, MethodRegistry};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Something the adapter (or its process) reported.
#[derive(Debug, Clone, PartialEq)]
pub enum AdapterEvent {
    /// `onConnectionStateChanged`: the game connected to or left the adapter.
    ConnectionStateChanged(String),
    /// `onGpgNetMessageReceived`: a GPGNet message from the game.
    GpgNetMessage { header: String, chunks: Vec<Value> },
    /// `onIceMsg`: an ICE negotiation message for a remote peer.
    IceMsg {
        local_id: u32,
        remote_id: u32,
        message: Value,
    },
    IceConnectionStateChanged {
        local_id: u32,
        remote_id: u32,
        state: String,
    },
    PeerConnected {
        local_id: u32,
        remote_id: u32,
        connected: bool,
    },
    ProcessExited(AdapterExit),
}

/// GPGNet section of the adapter's `status` reply.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct GpgNetStatus {
    pub local_port: Option<u16>,
    pub connected: bool,
    pub game_state: Option<String>,
}

/// Reply to `status`. Unknown fields are ignored.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct IceStatus {
    pub version: Option<String>,
    pub gpgnet: GpgNetStatus,
}

impl IceStatus {
    /// The port the game should connect to, once the adapter has bound it.
    pub fn relay_port(&self) -> Option<u16> {
        self.gpgnet.local_port.filter(|port| *port != 0)
    }
}

/// Operations the session needs from the ICE adapter.
#[async_trait]
pub trait IceAdapter: Send + Sync {
    fn is_connected(&self) -> bool;

    async fn status(&self) -> Result<IceStatus>;

    fn set_ice_servers(&self, servers: Vec<Value>) -> Result<()>;

    fn join_game(&self, remote_login: &str, remote_id: u32) -> Result<()>;

    fn host_game(&self, map_name: &str) -> Result<()>;

    fn connect_to_peer(&self, remote_login: &str, remote_id: u32, offer: bool) -> Result<()>;

    fn disconnect_from_peer(&self, remote_id: u32) -> Result<()>;

    fn ice_msg(&self, remote_id: u32, message: Value) -> Result<()>;

    fn send_to_gpgnet(&self, header: &str, chunks: Vec<Value>) -> Result<()>;

    fn quit(&self) -> Result<()>;

    /// Drop the RPC connection.
    fn close(&self) {}
}

/// [`IceAdapter`] over a JSON-RPC connection.
#[derive(Debug)]
pub struct IceAdapterClient {
    rpc: JsonRpcClient,
}

impl IceAdapterClient {
    /// Connect to an adapter listening on `127.0.0.1:port`.
    pub async fn connect(
        port: u16,
        events: mpsc::UnboundedSender<AdapterEvent>,
        options: ConnectOptions,
    ) -> Result<Self> {
        let registry = notification_registry(events);
        let rpc = JsonRpcClient::connect(IceConfig::RPC_HOST, port, registry, options).await?;
        Ok(Self { rpc })
    }
}

#[async_trait]
impl IceAdapter for IceAdapterClient {
    fn is_connected(&self) -> bool {
        self.rpc.is_connected()
    }

    async fn status(&self) -> Result<IceStatus> {
        let value = self.rpc.call("status", json!([])).await?;
        serde_json::from_value(value).map_err(|e| IceError::Json {
            message: format!("unexpected status reply: {}", e),
            source: Some(e),
        })
    }

    fn set_ice_servers(&self, servers: Vec<Value>) -> Result<()> {
        self.rpc.notify("setIceServers", json!([servers]))
    }

    fn join_game(&self, remote_login: &str, remote_id: u32) -> Result<()> {
        self.rpc.notify("joinGame", json!([remote_login, remote_id]))
    }

    fn host_game(&self, map_name: &str) -> Result<()> {
        self.rpc.notify("hostGame", json!([map_name]))
    }

    fn connect_to_peer(&self, remote_login: &str, remote_id: u32, offer: bool) -> Result<()> {
        self.rpc
            .notify("connectToPeer", json!([remote_login, remote_id, offer]))
    }

    fn disconnect_from_peer(&self, remote_id: u32) -> Result<()> {
        self.rpc.notify("disconnectFromPeer", json!([remote_id]))
    }

    fn ice_msg(&self, remote_id: u32, message: Value) -> Result<()> {
        self.rpc.notify("iceMsg", json!([remote_id, message]))
    }

    fn send_to_gpgnet(&self, header: &str, chunks: Vec<Value>) -> Result<()> {
        self.rpc.notify("sendToGpgNet", json!([header, chunks]))
    }

    fn quit(&self) -> Result<()> {
        self.rpc.notify("quit", json!([]))
    }

    fn close(&self) {
        self.rpc.close();
    }
}

/// Handlers for the notifications the adapter sends us.
pub fn notification_registry(events: mpsc::UnboundedSender<AdapterEvent>) -> MethodRegistry {
    let mut registry = MethodRegistry::new();

    let tx = events.clone();
    registry.register("onConnectionStateChanged", move |args| {
        let state = arg_str(args, 0, "onConnectionStateChanged")?;
        forward(&tx, AdapterEvent::ConnectionStateChanged(state.to_string()))
    });

    let tx = events.clone();
    registry.register("onGpgNetMessageReceived", move |args| {
        let header = arg_str(args, 0, "onGpgNetMessageReceived")?.to_string();
        let chunks = match args.get(1) {
            Some(Value::Array(chunks)) => chunks.clone(),
            Some(Value::Null) | None => Vec::new(),
            Some(other) => vec![other.clone()],
        };
        forward(&tx, AdapterEvent::GpgNetMessage { header, chunks })
    });

    let tx = events.clone();
    registry.register("onIceMsg", move |args| {
        forward(
            &tx,
            AdapterEvent::IceMsg {
                local_id: arg_u32(args, 0, "onIceMsg")?,
                remote_id: arg_u32(args, 1, "onIceMsg")?,
                message: args.get(2).cloned().unwrap_or(Value::Null),
            },
        )
    });

    let tx = events.clone();
    registry.register("onIceConnectionStateChanged", move |args| {
        forward(
            &tx,
            AdapterEvent::IceConnectionStateChanged {
                local_id: arg_u32(args, 0, "onIceConnectionStateChanged")?,
                remote_id: arg_u32(args, 1, "onIceConnectionStateChanged")?,
                state: arg_str(args, 2, "onIceConnectionStateChanged")?.to_string(),
            },
        )
    });

    let tx = events;
    registry.register("onConnected", move |args| {
        forward(
            &tx,
            AdapterEvent::PeerConnected {
                local_id: arg_u32(args, 0, "onConnected")?,
                remote_id: arg_u32(args, 1, "onConnected")?,
                connected: arg_bool(args, 2, "onConnected")?,
            },
        )
    });

    registry
}

fn forward(tx: &mpsc::UnboundedSender<AdapterEvent>, event: AdapterEvent) -> Result<Value> {
    debug!("ICE adapter event: {:?}", event);
    if tx.send(event).is_err() {
        warn!("ICE adapter event dropped, session is gone");
    }
    Ok(Value::Null)
}
