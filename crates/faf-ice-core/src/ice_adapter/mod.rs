//! The external ICE adapter: its process, its RPC client and its ICE servers.
//!
//! A session never builds these pieces itself. It asks an [`AdapterLauncher`]
//! for an [`AdapterHandle`], which pairs a connected client with the process
//! behind it, so tests can substitute both.

pub mod client;
pub mod process;
pub mod servers;

pub use client::{AdapterEvent, GpgNetStatus, IceAdapter, IceAdapterClient, IceStatus};
pub use process::{
    shutdown_child, AdapterExit, ChildControl, IceAdapterLaunch, IceAdapterProcess,
    ShutdownOutcome,
};
pub use servers::{ApiConfig, IceServersPoller, PollOutcome};

use crate::config::Settings;
use crate::error::Result;
use crate::jsonrpc::ConnectOptions;
use crate::platform;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Who the adapter runs for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterRequest {
    pub player_id: u32,
    pub login: String,
    pub game_id: u32,
}

/// The process side of an adapter pair.
#[async_trait]
pub trait AdapterProcess: Send {
    fn rpc_port(&self) -> u16;

    async fn close(&mut self) -> ShutdownOutcome;
}

#[async_trait]
impl AdapterProcess for IceAdapterProcess {
    fn rpc_port(&self) -> u16 {
        IceAdapterProcess::rpc_port(self)
    }

    async fn close(&mut self) -> ShutdownOutcome {
        IceAdapterProcess::close(self).await
    }
}

/// A running adapter process and the client connected to it.
pub struct AdapterHandle {
    pub client: Arc<dyn IceAdapter>,
    pub process: Box<dyn AdapterProcess>,
}

impl AdapterHandle {
    /// Ask the adapter to quit, drop the connection and stop the process.
    pub async fn close(mut self) -> ShutdownOutcome {
        if self.client.is_connected() {
            if let Err(e) = self.client.quit() {
                debug!("quit not delivered to ICE adapter: {}", e);
            }
        }
        self.client.close();
        self.process.close().await
    }
}

impl fmt::Debug for AdapterHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdapterHandle")
            .field("rpc_port", &self.process.rpc_port())
            .field("connected", &self.client.is_connected())
            .finish()
    }
}

/// Starts adapter pairs.
#[async_trait]
pub trait AdapterLauncher: Send + Sync {
    /// Start an adapter and connect to it. Adapter notifications and the
    /// process exit are delivered on `events`.
    async fn launch(
        &self,
        request: &AdapterRequest,
        events: mpsc::UnboundedSender<AdapterEvent>,
    ) -> Result<AdapterHandle>;
}

/// Launches the real adapter executable configured in [`Settings`].
#[derive(Debug, Clone)]
pub struct ProcessAdapterLauncher {
    settings: Settings,
    base_args: Vec<String>,
}

impl ProcessAdapterLauncher {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings,
            base_args: Vec::new(),
        }
    }

    /// Arguments placed before the adapter flags, e.g. `-jar faf-ice-adapter.jar`
    /// when the configured program is a Java runtime.
    pub fn with_base_args(mut self, args: Vec<String>) -> Self {
        self.base_args = args;
        self
    }
}

#[async_trait]
impl AdapterLauncher for ProcessAdapterLauncher {
    async fn launch(
        &self,
        request: &AdapterRequest,
        events: mpsc::UnboundedSender<AdapterEvent>,
    ) -> Result<AdapterHandle> {
        let rpc_port = platform::pick_free_port()?;
        let launch = IceAdapterLaunch::from_settings(
            &self.settings,
            request.player_id,
            request.login.clone(),
            request.game_id,
            rpc_port,
        )
        .with_base_args(self.base_args.clone());

        let mut process = IceAdapterProcess::spawn(&launch)?;

        let mut exit_rx = process.exit_watch();
        let exit_tx = events.clone();
        tokio::spawn(async move {
            let exit = match exit_rx.wait_for(Option::is_some).await {
                Ok(exit) => *exit,
                // Closed on purpose; nothing to report.
                Err(_) => None,
            };
            if let Some(exit) = exit {
                let _ = exit_tx.send(AdapterEvent::ProcessExited(exit));
            }
        });

        let options = ConnectOptions::default().with_attempts(self.settings.rpc_connect_attempts);
        match IceAdapterClient::connect(rpc_port, events, options).await {
            Ok(client) => Ok(AdapterHandle {
                client: Arc::new(client),
                process: Box::new(process),
            }),
            Err(e) => {
                warn!("Could not connect to ICE adapter on port {}: {}", rpc_port, e);
                process.close().await;
                Err(e)
            }
        }
    }
}
