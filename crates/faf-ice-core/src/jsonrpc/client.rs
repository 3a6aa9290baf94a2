//! TCP JSON-RPC endpoint used to talk to the ICE adapter.
//!
//! One connection carries traffic in both directions: our calls to the
//! adapter and the adapter's notifications to us. A reader task frames
//! inbound bytes and either resolves a pending call or runs a registered
//! handler; a writer task serializes all outbound writes.
//!
//! # Disconnects
//!
//! When the socket closes, every pending call resolves with
//! [`IceError::Disconnected`] and the pending map is emptied.

use super::framing::FrameBuffer;
use super::protocol::{RpcMessage, RpcRequest, RpcResponse};
use super::registry::{DispatchOutcome, MethodRegistry};
use crate::config::IceConfig;
use crate::error::{IceError, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// How a pending call ended without a result.
#[derive(Debug)]
enum CallFailure {
    Remote(Value),
    Disconnected,
}

type PendingSender = oneshot::Sender<std::result::Result<Value, CallFailure>>;

/// Connection parameters.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    /// Timeout of a single connect attempt.
    pub timeout: Duration,
    /// Total attempts while the peer refuses the connection.
    pub attempts: u32,
    pub retry_delay: Duration,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            timeout: IceConfig::RPC_CONNECT_TIMEOUT,
            attempts: IceConfig::RPC_CONNECT_ATTEMPTS,
            retry_delay: IceConfig::RPC_CONNECT_RETRY_DELAY,
        }
    }
}

impl ConnectOptions {
    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts.max(1);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }
}

/// State shared between the client handle and its I/O tasks.
struct Shared {
    endpoint: String,
    pending: Mutex<HashMap<u64, PendingSender>>,
    connected: watch::Sender<bool>,
    outbound: mpsc::UnboundedSender<Vec<u8>>,
    registry: MethodRegistry,
}

impl Shared {
    fn pending(&self) -> MutexGuard<'_, HashMap<u64, PendingSender>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn handle_message(&self, value: Value) {
        let message = match RpcMessage::from_value(value) {
            Ok(message) => message,
            Err(e) => {
                error!("Dropping malformed JSON-RPC message from {}: {}", self.endpoint, e);
                return;
            }
        };

        match message {
            RpcMessage::Request(request) => self.handle_request(request),
            RpcMessage::Response { id, outcome } => {
                let Some(id) = id.as_ref().and_then(Value::as_u64) else {
                    debug!("Ignoring response without numeric id: {:?}", id);
                    return;
                };
                let Some(sender) = self.pending().remove(&id) else {
                    debug!("Ignoring response for unknown id {}", id);
                    return;
                };
                // The caller may have stopped waiting; nothing to do then.
                let _ = sender.send(outcome.map_err(CallFailure::Remote));
            }
        }
    }

    fn handle_request(&self, request: RpcRequest) {
        let response = match self.registry.dispatch(&request.method, &request.params) {
            DispatchOutcome::Handled(result) => RpcResponse::success(request.id.clone(), result),
            DispatchOutcome::Failed(e) => {
                warn!("Handler for {} failed: {}", request.method, e);
                RpcResponse::error(request.id.clone(), e.to_rpc_error_code(), e.to_string())
            }
            DispatchOutcome::NotFound => {
                warn!("No handler for JSON-RPC method {}", request.method);
                RpcResponse::method_not_found(request.id.clone())
            }
        };

        // Notifications get no response.
        if request.id.is_none() {
            return;
        }

        match serde_json::to_vec(&response) {
            Ok(bytes) => {
                if self.outbound.send(bytes).is_err() {
                    debug!("Response to {} dropped, writer closed", request.method);
                }
            }
            Err(e) => error!("Failed to encode response to {}: {}", request.method, e),
        }
    }

    /// Mark disconnected and fail all pending calls.
    fn close(&self) {
        let was_connected = self.connected.send_replace(false);
        let drained: Vec<_> = self.pending().drain().collect();
        if was_connected {
            info!(
                "JSON-RPC connection to {} closed ({} pending calls failed)",
                self.endpoint,
                drained.len()
            );
        }
        for (_, sender) in drained {
            let _ = sender.send(Err(CallFailure::Disconnected));
        }
    }
}

/// JSON-RPC client over one TCP connection.
pub struct JsonRpcClient {
    shared: Arc<Shared>,
    next_id: AtomicU64,
    tasks: Vec<JoinHandle<()>>,
}

impl JsonRpcClient {
    /// Connect to `host:port`, serving inbound requests from `registry`.
    ///
    /// A refused connection is retried up to `options.attempts` times; any
    /// other socket error fails immediately.
    pub async fn connect(
        host: &str,
        port: u16,
        registry: MethodRegistry,
        options: ConnectOptions,
    ) -> Result<Self> {
        let endpoint = format!("{}:{}", host, port);
        let stream = Self::connect_stream(&endpoint, &options).await?;
        stream.set_nodelay(true)?;
        debug!("JSON-RPC client connected to {}", endpoint);

        let (reader, writer) = stream.into_split();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (connected, _) = watch::channel(true);

        let shared = Arc::new(Shared {
            endpoint,
            pending: Mutex::new(HashMap::new()),
            connected,
            outbound: outbound_tx,
            registry,
        });

        let tasks = vec![
            tokio::spawn(Self::read_loop(reader, shared.clone())),
            tokio::spawn(Self::write_loop(writer, outbound_rx, shared.clone())),
        ];

        Ok(Self {
            shared,
            next_id: AtomicU64::new(1),
            tasks,
        })
    }

    async fn connect_stream(endpoint: &str, options: &ConnectOptions) -> Result<TcpStream> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match tokio::time::timeout(options.timeout, TcpStream::connect(endpoint)).await {
                Ok(Ok(stream)) => return Ok(stream),
                Ok(Err(e)) if e.kind() == std::io::ErrorKind::ConnectionRefused => {
                    if attempt >= options.attempts {
                        return Err(IceError::ConnectionRefused {
                            endpoint: endpoint.to_string(),
                            attempts: attempt,
                        });
                    }
                    debug!(
                        "Connection to {} refused (attempt {}/{}), retrying",
                        endpoint, attempt, options.attempts
                    );
                    tokio::time::sleep(options.retry_delay).await;
                }
                Ok(Err(e)) => return Err(e.into()),
                Err(_) => return Err(IceError::Timeout(options.timeout)),
            }
        }
    }

    async fn read_loop(mut reader: OwnedReadHalf, shared: Arc<Shared>) {
        let mut frames = FrameBuffer::new();
        let mut chunk = vec![0u8; 8192];

        loop {
            match reader.read(&mut chunk).await {
                Ok(0) => break,
                Ok(n) => {
                    frames.extend(&chunk[..n]);
                    loop {
                        match frames.next_frame() {
                            Ok(Some(value)) => shared.handle_message(value),
                            Ok(None) => break,
                            Err(e) => {
                                error!("Discarding receive buffer from {}: {}", shared.endpoint, e);
                                break;
                            }
                        }
                    }
                }
                Err(e) => {
                    warn!("Read from {} failed: {}", shared.endpoint, e);
                    break;
                }
            }
        }

        shared.close();
    }

    async fn write_loop(
        mut writer: OwnedWriteHalf,
        mut outbound: mpsc::UnboundedReceiver<Vec<u8>>,
        shared: Arc<Shared>,
    ) {
        while let Some(bytes) = outbound.recv().await {
            if let Err(e) = writer.write_all(&bytes).await {
                warn!("Write to {} failed: {}", shared.endpoint, e);
                break;
            }
        }
        let _ = writer.shutdown().await;
        shared.close();
    }

    pub fn endpoint(&self) -> &str {
        &self.shared.endpoint
    }

    pub fn is_connected(&self) -> bool {
        *self.shared.connected.borrow()
    }

    /// Number of calls still waiting for a response.
    pub fn pending_calls(&self) -> usize {
        self.shared.pending().len()
    }

    fn ensure_connected(&self) -> Result<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(IceError::NotConnected {
                endpoint: self.shared.endpoint.clone(),
            })
        }
    }

    /// Call a method and wait for its result.
    pub async fn call(&self, method: &str, params: Value) -> Result<Value> {
        self.ensure_connected()?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let bytes = serde_json::to_vec(&RpcRequest::call(method, params, id))?;
        let (tx, rx) = oneshot::channel();
        self.shared.pending().insert(id, tx);

        // close() may have drained the map between the check and the insert.
        if !self.is_connected() || self.shared.outbound.send(bytes).is_err() {
            self.shared.pending().remove(&id);
            return Err(IceError::NotConnected {
                endpoint: self.shared.endpoint.clone(),
            });
        }

        match rx.await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(CallFailure::Remote(error))) => Err(IceError::Rpc {
                method: method.to_string(),
                error,
            }),
            Ok(Err(CallFailure::Disconnected)) | Err(_) => Err(IceError::Disconnected {
                endpoint: self.shared.endpoint.clone(),
            }),
        }
    }

    /// Send a notification; no response is expected.
    pub fn notify(&self, method: &str, params: Value) -> Result<()> {
        self.ensure_connected()?;
        let bytes = serde_json::to_vec(&RpcRequest::notification(method, params))?;
        self.shared
            .outbound
            .send(bytes)
            .map_err(|_| IceError::NotConnected {
                endpoint: self.shared.endpoint.clone(),
            })
    }

    /// Close the connection and fail pending calls.
    pub fn close(&self) {
        for task in &self.tasks {
            task.abort();
        }
        self.shared.close();
    }
}

impl Drop for JsonRpcClient {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for JsonRpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonRpcClient")
            .field("endpoint", &self.shared.endpoint)
            .field("connected", &self.is_connected())
            .field("pending_calls", &self.pending_calls())
            .finish()
    }
}
