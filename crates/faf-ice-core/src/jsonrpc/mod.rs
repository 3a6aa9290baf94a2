//! JSON-RPC 2.0 over a local TCP connection.
//!
//! # Architecture
//!
//! - **Framing**: brace-depth delimited JSON objects, no length prefix
//! - **Protocol**: request/response wire types shared by both directions
//! - **Registry**: explicit method-name to handler mapping for inbound calls
//! - **Client**: the connection itself, with pending-call tracking

pub mod client;
pub mod framing;
pub mod protocol;
pub mod registry;

pub use client::{ConnectOptions, JsonRpcClient};
pub use framing::{FrameBuffer, FramingError};
pub use protocol::{RpcErrorObject, RpcMessage, RpcRequest, RpcResponse};
pub use registry::{DispatchOutcome, MethodRegistry};
