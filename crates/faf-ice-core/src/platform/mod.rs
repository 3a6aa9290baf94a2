//! Platform abstraction layer.
//!
//! All `#[cfg]` blocks for OS-specific behavior live here rather than in the
//! session or adapter code.
//!
//! - `network` - local port allocation
//! - `process` - graceful termination signals

pub mod network;
pub mod process;

pub use network::pick_free_port;
pub use process::request_terminate;
