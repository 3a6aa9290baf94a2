//! Local port allocation.

use crate::error::Result;
use std::net::{Ipv4Addr, TcpListener};
use tracing::debug;

/// Find a free TCP port on the loopback interface.
///
/// The port is bound and released immediately, so another process may take it
/// before the caller does. The ICE adapter binds it shortly after, which makes
/// the window small enough in practice.
pub fn pick_free_port() -> Result<u16> {
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))?;
    let port = listener.local_addr()?.port();
    drop(listener);
    debug!("Picked free local port {}", port);
    Ok(port)
}
