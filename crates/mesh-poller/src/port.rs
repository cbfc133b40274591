//! Listener readiness.

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use mesh_core::{HarnessError, Result};
use tokio::net::TcpStream;
use tracing::{debug, trace};

use crate::deadline::Deadline;

const RETRY_INTERVAL: Duration = Duration::from_millis(50);

/// Wait until something accepts TCP connections on `127.0.0.1:port`.
///
/// # Errors
///
/// Returns [`HarnessError::PortNotReady`] if no connection succeeds before
/// `deadline` elapses. The error is never returned earlier than `deadline`.
pub async fn wait_for_port(port: u16, deadline: Duration) -> Result<()> {
    let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
    let deadline = Deadline::after(deadline);

    loop {
        let attempt = tokio::time::timeout(
            deadline.remaining().max(RETRY_INTERVAL),
            TcpStream::connect(addr),
        );
        match attempt.await {
            Ok(Ok(_)) => {
                debug!(port, elapsed = ?deadline.elapsed(), "port accepting connections");
                return Ok(());
            }
            Ok(Err(e)) => trace!(port, error = %e, "port not ready"),
            Err(_) => trace!(port, "connect timed out"),
        }

        if deadline.is_expired() {
            return Err(HarnessError::PortNotReady {
                port,
                waited: deadline.elapsed(),
            });
        }
        tokio::time::sleep(deadline.clamp(RETRY_INTERVAL)).await;
    }
}
