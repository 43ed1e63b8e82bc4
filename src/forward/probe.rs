//! Best-effort check that something is listening on a local port.
//!
//! Only a startup hint: a negative answer is logged, never fatal. Some modes
//! (UDP in particular) bind nothing a TCP connect can see.

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use tokio::net::TcpStream;

/// Per-attempt connect timeout.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(1);

/// Pause between the first and the second attempt.
const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy)]
pub struct PortProber {
    connect_timeout: Duration,
    retry_delay: Duration,
}

impl Default for PortProber {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }
}

impl PortProber {
    pub fn new(connect_timeout: Duration, retry_delay: Duration) -> Self {
        Self {
            connect_timeout,
            retry_delay,
        }
    }

    /// Connect to `127.0.0.1:port`; on failure wait and try exactly once more.
    pub async fn is_listening(&self, port: u16) -> bool {
        if self.try_connect(port).await {
            return true;
        }
        tokio::time::sleep(self.retry_delay).await;
        self.try_connect(port).await
    }

    async fn try_connect(&self, port: u16) -> bool {
        let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
        match tokio::time::timeout(self.connect_timeout, TcpStream::connect(addr)).await {
            Ok(Ok(_stream)) => true,
            Ok(Err(e)) => {
                tracing::trace!("probe {addr}: {e}");
                false
            }
            Err(_) => {
                tracing::trace!("probe {addr}: timed out");
                false
            }
        }
    }
}
