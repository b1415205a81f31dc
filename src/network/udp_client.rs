//! Request/reply exchange over an unreliable datagram transport.
//!
//! ```text
//! for each send attempt (send_retries):
//!     send request
//!     for each receive poll (receive_retries):
//!         non-blocking receive ── reply ──► done
//!         timeout-class error  ──► sleep receive_poll, next poll
//!         any other error      ──► TransportFailure
//!     sleep send_backoff (not after the last attempt)
//! Exhausted
//! ```

use async_trait::async_trait;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::time::sleep;
use tracing::{debug, error, warn};

use crate::config::NtpConfig;

#[derive(Debug, Error)]
pub enum DatagramError {
    #[error("Failed to open datagram socket: {0}")]
    Open(#[source] io::Error),

    #[error("Datagram transport failure: {0}")]
    TransportFailure(#[source] io::Error),

    #[error("No reply after {attempts} receive attempts")]
    Exhausted { attempts: u32 },
}

/// One open, non-blocking datagram socket.
#[async_trait]
pub trait DatagramSocket: Send {
    async fn send_to(&mut self, data: &[u8], target: SocketAddr) -> io::Result<usize>;

    /// Returns `WouldBlock` when nothing has arrived yet.
    fn try_recv(&mut self, buf: &mut [u8]) -> io::Result<usize>;
}

/// Opens a fresh socket per exchange.
#[async_trait]
pub trait DatagramTransport: Send + Sync {
    async fn open(&self, target: SocketAddr) -> io::Result<Box<dyn DatagramSocket>>;
}

/// UDP transport backed by tokio sockets.
#[derive(Debug, Clone, Default)]
pub struct UdpTransport;

struct TokioUdpSocket(UdpSocket);

#[async_trait]
impl DatagramSocket for TokioUdpSocket {
    async fn send_to(&mut self, data: &[u8], target: SocketAddr) -> io::Result<usize> {
        self.0.send_to(data, target).await
    }

    fn try_recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.try_recv_from(buf).map(|(len, _)| len)
    }
}

#[async_trait]
impl DatagramTransport for UdpTransport {
    async fn open(&self, target: SocketAddr) -> io::Result<Box<dyn DatagramSocket>> {
        let bind: SocketAddr = if target.is_ipv4() {
            SocketAddr::from(([0, 0, 0, 0], 0))
        } else {
            SocketAddr::from(([0u16; 8], 0))
        };
        let socket = UdpSocket::bind(bind).await?;
        Ok(Box::new(TokioUdpSocket(socket)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub send_retries: u32,
    pub receive_retries: u32,
    pub receive_poll: Duration,
    pub send_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&NtpConfig::default())
    }
}

impl From<&NtpConfig> for RetryPolicy {
    fn from(config: &NtpConfig) -> Self {
        Self {
            send_retries: config.send_retries,
            receive_retries: config.receive_retries,
            receive_poll: Duration::from_millis(config.receive_poll_ms),
            send_backoff: Duration::from_millis(config.send_backoff_ms),
        }
    }
}

fn is_timeout(e: &io::Error) -> bool {
    matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
}

/// Sends `request` to `target` and waits for a reply of at most `receive_size` bytes.
///
/// The socket is dropped, and therefore closed, on every return path.
pub async fn send_and_receive(
    transport: &dyn DatagramTransport,
    policy: &RetryPolicy,
    request: &[u8],
    receive_size: usize,
    target: SocketAddr,
) -> Result<Vec<u8>, DatagramError> {
    let mut socket = transport.open(target).await.map_err(DatagramError::Open)?;
    let mut buf = vec![0u8; receive_size];
    let mut polls = 0;

    for attempt in 1..=policy.send_retries {
        debug!(
            "Sending {} bytes to {} (attempt {}/{})",
            request.len(),
            target,
            attempt,
            policy.send_retries
        );
        socket.send_to(request, target).await.map_err(|e| {
            error!("Failed to send datagram to {}: {}", target, e);
            DatagramError::TransportFailure(e)
        })?;

        for poll in 1..=policy.receive_retries {
            polls += 1;
            match socket.try_recv(&mut buf) {
                Ok(len) => {
                    debug!("Received {} bytes from {} after {} polls", len, target, polls);
                    buf.truncate(len);
                    return Ok(buf);
                }
                Err(e) if is_timeout(&e) => {}
                Err(e) => {
                    error!("Error while receiving from {}: {}", target, e);
                    return Err(DatagramError::TransportFailure(e));
                }
            }
            if poll < policy.receive_retries {
                sleep(policy.receive_poll).await;
            }
        }

        if attempt < policy.send_retries {
            debug!("No reply from {}, backing off", target);
            sleep(policy.send_backoff).await;
        }
    }

    warn!("No reply from {} after {} receive attempts", target, polls);
    Err(DatagramError::Exhausted { attempts: polls })
}
