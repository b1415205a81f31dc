//! # Time Synchronisation
//!
//! SNTP client that sets the device clock from a remote time server.
//!
//! The first exchange runs synchronously during bring-up because publish
//! timestamps depend on it. After that a background task re-synchronises
//! every `interval_seconds`; failures there are logged and never fatal.

pub mod rtc;

use chrono::{DateTime, Utc};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info};

use crate::config::NtpConfig;
use crate::network::udp_client::{send_and_receive, DatagramError, DatagramTransport, RetryPolicy};
use crate::network::{ResolveError, Resolver};
use rtc::{format_iso8601, DeviceClock};

pub const NTP_PORT: u16 = 123;
/// Seconds between 1900-01-01 and 1970-01-01.
pub const NTP_EPOCH_OFFSET: i64 = 2_208_988_800;
pub const NTP_PACKET_SIZE: usize = 48;
const TRANSMIT_SECONDS_OFFSET: usize = 40;
/// LI = 0, version 3, mode 3 (client).
const NTP_REQUEST_HEADER: u8 = 0x1B;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Failed to resolve time server: {0}")]
    Resolution(#[from] ResolveError),

    #[error("Time exchange aborted: {0}")]
    Transport(#[source] DatagramError),

    #[error("No reply from time server '{host}': {source}")]
    NoReply {
        host: String,
        #[source]
        source: DatagramError,
    },

    #[error("Malformed time server reply ({len} bytes)")]
    MalformedReply { len: usize },
}

/// Last known synchronisation, observable through [`NtpClient::state`].
#[derive(Debug, Clone, PartialEq)]
pub struct TimeSyncState {
    pub server_address: Option<SocketAddr>,
    pub interval: Duration,
    pub last_sync_utc: Option<DateTime<Utc>>,
}

pub fn build_request() -> [u8; NTP_PACKET_SIZE] {
    let mut request = [0u8; NTP_PACKET_SIZE];
    request[0] = NTP_REQUEST_HEADER;
    request
}

/// Extracts the transmit timestamp (whole seconds) from a server reply.
pub fn parse_reply(reply: &[u8]) -> Result<DateTime<Utc>, SyncError> {
    if reply.len() < NTP_PACKET_SIZE {
        return Err(SyncError::MalformedReply { len: reply.len() });
    }
    let field: [u8; 4] = reply[TRANSMIT_SECONDS_OFFSET..TRANSMIT_SECONDS_OFFSET + 4]
        .try_into()
        .map_err(|_| SyncError::MalformedReply { len: reply.len() })?;
    let unix_seconds = i64::from(u32::from_be_bytes(field)) - NTP_EPOCH_OFFSET;
    DateTime::from_timestamp(unix_seconds, 0).ok_or(SyncError::MalformedReply { len: reply.len() })
}

pub struct NtpClient {
    config: NtpConfig,
    policy: RetryPolicy,
    resolver: Arc<dyn Resolver>,
    transport: Arc<dyn DatagramTransport>,
    clock: Arc<dyn DeviceClock>,
    state: watch::Sender<TimeSyncState>,
}

impl NtpClient {
    pub fn new(
        config: NtpConfig,
        resolver: Arc<dyn Resolver>,
        transport: Arc<dyn DatagramTransport>,
        clock: Arc<dyn DeviceClock>,
    ) -> Self {
        info!(
            "Time client for '{}' with interval {} s",
            config.host, config.interval_seconds
        );
        let (state, _) = watch::channel(TimeSyncState {
            server_address: None,
            interval: config.interval(),
            last_sync_utc: None,
        });
        Self {
            policy: RetryPolicy::from(&config),
            config,
            resolver,
            transport,
            clock,
            state,
        }
    }

    pub fn state(&self) -> watch::Receiver<TimeSyncState> {
        self.state.subscribe()
    }

    /// One complete exchange: resolve, request, parse, set the clock.
    pub async fn sync_once(&self) -> Result<DateTime<Utc>, SyncError> {
        debug!("Getting time from NTP server '{}' ...", self.config.host);
        let server = self.resolver.resolve(&self.config.host, NTP_PORT).await?;

        let reply = send_and_receive(
            self.transport.as_ref(),
            &self.policy,
            &build_request(),
            NTP_PACKET_SIZE,
            server,
        )
        .await
        .map_err(|e| match e {
            DatagramError::Exhausted { .. } => SyncError::NoReply {
                host: self.config.host.clone(),
                source: e,
            },
            other => SyncError::Transport(other),
        })?;

        let now = parse_reply(&reply)?;
        let before = self.clock.now_utc();
        self.clock.set_utc(now);

        info!(
            "Synchronized clock with NTP server '{}', datetime = {}",
            self.config.host,
            format_iso8601(now)
        );
        debug!("Clock before sync = {}", format_iso8601(before));

        self.state.send_modify(|state| {
            state.server_address = Some(server);
            state.last_sync_utc = Some(now);
        });
        Ok(now)
    }

    /// Runs one synchronous exchange, then re-synchronises in the background.
    ///
    /// The first failure is returned to the caller; background failures are
    /// only logged.
    pub async fn start_periodic_sync(
        self: Arc<Self>,
        tracker: &TaskTracker,
        token: CancellationToken,
    ) -> Result<(), SyncError> {
        if let Err(e) = self.sync_once().await {
            error!("Initial time synchronization failed: {}", e);
            return Err(e);
        }

        let client = self.clone();
        tracker.spawn(async move {
            let interval = client.config.interval();
            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        debug!("Periodic time synchronization stopped");
                        break;
                    }
                    _ = tokio::time::sleep(interval) => {}
                }
                if let Err(e) = client.sync_once().await {
                    error!(
                        "Periodic synchronization with NTP server '{}' failed: {}",
                        client.config.host, e
                    );
                }
            }
        });
        Ok(())
    }
}
