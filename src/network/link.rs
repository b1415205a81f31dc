//! Wireless link bring-up.
//!
//! The link driver only knows how to query, associate and disconnect. The
//! polling policy around it (reuse, reset, bounded wait, stability check)
//! lives in [`bring_up`].

use async_trait::async_trait;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::config::WifiConfig;

const POLL_INTERVAL: Duration = Duration::from_secs(1);
const RESET_SETTLE: Duration = Duration::from_millis(500);

/// Association state as reported by the link driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkStatus {
    Idle,
    Connecting,
    Connected { ssid: String },
    WrongPassword,
    NoAccessPoint,
    Failed,
}

impl LinkStatus {
    pub fn is_connected(&self) -> bool {
        matches!(self, LinkStatus::Connected { .. })
    }

    // Statuses after which waiting longer cannot help.
    fn is_terminal(&self) -> bool {
        matches!(
            self,
            LinkStatus::WrongPassword | LinkStatus::NoAccessPoint | LinkStatus::Failed
        )
    }
}

impl fmt::Display for LinkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkStatus::Idle => write!(f, "idle"),
            LinkStatus::Connecting => write!(f, "connecting"),
            LinkStatus::Connected { ssid } => write!(f, "connected to '{}'", ssid),
            LinkStatus::WrongPassword => write!(f, "wrong password"),
            LinkStatus::NoAccessPoint => write!(f, "no access point"),
            LinkStatus::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("Timeout while connecting to WiFi with SSID '{ssid}' after {polls} polls")]
    Timeout { ssid: String, polls: u32 },

    #[error("WiFi with SSID '{ssid}' refused the association: {status}")]
    Rejected { ssid: String, status: LinkStatus },

    #[error("WiFi connection to SSID '{ssid}' is unstable")]
    Unstable { ssid: String },

    #[error("Link driver error: {0}")]
    Driver(String),
}

/// Seam to the platform's wireless stack.
#[async_trait]
pub trait LinkDriver: Send + Sync {
    async fn status(&self) -> Result<LinkStatus, LinkError>;
    async fn associate(&self, ssid: &str, password: &str) -> Result<(), LinkError>;
    async fn disconnect(&self) -> Result<(), LinkError>;
}

/// Brings the wireless link up, reusing an existing association to the same SSID.
pub async fn bring_up(driver: &dyn LinkDriver, config: &WifiConfig) -> Result<(), LinkError> {
    let ssid = config.ssid.as_str();

    let status = driver.status().await?;
    if let LinkStatus::Connected { ssid: current } = &status {
        if current == ssid {
            info!("Already connected to WiFi with SSID '{}'", ssid);
            return Ok(());
        }
    }
    if status != LinkStatus::Idle {
        debug!("Resetting link in state '{}' before associating", status);
        driver.disconnect().await?;
        sleep(RESET_SETTLE).await;
    }

    info!("Connecting to WiFi with SSID '{}' ...", ssid);
    driver.associate(ssid, &config.password).await?;

    let mut status = LinkStatus::Connecting;
    let mut exhausted = true;
    for poll in 1..=config.max_connect_polls {
        sleep(POLL_INTERVAL).await;
        status = driver.status().await?;
        debug!("Link poll {}/{}: {}", poll, config.max_connect_polls, status);
        if status != LinkStatus::Connecting {
            exhausted = false;
            break;
        }
    }

    if exhausted {
        driver.disconnect().await?;
        warn!("Timeout while connecting to WiFi with SSID '{}'", ssid);
        return Err(LinkError::Timeout {
            ssid: ssid.to_string(),
            polls: config.max_connect_polls,
        });
    }
    if !status.is_connected() {
        error!("WiFi association with SSID '{}' failed: {}", ssid, status);
        if !status.is_terminal() {
            driver.disconnect().await?;
        }
        return Err(LinkError::Rejected {
            ssid: ssid.to_string(),
            status,
        });
    }
    info!("Connected successfully to WiFi with SSID '{}'", ssid);

    if config.check_stability {
        check_stability(driver, config).await?;
    }
    Ok(())
}

async fn check_stability(driver: &dyn LinkDriver, config: &WifiConfig) -> Result<(), LinkError> {
    info!("Checking WiFi integrity ...");
    for _ in 0..config.stability_checks {
        if !driver.status().await?.is_connected() {
            error!("WiFi connection is unstable!");
            return Err(LinkError::Unstable {
                ssid: config.ssid.clone(),
            });
        }
        sleep(POLL_INTERVAL).await;
    }
    info!("WiFi connection is reliable");
    Ok(())
}
