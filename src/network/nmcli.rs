//! NetworkManager link driver.

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use super::link::{LinkDriver, LinkError, LinkStatus};
use crate::config::REDACTED;

/// Drives a wireless interface through the `nmcli` command line tool.
#[derive(Debug, Clone)]
pub struct NmcliLink {
    interface: String,
}

impl NmcliLink {
    pub fn new(interface: impl Into<String>) -> Self {
        Self {
            interface: interface.into(),
        }
    }

    async fn nmcli(&self, args: &[&str]) -> Result<String, LinkError> {
        debug!("nmcli {}", loggable_args(args));
        let output = Command::new("nmcli")
            .args(args)
            .output()
            .await
            .map_err(|e| LinkError::Driver(format!("failed to run nmcli: {}", e)))?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if output.status.success() {
            Ok(stdout)
        } else {
            Err(LinkError::Driver(format!(
                "nmcli {} exited with {}: {}",
                args.first().copied().unwrap_or_default(),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )))
        }
    }
}

#[async_trait]
impl LinkDriver for NmcliLink {
    async fn status(&self) -> Result<LinkStatus, LinkError> {
        let out = self
            .nmcli(&[
                "-t",
                "-g",
                "GENERAL.STATE,GENERAL.CONNECTION",
                "device",
                "show",
                &self.interface,
            ])
            .await?;
        Ok(parse_device_state(&out))
    }

    async fn associate(&self, ssid: &str, password: &str) -> Result<(), LinkError> {
        let mut args = vec!["--wait", "0", "device", "wifi", "connect", ssid];
        if !password.is_empty() {
            args.extend(["password", password]);
        }
        args.extend(["ifname", self.interface.as_str()]);

        match self.nmcli(&args).await {
            Ok(_) => Ok(()),
            Err(LinkError::Driver(reason)) if reason.contains("Secrets were required") => {
                Err(LinkError::Rejected {
                    ssid: ssid.to_string(),
                    status: LinkStatus::WrongPassword,
                })
            }
            Err(e) => Err(e),
        }
    }

    async fn disconnect(&self) -> Result<(), LinkError> {
        match self.nmcli(&["device", "disconnect", &self.interface]).await {
            Ok(_) => Ok(()),
            // Already disconnected devices make nmcli fail, which is fine here.
            Err(LinkError::Driver(reason)) if reason.contains("not active") => Ok(()),
            Err(e) => Err(e),
        }
    }
}

/// Joins `args` for logging with the value following `password` masked.
fn loggable_args(args: &[&str]) -> String {
    let mut masked = Vec::with_capacity(args.len());
    let mut secret_next = false;
    for arg in args {
        masked.push(if secret_next { REDACTED } else { *arg });
        secret_next = *arg == "password";
    }
    masked.join(" ")
}

/// Maps `nmcli -t -g GENERAL.STATE,GENERAL.CONNECTION device show` output.
///
/// The state line looks like `100 (connected)`, the connection line carries
/// the profile name, which nmcli names after the SSID by default.
fn parse_device_state(output: &str) -> LinkStatus {
    let mut lines = output.lines();
    let state = lines.next().unwrap_or_default();
    let connection = lines.next().unwrap_or_default().trim();
    let code: u32 = state
        .split_whitespace()
        .next()
        .and_then(|c| c.parse().ok())
        .unwrap_or(0);

    match code {
        100 => LinkStatus::Connected {
            ssid: connection.to_string(),
        },
        // prepare, config, need-auth, ip-config, ip-check, secondaries
        40..=90 => LinkStatus::Connecting,
        120 => LinkStatus::Failed,
        20 => LinkStatus::NoAccessPoint,
        _ => LinkStatus::Idle,
    }
}
