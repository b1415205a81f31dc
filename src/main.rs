pub mod config;
pub mod logging;
pub mod mqtt;
pub mod network;
pub mod orchestrator;
pub mod panel;
pub mod status;
pub mod time_sync;

use crate::config::{AppConfig, StatusConfig};
use crate::mqtt::engine::{self, MqttEngine};
use crate::mqtt::mqtt_handler::SessionError;
use crate::network::link::LinkDriver;
use crate::network::nmcli::NmcliLink;
use crate::network::udp_client::UdpTransport;
use crate::network::{Resolver, SystemResolver};
use crate::orchestrator::{BridgeError, ConnectionOrchestrator, Services};
use crate::panel::outputs::{GpioOutput, OutputLine};
use crate::panel::panel_handle::PanelHandle;
use crate::panel::PanelError;
use crate::status::{StatusSignaler, SysfsLed};
use crate::time_sync::rtc::SoftRtc;
use crate::time_sync::NtpClient;
use color_eyre::Result;
use rppal::gpio::Gpio;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let config = setup()?;

    let tracker = TaskTracker::new();
    let token = CancellationToken::new();

    let outcome = tokio::select! {
        result = run(config, &tracker, token.clone()) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupt received, shutting down");
            Ok(())
        }
    };

    // Tear the whole task tree down; the broker driver closes its socket here.
    token.cancel();
    tracker.close();
    tracker.wait().await;

    if let Err(e) = &outcome {
        error!("Fatal error: {}", e);
    }
    Ok(outcome?)
}

fn setup() -> Result<AppConfig> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;

    let (paths, mut warnings) = AppConfig::resolve_paths();
    let loaded = AppConfig::load(&paths).map_err(BridgeError::from)?;
    warnings.extend(loaded.warnings);

    logging::init(&loaded.config.logging);
    for warning in &warnings {
        warn!("{}", warning);
    }
    info!("{}", loaded.config.render_redacted());
    Ok(loaded.config)
}

fn status_led(config: &StatusConfig) -> Result<Arc<dyn OutputLine>, PanelError> {
    match config.led_pin {
        Some(pin) => Ok(Arc::new(GpioOutput::claim(&Gpio::new()?, pin)?)),
        None => Ok(Arc::new(SysfsLed::open(&config.led_sysfs_path)?)),
    }
}

async fn run(
    config: AppConfig,
    tracker: &TaskTracker,
    token: CancellationToken,
) -> Result<(), BridgeError> {
    let clock = Arc::new(SoftRtc::new());
    let resolver: Arc<dyn Resolver> = Arc::new(SystemResolver);

    let (engine, events) = engine::create(&config.mqtt).map_err(SessionError::from)?;
    let engine: Arc<dyn MqttEngine> = Arc::new(engine);

    let panel = PanelHandle::spawn(
        &config.panel,
        engine.clone(),
        config.mqtt.publish_qos(),
        clock.clone(),
        tracker,
        token.clone(),
    )?;

    let ntp = Arc::new(NtpClient::new(
        config.ntp.clone(),
        resolver.clone(),
        Arc::new(UdpTransport),
        clock,
    ));
    let link: Arc<dyn LinkDriver> = Arc::new(NmcliLink::new(config.wifi.interface.clone()));

    let orchestrator = ConnectionOrchestrator::new(
        config.wifi,
        config.mqtt,
        Services {
            link,
            resolver,
            ntp,
            engine,
            mirror: panel.mirror(),
        },
        tracker.clone(),
        token.clone(),
    );

    match status_led(&config.status) {
        Ok(led) => {
            let signaler = StatusSignaler::new(
                orchestrator.phases(),
                led,
                Duration::from_millis(config.status.poll_interval_ms),
            );
            tracker.spawn(signaler.run(token));
        }
        Err(e) => warn!("Status LED unavailable, running without it: {}", e),
    }

    orchestrator.run(events).await
}
