//! Bring-up sequence as a typestate machine.
//!
//! Each stage consumes the machine and returns it in the next state, so the
//! stages can only run in order and a failed stage leaves nothing behind.

use statum::{machine, state};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info};

use super::error::BridgeError;
use super::phase::{ConnectionPhase, PhaseHandle};
use crate::config::WifiConfig;
use crate::mqtt::config::MqttConfig;
use crate::mqtt::engine::{EventSource, MqttEngine};
use crate::mqtt::mqtt_handler::{ConnectionHooks, MqttHandler};
use crate::mqtt::router::TopicRouter;
use crate::network::link::{bring_up, LinkDriver};
use crate::network::Resolver;
use crate::time_sync::NtpClient;

#[state]
#[derive(Debug, Clone)]
pub enum BringUpState {
    LinkDown,
    LinkUp,
    ClockSynced,
    BrokerResolved(SocketAddr),
    Online,
}

#[machine]
pub struct BringUp<S: BringUpState> {
    wifi: WifiConfig,
    mqtt: MqttConfig,
    link: Arc<dyn LinkDriver>,
    resolver: Arc<dyn Resolver>,
    ntp: Arc<NtpClient>,
    engine: Arc<dyn MqttEngine>,
    hooks: Arc<dyn ConnectionHooks>,
    phase: PhaseHandle,
    tracker: TaskTracker,
    token: CancellationToken,
}

impl<S: BringUpState> BringUp<S> {
    fn enter(&self, next: ConnectionPhase) -> Result<(), BridgeError> {
        self.phase.advance(next)?;
        Ok(())
    }
}

impl BringUp<LinkDown> {
    #[allow(clippy::too_many_arguments)]
    pub fn create(
        wifi: WifiConfig,
        mqtt: MqttConfig,
        link: Arc<dyn LinkDriver>,
        resolver: Arc<dyn Resolver>,
        ntp: Arc<NtpClient>,
        engine: Arc<dyn MqttEngine>,
        hooks: Arc<dyn ConnectionHooks>,
        phase: PhaseHandle,
        tracker: TaskTracker,
        token: CancellationToken,
    ) -> Self {
        Self::new(
            wifi, mqtt, link, resolver, ntp, engine, hooks, phase, tracker, token,
        )
    }

    pub async fn connect_link(self) -> Result<BringUp<LinkUp>, BridgeError> {
        self.enter(ConnectionPhase::ConnectingLink)?;
        bring_up(self.link.as_ref(), &self.wifi).await?;
        Ok(self.transition())
    }
}

impl BringUp<LinkUp> {
    /// One synchronous exchange, then periodic resynchronisation in the background.
    pub async fn synchronize_clock(self) -> Result<BringUp<ClockSynced>, BridgeError> {
        self.enter(ConnectionPhase::SynchronizingClock)?;
        self.ntp
            .clone()
            .start_periodic_sync(&self.tracker, self.token.clone())
            .await?;
        Ok(self.transition())
    }
}

impl BringUp<ClockSynced> {
    pub async fn resolve_broker(self) -> Result<BringUp<BrokerResolved>, BridgeError> {
        self.enter(ConnectionPhase::ConnectingBroker)?;
        let address = self
            .resolver
            .resolve(&self.mqtt.host, self.mqtt.port)
            .await
            .inspect_err(|e| error!("Could not resolve MQTT broker: {}", e))?;
        info!("MQTT broker '{}' resolved to {}", self.mqtt.host, address);
        Ok(self.transition_with(address))
    }
}

impl BringUp<BrokerResolved> {
    /// Starts the broker driver and waits for the first connect to complete.
    pub async fn connect_broker<E: EventSource + 'static>(
        self,
        events: E,
    ) -> Result<BringUp<Online>, BridgeError> {
        if let Some(address) = self.get_state_data() {
            info!("Connecting to MQTT broker at {} ...", address);
        }

        let router = TopicRouter::new(self.engine.clone(), self.mqtt.subscribe_qos());
        let handler = MqttHandler::new(
            events,
            self.engine.clone(),
            router,
            self.hooks.clone(),
            self.mqtt.reconnect_delay(),
        );
        let (first_tx, first_rx) = oneshot::channel();
        let token = self.token.clone();
        self.tracker.spawn(async move {
            let status = handler.run(token, first_tx).await;
            debug!("MQTT driver finished: {:?}", status);
        });

        match tokio::time::timeout(self.mqtt.connect_timeout(), first_rx).await {
            Err(_) => {
                error!("MQTT broker did not accept the connection in time");
                Err(BridgeError::BrokerTimeout {
                    seconds: self.mqtt.connect_timeout_secs,
                })
            }
            Ok(Err(_)) => Err(BridgeError::SessionEnded),
            Ok(Ok(Err(e))) => Err(e.into()),
            Ok(Ok(Ok(()))) => Ok(self.transition()),
        }
    }
}

impl BringUp<Online> {
    /// Parks the sequence until shutdown is requested.
    pub async fn idle(self) {
        info!("Device is online");
        self.token.cancelled().await;
        debug!("Leaving idle wait");
    }
}
