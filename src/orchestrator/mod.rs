//! # Connection Orchestrator
//!
//! Brings the device online and keeps it there:
//!
//! ```text
//! Undefined ─► ConnectingLink ─► SynchronizingClock ─► ConnectingBroker ─► Connected ◄─► Interrupted
//!              (link bring-up)   (first NTP exchange)   (resolve, CONNACK)
//! ```
//!
//! Any failure before `Connected` is fatal and returned from
//! [`ConnectionOrchestrator::run`]; the caller tears down the task tree.
//! After that the broker driver reconnects on its own and reports through
//! [`OrchestratorHooks`].

pub mod bring_up;
pub mod error;
pub mod phase;

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

use crate::config::WifiConfig;
use crate::mqtt::config::MqttConfig;
use crate::mqtt::engine::{EventSource, MqttEngine};
use crate::mqtt::mqtt_handler::ConnectionHooks;
use crate::mqtt::router::{RouterError, TopicHandler, TopicRouter};
use crate::network::link::LinkDriver;
use crate::network::Resolver;
use crate::panel::publisher::TOPIC_ROOT;
use crate::time_sync::NtpClient;

use self::bring_up::BringUp;
pub use self::error::BridgeError;
pub use self::phase::{ConnectionPhase, PhaseError, PhaseHandle};

/// Lifecycle callbacks registered with the broker driver.
pub struct OrchestratorHooks {
    phase: PhaseHandle,
    mirror: Arc<dyn TopicHandler>,
}

impl OrchestratorHooks {
    pub fn new(phase: PhaseHandle, mirror: Arc<dyn TopicHandler>) -> Self {
        Self { phase, mirror }
    }
}

#[async_trait]
impl ConnectionHooks for OrchestratorHooks {
    async fn on_connection_established(&self, router: &mut TopicRouter) -> Result<(), RouterError> {
        router
            .subscribe(&format!("{}/#", TOPIC_ROOT), self.mirror.clone())
            .await
    }

    async fn on_connection_state_changed(&self, connected: bool) {
        let next = if connected {
            info!("MQTT connection established");
            ConnectionPhase::Connected
        } else {
            warn!("MQTT connection interrupted");
            ConnectionPhase::Interrupted
        };
        if let Err(e) = self.phase.advance(next) {
            warn!("Ignoring connection state change: {}", e);
        }
    }
}

/// Collaborators the orchestrator drives.
pub struct Services {
    pub link: Arc<dyn LinkDriver>,
    pub resolver: Arc<dyn Resolver>,
    pub ntp: Arc<NtpClient>,
    pub engine: Arc<dyn MqttEngine>,
    /// Handler for inbound panel state, subscribed on every connect.
    pub mirror: Arc<dyn TopicHandler>,
}

pub struct ConnectionOrchestrator {
    wifi: WifiConfig,
    mqtt: MqttConfig,
    services: Services,
    phase: PhaseHandle,
    tracker: TaskTracker,
    token: CancellationToken,
}

impl ConnectionOrchestrator {
    pub fn new(
        wifi: WifiConfig,
        mqtt: MqttConfig,
        services: Services,
        tracker: TaskTracker,
        token: CancellationToken,
    ) -> Self {
        Self {
            wifi,
            mqtt,
            services,
            phase: PhaseHandle::new(),
            tracker,
            token,
        }
    }

    /// Read side of the connection phase, for the status signaler.
    pub fn phases(&self) -> watch::Receiver<ConnectionPhase> {
        self.phase.subscribe()
    }

    /// Runs the bring-up sequence, then waits until `token` is cancelled.
    pub async fn run<E: EventSource + 'static>(self, events: E) -> Result<(), BridgeError> {
        let hooks = Arc::new(OrchestratorHooks::new(
            self.phase.clone(),
            self.services.mirror,
        ));
        let machine = BringUp::create(
            self.wifi,
            self.mqtt,
            self.services.link,
            self.services.resolver,
            self.services.ntp,
            self.services.engine,
            hooks,
            self.phase,
            self.tracker,
            self.token,
        );

        machine
            .connect_link()
            .await?
            .synchronize_clock()
            .await?
            .resolve_broker()
            .await?
            .connect_broker(events)
            .await?
            .idle()
            .await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NtpConfig;
    use crate::mqtt::engine::{EngineError, EngineEvent};
    use crate::mqtt::message_manager::InboundMessage;
    use crate::mqtt::mqtt_handler::tests::ChannelEvents;
    use crate::mqtt::router::tests::RecordingEngine;
    use crate::network::link::tests::ScriptedLink;
    use crate::network::link::{LinkError, LinkStatus};
    use crate::network::udp_client::tests::{Behaviour, ScriptedTransport};
    use crate::network::ResolveError;
    use crate::time_sync::rtc::SoftRtc;
    use crate::time_sync::{NTP_PACKET_SIZE, SyncError};
    use std::net::SocketAddr;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use ConnectionPhase::*;

    struct FixedResolver {
        broker_known: bool,
    }

    #[async_trait]
    impl Resolver for FixedResolver {
        async fn resolve(&self, host: &str, port: u16) -> Result<SocketAddr, ResolveError> {
            if host == "broker.local" && !self.broker_known {
                return Err(ResolveError::NoAddress { host: host.into() });
            }
            Ok(SocketAddr::from(([192, 0, 2, 10], port)))
        }
    }

    struct Fixture {
        link: Arc<ScriptedLink>,
        engine: Arc<RecordingEngine>,
        ntp: Behaviour,
        broker_known: bool,
        mirrored: Arc<Mutex<Vec<String>>>,
    }

    impl Fixture {
        fn new(statuses: Vec<LinkStatus>) -> Self {
            Self {
                link: Arc::new(ScriptedLink::new(statuses)),
                engine: Arc::new(RecordingEngine::default()),
                ntp: Behaviour::ReplyOnPoll(3),
                broker_known: true,
                mirrored: Arc::default(),
            }
        }

        fn orchestrator(
            &self,
            tracker: &TaskTracker,
            token: &CancellationToken,
        ) -> ConnectionOrchestrator {
            let mut reply = vec![0u8; NTP_PACKET_SIZE];
            reply[40..44].copy_from_slice(&3_918_377_109u32.to_be_bytes());
            let resolver = Arc::new(FixedResolver {
                broker_known: self.broker_known,
            });
            let ntp = Arc::new(NtpClient::new(
                NtpConfig::default(),
                resolver.clone(),
                Arc::new(ScriptedTransport::new(self.ntp, reply)),
                Arc::new(SoftRtc::new()),
            ));
            let mirrored = self.mirrored.clone();
            let mirror: Arc<dyn TopicHandler> =
                Arc::new(move |message: &InboundMessage| -> color_eyre::Result<()> {
                    mirrored.lock().unwrap().push(message.topic.clone());
                    Ok(())
                });

            ConnectionOrchestrator::new(
                WifiConfig {
                    ssid: "workshop".into(),
                    ..WifiConfig::default()
                },
                MqttConfig {
                    host: "broker.local".into(),
                    ..MqttConfig::default()
                },
                Services {
                    link: self.link.clone(),
                    resolver,
                    ntp,
                    engine: self.engine.clone(),
                    mirror,
                },
                tracker.clone(),
                token.clone(),
            )
        }
    }

    fn io_error() -> EngineError {
        EngineError::Connection(rumqttc::ConnectionError::Io(std::io::Error::from(
            std::io::ErrorKind::ConnectionReset,
        )))
    }

    async fn wait_for(phases: &mut watch::Receiver<ConnectionPhase>, wanted: ConnectionPhase) {
        while *phases.borrow_and_update() != wanted {
            phases.changed().await.unwrap();
        }
    }

    #[tokio::test(start_paused = true)]
    async fn brings_the_device_online_in_order() {
        let fixture = Fixture::new(vec![
            LinkStatus::Idle,
            LinkStatus::Connecting,
            LinkStatus::Connected {
                ssid: "workshop".into(),
            },
        ]);
        let tracker = TaskTracker::new();
        let token = CancellationToken::new();
        let orchestrator = fixture.orchestrator(&tracker, &token);
        let mut phases = orchestrator.phases();
        let (tx, rx) = mpsc::unbounded_channel();

        let run = tokio::spawn(orchestrator.run(ChannelEvents(rx)));

        let mut seen = Vec::new();
        while seen.last() != Some(&ConnectingBroker) {
            phases.changed().await.unwrap();
            seen.push(*phases.borrow_and_update());
        }
        assert_eq!(seen, vec![ConnectingLink, SynchronizingClock, ConnectingBroker]);
        assert!(fixture.engine.requests().is_empty());

        tx.send(Ok(EngineEvent::Connected)).unwrap();
        wait_for(&mut phases, Connected).await;
        assert_eq!(fixture.engine.requests(), vec!["subscribe inputs/# AtMostOnce"]);

        tx.send(Ok(EngineEvent::Message(InboundMessage::new(
            "inputs/button2/isPressed",
            "True",
            false,
        ))))
        .unwrap();
        tx.send(Err(io_error())).unwrap();
        wait_for(&mut phases, Interrupted).await;

        tx.send(Ok(EngineEvent::Connected)).unwrap();
        wait_for(&mut phases, Connected).await;
        assert_eq!(
            fixture.engine.requests(),
            vec![
                "subscribe inputs/# AtMostOnce",
                "unsubscribe inputs/#",
                "subscribe inputs/# AtMostOnce"
            ]
        );
        assert_eq!(*fixture.mirrored.lock().unwrap(), vec!["inputs/button2/isPressed"]);
        assert!(!run.is_finished());

        token.cancel();
        run.await.unwrap().unwrap();
        tracker.close();
        tracker.wait().await;
        assert_eq!(fixture.engine.requests().last().unwrap(), "disconnect");
    }

    #[tokio::test(start_paused = true)]
    async fn link_timeout_stops_the_sequence() {
        let fixture = Fixture::new(vec![LinkStatus::Idle, LinkStatus::Connecting]);
        let tracker = TaskTracker::new();
        let token = CancellationToken::new();
        let orchestrator = fixture.orchestrator(&tracker, &token);
        let phases = orchestrator.phases();
        let (_tx, rx) = mpsc::unbounded_channel();

        let result = orchestrator.run(ChannelEvents(rx)).await;

        assert!(matches!(
            result,
            Err(BridgeError::LinkFailure(LinkError::Timeout { polls: 60, .. }))
        ));
        assert_eq!(*phases.borrow(), ConnectingLink);
        assert!(tracker.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn silent_time_server_is_fatal() {
        let mut fixture = Fixture::new(vec![LinkStatus::Connected {
            ssid: "workshop".into(),
        }]);
        fixture.ntp = Behaviour::Silent;
        let tracker = TaskTracker::new();
        let token = CancellationToken::new();
        let orchestrator = fixture.orchestrator(&tracker, &token);
        let phases = orchestrator.phases();
        let (_tx, rx) = mpsc::unbounded_channel();

        let result = orchestrator.run(ChannelEvents(rx)).await;

        assert!(matches!(
            result,
            Err(BridgeError::SyncFailure(SyncError::NoReply { .. }))
        ));
        assert_eq!(*phases.borrow(), SynchronizingClock);
    }

    #[tokio::test(start_paused = true)]
    async fn unresolvable_broker_fails_fast() {
        let mut fixture = Fixture::new(vec![LinkStatus::Connected {
            ssid: "workshop".into(),
        }]);
        fixture.broker_known = false;
        let tracker = TaskTracker::new();
        let token = CancellationToken::new();
        let orchestrator = fixture.orchestrator(&tracker, &token);
        let phases = orchestrator.phases();
        let (_tx, rx) = mpsc::unbounded_channel();

        let result = orchestrator.run(ChannelEvents(rx)).await;

        assert!(matches!(
            result,
            Err(BridgeError::ResolutionFailure(ResolveError::NoAddress { .. }))
        ));
        assert_eq!(*phases.borrow(), ConnectingBroker);
        assert!(fixture.engine.requests().is_empty());

        token.cancel();
        tracker.close();
        tracker.wait().await;
    }

    #[tokio::test(start_paused = true)]
    async fn refused_first_connect_is_fatal() {
        let fixture = Fixture::new(vec![LinkStatus::Connected {
            ssid: "workshop".into(),
        }]);
        let tracker = TaskTracker::new();
        let token = CancellationToken::new();
        let orchestrator = fixture.orchestrator(&tracker, &token);
        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(Err(io_error())).unwrap();

        let result = orchestrator.run(ChannelEvents(rx)).await;

        assert!(matches!(result, Err(BridgeError::BrokerConnect(_))));
        token.cancel();
        tracker.close();
        tracker.wait().await;
    }

    #[tokio::test(start_paused = true)]
    async fn silent_broker_times_out() {
        let fixture = Fixture::new(vec![LinkStatus::Connected {
            ssid: "workshop".into(),
        }]);
        let tracker = TaskTracker::new();
        let token = CancellationToken::new();
        let orchestrator = fixture.orchestrator(&tracker, &token);
        let (_tx, rx) = mpsc::unbounded_channel();

        let started = tokio::time::Instant::now();
        let result = orchestrator.run(ChannelEvents(rx)).await;

        assert!(matches!(result, Err(BridgeError::BrokerTimeout { seconds: 30 })));
        assert!(started.elapsed() >= Duration::from_secs(30));
        token.cancel();
        tracker.close();
        tracker.wait().await;
    }
}
