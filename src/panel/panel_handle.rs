//! Panel Handle - wiring of the button/LED panel
//!
//! Claims the GPIO lines, spawns the debouncer and publisher tasks on the
//! shared tracker and hands out the inbound mirror handler for the router.

use rppal::gpio::Gpio;
use rumqttc::QoS;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::info;

use super::debounce::{Debouncer, InputChange};
use super::event_collector::{InputCollector, RawEdge, EDGE_QUEUE_CAPACITY};
use super::outputs::{GpioOutput, InputMirrorHandler, OutputLine};
use super::publisher::ChangePublisher;
use super::PanelError;
use crate::config::{LineConfig, PanelConfig};
use crate::mqtt::engine::MqttEngine;
use crate::time_sync::rtc::DeviceClock;

const CHANGE_QUEUE_CAPACITY: usize = 16;

pub struct PanelHandle {
    _collector: InputCollector,
    mirror: Arc<InputMirrorHandler>,
}

impl PanelHandle {
    pub fn spawn(
        config: &PanelConfig,
        engine: Arc<dyn MqttEngine>,
        publish_qos: QoS,
        clock: Arc<dyn DeviceClock>,
        tracker: &TaskTracker,
        token: CancellationToken,
    ) -> Result<Self, PanelError> {
        info!(
            "Initializing panel with {} inputs, {} outputs, debounce {} ms",
            config.inputs.len(),
            config.outputs.len(),
            config.debounce_ms
        );
        let gpio = Gpio::new()?;

        let outputs = config
            .outputs
            .iter()
            .map(|line| {
                GpioOutput::claim(&gpio, line.pin).map(|o| Arc::new(o) as Arc<dyn OutputLine>)
            })
            .collect::<Result<Vec<_>, _>>()?;
        let mirror = Arc::new(InputMirrorHandler::new(&config.outputs, outputs));

        let (edge_tx, edge_rx) = mpsc::channel(EDGE_QUEUE_CAPACITY);
        let collector = InputCollector::attach(&gpio, &config.inputs, edge_tx)?;
        info!("Armed {} input interrupts", collector.len());

        spawn_pipeline(
            &config.inputs,
            config.debounce_window(),
            edge_rx,
            ChangePublisher::new(engine, publish_qos),
            clock,
            tracker,
            token,
        );

        Ok(Self {
            _collector: collector,
            mirror,
        })
    }

    pub fn mirror(&self) -> Arc<InputMirrorHandler> {
        self.mirror.clone()
    }
}

/// Spawns debouncer and publisher, fed by `edges`.
pub fn spawn_pipeline(
    inputs: &[LineConfig],
    window: Duration,
    edges: mpsc::Receiver<RawEdge>,
    publisher: ChangePublisher,
    clock: Arc<dyn DeviceClock>,
    tracker: &TaskTracker,
    token: CancellationToken,
) {
    let (change_tx, change_rx) = mpsc::channel::<InputChange>(CHANGE_QUEUE_CAPACITY);
    let debouncer = Debouncer::new(inputs, window, clock, change_tx);

    tracker.spawn(debouncer.run(edges, token.clone()));
    tracker.spawn(publisher.run(change_rx, token));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mqtt::router::tests::RecordingEngine;
    use crate::time_sync::rtc::SoftRtc;
    use chrono::{TimeZone, Utc};
    use rppal::gpio::Level;
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn debounced_press_is_published_twice() {
        let engine = Arc::new(RecordingEngine::default());
        let clock = Arc::new(SoftRtc::new());
        clock.set_utc(Utc.with_ymd_and_hms(2024, 3, 2, 14, 5, 9).unwrap());
        let tracker = TaskTracker::new();
        let token = CancellationToken::new();
        let (edge_tx, edge_rx) = mpsc::channel(EDGE_QUEUE_CAPACITY);

        let base = Instant::now();
        spawn_pipeline(
            &PanelConfig::default().inputs,
            Duration::from_millis(20),
            edge_rx,
            ChangePublisher::new(engine.clone(), QoS::AtLeastOnce),
            clock,
            &tracker,
            token.clone(),
        );

        // bounce: only the first low edge after the window counts
        for (offset, level) in [(100, Level::Low), (102, Level::High), (104, Level::Low)] {
            edge_tx
                .send(RawEdge {
                    input: 0,
                    level,
                    at: base + Duration::from_millis(offset),
                })
                .await
                .unwrap();
        }
        tokio::time::sleep(Duration::from_millis(50)).await;

        token.cancel();
        tracker.close();
        tracker.wait().await;

        assert_eq!(
            engine.requests(),
            vec![
                "publish inputs/button0/isPressed True AtLeastOnce",
                "publish inputs/button0/lastChangedAt 2024-03-02T14:05:09+00:00 AtLeastOnce"
            ]
        );
    }
}
