use rppal::gpio::{Event, Gpio, InputPin, Level, Trigger};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::PanelError;
use crate::config::LineConfig;

/// Capacity of the interrupt-to-task edge queue. A full queue drops edges.
pub const EDGE_QUEUE_CAPACITY: usize = 64;

/// One hardware edge as seen by the interrupt callback.
#[derive(Debug, Clone, Copy)]
pub struct RawEdge {
    pub input: usize,
    pub level: Level,
    pub at: Instant,
}

/// Owns the input pins; interrupts stay armed while this lives.
pub struct InputCollector {
    pins: Vec<InputPin>,
}

impl InputCollector {
    /// Configures every input with pull-up and both-edge interrupts.
    ///
    /// The callback runs on rppal's interrupt thread and only enqueues.
    pub fn attach(
        gpio: &Gpio,
        lines: &[LineConfig],
        sender: mpsc::Sender<RawEdge>,
    ) -> Result<Self, PanelError> {
        let mut pins = Vec::with_capacity(lines.len());

        for (index, line) in lines.iter().enumerate() {
            let mut pin = gpio.get(line.pin)?.into_input_pullup();
            let tx = sender.clone();
            let name = line.name.clone();

            pin.set_async_interrupt(Trigger::Both, None, move |event: Event| {
                let level = match event.trigger {
                    Trigger::RisingEdge => Level::High,
                    _ => Level::Low,
                };
                let edge = RawEdge {
                    input: index,
                    level,
                    at: Instant::now(),
                };
                if tx.try_send(edge).is_err() {
                    warn!("Edge queue full, dropping edge of '{}'", name);
                }
            })?;

            info!(
                "Input '{}' on GPIO {} armed (level {:?})",
                line.name,
                line.pin,
                pin.read()
            );
            pins.push(pin);
        }

        debug!("Input collector attached to {} pins", pins.len());
        Ok(Self { pins })
    }

    pub fn len(&self) -> usize {
        self.pins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pins.is_empty()
    }
}
