use chrono::{DateTime, Utc};
use rppal::gpio::Level;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::event_collector::RawEdge;
use crate::config::LineConfig;
use crate::time_sync::rtc::{format_iso8601, DeviceClock};

/// Debounce state of one input line.
#[derive(Debug, Clone)]
pub struct DebouncedInput {
    pub id: usize,
    level: Level,
    last_transition: Instant,
    window: Duration,
}

impl DebouncedInput {
    /// Inputs are pulled up, so an idle line reads high.
    pub fn new(id: usize, window: Duration, created_at: Instant) -> Self {
        Self {
            id,
            level: Level::High,
            last_transition: created_at,
            window,
        }
    }

    pub fn level(&self) -> Level {
        self.level
    }

    /// Accepts `level` only outside the window and only if it differs from
    /// the last accepted level.
    pub fn observe(&mut self, level: Level, at: Instant) -> Option<Level> {
        let elapsed = at.saturating_duration_since(self.last_transition);
        if elapsed > self.window && level != self.level {
            self.last_transition = at;
            self.level = level;
            Some(level)
        } else {
            None
        }
    }
}

/// An accepted, timestamped change of one input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputChange {
    pub name: String,
    pub topic_id: String,
    pub level: Level,
    pub changed_at: DateTime<Utc>,
}

impl InputChange {
    pub fn is_pressed(&self) -> bool {
        self.level == Level::Low
    }
}

/// Drains raw edges outside interrupt context and forwards accepted changes.
pub struct Debouncer {
    lines: Vec<LineConfig>,
    inputs: Vec<DebouncedInput>,
    clock: Arc<dyn DeviceClock>,
    changes: mpsc::Sender<InputChange>,
}

impl Debouncer {
    pub fn new(
        lines: &[LineConfig],
        window: Duration,
        clock: Arc<dyn DeviceClock>,
        changes: mpsc::Sender<InputChange>,
    ) -> Self {
        let created_at = Instant::now();
        let inputs = (0..lines.len())
            .map(|id| DebouncedInput::new(id, window, created_at))
            .collect();
        Self {
            lines: lines.to_vec(),
            inputs,
            clock,
            changes,
        }
    }

    pub fn on_edge(&mut self, edge: RawEdge) -> Option<InputChange> {
        let Some(input) = self.inputs.get_mut(edge.input) else {
            warn!("Edge for unknown input #{}", edge.input);
            return None;
        };
        let line = &self.lines[input.id];
        debug!("Input '{}' raw edge to {:?}", line.name, edge.level);

        let level = input.observe(edge.level, edge.at)?;
        // Stamp the change with the moment of the interrupt, not of processing.
        let queued_for =
            chrono::Duration::from_std(Instant::now().saturating_duration_since(edge.at))
                .unwrap_or_else(|_| chrono::Duration::zero());
        let change = InputChange {
            name: line.name.clone(),
            topic_id: line.topic_id.clone(),
            level,
            changed_at: self.clock.now_utc() - queued_for,
        };
        info!(
            "Input '{}' changed to {:?} at {}",
            change.name,
            level,
            format_iso8601(change.changed_at)
        );
        Some(change)
    }

    pub async fn run(mut self, mut edges: mpsc::Receiver<RawEdge>, token: CancellationToken) {
        info!("Starting debouncer for {} inputs", self.inputs.len());
        loop {
            let edge = tokio::select! {
                _ = token.cancelled() => break,
                edge = edges.recv() => match edge {
                    Some(edge) => edge,
                    None => break,
                },
            };
            if let Some(change) = self.on_edge(edge) {
                if self.changes.send(change).await.is_err() {
                    warn!("Change publisher is gone, stopping debouncer");
                    break;
                }
            }
        }
        debug!("Debouncer stopped");
    }
}
