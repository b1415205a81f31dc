//! # Status Signaler
//!
//! Renders the current [`ConnectionPhase`] on a single LED. The signaler only
//! reads the phase; it never waits for the orchestrator and the orchestrator
//! never waits for it.
//!
//! | Phase                | Rendering                           |
//! |----------------------|-------------------------------------|
//! | `Undefined`          | off                                 |
//! | `ConnectingLink`     | 2 short flashes, then a pause        |
//! | `SynchronizingClock` | 3 short flashes, then a pause        |
//! | `ConnectingBroker`   | steady on                           |
//! | `Connected`          | 1 short flash every ~2 s            |
//! | `Interrupted`        | 1 s on / 1 s off                    |

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::orchestrator::ConnectionPhase;
use crate::panel::outputs::OutputLine;
use crate::panel::PanelError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlinkPattern {
    pub count: u32,
    pub on: Duration,
    pub off: Duration,
    /// Pause after the last flash, measured from the last switch-off.
    pub trailing: Duration,
}

impl BlinkPattern {
    pub const fn flashes(count: u32) -> Self {
        Self {
            count,
            on: Duration::from_millis(10),
            off: Duration::from_millis(100),
            trailing: Duration::from_millis(500),
        }
    }

    // Extra wait after the last `off`, never negative.
    fn extra_pause(&self) -> Duration {
        self.trailing.saturating_sub(self.off)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rendering {
    Off,
    On,
    Blink(BlinkPattern),
}

pub fn rendering_for(phase: ConnectionPhase) -> Rendering {
    match phase {
        ConnectionPhase::Undefined => Rendering::Off,
        ConnectionPhase::ConnectingLink => Rendering::Blink(BlinkPattern::flashes(2)),
        ConnectionPhase::SynchronizingClock => Rendering::Blink(BlinkPattern::flashes(3)),
        ConnectionPhase::ConnectingBroker => Rendering::On,
        ConnectionPhase::Connected => Rendering::Blink(BlinkPattern {
            off: Duration::from_millis(2000),
            ..BlinkPattern::flashes(1)
        }),
        ConnectionPhase::Interrupted => Rendering::Blink(BlinkPattern {
            count: 1,
            on: Duration::from_millis(1000),
            off: Duration::from_millis(1000),
            trailing: Duration::from_millis(1000),
        }),
    }
}

/// Status LED exposed through the kernel LED class (`/sys/class/leds/<name>`).
#[derive(Debug, Clone)]
pub struct SysfsLed {
    brightness: PathBuf,
}

impl SysfsLed {
    /// Detaches the kernel trigger so the LED only follows our writes.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, PanelError> {
        let path = path.into();
        if let Err(e) = std::fs::write(path.join("trigger"), "none") {
            debug!("Could not clear LED trigger at {}: {}", path.display(), e);
        }
        let led = Self {
            brightness: path.join("brightness"),
        };
        led.set(false)?;
        Ok(led)
    }
}

impl OutputLine for SysfsLed {
    fn set(&self, on: bool) -> Result<(), PanelError> {
        std::fs::write(&self.brightness, if on { "1" } else { "0" })?;
        Ok(())
    }
}

pub struct StatusSignaler {
    phase: watch::Receiver<ConnectionPhase>,
    led: Arc<dyn OutputLine>,
    poll_interval: Duration,
    lit: Option<bool>,
    failing: bool,
}

impl StatusSignaler {
    pub fn new(
        phase: watch::Receiver<ConnectionPhase>,
        led: Arc<dyn OutputLine>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            phase,
            led,
            poll_interval,
            lit: None,
            failing: false,
        }
    }

    fn write(&mut self, on: bool) {
        if self.lit == Some(on) {
            return;
        }
        match self.led.set(on) {
            Ok(()) => {
                self.lit = Some(on);
                if self.failing {
                    info!("Status LED writable again");
                    self.failing = false;
                }
            }
            Err(e) => {
                if !self.failing {
                    warn!("Status LED write failed: {}", e);
                    self.failing = true;
                }
            }
        }
    }

    async fn blink(&mut self, pattern: BlinkPattern) {
        for _ in 0..pattern.count {
            self.write(true);
            sleep(pattern.on).await;
            self.write(false);
            sleep(pattern.off).await;
        }
        sleep(pattern.extra_pause()).await;
    }

    async fn render(&mut self, rendering: Rendering) {
        match rendering {
            Rendering::Off => self.write(false),
            Rendering::On => self.write(true),
            Rendering::Blink(pattern) => self.blink(pattern).await,
        }
    }

    pub async fn run(mut self, token: CancellationToken) {
        info!("Starting status signaler");
        let mut last_phase = None;
        loop {
            let phase = *self.phase.borrow();
            if last_phase != Some(phase) {
                debug!("Status LED now shows {:?}", phase);
                last_phase = Some(phase);
            }

            let rendering = rendering_for(phase);
            tokio::select! {
                _ = token.cancelled() => break,
                _ = async {
                    self.render(rendering).await;
                    sleep(self.poll_interval).await;
                } => {}
            }
        }
        self.write(false);
        debug!("Status signaler stopped");
    }
}
