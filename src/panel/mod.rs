//! Button and LED panel
//!
//! Turns noisy button edges into published state changes and mirrors
//! inbound button state onto LEDs:
//!
//! 1. [`event_collector`] - GPIO interrupts to a bounded edge queue
//! 2. [`debounce`] - Window + level-change filter, runs as a task
//! 3. [`publisher`] - `isPressed` / `lastChangedAt` publishes
//! 4. [`outputs`] - LED lines and the inbound mirror handler
//! 5. [`panel_handle`] - Wiring and lifecycle
//!
//! # Architecture
//!
//! ```text
//! GPIO IRQ ──► edge queue ──► Debouncer ──► ChangePublisher ──► broker
//!             (try_send, 64)  (20 ms)       (QoS 1)
//!
//! broker ──► TopicRouter ──► InputMirrorHandler ──► LED
//! ```

pub mod debounce;
pub mod event_collector;
pub mod outputs;
pub mod panel_handle;
pub mod publisher;

#[derive(Debug, thiserror::Error)]
pub enum PanelError {
    #[error("GPIO error: {0}")]
    Gpio(#[from] rppal::gpio::Error),

    #[error("LED write failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Output line lock poisoned")]
    Poisoned,
}
