use async_trait::async_trait;
use color_eyre::eyre::eyre;
use rppal::gpio::{Gpio, OutputPin};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

use super::PanelError;
use crate::config::LineConfig;
use crate::mqtt::message_manager::InboundMessage;
use crate::mqtt::router::TopicHandler;

/// A digital output such as an LED.
pub trait OutputLine: Send + Sync {
    fn set(&self, on: bool) -> Result<(), PanelError>;
}

pub struct GpioOutput {
    pin: Mutex<OutputPin>,
}

impl GpioOutput {
    /// Claims `pin` as an output, initially low.
    pub fn claim(gpio: &Gpio, pin: u8) -> Result<Self, PanelError> {
        let pin = gpio.get(pin)?.into_output_low();
        Ok(Self {
            pin: Mutex::new(pin),
        })
    }
}

impl OutputLine for GpioOutput {
    fn set(&self, on: bool) -> Result<(), PanelError> {
        let mut pin = self.pin.lock().map_err(|_| PanelError::Poisoned)?;
        if on {
            pin.set_high();
        } else {
            pin.set_low();
        }
        Ok(())
    }
}

/// Mirrors `inputs/<topic_id>/isPressed` onto the output wired to `topic_id`.
pub struct InputMirrorHandler {
    outputs: HashMap<String, (String, Arc<dyn OutputLine>)>,
}

impl InputMirrorHandler {
    pub fn new(lines: &[LineConfig], outputs: Vec<Arc<dyn OutputLine>>) -> Self {
        let outputs = lines
            .iter()
            .zip(outputs)
            .map(|(line, output)| (line.topic_id.clone(), (line.name.clone(), output)))
            .collect();
        Self { outputs }
    }
}

#[async_trait]
impl TopicHandler for InputMirrorHandler {
    async fn handle(&self, message: &InboundMessage) -> color_eyre::Result<()> {
        let segments: Vec<&str> = message.topic.split('/').collect();
        let [_, topic_id, attribute, ..] = segments.as_slice() else {
            return Err(eyre!("Unexpected topic shape '{}'", message.topic));
        };
        let payload = message.payload_text();
        debug!("Received message for topic {}: {}", message.topic, payload);

        match *attribute {
            "isPressed" => {
                let on = payload == "True";
                match self.outputs.get(*topic_id) {
                    Some((name, output)) => {
                        output.set(on)?;
                        info!("Output '{}' switched {}", name, if on { "on" } else { "off" });
                    }
                    None => warn!("No output wired to '{}'", topic_id),
                }
            }
            "lastChangedAt" => info!("Input '{}' changed at {}", topic_id, payload),
            other => debug!("Ignoring attribute '{}' of '{}'", other, topic_id),
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::PanelConfig;

    #[derive(Default)]
    pub(crate) struct FakeOutput {
        pub states: Mutex<Vec<bool>>,
    }

    impl FakeOutput {
        pub(crate) fn last(&self) -> Option<bool> {
            self.states.lock().unwrap().last().copied()
        }
    }

    impl OutputLine for FakeOutput {
        fn set(&self, on: bool) -> Result<(), PanelError> {
            self.states.lock().unwrap().push(on);
            Ok(())
        }
    }

    fn mirror() -> (InputMirrorHandler, Vec<Arc<FakeOutput>>) {
        let fakes: Vec<Arc<FakeOutput>> = (0..3).map(|_| Arc::new(FakeOutput::default())).collect();
        let outputs = fakes
            .iter()
            .map(|f| f.clone() as Arc<dyn OutputLine>)
            .collect();
        (InputMirrorHandler::new(&PanelConfig::default().outputs, outputs), fakes)
    }

    #[tokio::test]
    async fn released_button_switches_matching_led_off() {
        let (handler, fakes) = mirror();

        handler
            .handle(&InboundMessage::new("inputs/button1/isPressed", "False", false))
            .await
            .unwrap();

        assert_eq!(fakes[1].last(), Some(false));
        assert_eq!(fakes[0].last(), None);
        assert_eq!(fakes[2].last(), None);
    }

    #[tokio::test]
    async fn pressed_button_switches_led_on() {
        let (handler, fakes) = mirror();

        handler
            .handle(&InboundMessage::new("inputs/button0/isPressed", "True", true))
            .await
            .unwrap();

        assert_eq!(fakes[0].last(), Some(true));
    }

    #[tokio::test]
    async fn other_attributes_and_ids_are_ignored() {
        let (handler, fakes) = mirror();

        for topic in [
            "inputs/button0/lastChangedAt",
            "inputs/button7/isPressed",
            "inputs/button0/colour",
        ] {
            handler
                .handle(&InboundMessage::new(topic, "True", false))
                .await
                .unwrap();
        }

        assert!(fakes.iter().all(|f| f.last().is_none()));
    }

    #[tokio::test]
    async fn short_topic_is_an_error() {
        let (handler, _fakes) = mirror();

        assert!(handler
            .handle(&InboundMessage::new("inputs/button0", "True", false))
            .await
            .is_err());
    }
}
