use std::fmt;

/// A publish received from the broker, handed to the router one at a time.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub retained: bool,
}

impl fmt::Display for InboundMessage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let text = self.payload_text();
        let preview: String = text.chars().take(32).collect();
        write!(f, "{} = '{}'", self.topic, preview)?;
        if self.retained {
            write!(f, " (retained)")?;
        }
        Ok(())
    }
}

impl InboundMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>, retained: bool) -> Self {
        InboundMessage {
            topic: topic.into(),
            payload: payload.into(),
            retained,
        }
    }

    /// Payload as text; invalid UTF-8 is replaced rather than rejected.
    pub fn payload_text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

/// A publish the device wants to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub topic: String,
    pub payload: String,
}

impl OutboundMessage {
    pub fn from_topic(topic: impl Into<String>, payload: impl Into<String>) -> Self {
        OutboundMessage {
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}
