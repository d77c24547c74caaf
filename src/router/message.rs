use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

/// A message delivered to a channel handler
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InboundMessage {
    pub destination: String,
    pub payload: Value,
    pub received_at: DateTime<Utc>,
}

impl InboundMessage {
    pub fn new(destination: impl Into<String>, payload: Value) -> Self {
        Self {
            destination: destination.into(),
            payload,
            received_at: Utc::now(),
        }
    }

    /// Deserialize the payload into a concrete type.
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.payload.clone())
    }
}
