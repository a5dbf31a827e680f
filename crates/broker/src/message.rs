use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::Result;

/// Header interpreted by the delayed-message exchange: deferral in milliseconds.
pub const X_DELAY_HEADER: &str = "x-delay";

const JSON_CONTENT_TYPE: &str = "application/json";

/// A typed application header value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderValue {
    Int(i64),
    Text(String),
}

impl HeaderValue {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            HeaderValue::Int(v) => Some(*v),
            HeaderValue::Text(_) => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            HeaderValue::Text(v) => Some(v),
            HeaderValue::Int(_) => None,
        }
    }
}

/// A message as published to, or consumed from, a queue.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Message {
    pub payload: Vec<u8>,
    pub content_type: Option<String>,
    pub headers: BTreeMap<String, HeaderValue>,
}

impl Message {
    /// Creates a message with a raw payload.
    pub fn new(payload: impl Into<Vec<u8>>) -> Self {
        Self {
            payload: payload.into(),
            ..Self::default()
        }
    }

    /// Creates a JSON message with `content-type: application/json`.
    pub fn json<T: Serialize>(value: &T) -> Result<Self> {
        Ok(Self {
            payload: serde_json::to_vec(value)?,
            content_type: Some(JSON_CONTENT_TYPE.to_string()),
            headers: BTreeMap::new(),
        })
    }

    /// Adds a header.
    pub fn with_header(mut self, key: impl Into<String>, value: HeaderValue) -> Self {
        self.headers.insert(key.into(), value);
        self
    }

    /// Sets the `x-delay` header to the given duration in milliseconds.
    pub fn with_delay(self, delay: Duration) -> Self {
        let millis = i64::try_from(delay.as_millis()).unwrap_or(i64::MAX);
        self.with_header(X_DELAY_HEADER, HeaderValue::Int(millis))
    }

    /// Returns the requested deferral, if the message carries one.
    pub fn delay(&self) -> Option<Duration> {
        self.headers
            .get(X_DELAY_HEADER)
            .and_then(HeaderValue::as_int)
            .map(|ms| Duration::from_millis(u64::try_from(ms).unwrap_or(0)))
    }

    pub fn header(&self, key: &str) -> Option<&HeaderValue> {
        self.headers.get(key)
    }

    /// Decodes the JSON payload.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.payload)?)
    }
}

/// Settles a delivery with the broker.
#[async_trait]
pub trait Acknowledger: Send + Sync {
    /// Confirms the delivery; the broker forgets the message.
    async fn ack(&self) -> Result<()>;

    /// Rejects the delivery, optionally putting it back on the queue.
    async fn nack(&self, requeue: bool) -> Result<()>;
}

/// A message handed to a consumer, pending acknowledgement.
pub struct Delivery {
    pub message: Message,
    /// True if the broker delivered this message before.
    pub redelivered: bool,
    acker: Box<dyn Acknowledger>,
}

impl Delivery {
    pub fn new(message: Message, redelivered: bool, acker: Box<dyn Acknowledger>) -> Self {
        Self {
            message,
            redelivered,
            acker,
        }
    }

    pub async fn ack(&self) -> Result<()> {
        self.acker.ack().await
    }

    pub async fn nack(&self, requeue: bool) -> Result<()> {
        self.acker.nack(requeue).await
    }
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery")
            .field("message", &self.message)
            .field("redelivered", &self.redelivered)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_message_sets_content_type() {
        let msg = Message::json(&serde_json::json!({"id": "tx-1", "action": "c"})).unwrap();
        assert_eq!(msg.content_type.as_deref(), Some("application/json"));

        let decoded: serde_json::Value = msg.decode().unwrap();
        assert_eq!(decoded["action"], "c");
    }

    #[test]
    fn with_delay_sets_x_delay_in_millis() {
        let msg = Message::new("transactionId1").with_delay(Duration::from_millis(500));
        assert_eq!(msg.header(X_DELAY_HEADER), Some(&HeaderValue::Int(500)));
        assert_eq!(msg.delay(), Some(Duration::from_millis(500)));
    }

    #[test]
    fn message_without_delay_header() {
        let msg = Message::new("payload");
        assert_eq!(msg.delay(), None);
    }
}
