use thiserror::Error;

/// Errors raised by broker operations.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// The broker connection dropped or could not be established.
    #[error("Broker connection lost: {0}")]
    ConnectionLost(String),

    /// The channel was closed underneath an operation.
    #[error("Broker channel closed: {0}")]
    ChannelClosed(String),

    /// A message was addressed to a queue that was never declared.
    #[error("Queue not found: {0}")]
    QueueNotFound(String),

    /// The broker refused responsibility for a published message.
    #[error("Publish to {0} was not confirmed by the broker")]
    Nacked(String),

    /// The broker rejected the operation.
    #[error("Broker protocol error: {0}")]
    Protocol(String),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl BrokerError {
    /// Returns true if retrying the same operation may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            BrokerError::ConnectionLost(_)
                | BrokerError::ChannelClosed(_)
                | BrokerError::Nacked(_)
        )
    }
}

impl From<lapin::Error> for BrokerError {
    fn from(err: lapin::Error) -> Self {
        match err {
            lapin::Error::ProtocolError(e) => BrokerError::Protocol(e.to_string()),
            lapin::Error::InvalidChannelState(state) => {
                BrokerError::ChannelClosed(format!("invalid channel state: {state:?}"))
            }
            other => BrokerError::ConnectionLost(other.to_string()),
        }
    }
}

/// Result type for broker operations.
pub type Result<T> = std::result::Result<T, BrokerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_failures_are_transient() {
        assert!(BrokerError::ConnectionLost("reset".into()).is_transient());
        assert!(BrokerError::ChannelClosed("closed".into()).is_transient());
    }

    #[test]
    fn routing_and_protocol_failures_are_permanent() {
        assert!(!BrokerError::QueueNotFound("job".into()).is_transient());
        assert!(!BrokerError::Protocol("access refused".into()).is_transient());
    }

    #[test]
    fn lapin_protocol_errors_are_permanent() {
        use lapin::protocol::{AMQPError, AMQPErrorKind, AMQPSoftError};

        let refused = lapin::Error::ProtocolError(AMQPError::new(
            AMQPErrorKind::Soft(AMQPSoftError::PRECONDITIONFAILED),
            "inequivalent arg 'durable'".into(),
        ));
        let err = BrokerError::from(refused);
        assert!(matches!(err, BrokerError::Protocol(_)));
        assert!(!err.is_transient());
    }

    #[test]
    fn lapin_channel_state_errors_are_transient() {
        let err = BrokerError::from(lapin::Error::InvalidChannelState(
            lapin::ChannelState::Closed,
        ));
        assert!(matches!(err, BrokerError::ChannelClosed(_)));
        assert!(err.is_transient());
    }
}
