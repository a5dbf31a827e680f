//! Broker plumbing for outcome and watchdog messages.
//!
//! [`Broker`] is the seam between the transaction layer and the message
//! broker. [`InMemoryBroker`] backs tests and single-process setups;
//! [`AmqpBroker`] talks to RabbitMQ with the delayed-message exchange plugin.

pub mod amqp;
pub mod broker;
pub mod consumer;
pub mod error;
pub mod memory;
pub mod message;
pub mod retry;

pub use amqp::{AmqpBroker, AmqpConfig};
pub use broker::{Broker, DeliveryStream};
pub use consumer::{DeliveryHandler, spawn_consumer};
pub use error::{BrokerError, Result};
pub use memory::InMemoryBroker;
pub use message::{Acknowledger, Delivery, HeaderValue, Message, X_DELAY_HEADER};
pub use retry::{RetryPolicy, retry};
