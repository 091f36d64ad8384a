use async_trait::async_trait;
use lapin::options::BasicPublishOptions;
use lapin::{BasicProperties, Channel};

use crate::message::Message;

/// Seam between the sender loop and the wire, so the loop can be exercised
/// without a broker.
#[async_trait]
pub trait MessagePublisher: Send + Sync {
    async fn publish(&self, message: &Message) -> Result<(), PublishError>;

    /// Whether the underlying session can still carry publishes. A failed
    /// publish on a usable session is counted and skipped; an unusable
    /// session terminates the run.
    fn is_usable(&self) -> bool;
}

/// Publishes to a fixed exchange and routing key over the run's channel.
pub struct ExchangePublisher {
    channel: Channel,
    exchange: String,
    routing_key: String,
}

impl ExchangePublisher {
    pub fn new(channel: Channel, exchange: String, routing_key: String) -> Self {
        Self {
            channel,
            exchange,
            routing_key,
        }
    }
}

#[async_trait]
impl MessagePublisher for ExchangePublisher {
    async fn publish(&self, message: &Message) -> Result<(), PublishError> {
        // Delivery mode 2 marks the message durable on the broker.
        let delivery_mode = if message.persistent { 2 } else { 1 };
        let properties = BasicProperties::default().with_delivery_mode(delivery_mode);

        self.channel
            .basic_publish(
                &self.exchange,
                &self.routing_key,
                BasicPublishOptions::default(),
                &message.payload,
                properties,
            )
            .await
            .map_err(|e| PublishError::PublishFailed(e.to_string()))?
            .await
            .map_err(|e| PublishError::ConfirmFailed(e.to_string()))?;

        Ok(())
    }

    fn is_usable(&self) -> bool {
        self.channel.status().connected()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("Failed to publish message: {0}")]
    PublishFailed(String),

    #[error("Broker rejected publish: {0}")]
    ConfirmFailed(String),
}
