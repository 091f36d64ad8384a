use lapin::options::{ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions};
use lapin::types::FieldTable;
use lapin::{Channel, ExchangeKind};
use tracing::info;

use crate::config::{Direction, Options};

/// Immutable routing description derived once from the options.
#[derive(Debug, Clone)]
pub struct Topology {
    pub exchange: String,
    pub queue: String,
    pub routing_key: String,
    pub declare: bool,
    pub durable: bool,
}

impl Topology {
    pub fn from_options(options: &Options) -> Self {
        Self {
            exchange: options.exchange.clone(),
            queue: options.queue.clone(),
            routing_key: options.routing_key().to_string(),
            declare: !options.no_declare,
            durable: options.persistent,
        }
    }

    /// Prepares routing on the broker. Send mode declares the exchange;
    /// receive mode declares the queue and binds it with the routing key.
    /// A no-op when declaration is suppressed. Any failure here is fatal to
    /// the run: a mis-bound topology drops messages silently.
    pub async fn bind(&self, channel: &Channel, direction: Direction) -> Result<(), BindError> {
        if !self.declare {
            info!("Topology declaration suppressed");
            return Ok(());
        }

        match direction {
            Direction::In => {
                channel
                    .exchange_declare(
                        &self.exchange,
                        ExchangeKind::Direct,
                        ExchangeDeclareOptions {
                            durable: self.durable,
                            ..Default::default()
                        },
                        FieldTable::default(),
                    )
                    .await
                    .map_err(|e| {
                        BindError::DeclareFailed(format!("exchange {:?}: {e}", self.exchange))
                    })?;

                info!(
                    exchange = %self.exchange,
                    durable = self.durable,
                    "Exchange declared"
                );
            }
            Direction::Out => {
                channel
                    .queue_declare(
                        &self.queue,
                        QueueDeclareOptions {
                            durable: self.durable,
                            ..Default::default()
                        },
                        FieldTable::default(),
                    )
                    .await
                    .map_err(|e| {
                        BindError::DeclareFailed(format!("queue {:?}: {e}", self.queue))
                    })?;

                channel
                    .queue_bind(
                        &self.queue,
                        &self.exchange,
                        &self.routing_key,
                        QueueBindOptions::default(),
                        FieldTable::default(),
                    )
                    .await
                    .map_err(|e| {
                        BindError::BindFailed(format!(
                            "queue {:?} to exchange {:?} with key {:?}: {e}",
                            self.queue, self.exchange, self.routing_key
                        ))
                    })?;

                info!(
                    queue = %self.queue,
                    exchange = %self.exchange,
                    routing_key = %self.routing_key,
                    "Queue declared and bound"
                );
            }
        }

        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BindError {
    #[error("Failed to declare {0}")]
    DeclareFailed(String),

    #[error("Failed to bind {0}")]
    BindFailed(String),
}
