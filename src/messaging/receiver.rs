use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use lapin::Channel;
use lapin::options::{BasicAckOptions, BasicConsumeOptions};
use lapin::types::FieldTable;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::message::shannon_entropy;
use crate::shutdown::Shutdown;
use crate::stats::RunStats;

/// What the consume stream produced next.
#[derive(Debug)]
pub enum SourceEvent {
    Delivery(InboundDelivery),
    /// The broker cancelled the subscription (mirrored-queue failover).
    Cancelled,
    /// The stream ended with the session down; nothing more will arrive.
    Closed,
}

#[derive(Debug)]
pub struct InboundDelivery {
    pub payload: Vec<u8>,
    pub delivery_tag: u64,
    pub redelivered: bool,
}

/// Seam between the receiver loop and the broker's consume stream, so the
/// loop can be exercised against scripted deliveries.
#[async_trait]
pub trait DeliverySource: Send {
    async fn next_event(&mut self) -> Result<SourceEvent, ConsumeError>;
    async fn ack(&mut self, delivery_tag: u64) -> Result<(), ConsumeError>;
    async fn resubscribe(&mut self) -> Result<(), ConsumeError>;
}

/// Live subscription on the run's channel. A fresh consumer tag is issued
/// per subscribe so a resubscribe after broker cancellation never collides
/// with the old registration.
pub struct QueueSource {
    channel: Channel,
    queue: String,
    consumer: lapin::Consumer,
}

impl QueueSource {
    pub async fn subscribe(channel: Channel, queue: String) -> Result<Self, ConsumeError> {
        let consumer = Self::consume(&channel, &queue).await?;
        Ok(Self {
            channel,
            queue,
            consumer,
        })
    }

    async fn consume(channel: &Channel, queue: &str) -> Result<lapin::Consumer, ConsumeError> {
        let consumer_tag = format!("rmq-{}", Uuid::new_v4());
        let consumer = channel
            .basic_consume(
                queue,
                &consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| {
                error!(error = %e, queue = %queue, "Failed to subscribe");
                ConsumeError::SubscribeFailed(e.to_string())
            })?;
        info!(queue = %queue, consumer_tag = %consumer_tag, "Subscribed");
        Ok(consumer)
    }
}

#[async_trait]
impl DeliverySource for QueueSource {
    async fn next_event(&mut self) -> Result<SourceEvent, ConsumeError> {
        match self.consumer.next().await {
            Some(Ok(delivery)) => Ok(SourceEvent::Delivery(InboundDelivery {
                payload: delivery.data,
                delivery_tag: delivery.delivery_tag,
                redelivered: delivery.redelivered,
            })),
            Some(Err(e)) => Err(ConsumeError::ReceiveFailed(e.to_string())),
            // The stream ends either because the broker cancelled this
            // consumer (channel still up) or because the session went away.
            None if self.channel.status().connected() => Ok(SourceEvent::Cancelled),
            None => Ok(SourceEvent::Closed),
        }
    }

    async fn ack(&mut self, delivery_tag: u64) -> Result<(), ConsumeError> {
        self.channel
            .basic_ack(delivery_tag, BasicAckOptions::default())
            .await
            .map_err(|e| ConsumeError::AckFailed(e.to_string()))
    }

    async fn resubscribe(&mut self) -> Result<(), ConsumeError> {
        self.consumer = Self::consume(&self.channel, &self.queue).await?;
        Ok(())
    }
}

/// Terminal report of a receive run. The loop only ever stops cleanly; a
/// broker cancellation either renews the subscription or ends the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceiverOutcome {
    pub resubscribes: u64,
}

/// Drains deliveries from a queue, acking each after it is counted, until
/// the stream ends or the run is cancelled.
pub struct Receiver<S: DeliverySource> {
    source: S,
    stats: Arc<RunStats>,
    shutdown: Arc<Shutdown>,
    renew: bool,
    track_entropy: bool,
}

impl<S: DeliverySource> Receiver<S> {
    pub fn new(
        source: S,
        stats: Arc<RunStats>,
        shutdown: Arc<Shutdown>,
        renew: bool,
        track_entropy: bool,
    ) -> Self {
        Self {
            source,
            stats,
            shutdown,
            renew,
            track_entropy,
        }
    }

    pub async fn run(mut self) -> ReceiverOutcome {
        info!(renew = self.renew, "Receiver starting");
        let mut resubscribes = 0u64;

        loop {
            let event = tokio::select! {
                _ = self.shutdown.wait() => {
                    info!("Receiver cancelled");
                    break;
                }
                event = self.source.next_event() => event,
            };

            match event {
                Ok(SourceEvent::Delivery(delivery)) => {
                    self.stats.record_received(delivery.payload.len());
                    if self.track_entropy {
                        self.stats
                            .record_entropy(shannon_entropy(&delivery.payload));
                    }
                    debug!(
                        delivery_tag = delivery.delivery_tag,
                        redelivered = delivery.redelivered,
                        size = delivery.payload.len(),
                        "Delivery received"
                    );
                    if let Err(e) = self.source.ack(delivery.delivery_tag).await {
                        warn!(error = %e, delivery_tag = delivery.delivery_tag, "Failed to ack delivery");
                    }
                }
                Ok(SourceEvent::Cancelled) => {
                    if self.renew && !self.shutdown.is_triggered() {
                        info!("Subscription cancelled by broker, resubscribing");
                        match self.source.resubscribe().await {
                            Ok(()) => resubscribes += 1,
                            Err(e) => {
                                error!(error = %e, "Resubscribe failed, stopping");
                                break;
                            }
                        }
                    } else {
                        info!("Subscription cancelled by broker, stopping");
                        break;
                    }
                }
                Ok(SourceEvent::Closed) => {
                    warn!("Delivery stream closed, stopping");
                    break;
                }
                Err(e) => {
                    // A bad frame on one delivery is not fatal to the run.
                    error!(error = %e, "Error receiving delivery");
                }
            }
        }

        info!(resubscribes, "Receiver stopped");
        ReceiverOutcome { resubscribes }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConsumeError {
    #[error("Failed to subscribe: {0}")]
    SubscribeFailed(String),

    #[error("Failed to receive delivery: {0}")]
    ReceiveFailed(String),

    #[error("Failed to ack delivery: {0}")]
    AckFailed(String),
}
