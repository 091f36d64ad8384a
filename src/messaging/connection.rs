use lapin::{Channel, Connection, ConnectionProperties};
use tracing::{error, info};

use crate::config::Options;

/// The single broker session for a run: one authenticated connection and
/// one channel carrying every operation. Created once at startup, closed
/// exactly once by main after the active loop has exited.
pub struct Session {
    connection: Connection,
    channel: Channel,
}

impl Session {
    pub async fn connect(options: &Options) -> Result<Self, ConnectionError> {
        let uri = options.amqp_uri();
        info!(
            host = %options.host,
            port = options.port,
            user = %options.username,
            "Connecting to broker"
        );

        let connection = Connection::connect(&uri, ConnectionProperties::default())
            .await
            .map_err(|e| {
                error!(error = %e, host = %options.host, "Failed to connect to broker");
                ConnectionError::ConnectionFailed(e.to_string())
            })?;

        let channel = connection.create_channel().await.map_err(|e| {
            error!(error = %e, "Failed to create channel");
            ConnectionError::ChannelFailed(e.to_string())
        })?;

        info!(channel_id = channel.id(), "Broker session established");

        Ok(Self {
            connection,
            channel,
        })
    }

    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    pub fn is_connected(&self) -> bool {
        self.connection.status().connected()
    }

    /// Scoped release: the channel first, then the connection. Both are
    /// attempted even if the first fails; failures are collected into one
    /// error so teardown itself never aborts early.
    pub async fn close(self) -> Result<(), ConnectionError> {
        info!("Closing broker session");

        let mut failures = Vec::new();

        if let Err(e) = self.channel.close(200, "Normal shutdown").await {
            error!(error = %e, "Failed to close channel gracefully");
            failures.push(format!("channel: {e}"));
        }

        if let Err(e) = self.connection.close(200, "Normal shutdown").await {
            error!(error = %e, "Failed to close connection gracefully");
            failures.push(format!("connection: {e}"));
        }

        if failures.is_empty() {
            info!("Broker session closed");
            Ok(())
        } else {
            Err(ConnectionError::ShutdownFailed(failures.join("; ")))
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("Failed to connect to broker: {0}")]
    ConnectionFailed(String),

    #[error("Failed to create channel: {0}")]
    ChannelFailed(String),

    #[error("Failed to shutdown session gracefully: {0}")]
    ShutdownFailed(String),
}
